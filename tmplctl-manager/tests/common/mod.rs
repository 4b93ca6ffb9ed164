#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tmplctl_core::{ControllerConfig, Node, TaskEnv, TemplateSpec};
use tmplctl_manager::{RenderFailure, TemplateManager, TemplateManagerBuilder};
use tmplctl_store::{MemoryKv, MemorySecrets};
use tmplctl_test_utils::{init_tracing, mock_node, wait_for, MockTaskHooks};

/// How long tests wait for something that should happen.
pub const EVENTUALLY: Duration = Duration::from_secs(5);
/// How long tests wait to be sure something does not happen.
pub const QUIET: Duration = Duration::from_millis(250);

pub fn test_config() -> ControllerConfig {
    ControllerConfig::default()
        .with_retry_interval(Duration::from_millis(10))
        .with_secret_refresh_interval(Duration::from_millis(50))
        .with_block_wait(Duration::from_millis(200))
        .with_stop_timeout(Duration::from_secs(2))
}

/// A manager wired to in-memory stores and a temporary task directory.
pub struct Harness {
    pub hooks: Arc<MockTaskHooks>,
    pub kv: Arc<MemoryKv>,
    pub secrets: Arc<MemorySecrets>,
    pub node: Node,
    pub task_dir: TempDir,
    pub templates: Vec<TemplateSpec>,
    pub already_rendered: bool,
    pub with_backends: bool,
    pub manager: Option<TemplateManager>,
}

impl Harness {
    pub fn new(templates: Vec<TemplateSpec>) -> Self {
        init_tracing();
        Self {
            hooks: MockTaskHooks::new(),
            kv: Arc::new(MemoryKv::new()),
            secrets: Arc::new(MemorySecrets::new()),
            node: mock_node(),
            task_dir: TempDir::new().expect("task dir"),
            templates,
            already_rendered: false,
            with_backends: true,
            manager: None,
        }
    }

    pub fn reattached(mut self) -> Self {
        self.already_rendered = true;
        self
    }

    pub fn without_backends(mut self) -> Self {
        self.with_backends = false;
        self
    }

    pub fn builder(&self) -> TemplateManagerBuilder {
        let builder = TemplateManager::builder()
            .hooks(self.hooks.clone())
            .templates(self.templates.clone())
            .already_rendered(self.already_rendered)
            .config(test_config())
            .task_dir(self.task_dir.path())
            .task_env(TaskEnv::from_node(&self.node));
        if self.with_backends {
            builder
                .kv_backend(self.kv.clone())
                .secret_backend(self.secrets.clone())
        } else {
            builder
        }
    }

    pub fn start(&mut self) -> &TemplateManager {
        let manager = self.builder().build().expect("build manager");
        manager.start().expect("start manager");
        self.manager.insert(manager)
    }

    pub fn manager(&self) -> &TemplateManager {
        self.manager.as_ref().expect("manager started")
    }

    pub async fn stop(&mut self) {
        if let Some(manager) = &self.manager {
            manager.stop().await;
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.task_dir.path().join(relative)
    }

    pub fn read(&self, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.path(relative)).ok()
    }

    pub async fn wait_unblocked(&self) {
        let hooks = self.hooks.clone();
        assert!(
            wait_for(EVENTUALLY, || hooks.unblocks() > 0).await,
            "task was never unblocked"
        );
    }

    pub async fn wait_file(&self, relative: &str, expected: &str) {
        let path = self.path(relative);
        let ok = wait_for(EVENTUALLY, || {
            std::fs::read_to_string(&path).map(|c| c == expected).unwrap_or(false)
        })
        .await;
        assert!(ok, "{} never contained {expected:?}", path.display());
    }

    /// Next failure on `errors`, failing the test if none arrives in time.
    pub async fn next_failure(
        &self,
        errors: &mut tokio::sync::mpsc::UnboundedReceiver<RenderFailure>,
    ) -> RenderFailure {
        tokio::time::timeout(EVENTUALLY, errors.recv())
            .await
            .expect("no failure reported in time")
            .expect("error channel closed")
    }
}
