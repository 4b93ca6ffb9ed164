mod common;

use std::sync::Arc;

use common::{test_config, Harness};
use tmplctl_core::{TaskEnv, TemplateSpec, ValidationError};
use tmplctl_manager::{ManagerError, TemplateManager};
use tmplctl_test_utils::MockTaskHooks;

fn build_err(result: Result<TemplateManager, ManagerError>) -> ManagerError {
    match result {
        Ok(_) => panic!("expected build to fail"),
        Err(err) => err,
    }
}

#[test]
fn missing_inputs_are_reported_in_order() {
    let hooks = MockTaskHooks::new();
    let dir = tempfile::TempDir::new().unwrap();

    let err = build_err(
        TemplateManager::builder()
            .config(test_config())
            .task_dir(dir.path())
            .task_env(TaskEnv::new())
            .build(),
    );
    assert!(err.to_string().contains("task hook"), "{err}");

    let err = build_err(
        TemplateManager::builder()
            .hooks(hooks.clone())
            .task_dir(dir.path())
            .build(),
    );
    assert!(err.to_string().contains("config"), "{err}");

    let err = build_err(
        TemplateManager::builder()
            .hooks(hooks.clone())
            .config(test_config())
            .task_env(TaskEnv::new())
            .build(),
    );
    assert!(err.to_string().contains("task directory"), "{err}");

    let err = build_err(
        TemplateManager::builder()
            .hooks(hooks.clone())
            .config(test_config())
            .task_dir("")
            .task_env(TaskEnv::new())
            .build(),
    );
    assert!(err.to_string().contains("task directory"), "{err}");

    let err = build_err(
        TemplateManager::builder()
            .hooks(hooks)
            .config(test_config())
            .task_dir(dir.path())
            .build(),
    );
    assert!(err.to_string().contains("task environment"), "{err}");
}

#[test]
fn hooks_are_checked_before_templates() {
    let err = build_err(
        TemplateManager::builder()
            .templates([TemplateSpec::embedded("x", "out").signal("SIGFOOBAR")])
            .build(),
    );
    assert!(matches!(err, ManagerError::Validation(ValidationError::MissingHooks)));
}

#[test]
fn invalid_signal_is_rejected() {
    let harness = Harness::new(vec![TemplateSpec::embedded("x", "out").signal("SIGFOOBAR")]);
    let err = build_err(harness.builder().build());
    assert!(
        err.to_string().contains("failed to parse signal \"SIGFOOBAR\""),
        "{err}"
    );
}

#[test]
fn valid_inputs_build() {
    let harness = Harness::new(vec![
        TemplateSpec::embedded("x", "local/a").signal("SIGALRM"),
        TemplateSpec::embedded("y", "local/b").restart(),
    ]);
    let manager = harness.builder().build().expect("valid inputs");
    assert_eq!(manager.templates().len(), 2);
    assert!(!manager.is_running());
}

#[test]
fn colliding_destinations_are_rejected() {
    let harness = Harness::new(vec![
        TemplateSpec::embedded("x", "local/app.conf"),
        TemplateSpec::embedded("y", "./local/app.conf"),
    ]);
    let err = build_err(harness.builder().build());
    assert!(matches!(
        err,
        ManagerError::Validation(ValidationError::DuplicateDestination { .. })
    ));
}

#[test]
fn start_outside_runtime_fails() {
    let harness = Harness::new(vec![]);
    let manager = harness.builder().build().unwrap();
    assert!(matches!(manager.start(), Err(ManagerError::NoRuntime(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn lifecycle_is_linear() {
    let harness = Harness::new(vec![]);
    let manager = Arc::new(harness.builder().build().unwrap());

    manager.start().unwrap();
    assert!(manager.is_running());
    assert!(matches!(manager.start(), Err(ManagerError::AlreadyStarted)));

    manager.stop().await;
    manager.stop().await;
    assert!(!manager.is_running());
    assert!(matches!(manager.start(), Err(ManagerError::AlreadyStopped)));
}
