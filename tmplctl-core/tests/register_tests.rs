use std::fs;
use std::path::PathBuf;

use tmplctl_core::{
    register_templates, ChangePolicy, Node, TaskEnv, TemplateSpec, ValidationError,
};
use tempfile::TempDir;

fn node() -> Node {
    Node {
        id: "f3a1c2d4-node".to_string(),
        name: "client-1".to_string(),
        datacenter: "dc1".to_string(),
        ..Node::default()
    }
}

#[test]
fn source_path_is_read_relative_to_task_dir() {
    let task_dir = TempDir::new().expect("task dir");
    fs::create_dir_all(task_dir.path().join("local")).expect("mkdir");
    fs::write(task_dir.path().join("local/app.tpl"), "port = {{ key(path=\"port\") }}")
        .expect("write source");

    let spec = TemplateSpec::from_source("local/app.tpl", "local/app.conf").noop();
    let registered =
        register_templates(&[spec], task_dir.path(), &TaskEnv::from_node(&node())).expect("register");

    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].contents, "port = {{ key(path=\"port\") }}");
    assert_eq!(registered[0].destination, task_dir.path().join("local/app.conf"));
    assert_eq!(registered[0].policy, ChangePolicy::Noop);
}

#[test]
fn missing_source_file_is_reported_with_path() {
    let task_dir = TempDir::new().expect("task dir");
    let spec = TemplateSpec::from_source("missing.tpl", "out.conf");

    let err = register_templates(&[spec], task_dir.path(), &TaskEnv::new()).unwrap_err();
    match err {
        ValidationError::SourceRead { path, .. } => {
            assert_eq!(path, task_dir.path().join("missing.tpl"));
        }
        other => panic!("expected SourceRead, got {other:?}"),
    }
}

#[test]
fn node_identity_destination_is_interpolated() {
    let env = TaskEnv::from_node(&node());
    let spec = TemplateSpec::embedded("hello, world!", "${node.unique.id}.tmpl").noop();

    let registered = register_templates(&[spec], &PathBuf::from("/alloc/web"), &env).expect("register");
    assert_eq!(
        registered[0].destination,
        PathBuf::from("/alloc/web/f3a1c2d4-node.tmpl")
    );
}

#[test]
fn unknown_destination_placeholder_fails_registration() {
    let spec = TemplateSpec::embedded("x", "${node.region}/x.conf");
    let err = register_templates(&[spec], &PathBuf::from("/t"), &TaskEnv::from_node(&node()))
        .unwrap_err();
    assert!(err.to_string().contains("node.region"), "got {err}");
}

#[test]
fn empty_template_list_is_valid() {
    let registered = register_templates(&[], &PathBuf::from("/t"), &TaskEnv::new()).expect("register");
    assert!(registered.is_empty());
}
