//! Tera rendering engine — [`TemplateEngine`] and [`RenderOutcome`].
//!
//! # Template functions
//!
//! | Function                                   | Result                                   |
//! |--------------------------------------------|------------------------------------------|
//! | `key(path="k")`                            | value of `k`; waits while `k` is absent  |
//! | `key_or_default(path="k", default="d")`    | value of `k`, or `d` once `k` is known absent |
//! | `secret(path="p", field="f")`              | field `f` of the secret at `p`           |
//! | `secret(path="p")`                         | the whole secret `data` object           |
//!
//! While a value is missing the functions return a placeholder so the render
//! keeps going and every dependency of the template is discovered in a
//! single pass. The output of such a pass is discarded.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tera::{Context, Tera, Value};

use tmplctl_core::{RegisteredTemplate, TemplateId};

use crate::dependency::{Dependency, FetchedValue, Snapshot};
use crate::error::{describe, RenderError};

// ---------------------------------------------------------------------------
// RenderOutcome
// ---------------------------------------------------------------------------

/// Result of rendering one template against a [`Snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// Every dependency was present; `content` is the final text.
    Complete {
        content: String,
        dependencies: Vec<Dependency>,
        uses_secrets: bool,
    },
    /// Some dependencies have not been fetched yet, or do not exist.
    Incomplete {
        dependencies: Vec<Dependency>,
        missing: Vec<Dependency>,
    },
    /// The template is broken independently of the data it reads.
    Failed {
        dependencies: Vec<Dependency>,
        error: RenderError,
    },
}

impl RenderOutcome {
    /// Every dependency touched during the render.
    pub fn dependencies(&self) -> &[Dependency] {
        match self {
            RenderOutcome::Complete { dependencies, .. }
            | RenderOutcome::Incomplete { dependencies, .. }
            | RenderOutcome::Failed { dependencies, .. } => dependencies,
        }
    }
}

// ---------------------------------------------------------------------------
// Dependency recording
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Recorder {
    used: BTreeSet<Dependency>,
    missing: BTreeSet<Dependency>,
}

type SharedRecorder = Arc<Mutex<Recorder>>;

fn record(recorder: &SharedRecorder, dependency: Dependency, missing: bool) {
    let mut guard = recorder.lock().unwrap_or_else(PoisonError::into_inner);
    if missing {
        guard.missing.insert(dependency.clone());
    }
    guard.used.insert(dependency);
}

fn string_arg<'a>(
    args: &'a HashMap<String, Value>,
    function: &str,
    name: &str,
) -> tera::Result<&'a str> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(tera::Error::msg(format!(
            "`{function}`: argument `{name}` must be a string, got {other}"
        ))),
        None => Err(tera::Error::msg(format!(
            "`{function}`: missing argument `{name}`"
        ))),
    }
}

type TeraFunction = Box<dyn Fn(&HashMap<String, Value>) -> tera::Result<Value> + Send + Sync>;

fn key_function(snapshot: Arc<Snapshot>, recorder: SharedRecorder) -> TeraFunction {
    Box::new(move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let path = string_arg(args, "key", "path")?;
        let dependency = Dependency::key(path);
        match snapshot.get(&dependency) {
            Some(FetchedValue::Key(Some(value))) => {
                record(&recorder, dependency, false);
                Ok(Value::String(value.clone()))
            }
            _ => {
                record(&recorder, dependency, true);
                Ok(Value::String(String::new()))
            }
        }
    })
}

fn key_or_default_function(snapshot: Arc<Snapshot>, recorder: SharedRecorder) -> TeraFunction {
    Box::new(move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let path = string_arg(args, "key_or_default", "path")?;
        let default = string_arg(args, "key_or_default", "default")?;
        let dependency = Dependency::key(path);
        match snapshot.get(&dependency) {
            Some(FetchedValue::Key(value)) => {
                let value = value.clone().unwrap_or_else(|| default.to_string());
                record(&recorder, dependency, false);
                Ok(Value::String(value))
            }
            _ => {
                record(&recorder, dependency, true);
                Ok(Value::String(default.to_string()))
            }
        }
    })
}

fn secret_function(snapshot: Arc<Snapshot>, recorder: SharedRecorder) -> TeraFunction {
    Box::new(move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let path = string_arg(args, "secret", "path")?;
        let field = match args.get("field") {
            Some(_) => Some(string_arg(args, "secret", "field")?),
            None => None,
        };
        let dependency = Dependency::secret(path);

        let Some(FetchedValue::Secret(Some(data))) = snapshot.get(&dependency) else {
            record(&recorder, dependency, true);
            return Ok(match field {
                Some(_) => Value::String(String::new()),
                None => Value::Object(Default::default()),
            });
        };
        record(&recorder, dependency, false);

        match field {
            None => Ok(Value::Object(data.clone())),
            Some(field) => data.get(field).cloned().ok_or_else(|| {
                tera::Error::msg(format!("secret {path:?} has no field {field:?}"))
            }),
        }
    })
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Parsed templates of one manager.
///
/// Templates that fail to parse are kept as failures and reported on every
/// render instead of failing construction, so one broken template does not
/// stop the others.
pub struct TemplateEngine {
    tera: Tera,
    names: HashMap<TemplateId, Result<String, RenderError>>,
}

impl TemplateEngine {
    pub fn new(templates: &[RegisteredTemplate]) -> Self {
        let mut tera = Tera::default();
        let mut names = HashMap::with_capacity(templates.len());
        for template in templates {
            let name = template.id.to_string();
            let parsed = tera
                .add_raw_template(&name, &template.contents)
                .map(|()| name)
                .map_err(|err| RenderError::Parse {
                    template: template.id,
                    message: describe(&err),
                });
            names.insert(template.id, parsed);
        }
        TemplateEngine { tera, names }
    }

    /// Render template `id` against `snapshot`.
    pub fn render(&mut self, id: TemplateId, snapshot: &Arc<Snapshot>) -> RenderOutcome {
        let name = match self.names.get(&id) {
            Some(Ok(name)) => name.clone(),
            Some(Err(error)) => {
                return RenderOutcome::Failed {
                    dependencies: vec![],
                    error: error.clone(),
                }
            }
            None => {
                return RenderOutcome::Failed {
                    dependencies: vec![],
                    error: RenderError::Execute {
                        template: id,
                        message: "template is not registered".to_string(),
                    },
                }
            }
        };

        let recorder = SharedRecorder::default();
        self.tera
            .register_function("key", key_function(Arc::clone(snapshot), Arc::clone(&recorder)));
        self.tera.register_function(
            "key_or_default",
            key_or_default_function(Arc::clone(snapshot), Arc::clone(&recorder)),
        );
        self.tera.register_function(
            "secret",
            secret_function(Arc::clone(snapshot), Arc::clone(&recorder)),
        );

        let result = self.tera.render(&name, &Context::new());

        let recorder = std::mem::take(&mut *recorder.lock().unwrap_or_else(PoisonError::into_inner));
        let uses_secrets = recorder.used.iter().any(Dependency::is_secret);
        let dependencies: Vec<Dependency> = recorder.used.into_iter().collect();

        if !recorder.missing.is_empty() {
            return RenderOutcome::Incomplete {
                dependencies,
                missing: recorder.missing.into_iter().collect(),
            };
        }

        match result {
            Ok(content) => RenderOutcome::Complete {
                content,
                dependencies,
                uses_secrets,
            },
            Err(err) => RenderOutcome::Failed {
                dependencies,
                error: RenderError::Execute {
                    template: id,
                    message: describe(&err),
                },
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tmplctl_core::ChangePolicy;

    use crate::dependency::SecretData;

    fn template(id: usize, contents: &str) -> RegisteredTemplate {
        RegisteredTemplate {
            id: TemplateId(id),
            contents: contents.to_string(),
            destination: PathBuf::from(format!("/task/out-{id}")),
            policy: ChangePolicy::Noop,
            perms: None,
        }
    }

    fn snapshot(values: Vec<(Dependency, FetchedValue)>) -> Arc<Snapshot> {
        let mut snapshot = Snapshot::default();
        for (dep, value) in values {
            snapshot.insert(dep, value);
        }
        Arc::new(snapshot)
    }

    fn secret(pairs: &[(&str, &str)]) -> FetchedValue {
        let mut data = SecretData::new();
        for (k, v) in pairs {
            data.insert(k.to_string(), Value::String(v.to_string()));
        }
        FetchedValue::Secret(Some(data))
    }

    #[test]
    fn static_template_renders_verbatim() {
        let mut engine = TemplateEngine::new(&[template(0, "hello, world!")]);
        let outcome = engine.render(TemplateId(0), &snapshot(vec![]));
        assert_eq!(
            outcome,
            RenderOutcome::Complete {
                content: "hello, world!".to_string(),
                dependencies: vec![],
                uses_secrets: false,
            }
        );
    }

    #[test]
    fn unfetched_key_is_incomplete() {
        let mut engine = TemplateEngine::new(&[template(0, r#"{{ key(path="foo") }}"#)]);
        let outcome = engine.render(TemplateId(0), &snapshot(vec![]));
        match outcome {
            RenderOutcome::Incomplete { missing, dependencies } => {
                assert_eq!(missing, vec![Dependency::key("foo")]);
                assert_eq!(dependencies, vec![Dependency::key("foo")]);
            }
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }

    #[test]
    fn absent_key_keeps_template_incomplete() {
        let mut engine = TemplateEngine::new(&[template(0, r#"{{ key(path="foo") }}"#)]);
        let snap = snapshot(vec![(Dependency::key("foo"), FetchedValue::Key(None))]);
        assert!(matches!(
            engine.render(TemplateId(0), &snap),
            RenderOutcome::Incomplete { .. }
        ));
    }

    #[test]
    fn present_key_renders_its_value() {
        let mut engine = TemplateEngine::new(&[template(0, r#"{{ key(path="foo") }}"#)]);
        let snap = snapshot(vec![(
            Dependency::key("foo"),
            FetchedValue::Key(Some("barbaz".into())),
        )]);
        match engine.render(TemplateId(0), &snap) {
            RenderOutcome::Complete { content, uses_secrets, .. } => {
                assert_eq!(content, "barbaz");
                assert!(!uses_secrets);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn all_missing_dependencies_found_in_one_pass() {
        let mut engine = TemplateEngine::new(&[template(
            0,
            r#"{{ key(path="a") }}-{{ key(path="b") }}-{{ secret(path="secret/c", field="x") }}"#,
        )]);
        match engine.render(TemplateId(0), &snapshot(vec![])) {
            RenderOutcome::Incomplete { missing, .. } => assert_eq!(missing.len(), 3),
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }

    #[test]
    fn key_or_default_uses_default_once_key_known_absent() {
        let mut engine = TemplateEngine::new(&[template(
            0,
            r#"port={{ key_or_default(path="port", default="8080") }}"#,
        )]);

        assert!(matches!(
            engine.render(TemplateId(0), &snapshot(vec![])),
            RenderOutcome::Incomplete { .. }
        ));

        let snap = snapshot(vec![(Dependency::key("port"), FetchedValue::Key(None))]);
        match engine.render(TemplateId(0), &snap) {
            RenderOutcome::Complete { content, .. } => assert_eq!(content, "port=8080"),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn secret_field_renders_and_flags_secret_use() {
        let mut engine = TemplateEngine::new(&[template(
            0,
            r#"{{ secret(path="secret/password", field="password") }}"#,
        )]);
        let snap = snapshot(vec![(
            Dependency::secret("secret/password"),
            secret(&[("password", "barbaz")]),
        )]);
        match engine.render(TemplateId(0), &snap) {
            RenderOutcome::Complete { content, uses_secrets, .. } => {
                assert_eq!(content, "barbaz");
                assert!(uses_secrets);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn whole_secret_object_supports_attribute_access() {
        let mut engine = TemplateEngine::new(&[template(
            0,
            r#"{% set creds = secret(path="secret/db") %}{{ creds.user }}:{{ creds.pass }}"#,
        )]);
        let snap = snapshot(vec![(
            Dependency::secret("secret/db"),
            secret(&[("user", "app"), ("pass", "hunter2")]),
        )]);
        match engine.render(TemplateId(0), &snap) {
            RenderOutcome::Complete { content, .. } => assert_eq!(content, "app:hunter2"),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn missing_secret_field_is_a_render_failure() {
        let mut engine = TemplateEngine::new(&[template(
            0,
            r#"{{ secret(path="secret/db", field="nope") }}"#,
        )]);
        let snap = snapshot(vec![(Dependency::secret("secret/db"), secret(&[("user", "app")]))]);
        match engine.render(TemplateId(0), &snap) {
            RenderOutcome::Failed { error, dependencies } => {
                assert!(matches!(error, RenderError::Execute { .. }));
                assert!(error.to_string().contains("nope"), "got {error}");
                assert_eq!(dependencies, vec![Dependency::secret("secret/db")]);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn syntax_error_fails_only_that_template() {
        let mut engine = TemplateEngine::new(&[
            template(0, r#"{{ key(path="foo") "#),
            template(1, "fine"),
        ]);
        let snap = snapshot(vec![]);

        assert!(matches!(
            engine.render(TemplateId(0), &snap),
            RenderOutcome::Failed {
                error: RenderError::Parse { .. },
                ..
            }
        ));
        assert!(matches!(
            engine.render(TemplateId(1), &snap),
            RenderOutcome::Complete { .. }
        ));
    }

    #[test]
    fn unknown_template_id_fails() {
        let mut engine = TemplateEngine::new(&[]);
        assert!(matches!(
            engine.render(TemplateId(3), &snapshot(vec![])),
            RenderOutcome::Failed { .. }
        ));
    }
}
