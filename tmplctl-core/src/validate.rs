//! Template registration: signal parsing, source loading and destination
//! resolution.
//!
//! Runs once, before any watch is started. Every error here is fatal to
//! manager construction.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use nix::sys::signal::Signal;

use crate::env::TaskEnv;
use crate::error::ValidationError;
use crate::types::{ChangeMode, ChangePolicy, RegisteredTemplate, TemplateId, TemplateSpec};

/// Parse an OS signal name. Accepts `SIGHUP`, `sighup` and `HUP`.
pub fn parse_signal(text: &str) -> Result<Signal, ValidationError> {
    let upper = text.trim().to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    name.parse::<Signal>()
        .map_err(|_| ValidationError::InvalidSignal {
            signal: text.to_string(),
        })
}

/// Interpolate `dest` with the task environment and root it at `task_dir`.
///
/// Absolute destinations are re-rooted under the task directory; `..`
/// components may not climb above it.
pub fn resolve_destination(
    task_dir: &Path,
    dest: &str,
    env: &TaskEnv,
) -> Result<PathBuf, ValidationError> {
    if dest.trim().is_empty() {
        return Err(ValidationError::EmptyDestination);
    }
    let interpolated = env.interpolate(dest)?;
    join_within(task_dir, &interpolated)
}

/// Validate `specs` and turn them into [`RegisteredTemplate`]s, in order.
pub fn register_templates(
    specs: &[TemplateSpec],
    task_dir: &Path,
    env: &TaskEnv,
) -> Result<Vec<RegisteredTemplate>, ValidationError> {
    let mut registered = Vec::with_capacity(specs.len());
    let mut destinations = HashSet::new();

    for (index, spec) in specs.iter().enumerate() {
        let policy = parse_policy(spec)?;
        let perms = spec
            .perms
            .as_deref()
            .map(|perms| parse_perms(&spec.dest_path, perms))
            .transpose()?;
        let destination = resolve_destination(task_dir, &spec.dest_path, env)?;
        if !destinations.insert(destination.clone()) {
            return Err(ValidationError::DuplicateDestination { path: destination });
        }
        let contents = load_source(spec, task_dir, env)?;

        registered.push(RegisteredTemplate {
            id: TemplateId(index),
            contents,
            destination,
            policy,
            perms,
        });
    }

    Ok(registered)
}

fn parse_policy(spec: &TemplateSpec) -> Result<ChangePolicy, ValidationError> {
    match spec.change_mode {
        ChangeMode::Noop => Ok(ChangePolicy::Noop),
        ChangeMode::Restart => Ok(ChangePolicy::Restart),
        ChangeMode::Signal => {
            let raw = spec
                .change_signal
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| ValidationError::MissingSignal {
                    dest: spec.dest_path.clone(),
                })?;
            Ok(ChangePolicy::Signal(parse_signal(raw)?))
        }
    }
}

fn parse_perms(dest: &str, perms: &str) -> Result<u32, ValidationError> {
    let digits = perms.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .ok_or_else(|| ValidationError::InvalidPerms {
            dest: dest.to_string(),
            perms: perms.to_string(),
        })
}

fn load_source(
    spec: &TemplateSpec,
    task_dir: &Path,
    env: &TaskEnv,
) -> Result<String, ValidationError> {
    match (&spec.embedded_tmpl, &spec.source_path) {
        (Some(_), Some(_)) => Err(ValidationError::AmbiguousSource {
            dest: spec.dest_path.clone(),
        }),
        (None, None) => Err(ValidationError::MissingSource {
            dest: spec.dest_path.clone(),
        }),
        (Some(text), None) => Ok(text.clone()),
        (None, Some(source)) => {
            let interpolated = env.interpolate(&source.to_string_lossy())?;
            let path = join_within(task_dir, &interpolated)?;
            std::fs::read_to_string(&path)
                .map_err(|source| ValidationError::SourceRead { path, source })
        }
    }
}

fn join_within(root: &Path, relative: &str) -> Result<PathBuf, ValidationError> {
    let mut parts = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(ValidationError::EscapesTaskDir {
                        path: relative.to_string(),
                    });
                }
            }
            Component::Normal(part) => parts.push(part),
        }
    }
    if parts.is_empty() {
        return Err(ValidationError::EmptyDestination);
    }

    let mut out = root.to_path_buf();
    out.extend(parts);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("SIGALRM", Signal::SIGALRM)]
    #[case("SIGBUS", Signal::SIGBUS)]
    #[case("sighup", Signal::SIGHUP)]
    #[case("USR1", Signal::SIGUSR1)]
    #[case(" SIGTERM ", Signal::SIGTERM)]
    fn parses_signal_names(#[case] input: &str, #[case] expected: Signal) {
        assert_eq!(parse_signal(input).unwrap(), expected);
    }

    #[rstest]
    #[case("foobarbaz")]
    #[case("")]
    #[case("SIG")]
    #[case("42")]
    fn rejects_unknown_signal_names(#[case] input: &str) {
        let err = parse_signal(input).unwrap_err();
        assert!(err.to_string().contains("failed to parse signal"));
    }

    #[rstest]
    #[case("my.tmpl", "my.tmpl")]
    #[case("local/app.conf", "local/app.conf")]
    #[case("/etc/app.conf", "etc/app.conf")]
    #[case("./a/../b.conf", "b.conf")]
    fn destinations_are_rooted_in_task_dir(#[case] dest: &str, #[case] expected: &str) {
        let root = Path::new("/alloc/task");
        let resolved = resolve_destination(root, dest, &TaskEnv::new()).unwrap();
        assert_eq!(resolved, root.join(expected));
    }

    #[rstest]
    #[case("../outside")]
    #[case("a/../../outside")]
    fn destinations_may_not_escape(#[case] dest: &str) {
        let err = resolve_destination(Path::new("/alloc/task"), dest, &TaskEnv::new()).unwrap_err();
        assert!(matches!(err, ValidationError::EscapesTaskDir { .. }));
    }

    #[test]
    fn placeholder_destination_resolves_once() {
        let env = TaskEnv::new().with_var("node.unique.id", "abc-123");
        let resolved =
            resolve_destination(Path::new("/task"), "${node.unique.id}.tmpl", &env).unwrap();
        assert_eq!(resolved, PathBuf::from("/task/abc-123.tmpl"));
    }

    #[test]
    fn bad_signal_is_reported_with_its_text() {
        let spec = TemplateSpec::embedded("hello, world", "foo").signal("foobarbaz");
        let err = register_templates(&[spec], Path::new("foo"), &TaskEnv::new()).unwrap_err();
        assert!(
            err.to_string().contains("failed to parse signal \"foobarbaz\""),
            "got {err}"
        );
    }

    #[test]
    fn signal_mode_requires_a_signal() {
        let mut spec = TemplateSpec::embedded("x", "out").signal("SIGHUP");
        spec.change_signal = None;
        let err = register_templates(&[spec], Path::new("/t"), &TaskEnv::new()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingSignal { .. }));
    }

    #[test]
    fn colliding_destinations_are_rejected() {
        let specs = vec![
            TemplateSpec::embedded("a", "conf/app.conf").noop(),
            TemplateSpec::embedded("b", "./conf/app.conf").noop(),
        ];
        let err = register_templates(&specs, Path::new("/t"), &TaskEnv::new()).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateDestination { .. }));
    }

    #[test]
    fn both_or_neither_source_is_rejected() {
        let mut both = TemplateSpec::embedded("a", "out");
        both.source_path = Some(PathBuf::from("in.tpl"));
        assert!(matches!(
            register_templates(&[both], Path::new("/t"), &TaskEnv::new()),
            Err(ValidationError::AmbiguousSource { .. })
        ));

        let mut neither = TemplateSpec::embedded("a", "out");
        neither.embedded_tmpl = None;
        assert!(matches!(
            register_templates(&[neither], Path::new("/t"), &TaskEnv::new()),
            Err(ValidationError::MissingSource { .. })
        ));
    }

    #[rstest]
    #[case("0644", 0o644)]
    #[case("600", 0o600)]
    #[case("0o640", 0o640)]
    fn perms_parse_as_octal(#[case] raw: &str, #[case] expected: u32) {
        let spec = TemplateSpec::embedded("x", "out").with_perms(raw);
        let registered = register_templates(&[spec], Path::new("/t"), &TaskEnv::new()).unwrap();
        assert_eq!(registered[0].perms, Some(expected));
    }

    #[test]
    fn non_octal_perms_are_rejected() {
        let spec = TemplateSpec::embedded("x", "out").with_perms("rwx");
        assert!(matches!(
            register_templates(&[spec], Path::new("/t"), &TaskEnv::new()),
            Err(ValidationError::InvalidPerms { .. })
        ));
    }

    #[test]
    fn ids_follow_declaration_order() {
        let specs = vec![
            TemplateSpec::embedded("a", "a").noop(),
            TemplateSpec::embedded("b", "b").restart(),
            TemplateSpec::embedded("c", "c").signal("SIGHUP"),
        ];
        let registered = register_templates(&specs, Path::new("/t"), &TaskEnv::new()).unwrap();
        let ids: Vec<_> = registered.iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(registered[2].policy, ChangePolicy::Signal(Signal::SIGHUP));
    }
}
