//! Task environment — variables available to `${...}` placeholders.
//!
//! | Placeholder            | Source                  |
//! |------------------------|-------------------------|
//! | `${node.unique.id}`    | [`Node::id`]            |
//! | `${node.unique.name}`  | [`Node::name`]          |
//! | `${node.datacenter}`   | [`Node::datacenter`]    |
//! | `${node.class}`        | [`Node::node_class`]    |
//! | `${attr.<key>}`        | [`Node::attributes`]    |
//! | `${meta.<key>}`        | [`Node::meta`]          |
//! | anything else          | [`TaskEnv::with_var`]   |

use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::types::Node;

/// Resolver for task environment placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskEnv {
    vars: BTreeMap<String, String>,
}

impl TaskEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment populated from the node the task runs on.
    pub fn from_node(node: &Node) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert("node.unique.id".to_string(), node.id.clone());
        vars.insert("node.unique.name".to_string(), node.name.clone());
        vars.insert("node.datacenter".to_string(), node.datacenter.clone());
        vars.insert("node.class".to_string(), node.node_class.clone());
        for (key, value) in &node.attributes {
            vars.insert(format!("attr.{key}"), value.clone());
        }
        for (key, value) in &node.meta {
            vars.insert(format!("meta.{key}"), value.clone());
        }
        Self { vars }
    }

    /// Add or replace a variable, e.g. `NOMAD_ALLOC_ID`.
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Replace every `${name}` in `input`. Unknown names and unterminated
    /// placeholders are errors; text without placeholders passes through.
    pub fn interpolate(&self, input: &str) -> Result<String, ValidationError> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(ValidationError::UnterminatedPlaceholder {
                    input: input.to_string(),
                });
            };
            let name = after[..end].trim();
            let value = self
                .get(name)
                .ok_or_else(|| ValidationError::UnknownPlaceholder {
                    placeholder: name.to_string(),
                    input: input.to_string(),
                })?;
            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}
