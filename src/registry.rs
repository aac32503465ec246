//! Tool registry and the tool invocation contract
//!
//! Tools are registered as explicit descriptor records: a name, an ordered
//! list of required parameters with per-parameter validators, and usage text.
//! The orchestration engine never sees a tool's implementation, only the
//! schema-level `Catalog` snapshot and the three-case `ToolResult` contract.

pub mod builtin;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Parameter values as delivered to a tool invocation.
pub type ParamMap = BTreeMap<String, Value>;

/// Parses raw user text into a typed parameter value.
///
/// On failure, returns guidance text used to re-prompt the user.
pub type Validator = Arc<dyn Fn(&str) -> Result<Value, String> + Send + Sync>;

/// One required parameter in a tool's schema.
#[derive(Clone)]
pub struct ParamSpec {
    pub name: String,
    /// Question shown to the user when this parameter is collected.
    pub prompt: String,
    pub validator: Validator,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>, validator: Validator) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            validator,
        }
    }
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

/// Common validators for builtin tools.
pub mod validators {
    use super::Validator;
    use serde_json::{json, Value};
    use std::sync::Arc;

    /// Any non-empty text.
    pub fn text() -> Validator {
        Arc::new(|raw: &str| {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Err("a value is required; please enter some text".to_string())
            } else {
                Ok(Value::String(trimmed.to_string()))
            }
        })
    }

    /// A finite number, tolerating surrounding text like "$250,000" or "72F".
    pub fn number() -> Validator {
        Arc::new(|raw: &str| {
            let cleaned: String = raw
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(|n| json!(n))
                .ok_or_else(|| format!("could not read '{}' as a number; enter digits like 42 or 3.5", raw.trim()))
        })
    }

    /// One of a fixed set of unit names (case-insensitive).
    pub fn one_of(choices: &'static [&'static str]) -> Validator {
        Arc::new(move |raw: &str| {
            let lowered = raw.trim().to_lowercase();
            choices
                .iter()
                .find(|c| c.eq_ignore_ascii_case(&lowered))
                .map(|c| Value::String((*c).to_string()))
                .ok_or_else(|| format!("expected one of: {}", choices.join(", ")))
        })
    }
}

/// Result of a tool invocation. The engine only understands these three
/// shapes; everything else about a tool is opaque.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    /// The tool produced a value and its frame can be popped.
    Value(Value),
    /// The tool needs another tool to run before it can finish.
    NeedsTool {
        name: String,
        seed_args: ParamMap,
        /// Parameter on the requesting tool that the child's value satisfies.
        /// `None` delivers the value as contextual content instead.
        assign_to: Option<String>,
    },
    /// The tool failed; the whole workflow is torn down.
    Error { kind: ToolErrorKind, message: String },
}

impl ToolResult {
    pub fn value(v: Value) -> Self {
        ToolResult::Value(v)
    }

    pub fn error(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        ToolResult::Error {
            kind,
            message: message.into(),
        }
    }
}

/// Classification of tool failures, surfaced verbatim to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    /// Parameters were present but unusable.
    InvalidInput,
    /// Filesystem or other I/O failure.
    Io,
    /// Anything else the tool reports.
    Internal,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolErrorKind::InvalidInput => write!(f, "invalid input"),
            ToolErrorKind::Io => write!(f, "io error"),
            ToolErrorKind::Internal => write!(f, "internal error"),
        }
    }
}

/// Capability interface implemented per tool.
///
/// Tools are stateless; every invocation receives the full parameter map,
/// including any child-tool result injected by the engine. A tool that
/// previously answered `NeedsTool` is invoked again once the child's value
/// has been delivered and should complete (or request the next tool) then.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, unique within the registry.
    fn name(&self) -> &str;

    /// Human-readable description used in selection prompts.
    fn description(&self) -> String;

    /// Ordered required parameters. Collection happens strictly in this order.
    fn parameters(&self) -> Vec<ParamSpec>;

    async fn invoke(&self, params: &ParamMap) -> ToolResult;
}

/// Collection of tools available to a chat session.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry with the builtin tool set.
    pub fn builtin() -> Self {
        Self {
            tools: vec![
                Arc::new(builtin::ConvertTemperature),
                Arc::new(builtin::TextStats),
                Arc::new(builtin::CreateCode),
                Arc::new(builtin::SaveFile),
            ],
        }
    }

    /// Registry from an explicit tool list (used by tests and embedders).
    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Schema-only snapshot consumed by the pure transition function.
    pub fn catalog(&self) -> Catalog {
        Catalog {
            entries: self
                .tools
                .iter()
                .map(|t| (t.name().to_string(), t.parameters()))
                .collect(),
        }
    }

    /// One-line-per-tool summary for selection prompts.
    pub fn summary(&self) -> String {
        self.tools
            .iter()
            .map(|t| {
                let names: Vec<String> =
                    t.parameters().iter().map(|p| p.name.clone()).collect();
                format!("- {} ({}): {}", t.name(), names.join(", "), t.description())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Read-only schema view of the registry.
///
/// Cheap to clone (validators are shared), carries no invocation capability.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, Vec<ParamSpec>>,
}

impl Catalog {
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Ordered required parameters for a tool, empty if unknown.
    pub fn parameters(&self, name: &str) -> &[ParamSpec] {
        self.entries.get(name).map_or(&[], Vec::as_slice)
    }

    /// Find the spec of a named parameter on a tool.
    pub fn parameter(&self, tool: &str, param: &str) -> Option<&ParamSpec> {
        self.parameters(tool).iter().find(|p| p.name == param)
    }

    #[cfg(test)]
    pub fn from_entries(entries: BTreeMap<String, Vec<ParamSpec>>) -> Self {
        Self { entries }
    }
}
