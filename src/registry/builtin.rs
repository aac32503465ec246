//! Builtin tools
//!
//! A small set covering the three invocation outcomes: plain values
//! (`convert_temperature`, `text_stats`), a nested sub-workflow
//! (`create_code` requesting `save_file`), and I/O failure paths.

use super::{validators, ParamMap, ParamSpec, Tool, ToolErrorKind, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;

const TEMP_UNITS: &[&str] = &["celsius", "fahrenheit", "kelvin"];

fn str_param<'a>(params: &'a ParamMap, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

fn num_param(params: &ParamMap, name: &str) -> Option<f64> {
    params.get(name).and_then(Value::as_f64)
}

/// Temperature unit conversion.
pub struct ConvertTemperature;

#[async_trait]
impl Tool for ConvertTemperature {
    fn name(&self) -> &str {
        "convert_temperature"
    }

    fn description(&self) -> String {
        "Convert a temperature between celsius, fahrenheit and kelvin".to_string()
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("value", "What temperature value should I convert?", validators::number()),
            ParamSpec::new(
                "from_unit",
                "Which unit is it in (celsius, fahrenheit, kelvin)?",
                validators::one_of(TEMP_UNITS),
            ),
            ParamSpec::new(
                "to_unit",
                "Which unit should I convert to (celsius, fahrenheit, kelvin)?",
                validators::one_of(TEMP_UNITS),
            ),
        ]
    }

    async fn invoke(&self, params: &ParamMap) -> ToolResult {
        let (Some(value), Some(from), Some(to)) = (
            num_param(params, "value"),
            str_param(params, "from_unit"),
            str_param(params, "to_unit"),
        ) else {
            return ToolResult::error(ToolErrorKind::InvalidInput, "missing conversion parameters");
        };

        let celsius = match from {
            "celsius" => value,
            "fahrenheit" => (value - 32.0) * 5.0 / 9.0,
            "kelvin" => value - 273.15,
            other => {
                return ToolResult::error(
                    ToolErrorKind::InvalidInput,
                    format!("unknown unit '{other}'"),
                )
            }
        };
        let converted = match to {
            "celsius" => celsius,
            "fahrenheit" => celsius * 9.0 / 5.0 + 32.0,
            "kelvin" => celsius + 273.15,
            other => {
                return ToolResult::error(
                    ToolErrorKind::InvalidInput,
                    format!("unknown unit '{other}'"),
                )
            }
        };

        ToolResult::value(json!({
            "value": value,
            "from_unit": from,
            "to_unit": to,
            "converted": (converted * 100.0).round() / 100.0,
        }))
    }
}

/// Word/line/character statistics for a block of text.
pub struct TextStats;

#[async_trait]
impl Tool for TextStats {
    fn name(&self) -> &str {
        "text_stats"
    }

    fn description(&self) -> String {
        "Count words, lines and characters in a piece of text".to_string()
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new(
            "text",
            "What text should I analyze?",
            validators::text(),
        )]
    }

    async fn invoke(&self, params: &ParamMap) -> ToolResult {
        let Some(text) = str_param(params, "text") else {
            return ToolResult::error(ToolErrorKind::InvalidInput, "missing text parameter");
        };
        let words: Vec<&str> = text.split_whitespace().collect();
        ToolResult::value(json!({
            "characters": text.chars().count(),
            "words": words.len(),
            "lines": text.lines().count(),
            "longest_word": words.iter().max_by_key(|w| w.chars().count()).copied().unwrap_or(""),
        }))
    }
}

/// Drafts a code snippet and hands it to `save_file` before finishing.
///
/// First invocation returns `NeedsTool(save_file)` with the drafted content
/// seeded; once the engine delivers the save result under `saved`, the second
/// invocation completes with a summary value.
pub struct CreateCode;

#[async_trait]
impl Tool for CreateCode {
    fn name(&self) -> &str {
        "create_code"
    }

    fn description(&self) -> String {
        "Draft a code snippet from a description and save it to a file".to_string()
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("prompt", "What should the code do?", validators::text()),
            ParamSpec::new(
                "workingdir",
                "Which directory should the file be saved in?",
                validators::text(),
            ),
        ]
    }

    async fn invoke(&self, params: &ParamMap) -> ToolResult {
        let (Some(prompt), Some(workingdir)) = (
            str_param(params, "prompt"),
            str_param(params, "workingdir"),
        ) else {
            return ToolResult::error(ToolErrorKind::InvalidInput, "missing prompt or workingdir");
        };

        // Second pass: the save result has been injected, we can finish.
        if let Some(saved) = params.get("saved") {
            return ToolResult::value(json!({
                "status": "complete",
                "prompt": prompt,
                "saved": saved,
            }));
        }

        let content = format!("// Draft generated from request:\n// {prompt}\n\nfn main() {{\n    todo!(\"{prompt}\");\n}}\n");
        let path = Path::new(workingdir).join("draft.rs");
        let mut seed_args = ParamMap::new();
        seed_args.insert("path".to_string(), json!(path.to_string_lossy()));
        seed_args.insert("content".to_string(), json!(content));

        ToolResult::NeedsTool {
            name: "save_file".to_string(),
            seed_args,
            assign_to: Some("saved".to_string()),
        }
    }
}

/// Writes content to a file, creating parent directories as needed.
pub struct SaveFile;

#[async_trait]
impl Tool for SaveFile {
    fn name(&self) -> &str {
        "save_file"
    }

    fn description(&self) -> String {
        "Save text content to a file on disk".to_string()
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        // `content` is accepted as a seed arg; an empty file is valid.
        vec![ParamSpec::new(
            "path",
            "Where should the file be saved?",
            validators::text(),
        )]
    }

    async fn invoke(&self, params: &ParamMap) -> ToolResult {
        let Some(path) = str_param(params, "path") else {
            return ToolResult::error(ToolErrorKind::InvalidInput, "missing path parameter");
        };
        let content = str_param(params, "content").unwrap_or_default();

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    return ToolResult::error(
                        ToolErrorKind::Io,
                        format!("could not create {}: {e}", parent.display()),
                    );
                }
            }
        }
        match std::fs::write(path, content) {
            Ok(()) => ToolResult::value(json!({
                "path": path,
                "bytes": content.len(),
            })),
            Err(e) => ToolResult::error(ToolErrorKind::Io, format!("could not write {path}: {e}")),
        }
    }
}
