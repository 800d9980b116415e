pub mod openai;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt::Write as _;

use crate::action_schema::{ActionSpec, FieldType, ACTION_CATALOG, DISCRIMINANT};
use crate::error::{AgentError, AgentResult};
use crate::prompts::{ACTIONS_PLACEHOLDER, PLANNER_SYSTEM_PROMPT};

pub use openai::OpenAiPlanner;

/// Turns a user command into raw, untyped plan steps. Steps are validated
/// separately; a planner only guarantees a list came back.
#[async_trait]
pub trait PlanningService: Send + Sync {
    async fn generate_plan(&self, command: &str, context: &str) -> AgentResult<Vec<Value>>;
}

/// System prompt with the action catalog spliced in.
pub fn build_system_prompt(base: &str) -> AgentResult<String> {
    if !base.contains(ACTIONS_PLACEHOLDER) {
        return Err(AgentError::Config(format!(
            "planner prompt is missing the {} marker",
            ACTIONS_PLACEHOLDER
        )));
    }
    Ok(base.replace(ACTIONS_PLACEHOLDER, &render_catalog(ACTION_CATALOG)))
}

pub fn default_system_prompt() -> AgentResult<String> {
    build_system_prompt(PLANNER_SYSTEM_PROMPT)
}

fn type_label(ty: FieldType) -> String {
    match ty {
        FieldType::String => "string".to_string(),
        FieldType::Integer => "integer".to_string(),
        FieldType::Decimal => "number".to_string(),
        FieldType::OneOf(options) => options
            .iter()
            .map(|o| format!("\"{}\"", o))
            .collect::<Vec<_>>()
            .join(" | "),
    }
}

fn example_value(name: &str, ty: FieldType) -> Value {
    match ty {
        FieldType::OneOf(options) => Value::from(options.first().copied().unwrap_or_default()),
        FieldType::Integer => Value::from(match name {
            "x" => 123,
            "y" => 456,
            "duration_ms" => 1000,
            _ => 10,
        }),
        FieldType::Decimal => Value::from(0.1),
        FieldType::String => Value::from(format!("<{}>", name)),
    }
}

/// One numbered block per action: field list with types, then an example.
pub fn render_catalog(catalog: &[ActionSpec]) -> String {
    let mut out = String::new();
    for (i, spec) in catalog.iter().enumerate() {
        let _ = writeln!(out, "{}. {}: {}", i + 1, spec.name, spec.summary);
        let _ = writeln!(out, "   \"{}\": \"{}\"", DISCRIMINANT, spec.name);

        let mut example = Map::new();
        example.insert(DISCRIMINANT.to_string(), Value::from(spec.name));
        for field in spec.fields {
            let need = if field.required { "required" } else { "optional" };
            let mut line = format!("   \"{}\": {} ({})", field.name, type_label(field.ty), need);
            if let Some(default) = field.default {
                let _ = write!(line, ", default {}", default);
            }
            if !field.description.is_empty() {
                let _ = write!(line, " - {}", field.description);
            }
            let _ = writeln!(out, "{}", line);

            if field.required || field.default.is_none() {
                example.insert(field.name.to_string(), example_value(field.name, field.ty));
            }
        }
        example.insert("reason".to_string(), Value::from("<why this step is needed>"));
        let _ = writeln!(out, "   Example: {}", Value::Object(example));
    }
    out
}

/// Pull the step list out of a planner reply. Accepts `{"plan": [...]}`, a
/// bare array, and either wrapped in a markdown fence.
pub fn extract_plan(content: &str) -> AgentResult<Vec<Value>> {
    let clean = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if clean.is_empty() {
        return Err(AgentError::Planning("planner returned an empty response".to_string()));
    }

    let parsed: Value = serde_json::from_str(clean)
        .map_err(|e| AgentError::Planning(format!("planner returned invalid JSON: {}", e)))?;

    match parsed {
        Value::Object(mut obj) => match obj.remove("plan") {
            Some(Value::Array(steps)) => Ok(steps),
            Some(_) => Err(AgentError::Planning("'plan' is not a list".to_string())),
            None => Err(AgentError::Planning("response has no 'plan' list".to_string())),
        },
        Value::Array(steps) => Ok(steps),
        _ => Err(AgentError::Planning("response is neither an object nor a list".to_string())),
    }
}
