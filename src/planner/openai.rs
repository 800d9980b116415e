use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{default_system_prompt, extract_plan, PlanningService};
use crate::config::PlannerConfig;
use crate::error::{AgentError, AgentResult};
use crate::http::{error_text, JsonHttp};
use crate::prompts::planner_user_prompt;

/// Chat-completions planner. The system prompt is built once at construction.
pub struct OpenAiPlanner {
    http: JsonHttp,
    config: PlannerConfig,
    system_prompt: String,
}

impl OpenAiPlanner {
    pub fn new(http: JsonHttp, config: PlannerConfig) -> AgentResult<Self> {
        let system_prompt = default_system_prompt()?;
        info!(model = %config.model, "OpenAI planner ready");
        Ok(Self { http, config, system_prompt })
    }

    fn request_body(&self, command: &str, context: &str) -> Value {
        let user_prompt = planner_user_prompt(command, if context.is_empty() { "(none)" } else { context });
        json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": user_prompt }
            ],
            "temperature": 0.0,
            "response_format": { "type": "json_object" }
        })
    }
}

#[async_trait]
impl PlanningService for OpenAiPlanner {
    async fn generate_plan(&self, command: &str, context: &str) -> AgentResult<Vec<Value>> {
        info!("Generating plan for: {}", command);
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let resp = self
            .http
            .post(&url, &self.config.api_key, &self.request_body(command, context))
            .await
            .map_err(|e| AgentError::Planning(format!("planner request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(AgentError::Planning(format!("planner rejected request: {}", error_text(resp).await)));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| AgentError::Planning(format!("unreadable planner response: {}", e)))?;

        if let Some(refusal) = body["choices"][0]["message"]["refusal"].as_str() {
            return Err(AgentError::Planning(format!("planner refused: {}", refusal)));
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AgentError::Planning("planner response has no content".to_string()))?;
        debug!("Raw planner content: {}", content);

        let steps = extract_plan(content)?;
        if steps.iter().any(|s| !s.is_object()) {
            warn!("Plan contains non-object steps; validation will reject them");
        }
        info!(steps = steps.len(), "Plan received");
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn planner() -> OpenAiPlanner {
        let http = JsonHttp::new(Duration::from_secs(5), 0).unwrap();
        let config = PlannerConfig {
            api_key: "sk-test".into(),
            model: "gpt-4o".into(),
            base_url: "http://localhost".into(),
        };
        OpenAiPlanner::new(http, config).unwrap()
    }

    #[test]
    fn request_is_deterministic_json_mode() {
        let body = planner().request_body("open notes", "Screen size: 1920x1080");
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["response_format"]["type"], "json_object");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("\"open notes\""));
        assert!(user.contains("1920x1080"));
        assert!(body["messages"][0]["content"].as_str().unwrap().contains("TASK_COMPLETE"));
    }

    #[test]
    fn command_text_is_not_treated_as_a_placeholder() {
        let body = planner().request_body("type {context} literally", "Screen size: 800x600");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("\"type {context} literally\""));
        assert_eq!(user.matches("800x600").count(), 1);
    }
}
