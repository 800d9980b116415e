use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Map, Value};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::VisionService;
use crate::config::VisionConfig;
use crate::error::{AgentError, AgentResult};
use crate::http::{error_text, JsonHttp, Retry};

const TERMINAL_STATUSES: &[&str] = &["succeeded", "failed", "canceled"];

/// Vision backed by a Replicate deployment (OmniParser-style screen parser).
pub struct ReplicateVision {
    http: JsonHttp,
    config: VisionConfig,
}

impl ReplicateVision {
    pub fn new(http: JsonHttp, config: VisionConfig) -> Self {
        info!("Replicate vision using deployment {}", config.deployment_id());
        Self { http, config }
    }

    fn predictions_url(&self) -> String {
        format!(
            "{}/deployments/{}/{}/predictions",
            self.config.base_url.trim_end_matches('/'),
            self.config.deployment_owner,
            self.config.deployment_name
        )
    }

    fn prediction_url(&self, id: &str) -> String {
        format!("{}/predictions/{}", self.config.base_url.trim_end_matches('/'), id)
    }

    async fn create_prediction(&self, image: &[u8]) -> AgentResult<String> {
        let body = json!({ "input": { "image": data_uri(image) } });
        let resp = self
            .http
            .post_with(Retry::IfNotAccepted, &self.predictions_url(), &self.config.api_token, &body)
            .await
            .map_err(|e| AgentError::Vision(format!("prediction create failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(AgentError::Vision(format!("prediction create rejected: {}", error_text(resp).await)));
        }

        let created: Value = resp
            .json()
            .await
            .map_err(|e| AgentError::Vision(format!("unreadable prediction response: {}", e)))?;

        let id = created["id"]
            .as_str()
            .ok_or_else(|| AgentError::Vision("prediction response has no id".to_string()))?;
        info!(prediction = id, status = created["status"].as_str().unwrap_or("?"), "Prediction started");
        Ok(id.to_string())
    }

    async fn poll_until_terminal(&self, id: &str) -> AgentResult<Value> {
        let url = self.prediction_url(id);
        loop {
            let resp = self
                .http
                .get(&url, &self.config.api_token)
                .await
                .map_err(|e| AgentError::Vision(format!("prediction poll failed: {}", e)))?;

            if !resp.status().is_success() {
                return Err(AgentError::Vision(format!("prediction poll rejected: {}", error_text(resp).await)));
            }

            let prediction: Value = resp
                .json()
                .await
                .map_err(|e| AgentError::Vision(format!("unreadable prediction: {}", e)))?;

            let status = prediction["status"].as_str().unwrap_or("unknown");
            if TERMINAL_STATUSES.contains(&status) {
                return Ok(prediction);
            }
            debug!(prediction = id, status, "Waiting for prediction");
            sleep(self.config.poll_interval).await;
        }
    }

    async fn cancel(&self, id: &str) {
        let url = format!("{}/cancel", self.prediction_url(id));
        match self.http.post(&url, &self.config.api_token, &json!({})).await {
            Ok(resp) if resp.status().is_success() => info!(prediction = id, "Cancelled timed-out prediction"),
            Ok(resp) => warn!(prediction = id, "Cancel rejected: {}", error_text(resp).await),
            Err(e) => warn!(prediction = id, "Cancel failed: {}", e),
        }
    }
}

#[async_trait]
impl VisionService for ReplicateVision {
    async fn analyze_image(&self, image: &[u8], prompt: &str) -> AgentResult<Map<String, Value>> {
        // The parser model takes only the image; the prompt is kept for the logs.
        info!(bytes = image.len(), "Analyzing screenshot: {}", prompt);

        let id = self.create_prediction(image).await?;

        let prediction = match timeout(self.config.timeout, self.poll_until_terminal(&id)).await {
            Ok(result) => result?,
            Err(_) => {
                self.cancel(&id).await;
                return Err(AgentError::Vision(format!(
                    "prediction {} did not finish within {:?}",
                    id, self.config.timeout
                )));
            }
        };

        let status = prediction["status"].as_str().unwrap_or("unknown");
        if status != "succeeded" {
            let detail = match &prediction["error"] {
                Value::Null => "no error detail".to_string(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(AgentError::Vision(format!("prediction {} {}: {}", id, status, detail)));
        }

        info!(prediction = %id, "Prediction succeeded");
        Ok(into_output_map(prediction["output"].clone()))
    }
}

fn data_uri(image: &[u8]) -> String {
    format!("data:image/png;base64,{}", general_purpose::STANDARD.encode(image))
}

fn into_output_map(output: Value) -> Map<String, Value> {
    match output {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            warn!("Vision output is not an object; wrapping as raw_output");
            let mut map = Map::new();
            map.insert("raw_output".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_is_png_base64() {
        assert_eq!(data_uri(b"abc"), "data:image/png;base64,YWJj");
    }

    #[test]
    fn non_object_output_wrapped() {
        let map = into_output_map(json!(["a", "b"]));
        assert_eq!(map["raw_output"], json!(["a", "b"]));
        assert!(into_output_map(Value::Null).is_empty());
        assert_eq!(into_output_map(json!({"k": 1}))["k"], 1);
    }
}
