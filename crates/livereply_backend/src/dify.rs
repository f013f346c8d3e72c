#![forbid(unsafe_code)]

use livereply_platform::SecretString;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{BackendError, DEFAULT_AGENT_USER, echo, http_client, read_json};

#[derive(Debug, Clone)]
pub struct DifyConfig {
	/// App API base, e.g. `https://dify.example.com/v1`.
	pub endpoint: String,
	pub api_key: SecretString,
	pub user: String,
	pub inputs: Map<String, Value>,
	pub response_mode: String,
}

impl Default for DifyConfig {
	fn default() -> Self {
		Self {
			endpoint: String::new(),
			api_key: SecretString::default(),
			user: DEFAULT_AGENT_USER.to_string(),
			inputs: Map::new(),
			response_mode: "blocking".to_string(),
		}
	}
}

impl DifyConfig {
	pub fn is_complete(&self) -> bool {
		!self.endpoint.trim().is_empty() && !self.api_key.is_blank()
	}
}

/// Dify agent backend (`POST {endpoint}/chat-messages`).
#[derive(Debug, Clone)]
pub struct DifyBackend {
	cfg: DifyConfig,
}

impl DifyBackend {
	pub fn new(cfg: DifyConfig) -> Self {
		Self { cfg }
	}

	pub async fn generate(&self, text: &str) -> String {
		if !self.cfg.is_complete() {
			debug!("dify config incomplete; echoing");
			return echo(text);
		}

		match self.request(text).await {
			Ok(reply) => reply,
			Err(e) => {
				warn!(error = %e, "dify request failed");
				e.into_tagged("Dify")
			}
		}
	}

	async fn request(&self, query: &str) -> Result<String, BackendError> {
		let url = format!("{}/chat-messages", self.cfg.endpoint.trim().trim_end_matches('/'));
		let body = ChatMessagesRequest {
			inputs: &self.cfg.inputs,
			query,
			response_mode: &self.cfg.response_mode,
			user: &self.cfg.user,
		};

		let resp = http_client()?
			.post(url)
			.bearer_auth(self.cfg.api_key.expose().trim())
			.json(&body)
			.send()
			.await?;

		let data = read_json(resp).await?;
		extract_answer(&data).ok_or_else(|| BackendError::NoText { raw: data.to_string() })
	}
}

#[derive(Debug, Serialize)]
struct ChatMessagesRequest<'a> {
	inputs: &'a Map<String, Value>,
	query: &'a str,
	response_mode: &'a str,
	user: &'a str,
}

fn non_empty(v: Option<&Value>) -> Option<&str> {
	v.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// `answer` at the top level, else `data.answer`.
fn extract_answer(data: &Value) -> Option<String> {
	non_empty(data.get("answer"))
		.or_else(|| non_empty(data.pointer("/data/answer")))
		.map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn answer_prefers_top_level() {
		let v = json!({"answer": " Thanks! ", "data": {"answer": "nested"}});
		assert_eq!(extract_answer(&v).as_deref(), Some("Thanks!"));
	}

	#[test]
	fn answer_falls_back_to_data() {
		let v = json!({"answer": "", "data": {"answer": "nested"}});
		assert_eq!(extract_answer(&v).as_deref(), Some("nested"));
	}

	#[test]
	fn answer_missing_everywhere() {
		assert_eq!(extract_answer(&json!({"event": "message"})), None);
		assert_eq!(extract_answer(&json!({"answer": 42})), None);
	}
}
