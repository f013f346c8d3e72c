#![forbid(unsafe_code)]

use livereply_platform::SecretString;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{BackendError, DEFAULT_AGENT_USER, echo, http_client, read_json};

pub const DEFAULT_COZE_ENDPOINT: &str = "https://api.coze.com/open_api/v2/chat";

#[derive(Debug, Clone)]
pub struct CozeConfig {
	pub endpoint: String,
	pub api_key: SecretString,
	pub bot_id: String,
	pub user_id: String,
	pub stream: bool,
}

impl Default for CozeConfig {
	fn default() -> Self {
		Self {
			endpoint: DEFAULT_COZE_ENDPOINT.to_string(),
			api_key: SecretString::default(),
			bot_id: String::new(),
			user_id: DEFAULT_AGENT_USER.to_string(),
			stream: false,
		}
	}
}

impl CozeConfig {
	pub fn is_complete(&self) -> bool {
		!self.api_key.is_blank() && !self.bot_id.trim().is_empty()
	}
}

/// Coze bot backend.
#[derive(Debug, Clone)]
pub struct CozeBackend {
	cfg: CozeConfig,
}

impl CozeBackend {
	pub fn new(cfg: CozeConfig) -> Self {
		Self { cfg }
	}

	pub async fn generate(&self, text: &str) -> String {
		if !self.cfg.is_complete() {
			debug!("coze config incomplete; echoing");
			return echo(text);
		}

		match self.request(text).await {
			Ok(reply) => reply,
			Err(e) => {
				warn!(error = %e, "coze request failed");
				e.into_tagged("Coze")
			}
		}
	}

	async fn request(&self, query: &str) -> Result<String, BackendError> {
		let body = ChatRequest {
			bot_id: self.cfg.bot_id.trim(),
			user_id: &self.cfg.user_id,
			query,
			stream: self.cfg.stream,
		};

		let resp = http_client()?
			.post(self.cfg.endpoint.trim())
			.bearer_auth(self.cfg.api_key.expose().trim())
			.json(&body)
			.send()
			.await?;

		let data = read_json(resp).await?;
		extract_text(&data).ok_or_else(|| BackendError::NoText { raw: data.to_string() })
	}
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
	bot_id: &'a str,
	user_id: &'a str,
	query: &'a str,
	stream: bool,
}

fn non_empty_messages(v: Option<&Value>) -> Option<&Vec<Value>> {
	v.and_then(Value::as_array).filter(|list| !list.is_empty())
}

/// Newest message first; first textual content wins.
fn extract_text(data: &Value) -> Option<String> {
	let messages = non_empty_messages(data.pointer("/data/messages")).or_else(|| non_empty_messages(data.get("messages")))?;

	messages.iter().rev().find_map(|msg| match msg.get("content")? {
		Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
		Value::Array(blocks) => blocks.iter().find_map(|block| {
			if block.get("type").and_then(Value::as_str) != Some("text") {
				return None;
			}
			block
				.get("text")
				.and_then(Value::as_str)
				.filter(|t| !t.is_empty())
				.map(|t| t.trim().to_string())
		}),
		_ => None,
	})
}
