#![forbid(unsafe_code)]

use livereply_platform::SecretString;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{BackendError, echo, http_client, read_json};

const MAX_TOKENS: u32 = 200;
const TEMPERATURE: f64 = 0.7;

#[derive(Debug, Clone, Default)]
pub struct OpenAiConfig {
	pub base_url: String,
	pub api_key: SecretString,
	pub model: String,
}

impl OpenAiConfig {
	pub fn is_complete(&self) -> bool {
		!self.base_url.trim().is_empty() && !self.api_key.is_blank() && !self.model.trim().is_empty()
	}
}

/// OpenAI-compatible chat-completions backend.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
	cfg: OpenAiConfig,
}

impl OpenAiBackend {
	pub fn new(cfg: OpenAiConfig) -> Self {
		Self { cfg }
	}

	fn chat_completions_url(&self) -> String {
		let base = self.cfg.base_url.trim().trim_end_matches('/');
		if base.ends_with("/chat/completions") {
			return base.to_string();
		}
		format!("{base}/chat/completions")
	}

	pub async fn generate(&self, system: &str, user: &str, text: &str) -> String {
		if !self.cfg.is_complete() {
			debug!("openai config incomplete; echoing");
			return echo(text);
		}

		match self.request(system, user).await {
			Ok(reply) => reply,
			Err(e) => {
				warn!(error = %e, "openai request failed");
				e.into_tagged("OpenAI")
			}
		}
	}

	async fn request(&self, system: &str, user: &str) -> Result<String, BackendError> {
		let body = ChatCompletionRequest {
			model: self.cfg.model.trim(),
			messages: [
				ChatMessage {
					role: "system",
					content: system,
				},
				ChatMessage {
					role: "user",
					content: user,
				},
			],
			max_tokens: MAX_TOKENS,
			temperature: TEMPERATURE,
		};

		let resp = http_client()?
			.post(self.chat_completions_url())
			.bearer_auth(self.cfg.api_key.expose().trim())
			.json(&body)
			.send()
			.await?;

		let data = read_json(resp).await?;
		match data.pointer("/choices/0/message/content").and_then(|v| v.as_str()) {
			Some(content) => Ok(content.trim().to_string()),
			None => Err(BackendError::NoText { raw: data.to_string() }),
		}
	}
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
	model: &'a str,
	messages: [ChatMessage<'a>; 2],
	max_tokens: u32,
	temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
	role: &'static str,
	content: &'a str,
}
