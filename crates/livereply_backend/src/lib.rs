#![forbid(unsafe_code)]

mod coze;
mod dify;
mod openai;

use std::time::Duration;

use livereply_domain::ReplyMode;
use thiserror::Error;
use tracing::debug;

pub use coze::{CozeBackend, CozeConfig, DEFAULT_COZE_ENDPOINT};
pub use dify::{DifyBackend, DifyConfig};
pub use openai::{OpenAiBackend, OpenAiConfig};

/// Fixed per-request timeout; backends make a single attempt.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default end-user id sent to agent backends.
pub const DEFAULT_AGENT_USER: &str = "live_viewer";

/// Substituted by the dispatcher when a backend returns an empty reply.
pub const EMPTY_REPLY_PLACEHOLDER: &str = "[AI] (no reply)";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly live-stream chat assistant. \
Reply in the same language as the viewer comment. \
Do NOT translate or change language unless the viewer explicitly asks. \
Keep replies to 1 concise sentence.";

const USER_PROMPT_PREFIX: &str = "Viewer comment: ";

/// Echo reply for `text`.
pub fn echo(text: &str) -> String {
	format!("AI(Echo): {text}")
}

/// Prompt pair plus the bare comment text agent backends query with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
	pub system: String,
	pub user: String,
	pub text: String,
}

impl Prompt {
	/// Build prompts for `text`; a blank `custom_system` selects the default.
	pub fn build(text: &str, custom_system: Option<&str>) -> Self {
		let system = custom_system
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.unwrap_or(DEFAULT_SYSTEM_PROMPT)
			.to_string();
		Self {
			system,
			user: format!("{USER_PROMPT_PREFIX}{text}"),
			text: text.to_string(),
		}
	}
}

/// Failure of a single backend call. Never escapes `ReplyBackend::generate`.
#[derive(Debug, Error)]
pub enum BackendError {
	#[error("{0}")]
	Http(#[from] reqwest::Error),

	#[error("status={status} body={body}")]
	Status { status: u16, body: String },

	#[error("no usable text in response: {raw}")]
	NoText { raw: String },
}

impl BackendError {
	/// Inline result string surfaced to the viewer-facing reply channel.
	pub fn into_tagged(self, backend: &str) -> String {
		match self {
			BackendError::NoText { raw } => format!("[AI warning] {backend} response has no usable text: {raw}"),
			other => format!("[AI error] {backend} request failed: {other}"),
		}
	}
}

fn http_client() -> Result<reqwest::Client, BackendError> {
	Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value, BackendError> {
	let status = resp.status();
	if !status.is_success() {
		let body = resp.text().await.unwrap_or_default();
		return Err(BackendError::Status {
			status: status.as_u16(),
			body,
		});
	}
	Ok(resp.json().await?)
}

/// Per-backend configuration records.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
	pub openai: OpenAiConfig,
	pub dify: DifyConfig,
	pub coze: CozeConfig,
}

/// Reply-generation capability, selected once per dispatch from a settings snapshot.
#[derive(Debug, Clone)]
pub enum ReplyBackend {
	Echo,
	OpenAi(OpenAiBackend),
	Dify(DifyBackend),
	Coze(CozeBackend),
}

impl ReplyBackend {
	pub fn select(mode: ReplyMode, settings: &BackendSettings) -> Self {
		match mode {
			ReplyMode::OpenAi => ReplyBackend::OpenAi(OpenAiBackend::new(settings.openai.clone())),
			ReplyMode::Dify => ReplyBackend::Dify(DifyBackend::new(settings.dify.clone())),
			ReplyMode::Coze => ReplyBackend::Coze(CozeBackend::new(settings.coze.clone())),
			ReplyMode::Echo => ReplyBackend::Echo,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			ReplyBackend::Echo => "Echo",
			ReplyBackend::OpenAi(_) => "OpenAI",
			ReplyBackend::Dify(_) => "Dify",
			ReplyBackend::Coze(_) => "Coze",
		}
	}

	/// Generate a reply. Failures come back as tagged strings, never as errors.
	pub async fn generate(&self, prompt: &Prompt) -> String {
		debug!(backend = self.name(), "generating reply");
		match self {
			ReplyBackend::Echo => echo(&prompt.text),
			ReplyBackend::OpenAi(b) => b.generate(&prompt.system, &prompt.user, &prompt.text).await,
			ReplyBackend::Dify(b) => b.generate(&prompt.text).await,
			ReplyBackend::Coze(b) => b.generate(&prompt.text).await,
		}
	}
}
