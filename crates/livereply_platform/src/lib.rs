#![forbid(unsafe_code)]

mod demo;
mod unavailable;

use std::fmt;

use livereply_domain::TargetId;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use demo::DemoAdapter;
pub use unavailable::UnavailableAdapter;

/// Adapter → supervisor event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
	/// Session established.
	Connected {
		target: TargetId,
		room_id: Option<String>,
	},

	/// Viewer comment.
	Comment(CommentEvent),

	/// Session ended (remote or local).
	Disconnected {
		reason: Option<String>,
	},
}

/// Raw viewer comment as reported by the live client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentEvent {
	pub nickname: Option<String>,
	pub unique_id: Option<String>,
	pub text: Option<String>,
}

impl CommentEvent {
	pub fn new(nickname: impl Into<String>, text: impl Into<String>) -> Self {
		Self {
			nickname: Some(nickname.into()),
			unique_id: None,
			text: Some(text.into()),
		}
	}

	/// Display name: nickname, then unique id, then `?`.
	pub fn speaker(&self) -> &str {
		self.nickname
			.as_deref()
			.filter(|s| !s.is_empty())
			.or(self.unique_id.as_deref().filter(|s| !s.is_empty()))
			.unwrap_or("?")
	}

	/// Queue line in `"speaker: text"` form.
	pub fn line(&self) -> String {
		format!("{}: {}", self.speaker(), self.text.as_deref().unwrap_or_default())
	}
}

pub type LiveEventTx = mpsc::Sender<LiveEvent>;
pub type LiveEventRx = mpsc::Receiver<LiveEvent>;

/// Build the bounded adapter → supervisor event channel.
pub fn bounded_live_channel(capacity: usize) -> (LiveEventTx, LiveEventRx) {
	mpsc::channel(capacity)
}

/// Upstream live-streaming client, injected into the supervisor.
///
/// `connect` and `disconnect` are called from different tasks of the same
/// session runtime, so implementations keep their own interior state.
#[async_trait::async_trait]
pub trait LiveClientAdapter: Send + Sync + 'static {
	/// Short adapter name for logs.
	fn name(&self) -> &'static str;

	fn target(&self) -> &TargetId;

	/// Whether the target is currently broadcasting.
	async fn is_live(&self) -> anyhow::Result<bool>;

	/// Connect and deliver events until the session ends.
	async fn connect(&self, events_tx: LiveEventTx) -> anyhow::Result<()>;

	/// Ask a running `connect` to wind down.
	async fn disconnect(&self) -> anyhow::Result<()>;

	fn is_connected(&self) -> bool;
}

/// Wrapper that redacts in logs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_blank(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl serde::Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<<S as serde::Serializer>::Ok, <S as serde::Serializer>::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str("")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Generate an opaque session id.
pub fn new_session_id() -> String {
	Uuid::new_v4().to_string()
}
