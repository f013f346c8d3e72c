#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lines starting with this marker are system notices, never viewer comments.
pub const SYSTEM_MARKER_PREFIX: char = '[';

/// True when `line` carries the system-notice marker.
pub fn is_system_line(line: &str) -> bool {
	line.starts_with(SYSTEM_MARKER_PREFIX)
}

/// Errors for parsing identifiers and modes from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
	#[error("empty value")]
	Empty,
	#[error("unknown reply mode: {0}")]
	UnknownMode(String),
}

/// Reply-generation backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
	OpenAi,
	Dify,
	Coze,
	#[default]
	Echo,
}

impl ReplyMode {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			ReplyMode::OpenAi => "openai",
			ReplyMode::Dify => "dify",
			ReplyMode::Coze => "coze",
			ReplyMode::Echo => "echo",
		}
	}

	/// Lenient parse: anything unrecognized becomes `Echo`.
	pub fn normalize(s: &str) -> Self {
		s.parse().unwrap_or(ReplyMode::Echo)
	}
}

impl fmt::Display for ReplyMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ReplyMode {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"openai" | "open_ai" => Ok(ReplyMode::OpenAi),
			"dify" => Ok(ReplyMode::Dify),
			"coze" => Ok(ReplyMode::Coze),
			"echo" => Ok(ReplyMode::Echo),
			other => Err(ParseError::UnknownMode(other.to_string())),
		}
	}
}

/// Live-stream target identifier (streamer handle), stored without the leading `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
	/// Trim and strip a single leading `@`; rejects empty handles.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseError> {
		let id = id.into();
		let id = id.trim();
		let id = id.strip_prefix('@').unwrap_or(id).trim();
		if id.is_empty() {
			return Err(ParseError::Empty);
		}
		Ok(Self(id.to_string()))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for TargetId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for TargetId {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		TargetId::new(s)
	}
}

/// Lifecycle of the upstream live connection.
///
/// Within one run the state only moves forward:
/// `Idle -> Connecting -> {Stopped | Live} -> Disconnecting -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
	#[default]
	Idle,
	Connecting,
	Live,
	Disconnecting,
	Stopped,
}

impl ConnectionState {
	pub const fn as_str(self) -> &'static str {
		match self {
			ConnectionState::Idle => "idle",
			ConnectionState::Connecting => "connecting",
			ConnectionState::Live => "live",
			ConnectionState::Disconnecting => "disconnecting",
			ConnectionState::Stopped => "stopped",
		}
	}

	/// A new run may only begin from a resting state.
	pub const fn can_start(self) -> bool {
		matches!(self, ConnectionState::Idle | ConnectionState::Stopped)
	}

	pub const fn is_running(self) -> bool {
		!self.can_start()
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A viewer comment as admitted to the queue (`"speaker: text"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
	pub timestamp: SystemTime,
	pub raw_line: String,
}

impl Comment {
	pub fn new(raw_line: impl Into<String>) -> Self {
		Self::at(SystemTime::now(), raw_line)
	}

	pub fn at(timestamp: SystemTime, raw_line: impl Into<String>) -> Self {
		Self {
			timestamp,
			raw_line: raw_line.into(),
		}
	}

	/// Part before the first colon, when there is one.
	pub fn speaker(&self) -> Option<&str> {
		self.raw_line.split_once(':').map(|(speaker, _)| speaker.trim())
	}

	/// Part after the first colon, or the whole line when no colon is present.
	pub fn text(&self) -> &str {
		match self.raw_line.split_once(':') {
			Some((_, text)) => text.trim(),
			None => self.raw_line.trim(),
		}
	}
}

/// Optional case-insensitive keyword gate applied before dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordFilter {
	enabled: bool,
	keywords: Vec<String>,
}

impl KeywordFilter {
	pub fn new<I, S>(enabled: bool, keywords: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut filter = Self {
			enabled,
			keywords: Vec::new(),
		};
		filter.set_keywords(keywords);
		filter
	}

	/// Pass-through filter.
	pub fn disabled() -> Self {
		Self::default()
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	pub fn set_enabled(&mut self, enabled: bool) {
		self.enabled = enabled;
	}

	/// Replace the keyword list; blanks are dropped.
	pub fn set_keywords<I, S>(&mut self, keywords: I)
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self.keywords = keywords
			.into_iter()
			.map(|k| k.as_ref().trim().to_lowercase())
			.filter(|k| !k.is_empty())
			.collect();
	}

	pub fn keywords(&self) -> &[String] {
		&self.keywords
	}

	/// An enabled filter with no keywords accepts nothing.
	pub fn accepts(&self, line: &str) -> bool {
		if !self.enabled {
			return true;
		}
		let lower = line.to_lowercase();
		self.keywords.iter().any(|k| lower.contains(k.as_str()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reply_mode_parse_and_display() {
		assert_eq!("OpenAI".parse::<ReplyMode>().unwrap(), ReplyMode::OpenAi);
		assert_eq!("coze".parse::<ReplyMode>().unwrap(), ReplyMode::Coze);
		assert_eq!(ReplyMode::Dify.to_string(), "dify");
		assert!(matches!("gpt".parse::<ReplyMode>(), Err(ParseError::UnknownMode(_))));
	}

	#[test]
	fn reply_mode_normalize_falls_back_to_echo() {
		assert_eq!(ReplyMode::normalize("bogus"), ReplyMode::Echo);
		assert_eq!(ReplyMode::normalize(""), ReplyMode::Echo);
		assert_eq!(ReplyMode::normalize(" dify "), ReplyMode::Dify);
	}

	#[test]
	fn target_id_strips_at_sign() {
		assert_eq!(TargetId::new("  @streamer ").unwrap().as_str(), "streamer");
		assert_eq!(TargetId::new("plain").unwrap().as_str(), "plain");
		assert!(TargetId::new("@").is_err());
		assert!(TargetId::new("   ").is_err());
	}

	#[test]
	fn comment_splits_on_first_colon() {
		let c = Comment::new("alice: nice stream: really");
		assert_eq!(c.speaker(), Some("alice"));
		assert_eq!(c.text(), "nice stream: really");

		let bare = Comment::new("  no speaker here ");
		assert_eq!(bare.speaker(), None);
		assert_eq!(bare.text(), "no speaker here");
	}

	#[test]
	fn keyword_filter_is_case_insensitive() {
		let f = KeywordFilter::new(true, ["Hello", "  ", "GG"]);
		assert_eq!(f.keywords(), ["hello".to_string(), "gg".to_string()]);
		assert!(f.accepts("b: HELLO there"));
		assert!(f.accepts("c: gg wp"));
		assert!(!f.accepts("a: hi"));
	}

	#[test]
	fn keyword_filter_edge_cases() {
		assert!(KeywordFilter::disabled().accepts("anything"));
		assert!(KeywordFilter::new(false, ["x"]).accepts("no match"));
		assert!(!KeywordFilter::new(true, Vec::<String>::new()).accepts("a: hi"));
	}

	#[test]
	fn connection_state_start_gate() {
		assert!(ConnectionState::Idle.can_start());
		assert!(ConnectionState::Stopped.can_start());
		assert!(ConnectionState::Live.is_running());
		assert!(ConnectionState::Connecting.is_running());
		assert!(ConnectionState::Disconnecting.is_running());
	}

	#[test]
	fn system_marker_detection() {
		assert!(is_system_line("[system] connected"));
		assert!(!is_system_line("a: [not] system"));
	}
}
