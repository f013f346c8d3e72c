#![forbid(unsafe_code)]

use std::fmt;

use tokio::sync::mpsc;

/// Result delivered to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
	/// Generated reply text.
	Reply(String),

	/// Failure or warning.
	Error(String),

	/// Lifecycle notice.
	Info(String),
}

impl Emission {
	/// Render for a single line-oriented channel.
	///
	/// Notices carry the system marker so they are never fed back as comments.
	pub fn as_line(&self) -> String {
		match self {
			Emission::Reply(text) => text.clone(),
			Emission::Error(msg) => format!("[warning] {msg}"),
			Emission::Info(msg) => format!("[system] {msg}"),
		}
	}
}

impl fmt::Display for Emission {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Emission::Reply(text) => write!(f, "reply: {text}"),
			Emission::Error(msg) => write!(f, "error: {msg}"),
			Emission::Info(msg) => write!(f, "info: {msg}"),
		}
	}
}

/// Receiver of reply/error/info emissions.
pub trait ResultSink: Send + Sync + 'static {
	fn emit(&self, emission: Emission);
}

pub type EmissionRx = mpsc::UnboundedReceiver<Emission>;

/// Forwards emissions over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
	tx: mpsc::UnboundedSender<Emission>,
}

impl ChannelSink {
	pub fn new() -> (Self, EmissionRx) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}
}

impl ResultSink for ChannelSink {
	fn emit(&self, emission: Emission) {
		// A closed receiver means nobody is listening anymore.
		let _ = self.tx.send(emission);
	}
}

/// Single-channel sink for presentation layers without dedicated info/error outputs.
pub struct LineSink<F> {
	write_line: F,
}

impl<F> LineSink<F>
where
	F: Fn(String) + Send + Sync + 'static,
{
	pub fn new(write_line: F) -> Self {
		Self { write_line }
	}
}

impl<F> ResultSink for LineSink<F>
where
	F: Fn(String) + Send + Sync + 'static,
{
	fn emit(&self, emission: Emission) {
		(self.write_line)(emission.as_line());
	}
}
