#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use livereply_domain::TargetId;
use tokio::sync::Notify;
use tokio::time::Interval;
use tracing::{debug, info, warn};

use crate::{CommentEvent, LiveClientAdapter, LiveEvent, LiveEventTx, new_session_id};

const DEMO_SCRIPT: &[(&str, &str)] = &[
	("demo_viewer", "hello from the demo stream"),
	("night_owl", "what game is this?"),
	("gg_andy", "gg that was close"),
	("lurker42", "first time here, nice setup"),
];

/// Synthetic live source used for local development and tests.
pub struct DemoAdapter {
	target: TargetId,
	emit_interval: Duration,
	live: bool,
	connected: AtomicBool,
	stop: Notify,
}

impl DemoAdapter {
	pub fn new(target: TargetId) -> Self {
		Self {
			target,
			emit_interval: Duration::from_millis(1_500),
			live: true,
			connected: AtomicBool::new(false),
			stop: Notify::new(),
		}
	}

	/// Customize emit interval (useful for tests).
	pub fn with_emit_interval(mut self, interval: Duration) -> Self {
		self.emit_interval = interval;
		self
	}

	/// Report the target as offline.
	pub fn offline(mut self) -> Self {
		self.live = false;
		self
	}

	fn make_comment(n: u64) -> CommentEvent {
		let (nick, text) = DEMO_SCRIPT[(n as usize) % DEMO_SCRIPT.len()];
		CommentEvent {
			nickname: Some(nick.to_string()),
			unique_id: Some(format!("{nick}_{n}")),
			text: Some(text.to_string()),
		}
	}
}

#[async_trait]
impl LiveClientAdapter for DemoAdapter {
	fn name(&self) -> &'static str {
		"demo"
	}

	fn target(&self) -> &TargetId {
		&self.target
	}

	async fn is_live(&self) -> anyhow::Result<bool> {
		Ok(self.live)
	}

	async fn connect(&self, events_tx: LiveEventTx) -> anyhow::Result<()> {
		let session_id = new_session_id();
		self.connected.store(true, Ordering::SeqCst);

		let _ = events_tx
			.send(LiveEvent::Connected {
				target: self.target.clone(),
				room_id: Some(session_id.clone()),
			})
			.await;

		let mut interval: Interval = tokio::time::interval(self.emit_interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		info!(target_id = %self.target, %session_id, "demo adapter connected");
		debug!(interval_ms = self.emit_interval.as_millis(), "demo adapter tick interval configured");

		let mut tick: u64 = 0;
		loop {
			tokio::select! {
				_ = interval.tick() => {
					let ev = LiveEvent::Comment(Self::make_comment(tick));
					tick += 1;
					if events_tx.try_send(ev).is_err() {
						if events_tx.is_closed() {
							debug!("demo adapter events channel closed; ending session");
							break;
						}
						warn!("demo adapter events channel full; dropping comment");
					}
				}

				_ = self.stop.notified() => {
					info!(target_id = %self.target, "demo adapter received disconnect");
					break;
				}
			}
		}

		self.connected.store(false, Ordering::SeqCst);
		let _ = events_tx.try_send(LiveEvent::Disconnected {
			reason: Some("demo session closed".to_string()),
		});
		Ok(())
	}

	async fn disconnect(&self) -> anyhow::Result<()> {
		// notify_one keeps a permit, so a disconnect racing ahead of connect still lands.
		self.stop.notify_one();
		Ok(())
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}
}
