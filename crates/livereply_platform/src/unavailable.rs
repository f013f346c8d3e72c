#![forbid(unsafe_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use livereply_domain::TargetId;
use tracing::warn;

use crate::{LiveClientAdapter, LiveEventTx};

/// Adapter selected when no live client is installed.
pub struct UnavailableAdapter {
	target: TargetId,
	detail: String,
}

impl UnavailableAdapter {
	pub fn new(target: TargetId, detail: impl Into<String>) -> Self {
		Self {
			target,
			detail: detail.into(),
		}
	}
}

#[async_trait]
impl LiveClientAdapter for UnavailableAdapter {
	fn name(&self) -> &'static str {
		"unavailable"
	}

	fn target(&self) -> &TargetId {
		&self.target
	}

	async fn is_live(&self) -> anyhow::Result<bool> {
		warn!(target_id = %self.target, detail = %self.detail, "live client unavailable");
		Err(anyhow!("live client unavailable: {}", self.detail))
	}

	async fn connect(&self, _events_tx: LiveEventTx) -> anyhow::Result<()> {
		Err(anyhow!("live client unavailable: {}", self.detail))
	}

	async fn disconnect(&self) -> anyhow::Result<()> {
		Ok(())
	}

	fn is_connected(&self) -> bool {
		false
	}
}
