#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use livereply_backend::{BackendSettings, EMPTY_REPLY_PLACEHOLDER, Prompt, ReplyBackend};
use livereply_domain::{Comment, KeywordFilter, ReplyMode};
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::queue::CommentQueue;
use crate::sink::{Emission, ResultSink};

/// Operator-controlled dispatch settings; cloned as a snapshot for each dispatch.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
	pub enabled: bool,
	pub mode: ReplyMode,
	pub filter: KeywordFilter,
	/// Accepted comments collected per cycle; only the first is dispatched.
	pub max_batch: usize,
	pub custom_prompt: Option<String>,
	pub backends: BackendSettings,
}

impl Default for DispatchSettings {
	fn default() -> Self {
		Self {
			enabled: false,
			mode: ReplyMode::Echo,
			filter: KeywordFilter::disabled(),
			max_batch: 1,
			custom_prompt: None,
			backends: BackendSettings::default(),
		}
	}
}

/// What a single `cycle()` call did.
#[derive(Debug)]
pub enum CycleOutcome {
	/// Replies are switched off.
	Disabled,
	/// A previous dispatch is still in flight.
	Busy,
	/// Nothing eligible in the queue.
	Idle,
	/// One comment handed to a dispatch worker.
	Dispatched { comment: Comment, worker: JoinHandle<()> },
}

/// Clears the dispatch flag when the backend call finishes, however it finishes.
pub(crate) struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
	pub(crate) fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
		flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| Self(Arc::clone(flag)))
	}
}

impl Drop for InFlightGuard {
	fn drop(&mut self) {
		self.0.store(false, Ordering::Release);
	}
}

/// Single-flight reply dispatcher driven by an external periodic trigger.
pub struct ReplyDispatcher {
	queue: Arc<CommentQueue>,
	sink: Arc<dyn ResultSink>,
	settings: RwLock<DispatchSettings>,
	in_flight: Arc<AtomicBool>,
	runtime: Handle,
}

impl ReplyDispatcher {
	/// Dispatch workers are spawned on `runtime`.
	pub fn new(queue: Arc<CommentQueue>, sink: Arc<dyn ResultSink>, settings: DispatchSettings, runtime: Handle) -> Self {
		Self {
			queue,
			sink,
			settings: RwLock::new(settings),
			in_flight: Arc::new(AtomicBool::new(false)),
			runtime,
		}
	}

	pub fn settings(&self) -> DispatchSettings {
		self.settings.read().clone()
	}

	pub fn set_enabled(&self, enabled: bool) {
		self.settings.write().enabled = enabled;
		info!(enabled, "reply dispatch toggled");
	}

	pub fn set_mode(&self, mode: ReplyMode) {
		self.settings.write().mode = mode;
		info!(%mode, "reply mode set");
	}

	/// `None` keeps the current keyword list.
	pub fn set_keyword_mode(&self, enabled: bool, keywords: Option<Vec<String>>) {
		let mut s = self.settings.write();
		s.filter.set_enabled(enabled);
		if let Some(keywords) = keywords {
			s.filter.set_keywords(keywords);
		}
		info!(enabled, keywords = ?s.filter.keywords(), "keyword filter updated");
	}

	pub fn set_max_batch(&self, n: usize) {
		self.settings.write().max_batch = n.max(1);
	}

	/// A blank prompt restores the default.
	pub fn set_custom_prompt(&self, prompt: &str) {
		let prompt = prompt.trim();
		self.settings.write().custom_prompt = (!prompt.is_empty()).then(|| prompt.to_string());
		info!(custom = !prompt.is_empty(), "system prompt updated");
	}

	pub fn set_backends(&self, backends: BackendSettings) {
		self.settings.write().backends = backends;
	}

	/// Drop every pending comment (used when replies are paused).
	pub fn clear_pending(&self) -> usize {
		self.queue.clear()
	}

	pub fn is_dispatching(&self) -> bool {
		self.in_flight.load(Ordering::Acquire)
	}

	/// Select at most one comment and dispatch it.
	pub fn cycle(&self) -> CycleOutcome {
		let settings = self.settings();
		if !settings.enabled {
			return CycleOutcome::Disabled;
		}

		let Some(guard) = InFlightGuard::acquire(&self.in_flight) else {
			debug!("previous reply still in flight; skipping cycle");
			return CycleOutcome::Busy;
		};

		let accepted = self.queue.drain_newest(&settings.filter, settings.max_batch);
		let Some(comment) = accepted.into_iter().next() else {
			return CycleOutcome::Idle;
		};

		metrics::counter!("livereply_dispatch_total").increment(1);
		debug!(line = %comment.raw_line, mode = %settings.mode, "dispatching comment");

		let worker = self
			.runtime
			.spawn(run_dispatch(comment.clone(), settings, Arc::clone(&self.sink), guard));

		CycleOutcome::Dispatched { comment, worker }
	}
}

async fn run_dispatch(comment: Comment, settings: DispatchSettings, sink: Arc<dyn ResultSink>, guard: InFlightGuard) {
	let backend = ReplyBackend::select(settings.mode, &settings.backends);
	let prompt = Prompt::build(comment.text(), settings.custom_prompt.as_deref());
	let backend_name = backend.name();

	deliver_reply(async move { backend.generate(&prompt).await }, guard, backend_name, sink.as_ref()).await;
}

/// Run `generation` in its own task and emit exactly one reply or error.
///
/// The task owns `guard`, so the flag stays set until the backend call itself
/// is over even if the awaiting worker is aborted. A panic surfaces as a JoinError.
pub(crate) async fn deliver_reply<F>(generation: F, guard: InFlightGuard, backend_name: &'static str, sink: &dyn ResultSink)
where
	F: Future<Output = String> + Send + 'static,
{
	let task = tokio::spawn(async move {
		let _guard = guard;
		generation.await
	});

	match task.await {
		Ok(reply) => {
			let reply = if reply.is_empty() {
				EMPTY_REPLY_PLACEHOLDER.to_string()
			} else {
				reply
			};
			metrics::counter!("livereply_replies_total").increment(1);
			info!(backend = backend_name, %reply, "reply generated");
			sink.emit(Emission::Reply(reply));
		}
		Err(e) => {
			metrics::counter!("livereply_reply_errors_total").increment(1);
			error!(backend = backend_name, error = %e, "reply worker failed");
			sink.emit(Emission::Error(format!("AI reply failed: {e}")));
		}
	}
}
