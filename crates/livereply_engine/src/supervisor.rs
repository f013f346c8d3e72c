#![forbid(unsafe_code)]

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use livereply_domain::ConnectionState;
use livereply_platform::{LiveClientAdapter, LiveEvent, bounded_live_channel, new_session_id};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::queue::CommentQueue;
use crate::sink::{Emission, ResultSink};

pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
	/// How long a graceful disconnect may take before the session is cancelled.
	pub disconnect_grace: Duration,
	pub events_channel_capacity: usize,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			disconnect_grace: DEFAULT_DISCONNECT_GRACE,
			events_channel_capacity: 1_024,
		}
	}
}

#[derive(Debug, Error)]
pub enum SupervisorError {
	#[error("already running")]
	AlreadyRunning,
	#[error("not connected or already stopped")]
	NotRunning,
	#[error("failed to build session runtime: {0}")]
	RuntimeBuild(std::io::Error),
	#[error("failed to spawn session thread: {0}")]
	ThreadSpawn(std::io::Error),
}

/// How a `stop()` call concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
	/// Graceful disconnect exceeded the grace period and the session was cancelled.
	pub forced: bool,
	/// The session thread exited within the stop timeout.
	pub joined: bool,
}

/// Requests delivered into the session runtime.
enum SessionControl {
	Disconnect { resp: oneshot::Sender<anyhow::Result<()>> },
	Shutdown,
}

struct Session {
	control_tx: mpsc::UnboundedSender<SessionControl>,
	done_rx: oneshot::Receiver<()>,
	thread: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy)]
struct StateCell {
	run: u64,
	state: ConnectionState,
}

struct Shared {
	adapter: Arc<dyn LiveClientAdapter>,
	queue: Arc<CommentQueue>,
	sink: Arc<dyn ResultSink>,
	cfg: SupervisorConfig,
	state: Mutex<StateCell>,
}

impl Shared {
	fn state(&self) -> ConnectionState {
		self.state.lock().state
	}

	/// Move `run` to `to` if it is still the current run and currently in `from`.
	fn advance(&self, run: u64, from: ConnectionState, to: ConnectionState) -> bool {
		let mut cell = self.state.lock();
		if cell.run != run || cell.state != from {
			return false;
		}
		cell.state = to;
		debug!(run, %from, %to, "connection state");
		true
	}

	fn finish_run(&self, run: u64) {
		let mut cell = self.state.lock();
		if cell.run == run && cell.state != ConnectionState::Stopped {
			debug!(run, from = %cell.state, "connection state -> stopped");
			cell.state = ConnectionState::Stopped;
		}
		metrics::gauge!("livereply_live").set(0.0);
	}

	fn emit_error(&self, msg: String) {
		error!("{msg}");
		self.sink.emit(Emission::Error(msg));
	}

	fn emit_info(&self, msg: String) {
		info!("{msg}");
		self.sink.emit(Emission::Info(msg));
	}

	/// Handlers run one at a time on the session runtime; a failing one is reported and skipped.
	fn handle_event(&self, ev: LiveEvent) {
		let outcome = catch_unwind(AssertUnwindSafe(|| match ev {
			LiveEvent::Connected { target, room_id } => {
				let room = room_id.as_deref().unwrap_or("unknown");
				self.emit_info(format!("connected to @{target} (room id: {room})"));
			}
			LiveEvent::Comment(comment) => {
				let line = comment.line();
				debug!(%line, "comment");
				self.queue.enqueue(line);
			}
			LiveEvent::Disconnected { reason } => match reason {
				Some(reason) => self.emit_info(format!("connection closed: {reason}")),
				None => self.emit_info("connection closed".to_string()),
			},
		}));

		if outcome.is_err() {
			self.emit_error("live event handler failed".to_string());
		}
	}
}

/// Owns the upstream live connection on a dedicated thread with its own
/// single-threaded runtime.
pub struct ConnectionSupervisor {
	shared: Arc<Shared>,
	session: Mutex<Option<Session>>,
}

impl ConnectionSupervisor {
	pub fn new(
		adapter: Arc<dyn LiveClientAdapter>,
		queue: Arc<CommentQueue>,
		sink: Arc<dyn ResultSink>,
		cfg: SupervisorConfig,
	) -> Self {
		Self {
			shared: Arc::new(Shared {
				adapter,
				queue,
				sink,
				cfg,
				state: Mutex::new(StateCell {
					run: 0,
					state: ConnectionState::Idle,
				}),
			}),
			session: Mutex::new(None),
		}
	}

	pub fn state(&self) -> ConnectionState {
		self.shared.state()
	}

	pub fn is_running(&self) -> bool {
		self.state().is_running()
	}

	/// Spawn the session thread and return immediately.
	pub fn start(&self) -> Result<(), SupervisorError> {
		let mut session = self.session.lock();

		let run = {
			let mut cell = self.shared.state.lock();
			if !cell.state.can_start() {
				drop(cell);
				self.shared.emit_error("listener already running".to_string());
				return Err(SupervisorError::AlreadyRunning);
			}
			cell.run += 1;
			cell.state = ConnectionState::Connecting;
			cell.run
		};

		// A previous session thread that outlived its stop timeout is detached here.
		if session.take().is_some() {
			debug!(run, "detached previous session thread");
		}

		let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
			Ok(rt) => rt,
			Err(e) => {
				self.shared.finish_run(run);
				self.shared.emit_error(format!("failed to create session runtime: {e}"));
				return Err(SupervisorError::RuntimeBuild(e));
			}
		};

		let (control_tx, control_rx) = mpsc::unbounded_channel();
		let (done_tx, done_rx) = oneshot::channel();
		let shared = Arc::clone(&self.shared);
		let session_id = new_session_id();
		let span = tracing::info_span!("live_session", %session_id, run);

		let spawned = std::thread::Builder::new()
			.name("livereply-session".to_owned())
			.spawn(move || {
				let _entered = span.enter();
				run_session_thread(rt, shared, run, control_rx, done_tx);
			});

		match spawned {
			Ok(thread) => {
				*session = Some(Session {
					control_tx,
					done_rx,
					thread,
				});
				metrics::counter!("livereply_supervisor_runs_total").increment(1);
				info!(
					run,
					%session_id,
					adapter = self.shared.adapter.name(),
					target_id = %self.shared.adapter.target(),
					"live session starting"
				);
				Ok(())
			}
			Err(e) => {
				self.shared.finish_run(run);
				self.shared.emit_error(format!("failed to start listener: {e}"));
				Err(SupervisorError::ThreadSpawn(e))
			}
		}
	}

	/// Disconnect gracefully within the configured grace period, cancel the
	/// session if that expires, then wait up to `timeout` for the thread.
	pub async fn stop(&self, timeout: Duration) -> Result<StopReport, SupervisorError> {
		let (session, run) = {
			let mut guard = self.session.lock();
			let cell = *self.shared.state.lock();
			match guard.take() {
				Some(session) if cell.state.is_running() => (session, cell.run),
				other => {
					*guard = other;
					drop(guard);
					self.shared.emit_error("not connected or already stopped".to_string());
					return Err(SupervisorError::NotRunning);
				}
			}
		};

		if !self.shared.advance(run, ConnectionState::Live, ConnectionState::Disconnecting) {
			self.shared
				.advance(run, ConnectionState::Connecting, ConnectionState::Disconnecting);
		}

		let grace = self.shared.cfg.disconnect_grace;
		let deadline = tokio::time::Instant::now() + grace;
		let Session {
			control_tx,
			mut done_rx,
			thread,
		} = session;
		let mut finished = false;
		let (resp_tx, resp_rx) = oneshot::channel();

		let forced = if control_tx.send(SessionControl::Disconnect { resp: resp_tx }).is_err() {
			debug!(run, "session already finished before disconnect");
			false
		} else {
			match tokio::time::timeout_at(deadline, resp_rx).await {
				Ok(Ok(Ok(()))) => {
					debug!(run, "graceful disconnect completed");
					// The session must also wind down within what is left of the grace period.
					finished = tokio::time::timeout_at(deadline, &mut done_rx).await.is_ok();
					!finished
				}
				Ok(Ok(Err(e))) => {
					self.shared.emit_error(format!("disconnect failed: {e}"));
					false
				}
				Ok(Err(_)) => {
					debug!(run, "session ended before disconnect reported");
					false
				}
				Err(_) => true,
			}
		};

		if forced {
			self.shared.emit_error(format!(
				"graceful disconnect timed out (>{:.1}s); forcing shutdown",
				grace.as_secs_f64()
			));
		}

		if !finished {
			// Cancel whatever is left on the session runtime.
			let _ = control_tx.send(SessionControl::Shutdown);
			finished = tokio::time::timeout(timeout, &mut done_rx).await.is_ok();
		}

		let joined = if finished {
			if thread.join().is_err() {
				warn!(run, "session thread panicked");
			}
			true
		} else {
			warn!(run, timeout_ms = timeout.as_millis(), "session thread did not exit in time; detaching");
			false
		};

		self.shared.finish_run(run);
		self.shared.emit_info("stopped listening".to_string());
		Ok(StopReport { forced, joined })
	}
}

fn run_session_thread(
	rt: tokio::runtime::Runtime,
	shared: Arc<Shared>,
	run: u64,
	control_rx: mpsc::UnboundedReceiver<SessionControl>,
	done_tx: oneshot::Sender<()>,
) {
	rt.block_on(run_session(Arc::clone(&shared), run, control_rx));
	// Drops every task still parked on this runtime without waiting on them.
	rt.shutdown_background();

	shared.finish_run(run);
	let _ = done_tx.send(());
}

async fn run_session(shared: Arc<Shared>, run: u64, mut control_rx: mpsc::UnboundedReceiver<SessionControl>) {
	let adapter = Arc::clone(&shared.adapter);
	let target = adapter.target().clone();

	let live = tokio::select! {
		res = adapter.is_live() => res,
		ctl = control_rx.recv() => {
			if let Some(SessionControl::Disconnect { resp }) = ctl {
				let _ = resp.send(Ok(()));
			}
			info!(run, "session cancelled during liveness check");
			return;
		}
	};

	match live {
		Ok(true) => {}
		Ok(false) => {
			shared.emit_error(format!("target not live or invalid identifier: @{target}"));
			return;
		}
		Err(e) => {
			shared.emit_error(format!("liveness check failed for @{target}: {e}"));
			return;
		}
	}

	if !shared.advance(run, ConnectionState::Connecting, ConnectionState::Live) {
		debug!(run, "stop requested before session went live");
		return;
	}
	metrics::gauge!("livereply_live").set(1.0);

	let (events_tx, mut events_rx) = bounded_live_channel(shared.cfg.events_channel_capacity);
	let serve = adapter.connect(events_tx);
	tokio::pin!(serve);

	loop {
		tokio::select! {
			res = &mut serve => {
				while let Ok(ev) = events_rx.try_recv() {
					shared.handle_event(ev);
				}
				match res {
					Ok(()) => info!(run, "live session ended"),
					Err(e) => shared.emit_error(format!("live connection failed: {e}")),
				}
				break;
			}

			Some(ev) = events_rx.recv() => shared.handle_event(ev),

			ctl = control_rx.recv() => match ctl {
				Some(SessionControl::Disconnect { resp }) => {
					let adapter = Arc::clone(&adapter);
					tokio::spawn(async move {
						let res = if adapter.is_connected() {
							adapter.disconnect().await
						} else {
							Ok(())
						};
						let _ = resp.send(res);
					});
				}
				Some(SessionControl::Shutdown) | None => {
					info!(run, "session shutdown requested");
					break;
				}
			},
		}
	}
}
