#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use livereply_domain::{ConnectionState, TargetId};
use livereply_platform::{CommentEvent, DemoAdapter, LiveClientAdapter, LiveEvent, LiveEventTx};
use tokio::sync::Notify;

use crate::queue::CommentQueue;
use crate::sink::{ChannelSink, Emission, EmissionRx};
use crate::supervisor::{ConnectionSupervisor, SupervisorConfig, SupervisorError};

#[derive(Clone, Copy)]
enum Liveness {
	Live,
	Offline,
	Fails,
	Pending,
}

#[derive(Clone, Copy)]
enum DisconnectBehavior {
	Prompt,
	Never,
	/// Reports success without ending the running `connect`.
	AckOnly,
}

struct ScriptedAdapter {
	target: TargetId,
	liveness: Liveness,
	disconnect: DisconnectBehavior,
	comments: Vec<CommentEvent>,
	fail_connect: bool,
	connected: AtomicBool,
	stop: Notify,
}

impl ScriptedAdapter {
	fn new(target: &str) -> Self {
		Self {
			target: TargetId::new(target).expect("valid target"),
			liveness: Liveness::Live,
			disconnect: DisconnectBehavior::Prompt,
			comments: Vec::new(),
			fail_connect: false,
			connected: AtomicBool::new(false),
			stop: Notify::new(),
		}
	}

	fn liveness(mut self, liveness: Liveness) -> Self {
		self.liveness = liveness;
		self
	}

	fn disconnect(mut self, disconnect: DisconnectBehavior) -> Self {
		self.disconnect = disconnect;
		self
	}

	fn comments(mut self, comments: Vec<CommentEvent>) -> Self {
		self.comments = comments;
		self
	}

	fn failing_connect(mut self) -> Self {
		self.fail_connect = true;
		self
	}
}

#[async_trait]
impl LiveClientAdapter for ScriptedAdapter {
	fn name(&self) -> &'static str {
		"scripted"
	}

	fn target(&self) -> &TargetId {
		&self.target
	}

	async fn is_live(&self) -> anyhow::Result<bool> {
		match self.liveness {
			Liveness::Live => Ok(true),
			Liveness::Offline => Ok(false),
			Liveness::Fails => anyhow::bail!("room lookup rejected"),
			Liveness::Pending => std::future::pending().await,
		}
	}

	async fn connect(&self, events_tx: LiveEventTx) -> anyhow::Result<()> {
		if self.fail_connect {
			anyhow::bail!("handshake refused");
		}

		self.connected.store(true, Ordering::SeqCst);
		let _ = events_tx
			.send(LiveEvent::Connected {
				target: self.target.clone(),
				room_id: Some("7001".to_string()),
			})
			.await;
		for comment in &self.comments {
			let _ = events_tx.send(LiveEvent::Comment(comment.clone())).await;
		}

		self.stop.notified().await;
		self.connected.store(false, Ordering::SeqCst);
		let _ = events_tx.send(LiveEvent::Disconnected { reason: None }).await;
		Ok(())
	}

	async fn disconnect(&self) -> anyhow::Result<()> {
		match self.disconnect {
			DisconnectBehavior::Prompt => {
				self.stop.notify_one();
				Ok(())
			}
			DisconnectBehavior::Never => std::future::pending().await,
			DisconnectBehavior::AckOnly => Ok(()),
		}
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}
}

fn supervisor(
	adapter: Arc<dyn LiveClientAdapter>,
	grace: Duration,
) -> (ConnectionSupervisor, Arc<CommentQueue>, EmissionRx) {
	let queue = Arc::new(CommentQueue::new());
	let (sink, rx) = ChannelSink::new();
	let sup = ConnectionSupervisor::new(
		adapter,
		Arc::clone(&queue),
		Arc::new(sink),
		SupervisorConfig {
			disconnect_grace: grace,
			..SupervisorConfig::default()
		},
	);
	(sup, queue, rx)
}

async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
	let end = Instant::now() + deadline;
	while Instant::now() < end {
		if cond() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	cond()
}

fn drain(rx: &mut EmissionRx) -> Vec<Emission> {
	let mut out = Vec::new();
	while let Ok(e) = rx.try_recv() {
		out.push(e);
	}
	out
}

fn has_error(emissions: &[Emission], needle: &str) -> bool {
	emissions
		.iter()
		.any(|e| matches!(e, Emission::Error(msg) if msg.contains(needle)))
}

fn has_info(emissions: &[Emission], needle: &str) -> bool {
	emissions
		.iter()
		.any(|e| matches!(e, Emission::Info(msg) if msg.contains(needle)))
}

#[tokio::test]
async fn stuck_disconnect_is_cancelled_after_grace() {
	let adapter = Arc::new(ScriptedAdapter::new("streamer").disconnect(DisconnectBehavior::Never));
	let (sup, _queue, mut rx) = supervisor(adapter.clone(), Duration::from_secs(2));

	sup.start().expect("start");
	assert!(
		wait_until(Duration::from_secs(2), || adapter.is_connected()).await,
		"adapter should connect"
	);
	assert_eq!(sup.state(), ConnectionState::Live);

	let began = Instant::now();
	let report = sup.stop(Duration::from_secs(5)).await.expect("stop");
	let elapsed = began.elapsed();

	assert!(elapsed >= Duration::from_secs(2), "grace period should be honored: {elapsed:?}");
	assert!(elapsed < Duration::from_millis(2_500), "stop took too long: {elapsed:?}");
	assert!(report.forced);
	assert!(report.joined);
	assert_eq!(sup.state(), ConnectionState::Stopped);

	let emissions = drain(&mut rx);
	assert!(has_error(&emissions, "timed out"), "timeout warning expected: {emissions:?}");
	assert!(has_info(&emissions, "stopped"));
}

#[tokio::test]
async fn session_that_outlives_acknowledged_disconnect_is_forced() {
	let adapter = Arc::new(ScriptedAdapter::new("streamer").disconnect(DisconnectBehavior::AckOnly));
	let (sup, _queue, mut rx) = supervisor(adapter.clone(), Duration::from_secs(1));

	sup.start().expect("start");
	assert!(wait_until(Duration::from_secs(2), || adapter.is_connected()).await);

	let began = Instant::now();
	let report = sup.stop(Duration::from_secs(5)).await.expect("stop");
	let elapsed = began.elapsed();

	assert!(elapsed < Duration::from_millis(1_500), "stop took too long: {elapsed:?}");
	assert!(report.forced);
	assert!(report.joined);
	assert_eq!(sup.state(), ConnectionState::Stopped);

	let emissions = drain(&mut rx);
	assert!(has_error(&emissions, "timed out"), "timeout warning expected: {emissions:?}");
	assert!(has_info(&emissions, "stopped"));
}

#[tokio::test]
async fn stop_while_connecting_abandons_liveness_check() {
	let adapter = Arc::new(ScriptedAdapter::new("streamer").liveness(Liveness::Pending));
	let (sup, _queue, mut rx) = supervisor(adapter, Duration::from_secs(2));

	sup.start().expect("start");
	assert_eq!(sup.state(), ConnectionState::Connecting);

	let began = Instant::now();
	let report = sup.stop(Duration::from_secs(5)).await.expect("stop");

	assert!(began.elapsed() < Duration::from_secs(2), "stop should not wait out the grace period");
	assert!(!report.forced);
	assert!(report.joined);
	assert_eq!(sup.state(), ConnectionState::Stopped);

	let emissions = drain(&mut rx);
	assert!(!has_error(&emissions, "timed out"), "{emissions:?}");
	assert!(has_info(&emissions, "stopped"));
}

#[tokio::test]
async fn graceful_stop_is_not_forced() {
	let adapter = Arc::new(ScriptedAdapter::new("streamer"));
	let (sup, _queue, mut rx) = supervisor(adapter.clone(), Duration::from_secs(2));

	sup.start().expect("start");
	assert!(wait_until(Duration::from_secs(2), || adapter.is_connected()).await);

	let report = sup.stop(Duration::from_secs(5)).await.expect("stop");
	assert!(!report.forced);
	assert!(report.joined);
	assert_eq!(sup.state(), ConnectionState::Stopped);

	let emissions = drain(&mut rx);
	assert!(has_info(&emissions, "connected to @streamer (room id: 7001)"));
	assert!(!has_error(&emissions, "timed out"));
}

#[tokio::test]
async fn offline_target_ends_run_with_error() {
	let adapter = Arc::new(ScriptedAdapter::new("@ghost").liveness(Liveness::Offline));
	let (sup, _queue, mut rx) = supervisor(adapter, Duration::from_secs(1));

	sup.start().expect("start");
	assert!(wait_until(Duration::from_secs(2), || sup.state() == ConnectionState::Stopped).await);

	let emissions = drain(&mut rx);
	assert!(
		has_error(&emissions, "target not live or invalid identifier: @ghost"),
		"{emissions:?}"
	);
}

#[tokio::test]
async fn failing_liveness_check_ends_run_with_error() {
	let adapter = Arc::new(ScriptedAdapter::new("streamer").liveness(Liveness::Fails));
	let (sup, _queue, mut rx) = supervisor(adapter, Duration::from_secs(1));

	sup.start().expect("start");
	assert!(wait_until(Duration::from_secs(2), || sup.state() == ConnectionState::Stopped).await);

	let emissions = drain(&mut rx);
	assert!(has_error(&emissions, "room lookup rejected"), "{emissions:?}");
}

#[tokio::test]
async fn failing_connect_ends_run_with_error() {
	let adapter = Arc::new(ScriptedAdapter::new("streamer").failing_connect());
	let (sup, _queue, mut rx) = supervisor(adapter, Duration::from_secs(1));

	sup.start().expect("start");
	assert!(wait_until(Duration::from_secs(2), || sup.state() == ConnectionState::Stopped).await);

	let emissions = drain(&mut rx);
	assert!(has_error(&emissions, "live connection failed: handshake refused"), "{emissions:?}");
}

#[tokio::test]
async fn stop_when_idle_reports_error_without_state_change() {
	let adapter = Arc::new(ScriptedAdapter::new("streamer"));
	let (sup, _queue, mut rx) = supervisor(adapter, Duration::from_secs(1));

	let err = sup.stop(Duration::from_secs(1)).await.expect_err("not running");
	assert!(matches!(err, SupervisorError::NotRunning));
	assert_eq!(sup.state(), ConnectionState::Idle);
	assert!(has_error(&drain(&mut rx), "not connected or already stopped"));
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
	let adapter = Arc::new(ScriptedAdapter::new("streamer"));
	let (sup, _queue, mut rx) = supervisor(adapter.clone(), Duration::from_secs(1));

	sup.start().expect("start");
	let err = sup.start().expect_err("already running");
	assert!(matches!(err, SupervisorError::AlreadyRunning));
	assert!(has_error(&drain(&mut rx), "already running"));

	assert!(wait_until(Duration::from_secs(2), || adapter.is_connected()).await);
	sup.stop(Duration::from_secs(2)).await.expect("stop");
}

#[tokio::test]
async fn comments_are_formatted_and_queued() {
	let adapter = Arc::new(ScriptedAdapter::new("streamer").comments(vec![
		CommentEvent::new("alice", "hi there"),
		CommentEvent {
			nickname: None,
			unique_id: Some("bob_77".to_string()),
			text: Some("lol".to_string()),
		},
		CommentEvent {
			nickname: Some(String::new()),
			unique_id: None,
			text: None,
		},
		CommentEvent::new("mallory", "[system] fake notice"),
	]));
	let (sup, queue, _rx) = supervisor(adapter, Duration::from_secs(1));

	sup.start().expect("start");
	assert!(wait_until(Duration::from_secs(2), || queue.len() == 4).await, "{:?}", queue.snapshot());
	assert_eq!(
		queue.snapshot(),
		vec!["alice: hi there", "bob_77: lol", "?: ", "mallory: [system] fake notice"]
	);

	sup.stop(Duration::from_secs(2)).await.expect("stop");
}

#[tokio::test]
async fn supervisor_can_restart_after_stop() {
	let adapter = Arc::new(ScriptedAdapter::new("streamer"));
	let (sup, _queue, _rx) = supervisor(adapter.clone(), Duration::from_secs(1));

	sup.start().expect("first start");
	assert!(wait_until(Duration::from_secs(2), || adapter.is_connected()).await);
	sup.stop(Duration::from_secs(2)).await.expect("first stop");
	assert!(!sup.is_running());

	sup.start().expect("second start");
	assert!(wait_until(Duration::from_secs(2), || sup.state() == ConnectionState::Live).await);
	assert!(sup.is_running());
	sup.stop(Duration::from_secs(2)).await.expect("second stop");
	assert_eq!(sup.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn demo_adapter_feeds_the_queue() {
	let demo = DemoAdapter::new(TargetId::new("demo").expect("valid target")).with_emit_interval(Duration::from_millis(10));
	let (sup, queue, mut rx) = supervisor(Arc::new(demo), Duration::from_secs(1));

	sup.start().expect("start");
	assert!(wait_until(Duration::from_millis(750), || !queue.is_empty()).await, "expected demo comment");
	assert_eq!(
		queue.snapshot().first().map(String::as_str),
		Some("demo_viewer: hello from the demo stream")
	);

	let report = sup.stop(Duration::from_secs(2)).await.expect("stop");
	assert!(!report.forced);
	assert!(has_info(&drain(&mut rx), "connected to @demo"));
}
