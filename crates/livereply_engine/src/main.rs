#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use livereply_domain::{ConnectionState, TargetId};
use livereply_engine::config::{self, AdapterKind};
use livereply_engine::dispatcher::{CycleOutcome, ReplyDispatcher};
use livereply_engine::queue::CommentQueue;
use livereply_engine::sink::{ChannelSink, ResultSink};
use livereply_engine::supervisor::{ConnectionSupervisor, SupervisorConfig};
use livereply_platform::{DemoAdapter, LiveClientAdapter, UnavailableAdapter};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

struct Args {
	config: Option<PathBuf>,
	target: Option<String>,
}

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: livereply [--config path] [--target streamer]\n\
\n\
Options:\n\
\t--config  Config file (default: ~/.livereply/config.toml)\n\
\t--target  Streamer handle to follow (overrides [live].target)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Args {
	let mut args = Args {
		config: None,
		target: None,
	};

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				args.config = Some(PathBuf::from(v));
			}
			"--target" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.target = Some(v);
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,livereply_engine=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("livereply");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn build_adapter(kind: AdapterKind, target: TargetId) -> Arc<dyn LiveClientAdapter> {
	match kind {
		AdapterKind::Demo => {
			info!(target_id = %target, "using demo live adapter");
			Arc::new(DemoAdapter::new(target))
		}
		AdapterKind::Unavailable => Arc::new(UnavailableAdapter::new(
			target,
			"no live client is bundled with this build (set LIVEREPLY_ENABLE_DEMO_ADAPTER=1 to try the demo)",
		)),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => config::default_config_path()?,
	};
	let cfg = config::load_engine_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded engine config (toml + env overrides)");

	init_metrics(cfg.telemetry.metrics_bind.as_deref());

	let target = match args.target.as_deref() {
		Some(raw) => Some(TargetId::new(raw)?),
		None => cfg.live.target.clone(),
	};
	let Some(target) = target else {
		return Err(anyhow::anyhow!(
			"no live target configured (set [live].target, LIVEREPLY_TARGET or --target)"
		));
	};

	let queue = Arc::new(CommentQueue::new());
	debug!(capacity = queue.capacity(), "comment queue ready");
	let (sink, mut emissions) = ChannelSink::new();
	let sink: Arc<dyn ResultSink> = Arc::new(sink);

	let supervisor = ConnectionSupervisor::new(
		build_adapter(cfg.live.adapter, target),
		Arc::clone(&queue),
		Arc::clone(&sink),
		SupervisorConfig {
			disconnect_grace: cfg.live.disconnect_grace,
			..SupervisorConfig::default()
		},
	);
	let dispatcher = ReplyDispatcher::new(
		Arc::clone(&queue),
		sink,
		cfg.dispatch_settings(),
		tokio::runtime::Handle::current(),
	);

	supervisor.start()?;

	let mut tick = tokio::time::interval(cfg.reply.cycle_interval);
	tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);

	loop {
		tokio::select! {
			_ = tick.tick() => {
				match dispatcher.cycle() {
					CycleOutcome::Dispatched { comment, .. } => debug!(line = %comment.raw_line, "dispatched"),
					CycleOutcome::Busy => debug!("reply still in flight"),
					CycleOutcome::Idle | CycleOutcome::Disabled => {}
				}

				if supervisor.state() == ConnectionState::Stopped && !dispatcher.is_dispatching() {
					info!("live session ended");
					break;
				}
			}

			Some(emission) = emissions.recv() => println!("{}", emission.as_line()),

			res = &mut ctrl_c => {
				if let Err(e) = res {
					warn!(error = %e, "failed to listen for ctrl-c");
				}
				info!("shutdown requested");
				break;
			}
		}
	}

	if supervisor.is_running() {
		match supervisor.stop(cfg.live.stop_timeout).await {
			Ok(report) => info!(forced = report.forced, joined = report.joined, "supervisor stopped"),
			Err(e) => warn!(error = %e, "supervisor stop failed"),
		}
	}

	while let Ok(emission) = emissions.try_recv() {
		println!("{}", emission.as_line());
	}

	Ok(())
}
