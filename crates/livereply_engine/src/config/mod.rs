#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use livereply_backend::{BackendSettings, CozeConfig, DEFAULT_COZE_ENDPOINT, DifyConfig, OpenAiConfig};
use livereply_domain::{KeywordFilter, ReplyMode, TargetId};
use livereply_platform::SecretString;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::dispatcher::DispatchSettings;
use crate::supervisor::{DEFAULT_DISCONNECT_GRACE, DEFAULT_STOP_TIMEOUT};

pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_millis(3_000);

/// Default config path: `~/.livereply/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".livereply").join("config.toml"))
}

/// Load the engine config from `path` (missing file means defaults), then apply env overrides.
pub fn load_engine_config_from_path(path: &Path) -> anyhow::Result<EngineConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = EngineConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
	pub live: LiveSettings,
	pub reply: ReplySettings,
	pub backends: BackendSettings,
	pub telemetry: TelemetrySettings,
}

/// Which live client the binary wires into the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterKind {
	/// Synthetic comments for local development.
	Demo,
	#[default]
	Unavailable,
}

impl AdapterKind {
	fn parse(s: &str) -> Option<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"demo" => Some(Self::Demo),
			"unavailable" | "none" => Some(Self::Unavailable),
			_ => None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct LiveSettings {
	/// Streamer to follow (leading `@` stripped).
	pub target: Option<TargetId>,
	pub disconnect_grace: Duration,
	pub stop_timeout: Duration,
	pub adapter: AdapterKind,
}

impl Default for LiveSettings {
	fn default() -> Self {
		Self {
			target: None,
			disconnect_grace: DEFAULT_DISCONNECT_GRACE,
			stop_timeout: DEFAULT_STOP_TIMEOUT,
			adapter: AdapterKind::default(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct ReplySettings {
	pub enabled: bool,
	pub mode: ReplyMode,
	pub keyword_filter: bool,
	pub keywords: Vec<String>,
	pub max_batch: usize,
	pub custom_prompt: Option<String>,
	/// Period of the dispatch trigger.
	pub cycle_interval: Duration,
}

impl Default for ReplySettings {
	fn default() -> Self {
		Self {
			enabled: false,
			mode: ReplyMode::Echo,
			keyword_filter: false,
			keywords: Vec::new(),
			max_batch: 1,
			custom_prompt: None,
			cycle_interval: DEFAULT_CYCLE_INTERVAL,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct TelemetrySettings {
	/// Optional Prometheus exporter bind address (host:port).
	pub metrics_bind: Option<String>,
}

impl EngineConfig {
	/// Initial dispatcher settings derived from `[reply]` and the backend sections.
	pub fn dispatch_settings(&self) -> DispatchSettings {
		DispatchSettings {
			enabled: self.reply.enabled,
			mode: self.reply.mode,
			filter: KeywordFilter::new(self.reply.keyword_filter, &self.reply.keywords),
			max_batch: self.reply.max_batch,
			custom_prompt: self.reply.custom_prompt.clone(),
			backends: self.backends.clone(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	live: FileLiveSettings,

	#[serde(default)]
	reply: FileReplySettings,

	#[serde(default)]
	openai: FileOpenAiSettings,

	#[serde(default)]
	dify: FileDifySettings,

	#[serde(default)]
	coze: FileCozeSettings,

	#[serde(default)]
	telemetry: FileTelemetrySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileLiveSettings {
	target: Option<String>,
	disconnect_grace_secs: Option<f64>,
	stop_timeout_secs: Option<f64>,
	adapter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileReplySettings {
	enabled: Option<bool>,
	mode: Option<String>,
	keyword_filter: Option<bool>,
	#[serde(default)]
	keywords: Vec<String>,
	max_batch: Option<usize>,
	custom_prompt: Option<String>,
	cycle_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileOpenAiSettings {
	base_url: Option<String>,
	api_key: Option<String>,
	model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDifySettings {
	endpoint: Option<String>,
	api_key: Option<String>,
	user: Option<String>,
	response_mode: Option<String>,
	#[serde(default)]
	inputs: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileCozeSettings {
	endpoint: Option<String>,
	api_key: Option<String>,
	bot_id: Option<String>,
	user_id: Option<String>,
	stream: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTelemetrySettings {
	metrics_bind: Option<String>,
}

fn non_blank(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_target(raw: &str) -> Option<TargetId> {
	match TargetId::new(raw) {
		Ok(id) => Some(id),
		Err(e) => {
			warn!(error = %e, "ignoring invalid live target");
			None
		}
	}
}

fn secs_or(v: Option<f64>, default: Duration, field: &str) -> Duration {
	let Some(secs) = v else {
		return default;
	};
	match Duration::try_from_secs_f64(secs) {
		Ok(d) if !d.is_zero() => d,
		_ => {
			warn!(field, secs, "invalid duration; using default");
			default
		}
	}
}

impl EngineConfig {
	fn from_file(file: FileConfig) -> Self {
		let live = LiveSettings {
			target: non_blank(file.live.target).and_then(|s| parse_target(&s)),
			disconnect_grace: secs_or(
				file.live.disconnect_grace_secs,
				DEFAULT_DISCONNECT_GRACE,
				"live.disconnect_grace_secs",
			),
			stop_timeout: secs_or(file.live.stop_timeout_secs, DEFAULT_STOP_TIMEOUT, "live.stop_timeout_secs"),
			adapter: match non_blank(file.live.adapter) {
				Some(s) => AdapterKind::parse(&s).unwrap_or_else(|| {
					warn!(adapter = %s, "unknown live adapter; using unavailable");
					AdapterKind::Unavailable
				}),
				None => AdapterKind::default(),
			},
		};

		let reply = ReplySettings {
			enabled: file.reply.enabled.unwrap_or(false),
			mode: file.reply.mode.as_deref().map(ReplyMode::normalize).unwrap_or_default(),
			keyword_filter: file.reply.keyword_filter.unwrap_or(false),
			keywords: file
				.reply
				.keywords
				.into_iter()
				.map(|k| k.trim().to_string())
				.filter(|k| !k.is_empty())
				.collect(),
			max_batch: file.reply.max_batch.unwrap_or(1).max(1),
			custom_prompt: non_blank(file.reply.custom_prompt),
			cycle_interval: file
				.reply
				.cycle_interval_ms
				.filter(|ms| *ms > 0)
				.map(Duration::from_millis)
				.unwrap_or(DEFAULT_CYCLE_INTERVAL),
		};

		let dify_defaults = DifyConfig::default();
		let coze_defaults = CozeConfig::default();

		let backends = BackendSettings {
			openai: OpenAiConfig {
				base_url: non_blank(file.openai.base_url).unwrap_or_default(),
				api_key: non_blank(file.openai.api_key).map(SecretString::new).unwrap_or_default(),
				model: non_blank(file.openai.model).unwrap_or_default(),
			},
			dify: DifyConfig {
				endpoint: non_blank(file.dify.endpoint).unwrap_or_default(),
				api_key: non_blank(file.dify.api_key).map(SecretString::new).unwrap_or_default(),
				user: non_blank(file.dify.user).unwrap_or(dify_defaults.user),
				inputs: file.dify.inputs,
				response_mode: non_blank(file.dify.response_mode).unwrap_or(dify_defaults.response_mode),
			},
			coze: CozeConfig {
				endpoint: non_blank(file.coze.endpoint).unwrap_or_else(|| DEFAULT_COZE_ENDPOINT.to_string()),
				api_key: non_blank(file.coze.api_key).map(SecretString::new).unwrap_or_default(),
				bot_id: non_blank(file.coze.bot_id).unwrap_or_default(),
				user_id: non_blank(file.coze.user_id).unwrap_or(coze_defaults.user_id),
				stream: file.coze.stream.unwrap_or(false),
			},
		};

		Self {
			live,
			reply,
			backends,
			telemetry: TelemetrySettings {
				metrics_bind: non_blank(file.telemetry.metrics_bind),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			debug!(path = %path.display(), "loaded config file");
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut EngineConfig, env: impl Fn(&str) -> Option<String>) {
	let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = var("LIVEREPLY_TARGET")
		&& let Some(target) = parse_target(&v)
	{
		info!(target_id = %target, "live config: target overridden by env");
		cfg.live.target = Some(target);
	}

	if let Some(v) = var("LIVEREPLY_DISCONNECT_GRACE_SECS")
		&& let Ok(secs) = v.parse::<f64>()
	{
		cfg.live.disconnect_grace = secs_or(Some(secs), cfg.live.disconnect_grace, "LIVEREPLY_DISCONNECT_GRACE_SECS");
		info!(secs, "live config: disconnect_grace overridden by env");
	}

	if let Some(v) = var("LIVEREPLY_STOP_TIMEOUT_SECS")
		&& let Ok(secs) = v.parse::<f64>()
	{
		cfg.live.stop_timeout = secs_or(Some(secs), cfg.live.stop_timeout, "LIVEREPLY_STOP_TIMEOUT_SECS");
		info!(secs, "live config: stop_timeout overridden by env");
	}

	if let Some(v) = var("LIVEREPLY_ENABLE_DEMO_ADAPTER")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.live.adapter = if enabled {
			AdapterKind::Demo
		} else {
			AdapterKind::Unavailable
		};
		info!(enabled, "live config: demo adapter toggled by env");
	}

	if let Some(v) = var("LIVEREPLY_REPLY_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.reply.enabled = enabled;
		info!(enabled, "reply config: enabled overridden by env");
	}

	if let Some(v) = var("LIVEREPLY_REPLY_MODE") {
		cfg.reply.mode = ReplyMode::normalize(&v);
		info!(mode = %cfg.reply.mode, "reply config: mode overridden by env");
	}

	if let Some(v) = var("LIVEREPLY_OPENAI_BASE_URL") {
		cfg.backends.openai.base_url = v;
		info!("openai config: base_url overridden by env");
	}

	if let Some(v) = var("LIVEREPLY_OPENAI_API_KEY") {
		cfg.backends.openai.api_key = SecretString::new(v);
		info!("openai config: api_key overridden by env");
	}

	if let Some(v) = var("LIVEREPLY_OPENAI_MODEL") {
		cfg.backends.openai.model = v;
		info!("openai config: model overridden by env");
	}

	if let Some(v) = var("LIVEREPLY_DIFY_ENDPOINT") {
		cfg.backends.dify.endpoint = v;
		info!("dify config: endpoint overridden by env");
	}

	if let Some(v) = var("LIVEREPLY_DIFY_API_KEY") {
		cfg.backends.dify.api_key = SecretString::new(v);
		info!("dify config: api_key overridden by env");
	}

	if let Some(v) = var("LIVEREPLY_COZE_API_KEY") {
		cfg.backends.coze.api_key = SecretString::new(v);
		info!("coze config: api_key overridden by env");
	}

	if let Some(v) = var("LIVEREPLY_COZE_BOT_ID") {
		cfg.backends.coze.bot_id = v;
		info!("coze config: bot_id overridden by env");
	}

	if let Some(v) = var("LIVEREPLY_METRICS_BIND") {
		cfg.telemetry.metrics_bind = Some(v);
		info!("telemetry config: metrics_bind overridden by env");
	}
}
