use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000; // master 1 Hz pulse
pub const DEFAULT_SERVER_LOCK_TTL_SECS: u64 = 600;
pub const DEFAULT_LOCK_RENEW_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_IP_ENDPOINT: &str = "https://api.ipify.org";

/// Top-level config (beacon.toml + BEACON_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub ip_monitor: IpMonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Timing and lock parameters of the scheduler itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// TTL written with every server lock acquisition and renewal.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// How often a held server lock is renewed. Must stay well below the TTL.
    #[serde(default = "default_lock_renew_interval_secs")]
    pub lock_renew_interval_secs: u64,
    /// Prepended to every lock key, e.g. `"myapp:"`.
    #[serde(default)]
    pub lock_prefix: String,
    /// Wall-clock zone used to match `DailyAt` entries.
    #[serde(default)]
    pub timezone: Timezone,
    /// Lock owner identity of this process. Defaults to
    /// `<hostname>-<pid>-<random hex>`, see [`default_node_id`].
    #[serde(default = "default_node_id")]
    pub node_id: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            lock_ttl_secs: DEFAULT_SERVER_LOCK_TTL_SECS,
            lock_renew_interval_secs: DEFAULT_LOCK_RENEW_INTERVAL_SECS,
            lock_prefix: String::new(),
            timezone: Timezone::default(),
            node_id: default_node_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Timezone {
    /// Host local time.
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockBackend {
    /// In-process store. Single-instance only holds within this process.
    #[default]
    Memory,
    /// SQLite file shared by every node that points at the same path.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub backend: LockBackend,
    #[serde(default = "default_lock_db_path")]
    pub path: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::default(),
            path: default_lock_db_path(),
        }
    }
}

/// Settings for the bundled public-IP change detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpMonitorConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_ip_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_ip_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ip_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "bool_true")]
    pub on_one_server: bool,
}

impl Default for IpMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_ip_interval_minutes(),
            endpoint: default_ip_endpoint(),
            timeout_secs: default_ip_timeout_secs(),
            on_one_server: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_lock_ttl_secs() -> u64 {
    DEFAULT_SERVER_LOCK_TTL_SECS
}
fn default_lock_renew_interval_secs() -> u64 {
    DEFAULT_LOCK_RENEW_INTERVAL_SECS
}
fn default_ip_interval_minutes() -> u64 {
    5
}
fn default_ip_endpoint() -> String {
    DEFAULT_IP_ENDPOINT.to_string()
}
fn default_ip_timeout_secs() -> u64 {
    10
}
fn default_log_filter() -> String {
    "beacon_daemon=info,beacon_scheduler=info,beacon_lock=info".to_string()
}
fn default_lock_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.beacon/locks.db", home)
}

/// Hostname of this machine, or `"localhost"` when it cannot be read.
pub fn hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".into())
}

/// Lock owner identity for this process: `<hostname>-<pid>-<random hex>`.
///
/// Processes sharing one SQLite lock file run on the same host, so the
/// hostname alone would give every node the same owner. The pid and the
/// random suffix keep owners distinct per process and per config load.
pub fn default_node_id() -> String {
    format!(
        "{}-{}-{:08x}",
        hostname(),
        std::process::id(),
        rand::random::<u32>()
    )
}

impl BeaconConfig {
    /// Load config from a TOML file with BEACON_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `BEACON_SCHEDULER__LOCK_TTL_SECS=300`. A missing file is not an error;
    /// every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: BeaconConfig = Figment::from(Serialized::defaults(BeaconConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("BEACON_").split("__"))
            .extract()
            .map_err(|e| crate::error::BeaconError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the scheduler cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let s = &self.scheduler;
        if s.tick_interval_ms == 0 {
            return Err(crate::error::BeaconError::Config(
                "scheduler.tick_interval_ms must be > 0".into(),
            ));
        }
        if s.lock_ttl_secs == 0 {
            return Err(crate::error::BeaconError::Config(
                "scheduler.lock_ttl_secs must be > 0".into(),
            ));
        }
        if s.lock_renew_interval_secs == 0 || s.lock_renew_interval_secs >= s.lock_ttl_secs {
            return Err(crate::error::BeaconError::Config(format!(
                "scheduler.lock_renew_interval_secs ({}) must be > 0 and below lock_ttl_secs ({})",
                s.lock_renew_interval_secs, s.lock_ttl_secs
            )));
        }
        if self.ip_monitor.enabled && self.ip_monitor.interval_minutes == 0 {
            return Err(crate::error::BeaconError::Config(
                "ip_monitor.interval_minutes must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.beacon/beacon.toml", home)
}
