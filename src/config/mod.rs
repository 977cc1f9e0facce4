//! Run configuration: YAML file, environment overrides, validation.
//!
//! The file describes one run end to end (endpoint, workload, scaling plan,
//! resilience tuning). Standard libpq environment variables override the
//! database section so operators can point an existing config at another
//! endpoint without editing it.

use anyhow::{Context, Result, bail};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Worker-ladder shape across bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Linear,
    Exponential,
    Fibonacci,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Exponential => write!(f, "exponential"),
            Self::Fibonacci => write!(f, "fibonacci"),
        }
    }
}

/// Database endpoint. Password is kept out of `Debug` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_dbname")]
    pub dbname: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// libpq-style sslmode (`disable`, `prefer`, `require`, ...).
    #[serde(default)]
    pub sslmode: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

const fn default_port() -> u16 {
    5432
}

fn default_dbname() -> String {
    "postgres".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dbname: default_dbname(),
            user: default_user(),
            password: None,
            sslmode: None,
        }
    }
}

impl DatabaseConfig {
    /// Apply libpq environment overrides (PGHOST, PGPORT, PGDATABASE,
    /// PGUSER, PGPASSWORD) on top of the file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = env::var("PGHOST")
            && !host.is_empty()
        {
            self.host = host;
        }
        if let Ok(port) = env::var("PGPORT")
            && !port.is_empty()
        {
            self.port = port
                .parse()
                .with_context(|| format!("invalid PGPORT value: {port}"))?;
        }
        if let Ok(dbname) = env::var("PGDATABASE")
            && !dbname.is_empty()
        {
            self.dbname = dbname;
        }
        if let Ok(user) = env::var("PGUSER")
            && !user.is_empty()
        {
            self.user = user;
        }
        if let Ok(password) = env::var("PGPASSWORD")
            && !password.is_empty()
        {
            self.password = Some(password);
        }
        Ok(())
    }

    /// Build a connection URL. Credentials are URL-encoded by the `url`
    /// crate, so passwords with reserved characters survive round-tripping.
    pub fn dsn(&self) -> Result<SecretString> {
        let mut url = Url::parse("postgresql://localhost")
            .context("failed to build base connection URL")?;

        url.set_host(Some(&self.host))
            .map_err(|e| anyhow::anyhow!("invalid database host {:?}: {e}", self.host))?;
        if url.set_port(Some(self.port)).is_err() {
            bail!("invalid database port {}", self.port);
        }
        if url.set_username(&self.user).is_err() {
            bail!("invalid database user {:?}", self.user);
        }
        if let Some(password) = &self.password
            && url.set_password(Some(password)).is_err()
        {
            bail!("invalid database password");
        }
        url.set_path(&self.dbname);
        if let Some(sslmode) = &self.sslmode {
            url.query_pairs_mut().append_pair("sslmode", sslmode);
        }

        Ok(SecretString::from(url.to_string()))
    }
}

/// Progressive scaling plan parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressiveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_workers")]
    pub min_workers: u32,
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    #[serde(default = "default_min_workers")]
    pub min_connections: u32,
    #[serde(default = "default_max_workers")]
    pub max_connections: u32,
    #[serde(default = "default_bands")]
    pub bands: u32,
    #[serde(default = "default_strategy")]
    pub strategy: Strategy,
    #[serde(with = "humantime_serde", default = "default_warmup")]
    pub warmup: Duration,
    #[serde(with = "humantime_serde", default = "default_measure")]
    pub measure: Duration,
    #[serde(with = "humantime_serde", default = "default_cooldown")]
    pub cooldown: Duration,
}

const fn default_true() -> bool {
    true
}

const fn default_min_workers() -> u32 {
    10
}

const fn default_max_workers() -> u32 {
    50
}

const fn default_bands() -> u32 {
    5
}

const fn default_strategy() -> Strategy {
    Strategy::Linear
}

const fn default_warmup() -> Duration {
    Duration::from_secs(10)
}

const fn default_measure() -> Duration {
    Duration::from_secs(60)
}

const fn default_cooldown() -> Duration {
    Duration::from_secs(5)
}

impl Default for ProgressiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            min_connections: default_min_workers(),
            max_connections: default_max_workers(),
            bands: default_bands(),
            strategy: default_strategy(),
            warmup: default_warmup(),
            measure: default_measure(),
            cooldown: default_cooldown(),
        }
    }
}

/// Admission-control tuning consumed by the backpressure controller.
/// Worker/connection budgets come from the band at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureConfig {
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
    #[serde(with = "humantime_serde", default = "default_target_latency")]
    pub target_latency: Duration,
    #[serde(with = "humantime_serde", default = "default_max_latency")]
    pub max_latency: Duration,
    #[serde(default = "default_pressure_threshold")]
    pub pressure_threshold: f64,
    #[serde(default)]
    pub auto_scale: bool,
}

const fn default_max_queue() -> usize {
    1000
}

const fn default_target_latency() -> Duration {
    Duration::from_millis(50)
}

const fn default_max_latency() -> Duration {
    Duration::from_millis(500)
}

const fn default_pressure_threshold() -> f64 {
    0.9
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_queue: default_max_queue(),
            target_latency: default_target_latency(),
            max_latency: default_max_latency(),
            pressure_threshold: default_pressure_threshold(),
            auto_scale: false,
        }
    }
}

/// Circuit-breaker tuning for the target endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(with = "humantime_serde", default = "default_window")]
    pub window: Duration,
    #[serde(with = "humantime_serde", default = "default_reset_timeout")]
    pub reset_timeout: Duration,
    #[serde(default = "default_half_open_probes")]
    pub half_open_probes: u32,
}

const fn default_max_failures() -> u32 {
    5
}

const fn default_window() -> Duration {
    Duration::from_secs(10)
}

const fn default_reset_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_half_open_probes() -> u32 {
    3
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            window: default_window(),
            reset_timeout: default_reset_timeout(),
            half_open_probes: default_half_open_probes(),
        }
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default = "default_workload")]
    pub workload: String,
    #[serde(default = "default_scale")]
    pub scale: u64,
    #[serde(default)]
    pub progressive: ProgressiveConfig,
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
    #[serde(default = "default_error_cap")]
    pub error_cap: f64,
    #[serde(default = "default_true")]
    pub abort_run_on_fatal: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    #[serde(default)]
    pub backpressure: BackpressureConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
}

fn default_workload() -> String {
    "select1".to_string()
}

const fn default_scale() -> u64 {
    1
}

const fn default_retry_max() -> u32 {
    3
}

const fn default_error_cap() -> f64 {
    0.01
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./results")
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./checkpoints")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            workload: default_workload(),
            scale: default_scale(),
            progressive: ProgressiveConfig::default(),
            retry_max: default_retry_max(),
            error_cap: default_error_cap(),
            abort_run_on_fatal: true,
            output_dir: default_output_dir(),
            checkpoint_dir: default_checkpoint_dir(),
            backpressure: BackpressureConfig::default(),
            circuit: CircuitConfig::default(),
        }
    }
}

impl Config {
    /// Load a config file, apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed, or when any
    /// invariant fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.database.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the cross-field invariants the planner and pool rely on.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error for the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        let p = &self.progressive;
        if p.min_workers == 0 {
            bail!("progressive.min_workers must be >= 1");
        }
        if p.min_workers > p.max_workers {
            bail!(
                "progressive.min_workers ({}) must be <= max_workers ({})",
                p.min_workers,
                p.max_workers
            );
        }
        if p.min_connections == 0 {
            bail!("progressive.min_connections must be >= 1");
        }
        if p.min_connections > p.max_connections {
            bail!(
                "progressive.min_connections ({}) must be <= max_connections ({})",
                p.min_connections,
                p.max_connections
            );
        }
        if p.bands == 0 {
            bail!("progressive.bands must be >= 1");
        }
        if p.measure.is_zero() {
            bail!("progressive.measure must be positive");
        }
        if !(0.0..=1.0).contains(&self.backpressure.pressure_threshold) {
            bail!(
                "backpressure.pressure_threshold must be within [0, 1], got {}",
                self.backpressure.pressure_threshold
            );
        }
        if self.backpressure.max_latency <= self.backpressure.target_latency {
            bail!("backpressure.max_latency must be greater than target_latency");
        }
        if self.circuit.max_failures == 0 {
            bail!("circuit.max_failures must be >= 1");
        }
        if self.circuit.half_open_probes == 0 {
            bail!("circuit.half_open_probes must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.error_cap) {
            bail!("error_cap must be within [0, 1], got {}", self.error_cap);
        }
        if self.workload.trim().is_empty() {
            bail!("workload must not be empty");
        }
        Ok(())
    }
}
