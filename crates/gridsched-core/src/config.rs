use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::fairshare::SchedulingAlgorithm;

/// Invalid configuration; fatal at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("heartbeat.interval_secs ({interval}) must be smaller than heartbeat.grace_secs ({grace})")]
    HeartbeatInterval { interval: u64, grace: u64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("optimizer.ema_alpha must be in (0, 1], got {0}")]
    EmaAlpha(f64),
    #[error("optimizer success thresholds must satisfy 0 <= low <= base <= high <= 1 (low {low}, base {base}, high {high})")]
    Thresholds { low: f64, base: f64, high: f64 },
    #[error("node_id must not be empty")]
    EmptyNodeId,
}

/// `[heartbeat]`: liveness and leadership timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
    /// A node whose last beat is older than this is considered dead.
    pub grace_secs: u64,
    /// Sleep after a failed beat.
    pub retry_secs: u64,
    /// Poll interval while draining.
    pub drain_interval_secs: u64,
    /// Wait between cancelling the loops and exiting on a stall.
    pub shutdown_grace_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            grace_secs: 120,
            retry_secs: 1,
            drain_interval_secs: 15,
            shutdown_grace_secs: 30,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// `[liveness]`: stall thresholds per critical loop, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub scheduler_stall_secs: u64,
    pub optimizer_stall_secs: u64,
    pub reaper_stall_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            scheduler_stall_secs: 7200,
            optimizer_stall_secs: 7200,
            reaper_stall_secs: 10000,
        }
    }
}

/// `[scheduler]`: admission loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub algorithm: SchedulingAlgorithm,
    pub interval_secs: u64,
    /// Node-wide cap on concurrently running transfer processes.
    pub max_url_copy_processes: usize,
    /// Link maximum used when a link has no `link_config` row.
    pub default_link_max_active: i64,
    /// Endpoint limit used when an endpoint has no `endpoint_limits` row.
    pub default_endpoint_limit: i64,
    /// Cap each share at its demand and redistribute the excess.
    pub cap_by_demand: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            algorithm: SchedulingAlgorithm::Deficit,
            interval_secs: 2,
            max_url_copy_processes: 400,
            default_link_max_active: 60,
            default_endpoint_limit: 200,
            cap_by_demand: true,
        }
    }
}

/// `[optimizer]`: stream-count controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub interval_secs: u64,
    /// A hold is kept at least this long before the link is re-evaluated.
    pub steady_interval_secs: u64,
    /// Telemetry window the pair state is computed over.
    pub window_secs: u64,
    pub max_streams: u32,
    pub base_success_rate: f64,
    pub low_success_rate: f64,
    pub high_success_rate: f64,
    pub ema_alpha: f64,
    pub increase_step: u32,
    pub aggressive_increase_step: u32,
    pub decrease_step: u32,
    /// Links optimized concurrently.
    pub pool_size: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            steady_interval_secs: 300,
            window_secs: 300,
            max_streams: 16,
            base_success_rate: 0.99,
            low_success_rate: 0.97,
            high_success_rate: 1.0,
            ema_alpha: 0.1,
            increase_step: 1,
            aggressive_increase_step: 2,
            decrease_step: 1,
            pool_size: 8,
        }
    }
}

/// `[reaper]`: requeue of transfers owned by dead nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub interval_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// `[telemetry]`: optimizer decision stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// JSON-lines output; defaults to `$XDG_STATE_HOME/gridsched/optimizer.jsonl`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// `[retry]`: data-source retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per call (including the first).
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay_ms: 1000,
        }
    }
}

/// Node configuration loaded from `~/.config/gridsched/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Node identity; defaults to the host name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Shared database path; defaults to `$XDG_STATE_HOME/gridsched/gridsched.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Start in drain mode.
    pub drain: bool,
    pub heartbeat: HeartbeatConfig,
    pub liveness: LivenessConfig,
    pub scheduler: SchedulerConfig,
    pub optimizer: OptimizerConfig,
    pub reaper: ReaperConfig,
    pub telemetry: TelemetryConfig,
    pub retry: RetryConfig,
}

impl GridConfig {
    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let hb = &self.heartbeat;
        if hb.interval_secs >= hb.grace_secs {
            return Err(ConfigError::HeartbeatInterval {
                interval: hb.interval_secs,
                grace: hb.grace_secs,
            });
        }
        let intervals = [
            ("heartbeat.interval_secs", hb.interval_secs),
            ("heartbeat.drain_interval_secs", hb.drain_interval_secs),
            ("scheduler.interval_secs", self.scheduler.interval_secs),
            ("optimizer.interval_secs", self.optimizer.interval_secs),
            ("optimizer.window_secs", self.optimizer.window_secs),
            ("reaper.interval_secs", self.reaper.interval_secs),
            ("liveness.scheduler_stall_secs", self.liveness.scheduler_stall_secs),
            ("liveness.optimizer_stall_secs", self.liveness.optimizer_stall_secs),
            ("liveness.reaper_stall_secs", self.liveness.reaper_stall_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        let opt = &self.optimizer;
        if opt.max_streams < 1 {
            return Err(ConfigError::Zero("optimizer.max_streams"));
        }
        if opt.pool_size == 0 {
            return Err(ConfigError::Zero("optimizer.pool_size"));
        }
        if !(opt.ema_alpha > 0.0 && opt.ema_alpha <= 1.0) {
            return Err(ConfigError::EmaAlpha(opt.ema_alpha));
        }
        let (low, base, high) = (
            opt.low_success_rate,
            opt.base_success_rate,
            opt.high_success_rate,
        );
        if !(0.0 <= low && low <= base && base <= high && high <= 1.0) {
            return Err(ConfigError::Thresholds { low, base, high });
        }
        if matches!(self.node_id.as_deref(), Some(id) if id.trim().is_empty()) {
            return Err(ConfigError::EmptyNodeId);
        }
        Ok(())
    }

    /// Configured node id, else the host name, else `"localhost"`.
    pub fn node_id(&self) -> String {
        self.node_id
            .clone()
            .or_else(hostname)
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => crate::store::default_db_path(),
        }
    }

    pub fn telemetry_path(&self) -> Result<PathBuf> {
        match &self.telemetry.path {
            Some(path) => Ok(path.clone()),
            None => {
                let xdg_dirs = xdg::BaseDirectories::with_prefix("gridsched")?;
                Ok(xdg_dirs.place_state_file("optimizer.jsonl")?)
            }
        }
    }
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for writes of buf.len() bytes; gethostname
    // NUL-terminates on success when the name fits.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
    (!name.is_empty()).then_some(name)
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("gridsched")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from `path`, creating a default file if none exists.
pub fn load_or_init_at(path: &Path) -> Result<GridConfig> {
    if !path.exists() {
        let default_cfg = GridConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: GridConfig = toml::from_str(&data)?;
    Ok(cfg)
}

/// Load configuration from the default location, creating it if missing.
pub fn load_or_init() -> Result<GridConfig> {
    load_or_init_at(&config_path()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = GridConfig::default();
        assert_eq!(cfg.heartbeat.interval_secs, 60);
        assert_eq!(cfg.heartbeat.grace_secs, 120);
        assert_eq!(cfg.liveness.reaper_stall_secs, 10000);
        assert_eq!(cfg.scheduler.algorithm, SchedulingAlgorithm::Deficit);
        assert_eq!(cfg.scheduler.max_url_copy_processes, 400);
        assert_eq!(cfg.optimizer.max_streams, 16);
        assert_eq!(cfg.optimizer.pool_size, 8);
        assert_eq!(cfg.retry.max_attempts, 2);
        assert!(!cfg.telemetry.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = GridConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: GridConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml = r#"
            node_id = "fts-01"
            drain = true

            [scheduler]
            algorithm = "weighted-random"
            max_url_copy_processes = 50

            [optimizer]
            max_streams = 8
        "#;
        let cfg: GridConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.node_id(), "fts-01");
        assert!(cfg.drain);
        assert_eq!(cfg.scheduler.algorithm, SchedulingAlgorithm::WeightedRandom);
        assert_eq!(cfg.scheduler.max_url_copy_processes, 50);
        assert_eq!(cfg.scheduler.interval_secs, 2);
        assert_eq!(cfg.optimizer.max_streams, 8);
        assert!((cfg.optimizer.ema_alpha - 0.1).abs() < 1e-12);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let toml = r#"
            [scheduler]
            algorithm = "round-robin"
        "#;
        assert!(toml::from_str::<GridConfig>(toml).is_err());
    }

    #[test]
    fn heartbeat_interval_must_be_below_grace() {
        let mut cfg = GridConfig::default();
        cfg.heartbeat.interval_secs = 120;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::HeartbeatInterval {
                interval: 120,
                grace: 120
            })
        );
    }

    #[test]
    fn optimizer_settings_are_validated() {
        let mut cfg = GridConfig::default();
        cfg.optimizer.ema_alpha = 0.0;
        assert_eq!(cfg.validate(), Err(ConfigError::EmaAlpha(0.0)));

        let mut cfg = GridConfig::default();
        cfg.optimizer.low_success_rate = 0.995;
        assert!(matches!(cfg.validate(), Err(ConfigError::Thresholds { .. })));

        let mut cfg = GridConfig::default();
        cfg.optimizer.pool_size = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("optimizer.pool_size")));

        let mut cfg = GridConfig::default();
        cfg.optimizer.max_streams = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("optimizer.max_streams")));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = GridConfig::default();
        cfg.scheduler.interval_secs = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("scheduler.interval_secs")));
    }

    #[test]
    fn load_or_init_writes_defaults_then_reads_them() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let created = load_or_init_at(&path).unwrap();
        assert!(path.exists());
        let loaded = load_or_init_at(&path).unwrap();
        assert_eq!(created, loaded);
    }

    #[test]
    fn node_id_falls_back_to_a_non_empty_name() {
        assert!(!GridConfig::default().node_id().is_empty());
    }
}
