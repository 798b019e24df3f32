//! # Configuration
//!
//! Layered configuration for the conveyor system: an optional TOML file
//! (path taken from `CONVEYOR_CONFIG`) with `CONVEYOR__`-prefixed environment
//! variables layered on top. Every field has a serde default so an empty
//! configuration is runnable against `DATABASE_URL` alone.
//!
//! ## Example
//!
//! ```toml
//! [database]
//! max_connections = 20
//!
//! [orchestration.dispatcher]
//! batch_size = 100
//!
//! [orchestration.stall]
//! in_progress_requeue_after_secs = 3600
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{ConveyorError, ConveyorResult};

/// Environment variable naming the TOML config file
pub const CONFIG_PATH_ENV: &str = "CONVEYOR_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConveyorConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub web: WebConfig,
}

impl ConveyorConfig {
    /// Load configuration from the optional TOML file plus environment
    /// overrides (`CONVEYOR__ORCHESTRATION__DISPATCHER__BATCH_SIZE=100`).
    pub fn load() -> ConveyorResult<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONVEYOR")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConveyorError::Configuration(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Connection string; falls back to the `DATABASE_URL` environment
    /// variable when empty.
    #[serde(default)]
    pub url: String,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "DatabaseConfig::default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl DatabaseConfig {
    fn default_max_connections() -> u32 {
        10
    }

    fn default_acquire_timeout_secs() -> u64 {
        30
    }

    /// Resolve the effective connection string
    pub fn effective_url(&self) -> ConveyorResult<String> {
        if !self.url.is_empty() {
            return Ok(self.url.clone());
        }
        std::env::var("DATABASE_URL").map_err(|_| {
            ConveyorError::Configuration(
                "no database URL configured (set database.url or DATABASE_URL)".to_string(),
            )
        })
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: Self::default_max_connections(),
            acquire_timeout_secs: Self::default_acquire_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub stall: StallConfig,
    /// Authoritative polling cadence; the relay only shortens the latency
    /// between ticks.
    #[serde(default = "OrchestrationConfig::default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl OrchestrationConfig {
    fn default_tick_interval_ms() -> u64 {
        5_000
    }
}

// serde `default = "..."` only fires during deserialization; the derive would
// zero tick_interval_ms on a default-constructed config.
impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            sequencer: SequencerConfig::default(),
            stall: StallConfig::default(),
            tick_interval_ms: Self::default_tick_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    /// Maximum step states claimed per invocation
    #[serde(default = "DispatcherConfig::default_batch_size")]
    pub batch_size: i64,
    /// When true, SYNC step invocations are awaited inline instead of
    /// spawned. ASYNC steps are never awaited.
    #[serde(default)]
    pub wait_for_sync: bool,
}

impl DispatcherConfig {
    fn default_batch_size() -> i64 {
        50
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: Self::default_batch_size(),
            wait_for_sync: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SequencerConfig {
    /// Maximum completed step states advanced per invocation
    #[serde(default = "SequencerConfig::default_batch_size")]
    pub batch_size: i64,
}

impl SequencerConfig {
    fn default_batch_size() -> i64 {
        50
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            batch_size: Self::default_batch_size(),
        }
    }
}

/// Stall requeue policy. A threshold of zero disables that check.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StallConfig {
    #[serde(default = "StallConfig::default_enabled")]
    pub enabled: bool,
    /// Age after which a QUEUED row (claimed but never handed to a worker)
    /// is returned to PENDING.
    #[serde(default = "StallConfig::default_queued_requeue_after_secs")]
    pub queued_requeue_after_secs: u64,
    /// Age after which an IN_PROGRESS row (callback never arrived) is
    /// returned to PENDING.
    #[serde(default = "StallConfig::default_in_progress_requeue_after_secs")]
    pub in_progress_requeue_after_secs: u64,
    /// Cadence of stall sweeps, in orchestration ticks
    #[serde(default = "StallConfig::default_sweep_every_ticks")]
    pub sweep_every_ticks: u32,
}

impl StallConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_queued_requeue_after_secs() -> u64 {
        300
    }

    fn default_in_progress_requeue_after_secs() -> u64 {
        21_600
    }

    fn default_sweep_every_ticks() -> u32 {
        12
    }
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            queued_requeue_after_secs: Self::default_queued_requeue_after_secs(),
            in_progress_requeue_after_secs: Self::default_in_progress_requeue_after_secs(),
            sweep_every_ticks: Self::default_sweep_every_ticks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "RelayConfig::default_enabled")]
    pub enabled: bool,
    /// Postgres NOTIFY channel carrying relay events
    #[serde(default = "RelayConfig::default_channel")]
    pub channel: String,
}

impl RelayConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_channel() -> String {
        "conveyor_events".to_string()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            channel: Self::default_channel(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "WebConfig::default_bind")]
    pub bind: String,
}

impl WebConfig {
    fn default_bind() -> String {
        "0.0.0.0:3050".to_string()
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let config = ConveyorConfig::default();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.orchestration.dispatcher.batch_size, 50);
        assert_eq!(config.orchestration.sequencer.batch_size, 50);
        assert_eq!(config.orchestration.tick_interval_ms, 5_000);
        assert!(config.relay.enabled);
        assert_eq!(config.relay.channel, "conveyor_events");
        assert!(!config.orchestration.dispatcher.wait_for_sync);
    }

    #[test]
    fn stall_defaults() {
        let stall = StallConfig::default();
        assert!(stall.enabled);
        assert_eq!(stall.queued_requeue_after_secs, 300);
        assert_eq!(stall.in_progress_requeue_after_secs, 21_600);
        assert_eq!(stall.sweep_every_ticks, 12);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let parsed: ConveyorConfig = toml::from_str(
            r#"
            [orchestration.dispatcher]
            batch_size = 7
            wait_for_sync = true

            [relay]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(parsed.orchestration.dispatcher.batch_size, 7);
        assert!(parsed.orchestration.dispatcher.wait_for_sync);
        assert!(!parsed.relay.enabled);
        // untouched sections keep their defaults
        assert_eq!(parsed.orchestration.sequencer.batch_size, 50);
        assert_eq!(parsed.database.max_connections, 10);
    }

    #[test]
    fn effective_url_prefers_configured_value() {
        let db = DatabaseConfig {
            url: "postgres://configured/db".to_string(),
            ..Default::default()
        };
        assert_eq!(db.effective_url().unwrap(), "postgres://configured/db");
    }
}
