// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Flotilla dispatch engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Flotilla configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FlotillaConfig {
    /// Process identity and logging.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Worker pool sizing and discovery cadence.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Default per-device send spacing.
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Device session restore settings.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Sequence enrollment timing and policy.
    #[serde(default)]
    pub enrollment: EnrollmentConfig,

    /// Broadcast overlap rules.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Stuck message recovery.
    #[serde(default)]
    pub reclaim: ReclaimConfig,

    /// Campaign trigger and status cadence.
    #[serde(default)]
    pub campaign: CampaignConfig,

    /// Prometheus exporter.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Process identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Instance name, used as the claim owner prefix in logs.
    #[serde(default = "default_engine_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_engine_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_engine_name() -> String {
    "flotilla".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for better concurrent read performance.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|d| d.join("flotilla").join("flotilla.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("flotilla.db"))
        .display()
        .to_string()
}

fn default_true() -> bool {
    true
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Fleet-wide cap on deliveries in flight at once.
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,

    /// Due rows fetched per discovery pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sleep between discovery passes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long shutdown waits for in-flight deliveries.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: default_max_concurrent_sends(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

fn default_max_concurrent_sends() -> usize {
    500
}

fn default_batch_size() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_drain_timeout_secs() -> u64 {
    30
}

/// Per-device jitter bounds used when a row carries no override.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PacingConfig {
    #[serde(default = "default_min_delay_secs")]
    pub default_min_delay_secs: u32,

    #[serde(default = "default_max_delay_secs")]
    pub default_max_delay_secs: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            default_min_delay_secs: default_min_delay_secs(),
            default_max_delay_secs: default_max_delay_secs(),
        }
    }
}

fn default_min_delay_secs() -> u32 {
    5
}

fn default_max_delay_secs() -> u32 {
    15
}

/// Connection registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Upper bound on a single session restore.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_connect_timeout_secs() -> u64 {
    30
}

/// How later sequence steps come into existence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionPolicy {
    /// Every step is materialized with an absolute send time at enrollment.
    #[default]
    Prescheduled,
    /// Only the first step is materialized; each sent step materializes the next.
    ChainActivation,
}

/// Sequence enrollment configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnrollmentConfig {
    /// Offset of the first step from the enrollment time.
    #[serde(default = "default_bootstrap_delay_secs")]
    pub bootstrap_delay_secs: u64,

    /// Delay used for steps without an explicit `delay_hours`.
    #[serde(default = "default_step_delay_hours")]
    pub default_step_delay_hours: u32,

    #[serde(default)]
    pub policy: ProgressionPolicy,

    /// Cadence of the trigger scan.
    #[serde(default = "default_trigger_interval_secs")]
    pub trigger_interval_secs: u64,

    /// Contacts enrolled per trigger scan.
    #[serde(default = "default_enrollment_batch_limit")]
    pub batch_limit: usize,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            bootstrap_delay_secs: default_bootstrap_delay_secs(),
            default_step_delay_hours: default_step_delay_hours(),
            policy: ProgressionPolicy::default(),
            trigger_interval_secs: default_trigger_interval_secs(),
            batch_limit: default_enrollment_batch_limit(),
        }
    }
}

fn default_bootstrap_delay_secs() -> u64 {
    300
}

fn default_step_delay_hours() -> u32 {
    24
}

fn default_trigger_interval_secs() -> u64 {
    300
}

fn default_enrollment_batch_limit() -> usize {
    1000
}

/// Broadcast coordinator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Minimum quiet period between a finished broadcast and the next start.
    #[serde(default = "default_min_gap_minutes")]
    pub min_gap_minutes: u64,

    /// Age after which a lock is considered abandoned.
    #[serde(default = "default_lock_timeout_minutes")]
    pub lock_timeout_minutes: u64,

    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            min_gap_minutes: default_min_gap_minutes(),
            lock_timeout_minutes: default_lock_timeout_minutes(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
        }
    }
}

fn default_min_gap_minutes() -> u64 {
    30
}

fn default_lock_timeout_minutes() -> u64 {
    120
}

fn default_sweep_interval_minutes() -> u64 {
    30
}

/// Stuck message reclaimer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReclaimConfig {
    #[serde(default = "default_reclaim_interval_secs")]
    pub interval_secs: u64,

    /// Claims older than this are returned to `pending`.
    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,

    /// `queued` rows older than this are failed.
    #[serde(default = "default_queued_timeout_hours")]
    pub queued_timeout_hours: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reclaim_interval_secs(),
            processing_timeout_secs: default_processing_timeout_secs(),
            queued_timeout_hours: default_queued_timeout_hours(),
        }
    }
}

fn default_reclaim_interval_secs() -> u64 {
    60
}

fn default_processing_timeout_secs() -> u64 {
    300
}

fn default_queued_timeout_hours() -> u64 {
    12
}

/// Campaign dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CampaignConfig {
    #[serde(default = "default_campaign_trigger_interval_secs")]
    pub trigger_interval_secs: u64,

    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    /// Contact status targeted when a campaign sets none.
    #[serde(default = "default_target_status")]
    pub default_target_status: String,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            trigger_interval_secs: default_campaign_trigger_interval_secs(),
            status_interval_secs: default_status_interval_secs(),
            default_target_status: default_target_status(),
        }
    }
}

fn default_campaign_trigger_interval_secs() -> u64 {
    60
}

fn default_status_interval_secs() -> u64 {
    10
}

fn default_target_status() -> String {
    "prospect".to_string()
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Address the exporter's HTTP listener binds to.
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9464".to_string()
}
