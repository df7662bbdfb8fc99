// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as ordered pacing bounds, non-zero intervals, and parseable addresses.

use crate::diagnostic::ConfigError;
use crate::model::FlotillaConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &FlotillaConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.pacing.default_min_delay_secs > config.pacing.default_max_delay_secs {
        errors.push(ConfigError::Validation {
            message: format!(
                "pacing.default_min_delay_secs ({}) must not exceed pacing.default_max_delay_secs ({})",
                config.pacing.default_min_delay_secs, config.pacing.default_max_delay_secs
            ),
        });
    }

    let worst_wait = u64::from(config.pacing.default_max_delay_secs)
        + config.registry.connect_timeout_secs;
    if config.reclaim.processing_timeout_secs > 0
        && worst_wait >= config.reclaim.processing_timeout_secs
    {
        errors.push(ConfigError::Validation {
            message: format!(
                "reclaim.processing_timeout_secs ({}) must exceed pacing.default_max_delay_secs \
                 plus registry.connect_timeout_secs ({worst_wait})",
                config.reclaim.processing_timeout_secs
            ),
        });
    }

    if config.dispatch.max_concurrent_sends == 0 {
        errors.push(ConfigError::Validation {
            message: "dispatch.max_concurrent_sends must be at least 1".to_string(),
        });
    }

    if config.dispatch.batch_size == 0 {
        errors.push(ConfigError::Validation {
            message: "dispatch.batch_size must be at least 1".to_string(),
        });
    }

    if config.enrollment.batch_limit == 0 {
        errors.push(ConfigError::Validation {
            message: "enrollment.batch_limit must be at least 1".to_string(),
        });
    }

    let positive = [
        ("dispatch.poll_interval_ms", config.dispatch.poll_interval_ms),
        ("registry.connect_timeout_secs", config.registry.connect_timeout_secs),
        ("enrollment.trigger_interval_secs", config.enrollment.trigger_interval_secs),
        ("coordinator.lock_timeout_minutes", config.coordinator.lock_timeout_minutes),
        ("coordinator.sweep_interval_minutes", config.coordinator.sweep_interval_minutes),
        ("reclaim.interval_secs", config.reclaim.interval_secs),
        ("reclaim.processing_timeout_secs", config.reclaim.processing_timeout_secs),
        ("reclaim.queued_timeout_hours", config.reclaim.queued_timeout_hours),
        ("campaign.trigger_interval_secs", config.campaign.trigger_interval_secs),
        ("campaign.status_interval_secs", config.campaign.status_interval_secs),
    ];
    for (key, value) in positive {
        if value == 0 {
            errors.push(ConfigError::Validation {
                message: format!("{key} must be greater than zero"),
            });
        }
    }

    if config.campaign.default_target_status.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "campaign.default_target_status must not be empty".to_string(),
        });
    }

    if config.metrics.enabled
        && config
            .metrics
            .listen
            .trim()
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ConfigError::Validation {
            message: format!(
                "metrics.listen `{}` is not a valid socket address",
                config.metrics.listen
            ),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
