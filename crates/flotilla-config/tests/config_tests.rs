// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Flotilla configuration system.

use flotilla_config::diagnostic::ConfigError;
use flotilla_config::{
    load_and_validate_path, load_and_validate_str, load_config_from_path, load_config_from_str,
    ProgressionPolicy,
};
use serial_test::serial;

/// Valid TOML with all sections deserializes successfully.
#[test]
fn full_toml_deserializes() {
    let toml = r#"
[engine]
name = "edge-1"
log_level = "debug"

[storage]
database_path = "/tmp/flotilla-test.db"
wal_mode = false

[dispatch]
max_concurrent_sends = 64
batch_size = 20
poll_interval_ms = 250
drain_timeout_secs = 5

[pacing]
default_min_delay_secs = 8
default_max_delay_secs = 20

[registry]
connect_timeout_secs = 10

[enrollment]
bootstrap_delay_secs = 60
default_step_delay_hours = 12
policy = "chain_activation"
trigger_interval_secs = 30
batch_limit = 50

[coordinator]
min_gap_minutes = 15
lock_timeout_minutes = 60
sweep_interval_minutes = 5

[reclaim]
interval_secs = 30
processing_timeout_secs = 120
queued_timeout_hours = 6

[campaign]
trigger_interval_secs = 20
status_interval_secs = 5
default_target_status = "customer"

[metrics]
enabled = true
listen = "0.0.0.0:9000"
"#;

    let config = load_and_validate_str(toml).expect("valid TOML should load");
    assert_eq!(config.engine.name, "edge-1");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.dispatch.max_concurrent_sends, 64);
    assert_eq!(config.dispatch.poll_interval().as_millis(), 250);
    assert_eq!(config.pacing.default_min_delay_secs, 8);
    assert_eq!(config.registry.connect_timeout().as_secs(), 10);
    assert_eq!(config.enrollment.policy, ProgressionPolicy::ChainActivation);
    assert_eq!(config.coordinator.min_gap_minutes, 15);
    assert_eq!(config.reclaim.queued_timeout_hours, 6);
    assert_eq!(config.campaign.default_target_status, "customer");
    assert!(config.metrics.enabled);
}

/// Empty TOML yields the compiled defaults.
#[test]
fn empty_toml_uses_defaults() {
    let config = load_config_from_str("").expect("empty config is valid");
    assert_eq!(config.engine.name, "flotilla");
    assert_eq!(config.dispatch.batch_size, 100);
    assert_eq!(config.enrollment.policy, ProgressionPolicy::Prescheduled);
}

/// Unknown keys are rejected with a suggestion.
#[test]
fn unknown_key_gets_suggestion() {
    let toml = r#"
[dispatch]
batch_sise = 10
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject unknown field");
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => {
            assert_eq!(key, "batch_sise");
            assert_eq!(suggestion.as_deref(), Some("batch_size"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

/// Unknown sections are rejected at the top level.
#[test]
fn unknown_section_is_rejected() {
    let toml = r#"
[telegram]
bot_token = "abc"
"#;
    assert!(load_config_from_str(toml).is_err());
}

/// Wrong value types become InvalidType diagnostics.
#[test]
fn wrong_type_is_reported() {
    let toml = r#"
[dispatch]
batch_size = "lots"
"#;

    let errors = load_and_validate_str(toml).expect_err("string for integer");
    assert!(
        matches!(&errors[0], ConfigError::InvalidType { key, .. } if key.contains("batch_size")),
        "got {:?}",
        errors[0]
    );
}

/// Unknown progression policy names are rejected.
#[test]
fn unknown_policy_is_rejected() {
    let toml = r#"
[enrollment]
policy = "whenever"
"#;
    assert!(load_and_validate_str(toml).is_err());
}

/// Semantic validation runs after a successful parse.
#[test]
fn validation_runs_after_parse() {
    let toml = r#"
[pacing]
default_min_delay_secs = 40
default_max_delay_secs = 10
"#;

    let errors = load_and_validate_str(toml).expect_err("inverted bounds");
    assert!(matches!(errors[0], ConfigError::Validation { .. }));
}

/// Environment variables override file values, including underscore-heavy keys.
#[test]
#[serial]
fn env_overrides_file_values() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "custom.toml",
            r#"
[dispatch]
max_concurrent_sends = 10

[reclaim]
processing_timeout_secs = 100
"#,
        )?;
        jail.set_env("FLOTILLA_DISPATCH_MAX_CONCURRENT_SENDS", "42");
        jail.set_env("FLOTILLA_ENROLLMENT_POLICY", "chain_activation");

        let config = load_config_from_path(std::path::Path::new("custom.toml"))
            .map_err(|e| e.to_string())?;
        assert_eq!(config.dispatch.max_concurrent_sends, 42);
        assert_eq!(config.reclaim.processing_timeout_secs, 100);
        assert_eq!(config.enrollment.policy, ProgressionPolicy::ChainActivation);
        Ok(())
    });
}

/// Typos in an explicit file are reported with a suggestion.
#[test]
#[serial]
fn file_typo_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flotilla.toml");
    std::fs::write(&path, "[coordinator]\nmin_gap_minuts = 5\n").unwrap();

    let errors = load_and_validate_path(&path).expect_err("typo in key");
    match &errors[0] {
        ConfigError::UnknownKey { key, suggestion, .. } => {
            assert_eq!(key, "min_gap_minuts");
            assert_eq!(suggestion.as_deref(), Some("min_gap_minutes"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}
