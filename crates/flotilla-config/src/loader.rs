// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./flotilla.toml` > `~/.config/flotilla/flotilla.toml` > `/etc/flotilla/flotilla.toml`
//! with environment variable overrides via `FLOTILLA_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::FlotillaConfig;

/// Config sections, used to map `FLOTILLA_<SECTION>_<KEY>` onto `section.key`.
const SECTIONS: &[&str] = &[
    "engine",
    "storage",
    "dispatch",
    "pacing",
    "registry",
    "enrollment",
    "coordinator",
    "reclaim",
    "campaign",
    "metrics",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/flotilla/flotilla.toml` (system-wide)
/// 3. `~/.config/flotilla/flotilla.toml` (user XDG config)
/// 4. `./flotilla.toml` (local directory)
/// 5. `FLOTILLA_*` environment variables
pub fn load_config() -> Result<FlotillaConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<FlotillaConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FlotillaConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<FlotillaConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FlotillaConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(FlotillaConfig::default()))
        .merge(Toml::file("/etc/flotilla/flotilla.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("flotilla/flotilla.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("flotilla.toml"))
        .merge(env_provider())
}

/// Map `section_key` to `section.key` for the first matching section prefix.
///
/// Keys themselves contain underscores (`max_concurrent_sends`), so splitting
/// on every `_` would nest them wrongly.
pub(crate) fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

fn env_provider() -> Env {
    // `key` is the lowercased env var name with prefix stripped.
    // Example: FLOTILLA_DISPATCH_BATCH_SIZE -> "dispatch_batch_size"
    Env::prefixed("FLOTILLA_").map(|key| map_env_key(key.as_str()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_sections() {
        assert_eq!(
            map_env_key("dispatch_max_concurrent_sends"),
            "dispatch.max_concurrent_sends"
        );
        assert_eq!(map_env_key("pacing_default_min_delay_secs"), "pacing.default_min_delay_secs");
        assert_eq!(map_env_key("engine_log_level"), "engine.log_level");
        assert_eq!(map_env_key("unrelated"), "unrelated");
    }
}
