// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `flotilla status` command implementation.
//!
//! Reads queue counts and live broadcast locks straight from the database,
//! so it works whether or not `serve` is running.

use flotilla_config::FlotillaConfig;
use flotilla_core::types::BroadcastLock;
use flotilla_core::{FlotillaError, StatusCounts};
use flotilla_storage::queries::messages;
use flotilla_storage::Scope;
use serde::Serialize;

use crate::serve::build_engine;

/// One live lock, as printed.
#[derive(Debug, Serialize)]
pub struct LockView {
    pub user_id: String,
    pub kind: String,
    pub broadcast_id: String,
    pub locked_at: String,
}

impl From<&BroadcastLock> for LockView {
    fn from(lock: &BroadcastLock) -> Self {
        Self {
            user_id: lock.user_id.to_string(),
            kind: lock.kind.to_string(),
            broadcast_id: lock.broadcast_id.clone(),
            locked_at: lock.locked_at.to_rfc3339(),
        }
    }
}

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub database: String,
    pub counts: StatusCounts,
    pub unfinished: u64,
    pub locks: Vec<LockView>,
}

/// Run the `flotilla status` command.
pub async fn run_status(config: &FlotillaConfig, json: bool) -> Result<(), FlotillaError> {
    let engine = build_engine(config.clone()).await?;
    let counts = messages::counts(engine.database(), Scope::All).await?;
    let locks = engine.coordinator().live_locks().await?;

    let response = StatusResponse {
        database: config.storage.database_path.clone(),
        counts,
        unfinished: counts.unfinished(),
        locks: locks.iter().map(LockView::from).collect(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        print!("{}", render(&response));
    }
    Ok(())
}

fn render(status: &StatusResponse) -> String {
    let c = &status.counts;
    let mut out = String::new();
    out.push('\n');
    out.push_str("  flotilla status\n");
    out.push_str(&format!("  {}\n", "-".repeat(35)));
    out.push_str(&format!("    Database:   {}\n", status.database));
    out.push_str(&format!(
        "    Queue:      {} pending, {} queued, {} processing\n",
        c.pending, c.queued, c.processing
    ));
    out.push_str(&format!(
        "    Done:       {} sent, {} failed, {} skipped\n",
        c.sent, c.failed, c.skipped
    ));
    if status.locks.is_empty() {
        out.push_str("    Broadcasts: none running\n");
    } else {
        out.push_str("    Broadcasts:\n");
        for lock in &status.locks {
            out.push_str(&format!(
                "      {} {} {} (since {})\n",
                lock.user_id, lock.kind, lock.broadcast_id, lock.locked_at
            ));
        }
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(locks: Vec<LockView>) -> StatusResponse {
        let counts = StatusCounts {
            pending: 3,
            sent: 7,
            failed: 1,
            ..Default::default()
        };
        StatusResponse {
            database: "/tmp/f.db".into(),
            unfinished: counts.unfinished(),
            counts,
            locks,
        }
    }

    #[test]
    fn status_response_serializes() {
        let json = serde_json::to_string(&sample(Vec::new())).unwrap();
        assert!(json.contains("\"pending\":3"));
        assert!(json.contains("\"unfinished\":3"));
        assert!(json.contains("\"locks\":[]"));
    }

    #[test]
    fn render_lists_locks() {
        let text = render(&sample(vec![LockView {
            user_id: "u1".into(),
            kind: "campaign".into(),
            broadcast_id: "k1".into(),
            locked_at: "2026-01-01T00:00:00Z".into(),
        }]));
        assert!(text.contains("3 pending, 0 queued, 0 processing"));
        assert!(text.contains("u1 campaign k1"));

        let idle = render(&sample(Vec::new()));
        assert!(idle.contains("none running"));
    }

    #[tokio::test]
    async fn status_reads_an_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FlotillaConfig::default();
        config.storage.database_path = dir.path().join("s.db").to_string_lossy().to_string();
        run_status(&config, true).await.unwrap();
    }
}
