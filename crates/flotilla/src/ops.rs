// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot maintenance commands: `reclaim`, `retry`, and `enroll`.

use flotilla_config::FlotillaConfig;
use flotilla_core::{CampaignId, ContactId, FlotillaError, SequenceId};
use flotilla_storage::Scope;

use crate::serve::build_engine;

/// Runs the `flotilla reclaim` command.
pub async fn run_reclaim(config: FlotillaConfig) -> Result<(), FlotillaError> {
    let engine = build_engine(config).await?;
    let report = engine.reclaimer().sweep().await?;
    println!(
        "reclaimed: {} returned to pending, {} expired",
        report.reverted, report.expired
    );
    Ok(())
}

fn retry_scope(campaign: Option<String>, sequence: Option<String>) -> Scope {
    match (campaign, sequence) {
        (Some(id), _) => Scope::Campaign(CampaignId::from(id)),
        (None, Some(id)) => Scope::Sequence(SequenceId::from(id)),
        (None, None) => Scope::All,
    }
}

/// Runs the `flotilla retry` command.
pub async fn run_retry(
    config: FlotillaConfig,
    campaign: Option<String>,
    sequence: Option<String>,
) -> Result<(), FlotillaError> {
    let engine = build_engine(config).await?;
    let queued = engine
        .pool()
        .retry_failed(retry_scope(campaign, sequence))
        .await?;
    println!("re-queued {queued} failed message(s)");
    Ok(())
}

/// Runs the `flotilla enroll` command.
pub async fn run_enroll(
    config: FlotillaConfig,
    contact: String,
    sequence: String,
    trigger: Option<String>,
) -> Result<(), FlotillaError> {
    let engine = build_engine(config).await?;
    let report = engine
        .enrollment()
        .enroll_contact(
            &ContactId::from(contact),
            &SequenceId::from(sequence),
            trigger.as_deref(),
        )
        .await?;
    if report.is_duplicate() {
        println!("already enrolled; nothing queued");
    } else {
        println!(
            "enrolled: {} step(s) queued across {} sequence(s)",
            report.inserted,
            report.visited.len()
        );
    }
    Ok(())
}
