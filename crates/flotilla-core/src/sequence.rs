// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sequence graph walk used to materialize an enrollment.
//!
//! Sequences link to one another through trigger labels on their last
//! step, so the definitions form a directed graph that may contain cycles.
//! [`walk`] follows those links from a root sequence and computes an
//! absolute send time for every step it visits. Each sequence id is
//! visited at most once per walk.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::types::{PacingOverride, Sequence, SequenceId, SequenceStep};

/// Read access to sequence definitions during a walk.
///
/// Storage implements this over an open transaction so the walk and the
/// inserts it produces commit together.
pub trait StepSource {
    type Error;

    fn sequence(&mut self, id: &SequenceId) -> Result<Option<Sequence>, Self::Error>;

    /// All steps of a sequence, ordered by `order_index`.
    fn steps(&mut self, id: &SequenceId) -> Result<Vec<SequenceStep>, Self::Error>;

    /// Find the active sequence whose entry trigger equals `label`.
    fn resolve_trigger(&mut self, label: &str) -> Result<Option<SequenceId>, Self::Error>;
}

/// Timing inputs for a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSchedule {
    /// Offset of the very first step from the enrollment time.
    pub bootstrap: Duration,
    /// Used for steps whose `delay_hours` is unset.
    pub default_step_delay: Duration,
    /// Plan only the root's first step.
    pub first_step_only: bool,
}

impl StepSchedule {
    /// Send time of `step` when the previous step goes out at `previous`.
    pub fn after(&self, previous: DateTime<Utc>, step: &SequenceStep) -> DateTime<Utc> {
        let delay = step
            .delay_hours
            .map(|h| Duration::hours(h.max(0)))
            .unwrap_or(self.default_step_delay);
        previous + delay
    }
}

/// One step with its computed send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub step: SequenceStep,
    pub scheduled_at: DateTime<Utc>,
    /// Step override filled from its sequence.
    pub pacing: PacingOverride,
}

/// Result of a walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceWalk {
    pub steps: Vec<PlannedStep>,
    /// Sequences entered, in walk order.
    pub visited: Vec<SequenceId>,
}

/// Whether a `next_trigger` label chains into another sequence.
///
/// Day-offset labels such as `followup_day` schedule within a sequence and
/// never link.
pub fn is_link_label(label: &str) -> bool {
    let label = label.trim();
    !label.is_empty() && !label.contains("_day")
}

/// Walk the sequence graph from `root`, scheduling every step relative to `start`.
///
/// Inactive or missing sequences end the walk. A link back to a sequence
/// already visited ends it too.
pub fn walk<S: StepSource>(
    source: &mut S,
    root: &SequenceId,
    start: DateTime<Utc>,
    schedule: &StepSchedule,
) -> Result<SequenceWalk, S::Error> {
    let mut out = SequenceWalk::default();
    let mut seen: HashSet<SequenceId> = HashSet::new();
    let mut previous: Option<DateTime<Utc>> = None;
    let mut next = Some(root.clone());

    while let Some(sequence_id) = next.take() {
        if !seen.insert(sequence_id.clone()) {
            break;
        }
        let Some(sequence) = source.sequence(&sequence_id)? else {
            break;
        };
        if !sequence.active {
            break;
        }
        let steps = source.steps(&sequence_id)?;
        if steps.is_empty() {
            break;
        }
        out.visited.push(sequence_id.clone());

        for step in &steps {
            let scheduled_at = match previous {
                None => start + schedule.bootstrap,
                Some(prev) => schedule.after(prev, step),
            };
            previous = Some(scheduled_at);
            out.steps.push(PlannedStep {
                pacing: step.pacing.or(sequence.pacing),
                step: step.clone(),
                scheduled_at,
            });
            if schedule.first_step_only {
                return Ok(out);
            }
        }

        if let Some(label) = steps.last().and_then(|s| s.next_trigger.as_deref()) {
            if is_link_label(label) {
                next = source.resolve_trigger(label.trim())?;
            }
        }
    }

    Ok(out)
}
