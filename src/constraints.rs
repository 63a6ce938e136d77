//! Constraint validator (component C): cluster-wide safety invariants
//! that must hold before the loop is allowed to act.

use crate::model::{ClusterSnapshot, ClusterStatus, ConditionStatus, ConditionType};

/// Outcome of validating a snapshot against the previously recorded
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// No violation; nothing to recover from either.
    Ok,
    /// A safety invariant is broken; the loop must refuse to act.
    Violation,
    /// No violation now, but a prior tick left a `Violation` condition
    /// set — the loop should clear it and proceed.
    Recovered,
}

/// Validate the cluster-wide safety invariants from §3:
/// 1. At most one instance is writable.
/// 2. If a primary is already recorded and exactly one instance is
///    writable, that instance must be the recorded primary.
#[must_use]
pub fn validate(snapshot: &ClusterSnapshot, previous_status: &ClusterStatus) -> ValidationOutcome {
    let writable = snapshot.writable_indices();

    if writable.len() > 1 {
        return ValidationOutcome::Violation;
    }

    if let (Some(current_primary), Some(&only_writable)) =
        (previous_status.current_primary_index, writable.first())
    {
        if writable.len() == 1 && current_primary != only_writable {
            return ValidationOutcome::Violation;
        }
    }

    let violation_already_present = previous_status
        .condition(ConditionType::Violation)
        .is_some_and(|c| c.status == ConditionStatus::True);

    if violation_already_present {
        ValidationOutcome::Recovered
    } else {
        ValidationOutcome::Ok
    }
}
