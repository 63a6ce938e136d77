//! Condition projector (component F): mutates the cluster status
//! document to reflect Failure / Violation / OutOfSync / Available /
//! Healthy with deterministic precedence.
//!
//! A single tick projects exactly one [`Outcome`]. The merge operator
//! keyed on [`ConditionType`] preserves the transition timestamp when a
//! condition's type and status are unchanged, per §4.F.

use crate::model::{ClusterStatus, Condition, ConditionStatus, ConditionType};
use chrono::{DateTime, Utc};

/// The outcome of one reconcile tick, to be projected onto the status
/// document. See §4.F's table for the per-outcome condition matrix.
#[derive(Debug, Clone)]
pub enum Outcome {
    Failure { message: String, out_of_sync: Vec<usize> },
    Violation { message: String },
    WaitingForReplication { out_of_sync: Vec<usize> },
    Available { out_of_sync: Vec<usize> },
}

/// Apply `outcome` to `status`, merging each condition through
/// [`merge_condition`] so unchanged conditions keep their original
/// transition timestamp.
pub fn project(status: &mut ClusterStatus, outcome: &Outcome, now: DateTime<Utc>) {
    match outcome {
        Outcome::Failure { message, out_of_sync } => {
            set(status, ConditionType::Failure, ConditionStatus::True, Some(message.clone()), now);
            set(status, ConditionType::Available, ConditionStatus::False, Some(message.clone()), now);
            set(status, ConditionType::Healthy, ConditionStatus::False, Some(message.clone()), now);
            if !out_of_sync.is_empty() {
                set(
                    status,
                    ConditionType::OutOfSync,
                    ConditionStatus::True,
                    Some(out_of_sync_message(out_of_sync)),
                    now,
                );
            }
        }
        Outcome::Violation { message } => {
            set(status, ConditionType::Failure, ConditionStatus::True, Some(message.clone()), now);
            set(status, ConditionType::Violation, ConditionStatus::True, Some(message.clone()), now);
            set(status, ConditionType::Available, ConditionStatus::False, Some(message.clone()), now);
            set(status, ConditionType::Healthy, ConditionStatus::False, Some(message.clone()), now);
        }
        Outcome::WaitingForReplication { out_of_sync } => {
            set(status, ConditionType::Available, ConditionStatus::False, None, now);
            set(status, ConditionType::Healthy, ConditionStatus::False, None, now);
            project_out_of_sync(status, out_of_sync, now);
            clear_violation_if_present(status, now);
        }
        Outcome::Available { out_of_sync } => {
            set(status, ConditionType::Available, ConditionStatus::True, None, now);
            let healthy = if out_of_sync.is_empty() {
                ConditionStatus::True
            } else {
                ConditionStatus::False
            };
            let message = (!out_of_sync.is_empty()).then(|| out_of_sync_message(out_of_sync));
            set(status, ConditionType::Healthy, healthy, message.clone(), now);
            project_out_of_sync(status, out_of_sync, now);
            clear_violation_if_present(status, now);
        }
    }
}

/// Clears a previously-set `Violation = True` condition once the cluster
/// has recovered into a legal state, matching the `Recovered` signal from
/// the constraint validator (§7).
fn clear_violation_if_present(status: &mut ClusterStatus, now: DateTime<Utc>) {
    if status.is_true(ConditionType::Violation) {
        set(status, ConditionType::Violation, ConditionStatus::False, None, now);
    }
}

fn project_out_of_sync(status: &mut ClusterStatus, out_of_sync: &[usize], now: DateTime<Utc>) {
    if out_of_sync.is_empty() {
        set(status, ConditionType::OutOfSync, ConditionStatus::False, None, now);
    } else {
        set(
            status,
            ConditionType::OutOfSync,
            ConditionStatus::True,
            Some(out_of_sync_message(out_of_sync)),
            now,
        );
    }
}

fn out_of_sync_message(out_of_sync: &[usize]) -> String {
    format!("outOfSync instances: {out_of_sync:?}")
}

/// Merge-set one condition: if an existing condition with the same type
/// and status already exists, its transition time is preserved;
/// otherwise the condition is (re)inserted with `now` as the transition
/// time.
fn set(
    status: &mut ClusterStatus,
    condition_type: ConditionType,
    new_status: ConditionStatus,
    message: Option<String>,
    now: DateTime<Utc>,
) {
    let last_transition_time = status
        .conditions
        .get(&condition_type)
        .filter(|existing| existing.status == new_status)
        .map_or(now, |existing| existing.last_transition_time);

    status.conditions.insert(
        condition_type,
        Condition {
            condition_type,
            status: new_status,
            message,
            last_transition_time,
        },
    );
}
