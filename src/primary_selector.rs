//! Primary selector (component D): picks the index of the instance that
//! should be primary this tick.

use crate::error::{ControllerError, Result};
use crate::model::{ClusterSnapshot, ClusterStatus};

/// Select the target primary index.
///
/// When no primary is currently recorded, honors the snapshot's `Latest`.
/// This is the recommended resolution of Open Question (1): the upstream
/// stub always returned 0. `Latest` is only absent when the status
/// aggregator could not order every instance's GTID set (§4.A/§4.B) — for
/// a single-node cluster this never happens (`compare` trivially orders a
/// set against itself), so selection falls back to index 0 there; for a
/// multi-node cluster an absent `Latest` means an inconsistent or missing
/// GTID history, and selection fails rather than silently promoting an
/// arbitrary (possibly divergent) instance, matching §4.A's rationale that
/// divergent histories must never be silently promoted.
///
/// When a primary is already recorded, it is retained unless that
/// instance is unavailable, in which case selection fails so the caller
/// can report `Failure`.
pub fn select(snapshot: &ClusterSnapshot, previous_status: &ClusterStatus) -> Result<usize> {
    match previous_status.current_primary_index {
        Some(index) => {
            let available = snapshot
                .instance_status
                .get(index)
                .is_some_and(|is| is.available);
            if available {
                Ok(index)
            } else {
                Err(ControllerError::ControlPlane(format!(
                    "recorded primary {index} is unavailable"
                )))
            }
        }
        None => match snapshot.latest {
            Some(index) => Ok(index),
            None if snapshot.len() <= 1 => Ok(0),
            None => Err(ControllerError::GtidInconsistent),
        },
    }
}
