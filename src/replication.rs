//! Replication driver (component E): aligns replication topology on the
//! target primary and waits for convergence.
//!
//! Ordering is strict and matches §4.E exactly: persist the chosen
//! primary before touching any replica (so a crash mid-reconfigure
//! resumes with a stable target), then ensure the semi-sync wait count,
//! then stop/re-point/start replica threads, then poll convergence.
//! Clearing read-only on the primary (§4.E step 6) is the reconcile
//! loop's job, not this driver's — see [`crate::reconcile`].

use crate::client::Client;
use crate::error::{ControllerError, Result};
use crate::model::{ClusterSnapshot, ClusterSpec, ClusterStatus};
use crate::mysql_service::{InstanceEndpoint, MySQLService};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Outcome of driving replication for one tick.
#[derive(Debug, Clone)]
pub struct DriveOutcome {
    /// True if fewer than `floor(replicas/2)` replicas have converged and
    /// the caller should requeue instead of admitting writes.
    pub wait: bool,
    /// Indices of replicas whose IO thread reports a non-zero last error.
    pub out_of_sync: Vec<usize>,
    /// Status with `current_primary_index` persisted, ready for the
    /// caller to carry into the next status write.
    pub status: ClusterStatus,
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(target_primary))]
pub async fn drive(
    token: &CancellationToken,
    mysql: &dyn MySQLService,
    client: &dyn Client,
    spec: &ClusterSpec,
    endpoints: &[InstanceEndpoint],
    snapshot: &ClusterSnapshot,
    previous_status: &ClusterStatus,
    target_primary: usize,
    replicator_user: &str,
    replicator_password: &SecretString,
) -> Result<DriveOutcome> {
    // Step 1: persist the target primary before touching any replica.
    let mut status = previous_status.clone();
    status.current_primary_index = Some(target_primary);
    client
        .update_status(&spec.namespace, &spec.name, previous_status, status.clone())
        .await?;

    // Step 2: ensure the primary's semi-sync wait count matches the
    // cluster's replica count.
    let expected_wait_count = i64::from(spec.replicas / 2);
    let primary_wait_count = snapshot
        .instance_status
        .get(target_primary)
        .and_then(|is| is.global_variable_status)
        .map(|g| g.rpl_semi_sync_master_wait_for_slave_count)
        .unwrap_or(-1);

    if primary_wait_count != expected_wait_count {
        let primary_endpoint = endpoints.get(target_primary).ok_or_else(|| {
            ControllerError::Invariant(format!(
                "no endpoint configured for target primary index {target_primary}"
            ))
        })?;
        mysql
            .set_wait_for_slave_count(token, target_primary, primary_endpoint, expected_wait_count)
            .await?;
    }

    let primary_host = spec.canonical_host(target_primary);

    // Step 3: stop-then-change for followers not already pointed at the
    // current primary.
    for (index, endpoint) in endpoints.iter().enumerate() {
        if index == target_primary {
            continue;
        }

        let already_pointed = snapshot
            .instance_status
            .get(index)
            .and_then(|is| is.replica_status.as_ref())
            .is_some_and(|r| r.master_host == primary_host);

        if already_pointed {
            continue;
        }

        mysql.stop_slave(token, index, endpoint).await?;
        mysql
            .change_master(
                token,
                index,
                endpoint,
                &primary_host,
                endpoint.port,
                replicator_user,
                replicator_password,
            )
            .await?;
    }

    // Step 4: start every follower's threads unconditionally (idempotent).
    for (index, endpoint) in endpoints.iter().enumerate() {
        if index == target_primary {
            continue;
        }
        mysql.start_slave(token, index, endpoint).await?;
    }

    // Step 5: convergence.
    let outcome = wait_for_convergence(snapshot, spec, target_primary);
    info!(wait = outcome.0, out_of_sync = ?outcome.1, "replication convergence check");

    Ok(DriveOutcome {
        wait: outcome.0,
        out_of_sync: outcome.1,
        status,
    })
}

/// Pure convergence check: count replicas whose `ExecutedGtidSet` string
/// equals the primary's, per Open Question (2) — string equality is kept
/// for this contract even though subset arithmetic is used elsewhere for
/// correctness judgments (see `gtid::compare`).
fn wait_for_convergence(
    snapshot: &ClusterSnapshot,
    spec: &ClusterSpec,
    target_primary: usize,
) -> (bool, Vec<usize>) {
    let Some(primary_status) = snapshot
        .instance_status
        .get(target_primary)
        .and_then(|is| is.primary_status.as_ref())
    else {
        return (true, Vec::new());
    };

    let primary_gtid = &primary_status.executed_gtid_set;
    let mut converged = 0usize;
    let mut out_of_sync = Vec::new();

    for (index, instance) in snapshot.instance_status.iter().enumerate() {
        if index == target_primary {
            continue;
        }
        let Some(replica) = instance.replica_status.as_ref() else {
            continue;
        };

        if replica.last_io_errno != 0 {
            out_of_sync.push(index);
            continue;
        }

        if &replica.executed_gtid_set == primary_gtid {
            converged += 1;
        }
    }

    let required = (spec.replicas / 2) as usize;
    (converged < required, out_of_sync)
}
