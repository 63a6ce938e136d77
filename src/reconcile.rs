//! Reconcile loop (component G): composes A through F into one
//! idempotent tick.
//!
//! The loop owns no state across ticks beyond what it reads from and
//! writes back through [`Client`]. Every suspension point takes the
//! cancellation token so a shutdown in progress aborts promptly (§5).

use crate::aggregator;
use crate::client::Client;
use crate::conditions::{self, Outcome};
use crate::constraints::{self, ValidationOutcome};
use crate::error::{ControllerError, Result};
use crate::model::{ClusterSpec, ClusterStatus};
use crate::mysql_service::{InstanceEndpoint, MySQLService};
use crate::primary_selector;
use crate::replication;
use chrono::Utc;
use secrecy::SecretString;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Default requeue delay while waiting on replication convergence, per
/// §4.E step 5 / §4.G.
pub const CONVERGENCE_REQUEUE_DELAY: Duration = Duration::from_secs(10);

/// What the scheduler should do after a tick completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueAfter {
    /// Nothing further needed until the next externally-triggered tick.
    Idle,
    /// Run another tick after the given delay.
    Delay(Duration),
}

/// Parameters threaded through a single tick; grouped so `reconcile`'s
/// signature does not grow every time a new credential is needed.
pub struct TickInputs<'a> {
    pub spec: &'a ClusterSpec,
    pub endpoints: &'a [InstanceEndpoint],
    pub replicator_user: &'a str,
    pub replicator_password: &'a SecretString,
}

/// Run exactly one reconcile tick for `spec`, composing A → B → C → D →
/// E → F, returning the scheduler's next action.
///
/// A component error is classified by [`classify_error`] per §7: most
/// kinds are lifted to a `Failure` or `Violation` condition and the
/// status write for that projection is attempted before the tick
/// returns; a cancelled tick and a status-write failure both bubble up
/// unwrapped instead.
///
/// An unavailable instance short-circuits straight to `Failure` before
/// the constraint validator or primary selector ever run, regardless of
/// which index is down — per §7's transient-data-plane handling.
#[instrument(skip_all, fields(namespace = %inputs.spec.namespace, name = %inputs.spec.name))]
pub async fn reconcile(
    token: &CancellationToken,
    mysql: &dyn MySQLService,
    client: &dyn Client,
    inputs: &TickInputs<'_>,
) -> Result<RequeueAfter> {
    let spec = inputs.spec;
    let previous_status = client.get_status(&spec.namespace, &spec.name).await?;

    if token.is_cancelled() {
        return Err(ControllerError::Cancelled);
    }

    let snapshot = aggregator::aggregate(token, mysql, client, spec, inputs.endpoints).await;

    if let Some(index) = snapshot.instance_status.iter().position(|is| !is.available) {
        warn!(index, "unavailable host exists");
        let outcome = Outcome::Failure {
            message: "unavailable host exists".to_string(),
            out_of_sync: Vec::new(),
        };
        return finish(client, spec, previous_status, outcome, RequeueAfter::Idle).await;
    }

    match constraints::validate(&snapshot, &previous_status) {
        ValidationOutcome::Violation => {
            let message = "multiple writable instances or primary disagreement".to_string();
            return finish(client, spec, previous_status, Outcome::Violation { message }, RequeueAfter::Idle)
                .await;
        }
        ValidationOutcome::Ok | ValidationOutcome::Recovered => {}
    }

    let target_primary = match primary_selector::select(&snapshot, &previous_status) {
        Ok(index) => index,
        Err(err) => {
            warn!(error = %err, "primary selection failed");
            let outcome = classify_error(err)?;
            return finish(client, spec, previous_status, outcome, RequeueAfter::Idle).await;
        }
    };

    let drive_result = replication::drive(
        token,
        mysql,
        client,
        spec,
        inputs.endpoints,
        &snapshot,
        &previous_status,
        target_primary,
        inputs.replicator_user,
        inputs.replicator_password,
    )
    .await;

    let drive_outcome = match drive_result {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(error = %err, "replication drive failed");
            // `drive` may have already persisted `current_primary_index`
            // (its step 1) before a later step failed; re-read so the
            // Failure projection's optimistic-concurrency check is
            // against what is actually stored, not our stale copy.
            let baseline = client
                .get_status(&spec.namespace, &spec.name)
                .await
                .unwrap_or(previous_status);
            let outcome = classify_error(err)?;
            return finish(client, spec, baseline, outcome, RequeueAfter::Idle).await;
        }
    };

    if drive_outcome.wait {
        let outcome = Outcome::WaitingForReplication {
            out_of_sync: drive_outcome.out_of_sync.clone(),
        };
        return finish(
            client,
            spec,
            drive_outcome.status,
            outcome,
            RequeueAfter::Delay(CONVERGENCE_REQUEUE_DELAY),
        )
        .await;
    }

    // Step 6 of §4.E: clear read-only on the primary now that convergence
    // has been reached.
    if let Some(endpoint) = inputs.endpoints.get(target_primary) {
        mysql.turn_off_read_only(token, target_primary, endpoint).await?;
    }

    let outcome = Outcome::Available {
        out_of_sync: drive_outcome.out_of_sync,
    };
    finish(client, spec, drive_outcome.status, outcome, RequeueAfter::Idle).await
}

/// Lifts a component error into the projection the caller should apply,
/// per §7's propagation policy: an invariant breach is unrecoverable and
/// aborts the process (the one `panic!` site in non-test code); a
/// cancelled tick bubbles up unwrapped rather than writing a misleading
/// status while shutdown is in progress; a safety violation becomes a
/// `Violation` projection; everything else (inconsistent GTIDs, transient
/// data-plane/control-plane failures) becomes `Failure`.
#[allow(clippy::panic)]
fn classify_error(err: ControllerError) -> Result<Outcome> {
    if err.is_invariant_breach() {
        panic!("{err}");
    }
    if matches!(err, ControllerError::Cancelled) {
        return Err(err);
    }
    if err.is_gtid_inconsistent() {
        warn!("GTID sets inconsistent across instances; human intervention required");
    }
    if err.is_violation() {
        return Ok(Outcome::Violation {
            message: err.to_string(),
        });
    }
    Ok(Outcome::Failure {
        message: err.to_string(),
        out_of_sync: Vec::new(),
    })
}

async fn finish(
    client: &dyn Client,
    spec: &ClusterSpec,
    previous_status: ClusterStatus,
    outcome: Outcome,
    requeue: RequeueAfter,
) -> Result<RequeueAfter> {
    let now = Utc::now();
    let mut next_status = previous_status.clone();
    conditions::project(&mut next_status, &outcome, now);

    let status_json = next_status.to_json();
    client
        .update_status(&spec.namespace, &spec.name, &previous_status, next_status)
        .await?;

    info!(?requeue, status = %status_json, "tick complete");
    Ok(requeue)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::client::MemoryClient;
    use crate::model::{GlobalVariableStatus, InstanceSnapshot, PrimaryStatus};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    struct SingleNodeMySQL {
        turned_off_read_only: AtomicBool,
    }

    #[async_trait]
    impl MySQLService for SingleNodeMySQL {
        async fn get_instance_snapshots(
            &self,
            _token: &CancellationToken,
            endpoints: &[InstanceEndpoint],
        ) -> Vec<InstanceSnapshot> {
            endpoints
                .iter()
                .map(|_| InstanceSnapshot {
                    available: true,
                    primary_status: Some(PrimaryStatus {
                        executed_gtid_set: String::new(),
                    }),
                    replica_status: None,
                    global_variable_status: Some(GlobalVariableStatus {
                        read_only: false,
                        super_read_only: false,
                        rpl_semi_sync_master_wait_for_slave_count: 0,
                    }),
                    clone_state_status: None,
                    all_relay_log_executed: true,
                })
                .collect()
        }

        async fn set_wait_for_slave_count(
            &self,
            _token: &CancellationToken,
            _index: usize,
            _endpoint: &InstanceEndpoint,
            _count: i64,
        ) -> Result<()> {
            Ok(())
        }

        async fn stop_slave(
            &self,
            _token: &CancellationToken,
            _index: usize,
            _endpoint: &InstanceEndpoint,
        ) -> Result<()> {
            Ok(())
        }

        async fn start_slave(
            &self,
            _token: &CancellationToken,
            _index: usize,
            _endpoint: &InstanceEndpoint,
        ) -> Result<()> {
            Ok(())
        }

        async fn change_master(
            &self,
            _token: &CancellationToken,
            _index: usize,
            _endpoint: &InstanceEndpoint,
            _primary_host: &str,
            _primary_port: u16,
            _replicator_user: &str,
            _replicator_password: &SecretString,
        ) -> Result<()> {
            Ok(())
        }

        async fn turn_off_read_only(
            &self,
            _token: &CancellationToken,
            _index: usize,
            _endpoint: &InstanceEndpoint,
        ) -> Result<()> {
            self.turned_off_read_only.store(true, AtomicOrdering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn single_node_happy_path_reaches_available() {
        let spec = ClusterSpec {
            name: "test".to_string(),
            namespace: "ns".to_string(),
            replicas: 1,
            replication_source_secret_name: None,
        };
        let endpoints = vec![InstanceEndpoint {
            host: spec.canonical_host(0),
            port: 3306,
            user: "operator".to_string(),
            password: SecretString::from("pw".to_string()),
        }];
        let mysql = SingleNodeMySQL {
            turned_off_read_only: AtomicBool::new(false),
        };
        let client = MemoryClient::new();
        let token = CancellationToken::new();
        let replicator_password = SecretString::from("replicator-pw".to_string());

        let inputs = TickInputs {
            spec: &spec,
            endpoints: &endpoints,
            replicator_user: "replicator",
            replicator_password: &replicator_password,
        };

        let requeue = reconcile(&token, &mysql, &client, &inputs).await.unwrap();
        assert_eq!(requeue, RequeueAfter::Idle);
        assert!(mysql.turned_off_read_only.load(AtomicOrdering::SeqCst));

        let status = client.get_status("ns", "test").await.unwrap();
        assert_eq!(status.current_primary_index, Some(0));
        assert!(status.is_true(crate::model::ConditionType::Available));
        assert!(status.is_true(crate::model::ConditionType::Healthy));
    }

    #[tokio::test]
    async fn reconcile_is_idempotent_on_repeated_ticks() {
        let spec = ClusterSpec {
            name: "idem".to_string(),
            namespace: "ns".to_string(),
            replicas: 1,
            replication_source_secret_name: None,
        };
        let endpoints = vec![InstanceEndpoint {
            host: spec.canonical_host(0),
            port: 3306,
            user: "operator".to_string(),
            password: SecretString::from("pw".to_string()),
        }];
        let mysql = SingleNodeMySQL {
            turned_off_read_only: AtomicBool::new(false),
        };
        let client = MemoryClient::new();
        let token = CancellationToken::new();
        let replicator_password = SecretString::from("replicator-pw".to_string());
        let inputs = TickInputs {
            spec: &spec,
            endpoints: &endpoints,
            replicator_user: "replicator",
            replicator_password: &replicator_password,
        };

        reconcile(&token, &mysql, &client, &inputs).await.unwrap();
        let first = client.get_status("ns", "idem").await.unwrap();

        reconcile(&token, &mysql, &client, &inputs).await.unwrap();
        let second = client.get_status("ns", "idem").await.unwrap();

        assert_eq!(first.current_primary_index, second.current_primary_index);
        assert_eq!(
            first.condition(crate::model::ConditionType::Available).unwrap().last_transition_time,
            second.condition(crate::model::ConditionType::Available).unwrap().last_transition_time,
        );
    }

    struct OneDownMySQL;

    #[async_trait]
    impl MySQLService for OneDownMySQL {
        async fn get_instance_snapshots(
            &self,
            _token: &CancellationToken,
            endpoints: &[InstanceEndpoint],
        ) -> Vec<InstanceSnapshot> {
            endpoints
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    if i == 1 {
                        InstanceSnapshot::unavailable()
                    } else {
                        InstanceSnapshot {
                            available: true,
                            primary_status: Some(PrimaryStatus {
                                executed_gtid_set: String::new(),
                            }),
                            replica_status: None,
                            global_variable_status: Some(GlobalVariableStatus {
                                read_only: false,
                                super_read_only: false,
                                rpl_semi_sync_master_wait_for_slave_count: 0,
                            }),
                            clone_state_status: None,
                            all_relay_log_executed: true,
                        }
                    }
                })
                .collect()
        }

        async fn set_wait_for_slave_count(
            &self,
            _token: &CancellationToken,
            _index: usize,
            _endpoint: &InstanceEndpoint,
            _count: i64,
        ) -> Result<()> {
            Ok(())
        }

        async fn stop_slave(
            &self,
            _token: &CancellationToken,
            _index: usize,
            _endpoint: &InstanceEndpoint,
        ) -> Result<()> {
            Ok(())
        }

        async fn start_slave(
            &self,
            _token: &CancellationToken,
            _index: usize,
            _endpoint: &InstanceEndpoint,
        ) -> Result<()> {
            Ok(())
        }

        async fn change_master(
            &self,
            _token: &CancellationToken,
            _index: usize,
            _endpoint: &InstanceEndpoint,
            _primary_host: &str,
            _primary_port: u16,
            _replicator_user: &str,
            _replicator_password: &SecretString,
        ) -> Result<()> {
            Ok(())
        }

        async fn turn_off_read_only(
            &self,
            _token: &CancellationToken,
            _index: usize,
            _endpoint: &InstanceEndpoint,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unavailable_instance_short_circuits_to_failure() {
        let spec = ClusterSpec {
            name: "down".to_string(),
            namespace: "ns".to_string(),
            replicas: 2,
            replication_source_secret_name: None,
        };
        let endpoints = vec![
            InstanceEndpoint {
                host: spec.canonical_host(0),
                port: 3306,
                user: "operator".to_string(),
                password: SecretString::from("pw".to_string()),
            },
            InstanceEndpoint {
                host: spec.canonical_host(1),
                port: 3306,
                user: "operator".to_string(),
                password: SecretString::from("pw".to_string()),
            },
        ];
        let mysql = OneDownMySQL;
        let client = MemoryClient::new();
        let token = CancellationToken::new();
        let replicator_password = SecretString::from("replicator-pw".to_string());
        let inputs = TickInputs {
            spec: &spec,
            endpoints: &endpoints,
            replicator_user: "replicator",
            replicator_password: &replicator_password,
        };

        let requeue = reconcile(&token, &mysql, &client, &inputs).await.unwrap();
        assert_eq!(requeue, RequeueAfter::Idle);

        let status = client.get_status("ns", "down").await.unwrap();
        assert!(status.is_true(crate::model::ConditionType::Failure));
        assert!(!status.is_true(crate::model::ConditionType::Available));
        assert_eq!(status.current_primary_index, None);
        assert_eq!(
            status.condition(crate::model::ConditionType::Failure).unwrap().message.as_deref(),
            Some("unavailable host exists")
        );
    }
}
