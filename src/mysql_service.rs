//! The `MySQLService` collaborator (§6): executes SQL primitives against
//! an indexed instance. The reconcile loop never opens a connection
//! itself — it only calls through this trait, so tests can substitute a
//! fake implementation.

use crate::error::{ControllerError, Result};
use crate::gtid::GtidSet;
use crate::model::{
    CloneStateStatus, ClusterSpec, GlobalVariableStatus, InstanceSnapshot, PrimaryStatus,
    ReplicaStatus,
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{ConnectOptions, MySqlPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

/// Per-instance connection coordinates. The DSN's host/port identify the
/// pool-cache key from §5; credentials are never logged.
#[derive(Debug, Clone)]
pub struct InstanceEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
}

/// Consumed collaborator executing MySQL primitives against one instance
/// of the cluster at a time, indexed 0..N-1.
#[async_trait]
pub trait MySQLService: Send + Sync {
    /// Aggregate status for every configured instance. Never fails —
    /// unreachable instances surface as `Available = false` in the
    /// returned snapshots, one per index.
    async fn get_instance_snapshots(
        &self,
        token: &CancellationToken,
        endpoints: &[InstanceEndpoint],
    ) -> Vec<InstanceSnapshot>;

    async fn set_wait_for_slave_count(
        &self,
        token: &CancellationToken,
        index: usize,
        endpoint: &InstanceEndpoint,
        count: i64,
    ) -> Result<()>;

    async fn stop_slave(
        &self,
        token: &CancellationToken,
        index: usize,
        endpoint: &InstanceEndpoint,
    ) -> Result<()>;

    async fn start_slave(
        &self,
        token: &CancellationToken,
        index: usize,
        endpoint: &InstanceEndpoint,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn change_master(
        &self,
        token: &CancellationToken,
        index: usize,
        endpoint: &InstanceEndpoint,
        primary_host: &str,
        primary_port: u16,
        replicator_user: &str,
        replicator_password: &SecretString,
    ) -> Result<()>;

    async fn turn_off_read_only(
        &self,
        token: &CancellationToken,
        index: usize,
        endpoint: &InstanceEndpoint,
    ) -> Result<()>;
}

/// Maximum lifetime for a pooled connection, so the pool survives node
/// rotations underneath it (§5).
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// `sqlx`-backed implementation, pooling one `MySqlPool` per `(host,
/// port)` the way the teacher's `collectors::util` caches one pool per
/// database name, generalized to a per-endpoint cache.
#[derive(Clone, Default)]
pub struct SqlxMySQLService {
    pools: Arc<RwLock<HashMap<(String, u16), MySqlPool>>>,
}

impl SqlxMySQLService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn pool_for(&self, endpoint: &InstanceEndpoint) -> Result<MySqlPool> {
        let key = (endpoint.host.clone(), endpoint.port);
        if let Some(pool) = self.pools.read().await.get(&key) {
            return Ok(pool.clone());
        }

        let options = MySqlConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .username(&endpoint.user)
            .password(endpoint.password.expose_secret())
            .database("mysql")
            .disable_statement_logging();

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .max_lifetime(POOL_MAX_LIFETIME)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|source| ControllerError::DataPlane { index: 0, source })?;

        self.pools.write().await.insert(key, pool.clone());
        Ok(pool)
    }

    #[instrument(skip(self, pool), level = "debug", fields(sub = "master_status"))]
    async fn read_primary_status(&self, pool: &MySqlPool) -> Option<PrimaryStatus> {
        let span = info_span!(
            "db.query",
            db.system = "mysql",
            db.operation = "SHOW",
            db.statement = "SHOW MASTER STATUS",
            otel.kind = "client"
        );
        let row = sqlx::query("SHOW MASTER STATUS")
            .fetch_optional(pool)
            .instrument(span)
            .await
            .ok()
            .flatten()?;

        let executed: Option<String> = row.try_get("Executed_Gtid_Set").ok();
        Some(PrimaryStatus {
            executed_gtid_set: executed.unwrap_or_default(),
        })
    }

    #[instrument(skip(self, pool), level = "debug", fields(sub = "slave_status"))]
    async fn read_replica_status(&self, pool: &MySqlPool) -> Option<ReplicaStatus> {
        let span = info_span!(
            "db.query",
            db.system = "mysql",
            db.operation = "SHOW",
            db.statement = "SHOW SLAVE STATUS",
            otel.kind = "client"
        );
        let row = sqlx::query("SHOW SLAVE STATUS")
            .fetch_optional(pool)
            .instrument(span)
            .await
            .ok()
            .flatten()?;

        Some(replica_status_from_row(&row))
    }

    #[instrument(skip(self, pool), level = "debug", fields(sub = "global_variables"))]
    async fn read_global_variables(&self, pool: &MySqlPool) -> Option<GlobalVariableStatus> {
        let span = info_span!(
            "db.query",
            db.system = "mysql",
            db.operation = "SELECT",
            db.statement = "SELECT @@read_only, @@super_read_only, @@rpl_semi_sync_master_wait_for_slave_count",
            otel.kind = "client"
        );
        let row = sqlx::query(
            "SELECT @@read_only AS read_only, @@super_read_only AS super_read_only, \
             @@rpl_semi_sync_master_wait_for_slave_count AS wait_count",
        )
        .fetch_optional(pool)
        .instrument(span)
        .await
        .ok()
        .flatten()?;

        let read_only: i64 = row.try_get("read_only").ok()?;
        let super_read_only: i64 = row.try_get("super_read_only").ok()?;
        let wait_count: i64 = row.try_get("wait_count").unwrap_or_default();

        Some(GlobalVariableStatus {
            read_only: read_only != 0,
            super_read_only: super_read_only != 0,
            rpl_semi_sync_master_wait_for_slave_count: wait_count,
        })
    }

    #[instrument(skip(self, pool), level = "debug", fields(sub = "clone_state"))]
    async fn read_clone_state(&self, pool: &MySqlPool) -> Option<CloneStateStatus> {
        let span = info_span!(
            "db.query",
            db.system = "mysql",
            db.operation = "SELECT",
            db.statement = "SELECT state FROM performance_schema.clone_status",
            otel.kind = "client"
        );
        let row = sqlx::query("SELECT state FROM performance_schema.clone_status")
            .fetch_optional(pool)
            .instrument(span)
            .await
            .ok()
            .flatten()?;

        let state: Option<String> = row.try_get("state").ok();
        Some(CloneStateStatus { state })
    }
}

/// `RetrievedGtidSet ⊆ ExecutedGtidSet` under §4.A's subset arithmetic
/// (an empty retrieved set is trivially a subset of anything). A
/// malformed GTID string on either side cannot be meaningfully compared,
/// so it is treated as not-yet-executed rather than assumed caught up.
fn relay_log_executed(replica: &ReplicaStatus) -> bool {
    let Ok(retrieved) = GtidSet::parse(&replica.retrieved_gtid_set) else {
        return false;
    };
    let Ok(executed) = GtidSet::parse(&replica.executed_gtid_set) else {
        return false;
    };
    retrieved.is_subset_of(&executed)
}

fn replica_status_from_row(row: &MySqlRow) -> ReplicaStatus {
    let last_io_errno: i64 = row.try_get("Last_IO_Errno").unwrap_or_default();
    let last_sql_errno: i64 = row.try_get("Last_SQL_Errno").unwrap_or_default();
    let last_io_error: Option<String> = row.try_get("Last_IO_Error").ok();
    let last_sql_error: Option<String> = row.try_get("Last_SQL_Error").ok();
    let master_host: String = row.try_get("Master_Host").unwrap_or_default();
    let retrieved_gtid_set: String = row.try_get("Retrieved_Gtid_Set").unwrap_or_default();
    let executed_gtid_set: String = row.try_get("Executed_Gtid_Set").unwrap_or_default();
    let io_running: Option<String> = row.try_get("Slave_IO_Running").ok();
    let sql_running: Option<String> = row.try_get("Slave_SQL_Running").ok();

    ReplicaStatus {
        last_io_errno,
        last_io_error,
        last_sql_errno,
        last_sql_error,
        master_host,
        retrieved_gtid_set,
        executed_gtid_set,
        slave_io_running: io_running.as_deref() == Some("Yes"),
        slave_sql_running: sql_running.as_deref() == Some("Yes"),
    }
}

#[async_trait]
impl MySQLService for SqlxMySQLService {
    #[instrument(skip(self, token, endpoints), level = "info")]
    async fn get_instance_snapshots(
        &self,
        token: &CancellationToken,
        endpoints: &[InstanceEndpoint],
    ) -> Vec<InstanceSnapshot> {
        let mut snapshots = Vec::with_capacity(endpoints.len());

        for (index, endpoint) in endpoints.iter().enumerate() {
            if token.is_cancelled() {
                snapshots.push(InstanceSnapshot::unavailable());
                continue;
            }

            let Ok(pool) = self.pool_for(endpoint).await else {
                debug!(index, "instance unreachable; marking unavailable");
                snapshots.push(InstanceSnapshot::unavailable());
                continue;
            };

            let (primary_status, replica_status, global_variable_status, clone_state_status) = tokio::join!(
                self.read_primary_status(&pool),
                self.read_replica_status(&pool),
                self.read_global_variables(&pool),
                self.read_clone_state(&pool),
            );

            let all_relay_log_executed = replica_status.as_ref().is_none_or(relay_log_executed);

            let available = global_variable_status.is_some();

            snapshots.push(InstanceSnapshot {
                available,
                primary_status,
                replica_status,
                global_variable_status,
                clone_state_status,
                all_relay_log_executed,
            });
        }

        snapshots
    }

    #[instrument(skip(self, token, endpoint), level = "info", err)]
    async fn set_wait_for_slave_count(
        &self,
        token: &CancellationToken,
        index: usize,
        endpoint: &InstanceEndpoint,
        count: i64,
    ) -> Result<()> {
        if token.is_cancelled() {
            return Err(ControllerError::Cancelled);
        }
        let pool = self.pool_for(endpoint).await?;
        timed_exec(
            &pool,
            &format!("SET GLOBAL rpl_semi_sync_master_wait_for_slave_count = {count}"),
            index,
        )
        .await
    }

    #[instrument(skip(self, token, endpoint), level = "info", err)]
    async fn stop_slave(
        &self,
        token: &CancellationToken,
        index: usize,
        endpoint: &InstanceEndpoint,
    ) -> Result<()> {
        if token.is_cancelled() {
            return Err(ControllerError::Cancelled);
        }
        let pool = self.pool_for(endpoint).await?;
        timed_exec(&pool, "STOP SLAVE", index).await
    }

    #[instrument(skip(self, token, endpoint), level = "info", err)]
    async fn start_slave(
        &self,
        token: &CancellationToken,
        index: usize,
        endpoint: &InstanceEndpoint,
    ) -> Result<()> {
        if token.is_cancelled() {
            return Err(ControllerError::Cancelled);
        }
        let pool = self.pool_for(endpoint).await?;
        timed_exec(&pool, "START SLAVE", index).await
    }

    #[instrument(skip(self, token, endpoint, replicator_password), level = "info", err)]
    async fn change_master(
        &self,
        token: &CancellationToken,
        index: usize,
        endpoint: &InstanceEndpoint,
        primary_host: &str,
        primary_port: u16,
        replicator_user: &str,
        replicator_password: &SecretString,
    ) -> Result<()> {
        if token.is_cancelled() {
            return Err(ControllerError::Cancelled);
        }
        let pool = self.pool_for(endpoint).await?;

        let span = info_span!(
            "db.query",
            db.system = "mysql",
            db.operation = "CHANGE MASTER TO",
            otel.kind = "client"
        );

        tokio::time::timeout(
            QUERY_TIMEOUT,
            sqlx::query("CHANGE MASTER TO MASTER_HOST = ?, MASTER_PORT = ?, MASTER_USER = ?, MASTER_PASSWORD = ?")
                .bind(primary_host)
                .bind(primary_port)
                .bind(replicator_user)
                .bind(replicator_password.expose_secret())
                .execute(&pool)
                .instrument(span),
        )
        .await
        .map_err(|_| ControllerError::ControlPlane("CHANGE MASTER TO timed out".to_string()))?
        .map_err(|source| ControllerError::DataPlane { index, source })?;

        Ok(())
    }

    #[instrument(skip(self, token, endpoint), level = "info", err)]
    async fn turn_off_read_only(
        &self,
        token: &CancellationToken,
        index: usize,
        endpoint: &InstanceEndpoint,
    ) -> Result<()> {
        if token.is_cancelled() {
            return Err(ControllerError::Cancelled);
        }
        let pool = self.pool_for(endpoint).await?;
        timed_exec(&pool, "SET GLOBAL super_read_only = OFF", index).await?;
        timed_exec(&pool, "SET GLOBAL read_only = OFF", index).await
    }
}

async fn timed_exec(pool: &MySqlPool, statement: &str, index: usize) -> Result<()> {
    let span = info_span!(
        "db.query",
        db.system = "mysql",
        db.operation = "EXEC",
        db.statement = statement,
        otel.kind = "client"
    );

    tokio::time::timeout(QUERY_TIMEOUT, sqlx::query(statement).execute(pool).instrument(span))
        .await
        .map_err(|_| ControllerError::ControlPlane(format!("{statement} timed out")))?
        .map_err(|source| ControllerError::DataPlane { index, source })?;

    Ok(())
}

/// Build the canonical endpoint list for a cluster spec, given the
/// per-instance port (every instance shares the same port in this
/// deployment model) and the operator credential used for reconnection.
#[must_use]
pub fn endpoints_for(
    spec: &ClusterSpec,
    port: u16,
    user: &str,
    password: &SecretString,
) -> Vec<InstanceEndpoint> {
    (0..spec.replicas as usize)
        .map(|index| InstanceEndpoint {
            host: spec.canonical_host(index),
            port,
            user: user.to_string(),
            password: password.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::relay_log_executed;
    use crate::model::ReplicaStatus;

    const UUID_A: &str = "3E11FA47-71CA-11E1-9E33-C80AA9429562";

    fn replica(retrieved: &str, executed: &str) -> ReplicaStatus {
        ReplicaStatus {
            last_io_errno: 0,
            last_io_error: None,
            last_sql_errno: 0,
            last_sql_error: None,
            master_host: "primary-host".to_string(),
            retrieved_gtid_set: retrieved.to_string(),
            executed_gtid_set: executed.to_string(),
            slave_io_running: true,
            slave_sql_running: true,
        }
    }

    #[test]
    fn empty_retrieved_set_is_trivially_executed() {
        assert!(relay_log_executed(&replica("", &format!("{UUID_A}:1-10"))));
    }

    #[test]
    fn strict_subset_is_executed() {
        assert!(relay_log_executed(&replica(
            &format!("{UUID_A}:1-5"),
            &format!("{UUID_A}:1-10")
        )));
    }

    #[test]
    fn retrieved_ahead_of_executed_is_not_executed() {
        assert!(!relay_log_executed(&replica(
            &format!("{UUID_A}:1-10"),
            &format!("{UUID_A}:1-5")
        )));
    }

    #[test]
    fn malformed_gtid_is_not_executed() {
        assert!(!relay_log_executed(&replica("not-a-gtid", "also-not-one")));
    }
}
