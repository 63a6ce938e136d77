//! The data model shared across components: cluster spec/status (the
//! control-plane documents) and the per-tick instance/cluster snapshot
//! produced by the status aggregator.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use std::collections::BTreeMap;

/// Immutable-per-tick cluster specification (input).
#[derive(Debug, Clone)]
pub struct ClusterSpec {
    pub name: String,
    pub namespace: String,
    /// Expected instance count; must be positive.
    pub replicas: u32,
    /// Reference to external replication-source credentials; presence
    /// enables intermediate-primary mode.
    pub replication_source_secret_name: Option<String>,
}

impl ClusterSpec {
    /// The name shared by every instance's canonical hostname, e.g.
    /// `"<namespace>-<name>"` in the teacher's pod-naming convention
    /// generalized from MOCO's `uniqueName(cluster)` helper.
    #[must_use]
    pub fn unique_name(&self) -> String {
        format!("{}-{}", self.namespace, self.name)
    }

    /// Canonical hostname of the instance at `index`, per the GLOSSARY.
    #[must_use]
    pub fn canonical_host(&self, index: usize) -> String {
        let unique = self.unique_name();
        format!("{unique}-{index}.{unique}.{}.svc", self.namespace)
    }
}

/// A typed condition on the cluster status document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ConditionType {
    Failure,
    Violation,
    Available,
    Healthy,
    OutOfSync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct Condition {
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

/// Cluster status (output), owned exclusively by the reconcile loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterStatus {
    pub current_primary_index: Option<usize>,
    pub conditions: BTreeMap<ConditionType, Condition>,
}

impl ClusterStatus {
    #[must_use]
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions.get(&condition_type)
    }

    #[must_use]
    pub fn is_true(&self, condition_type: ConditionType) -> bool {
        matches!(
            self.condition(condition_type).map(|c| c.status),
            Some(ConditionStatus::True)
        )
    }

    /// Rendered for structured log lines; never fails since every field
    /// is a plain enum, option, or timestamp.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// `SHOW MASTER STATUS` fields relevant to primary-side snapshotting.
#[derive(Debug, Clone)]
pub struct PrimaryStatus {
    pub executed_gtid_set: String,
}

/// `SHOW SLAVE STATUS` fields.
#[derive(Debug, Clone)]
pub struct ReplicaStatus {
    pub last_io_errno: i64,
    pub last_io_error: Option<String>,
    pub last_sql_errno: i64,
    pub last_sql_error: Option<String>,
    pub master_host: String,
    pub retrieved_gtid_set: String,
    pub executed_gtid_set: String,
    pub slave_io_running: bool,
    pub slave_sql_running: bool,
}

/// The three global variables the engine reads and writes each tick.
#[derive(Debug, Clone, Copy)]
pub struct GlobalVariableStatus {
    pub read_only: bool,
    pub super_read_only: bool,
    pub rpl_semi_sync_master_wait_for_slave_count: i64,
}

#[derive(Debug, Clone)]
pub struct CloneStateStatus {
    pub state: Option<String>,
}

/// One instance's status, as seen at the start of a tick.
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub available: bool,
    pub primary_status: Option<PrimaryStatus>,
    pub replica_status: Option<ReplicaStatus>,
    pub global_variable_status: Option<GlobalVariableStatus>,
    pub clone_state_status: Option<CloneStateStatus>,
    pub all_relay_log_executed: bool,
}

impl InstanceSnapshot {
    /// An instance that could not be queried at all this tick.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            available: false,
            primary_status: None,
            replica_status: None,
            global_variable_status: None,
            clone_state_status: None,
            all_relay_log_executed: false,
        }
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.global_variable_status.is_some_and(|g| !g.read_only)
    }
}

/// Credentials for an external upstream in intermediate-primary mode.
#[derive(Debug, Clone)]
pub struct IntermediatePrimaryOptions {
    pub primary_host: String,
    pub primary_port: u16,
    pub primary_user: String,
    pub primary_password: SecretString,
}

impl PartialEq for IntermediatePrimaryOptions {
    fn eq(&self, other: &Self) -> bool {
        self.primary_host == other.primary_host
            && self.primary_port == other.primary_port
            && self.primary_user == other.primary_user
    }
}

/// The aggregated view of the whole cluster for one tick.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub instance_status: Vec<InstanceSnapshot>,
    /// Index of the most-advanced instance by GTID, when determinable.
    pub latest: Option<usize>,
    pub intermediate_primary_options: Option<IntermediatePrimaryOptions>,
}

impl ClusterSnapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.instance_status.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instance_status.is_empty()
    }

    #[must_use]
    pub fn writable_indices(&self) -> Vec<usize> {
        self.instance_status
            .iter()
            .enumerate()
            .filter(|(_, is)| is.is_writable())
            .map(|(i, _)| i)
            .collect()
    }
}
