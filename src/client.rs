//! The `Client` collaborator (§6): reads secrets and reads/writes cluster
//! status. The core never talks to a real control plane directly — it is
//! generic over this trait, the way the reconcile loop is generic over
//! [`crate::mysql_service::MySQLService`].

use crate::error::{ControllerError, Result};
use crate::model::ClusterStatus;
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;

/// Raw secret bytes keyed by field name, e.g. `PRIMARY_HOST`,
/// `PRIMARY_PASSWORD`. Values that look like credentials are only ever
/// exposed to callers through [`SecretString`].
#[derive(Debug, Clone, Default)]
pub struct Secret {
    fields: HashMap<String, Vec<u8>>,
}

impl Secret {
    #[must_use]
    pub fn new(fields: HashMap<String, Vec<u8>>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn keys(&self) -> std::collections::HashSet<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.fields
            .get(key)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    #[must_use]
    pub fn get_secret(&self, key: &str) -> Option<SecretString> {
        self.get_string(key).map(SecretString::from)
    }
}

/// Consumed collaborator: read secrets by `(namespace, name)`; read/update
/// the cluster status document.
#[async_trait]
pub trait Client: Send + Sync {
    /// Fetch a secret. Failure is a transient control-plane error.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    /// Read the current status document for a cluster.
    async fn get_status(&self, namespace: &str, name: &str) -> Result<ClusterStatus>;

    /// Write a new status document, failing with
    /// [`ControllerError::StatusConflict`] if `previous` no longer
    /// matches what is stored (optimistic concurrency).
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        previous: &ClusterStatus,
        next: ClusterStatus,
    ) -> Result<()>;
}

#[derive(Default, Clone)]
struct StoredStatus {
    status: ClusterStatus,
    /// Monotonic version bumped on every successful write; used to detect
    /// the conflicting-update case `update_status` must reject.
    version: u64,
}

/// An in-memory [`Client`], used both as a test double and as a minimal
/// standalone backing store for the CLI when no real control plane is
/// wired in. Grounded on the teacher's `RwLock`-backed process-global
/// caches in its connection-pool cache, generalized from a read-only
/// cache to a read/write, optimistic-concurrency status store.
#[derive(Default)]
pub struct MemoryClient {
    secrets: RwLock<HashMap<(String, String), Secret>>,
    statuses: RwLock<HashMap<(String, String), StoredStatus>>,
}

impl MemoryClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_secret(&self, namespace: &str, name: &str, secret: Secret) {
        self.secrets
            .write()
            .await
            .insert((namespace.to_string(), name.to_string()), secret);
    }
}

#[async_trait]
impl Client for MemoryClient {
    #[instrument(skip(self), level = "debug")]
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.secrets
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ControllerError::ControlPlane(format!("secret {namespace}/{name} not found")))
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_status(&self, namespace: &str, name: &str) -> Result<ClusterStatus> {
        Ok(self
            .statuses
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .map(|s| s.status.clone())
            .unwrap_or_default())
    }

    #[instrument(skip(self, previous, next), level = "debug")]
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        previous: &ClusterStatus,
        next: ClusterStatus,
    ) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut guard = self.statuses.write().await;
        let current_version = guard.get(&key).map(|s| s.version).unwrap_or(0);
        let previous_version = guard
            .get(&key)
            .filter(|s| conditions_match(&s.status, previous))
            .map(|s| s.version);

        if previous_version != Some(current_version) && guard.contains_key(&key) {
            return Err(ControllerError::StatusConflict {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }

        guard.insert(
            key,
            StoredStatus {
                status: next,
                version: current_version + 1,
            },
        );
        Ok(())
    }
}

fn conditions_match(a: &ClusterStatus, b: &ClusterStatus) -> bool {
    a.current_primary_index == b.current_primary_index && a.conditions.len() == b.conditions.len()
}

/// Shared handle to a client implementation, cheap to clone across tasks.
pub type SharedClient = Arc<dyn Client>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[tokio::test]
    async fn memory_client_round_trips_secrets() {
        let client = MemoryClient::new();
        let mut fields = HashMap::new();
        fields.insert("PRIMARY_HOST".to_string(), b"dummy-primary".to_vec());
        client.put_secret("ns", "sec", Secret::new(fields)).await;

        let secret = client.get_secret("ns", "sec").await.unwrap();
        assert_eq!(secret.get_string("PRIMARY_HOST").as_deref(), Some("dummy-primary"));
    }

    #[tokio::test]
    async fn memory_client_missing_secret_is_control_plane_error() {
        let client = MemoryClient::new();
        let err = client.get_secret("ns", "missing").await.unwrap_err();
        assert!(matches!(err, ControllerError::ControlPlane(_)));
    }

    #[tokio::test]
    async fn memory_client_status_round_trips() {
        let client = MemoryClient::new();
        let status = client.get_status("ns", "cluster").await.unwrap();
        assert!(status.conditions.is_empty());

        let mut next = status.clone();
        next.current_primary_index = Some(1);
        client
            .update_status("ns", "cluster", &status, next)
            .await
            .unwrap();

        let updated = client.get_status("ns", "cluster").await.unwrap();
        assert_eq!(updated.current_primary_index, Some(1));
    }
}
