//! Status aggregator (component B): turns per-instance reads into a
//! typed [`ClusterSnapshot`], including `Latest` and intermediate-primary
//! resolution.

use crate::client::Client;
use crate::gtid;
use crate::model::{ClusterSnapshot, ClusterSpec, IntermediatePrimaryOptions};
use crate::mysql_service::{InstanceEndpoint, MySQLService};
use secrecy::SecretString;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Exactly the four keys a valid intermediate-primary secret may carry.
const REQUIRED_KEYS: [&str; 4] = ["PRIMARY_HOST", "PRIMARY_PORT", "PRIMARY_USER", "PRIMARY_PASSWORD"];

/// Gather instance snapshots, compute `Latest`, and resolve the optional
/// intermediate-primary options, per §4.B.
#[instrument(skip_all, fields(namespace = %spec.namespace, name = %spec.name))]
pub async fn aggregate(
    token: &CancellationToken,
    mysql: &dyn MySQLService,
    client: &dyn Client,
    spec: &ClusterSpec,
    endpoints: &[InstanceEndpoint],
) -> ClusterSnapshot {
    let instance_status = mysql.get_instance_snapshots(token, endpoints).await;

    let latest = gtid::latest(
        instance_status
            .iter()
            .map(|is| is.primary_status.as_ref().map(|p| p.executed_gtid_set.as_str())),
    )
    .ok();

    let intermediate_primary_options = match &spec.replication_source_secret_name {
        Some(secret_name) => resolve_intermediate_primary(client, &spec.namespace, secret_name).await,
        None => None,
    };

    ClusterSnapshot {
        instance_status,
        latest,
        intermediate_primary_options,
    }
}

/// Returns `None` whenever the referenced secret's key set is not exactly
/// `{PRIMARY_HOST, PRIMARY_PORT, PRIMARY_USER, PRIMARY_PASSWORD}`, or its
/// port does not parse as a decimal integer in `[1, 65535]`, per §4.B /
/// §6 / S6.
async fn resolve_intermediate_primary(
    client: &dyn Client,
    namespace: &str,
    secret_name: &str,
) -> Option<IntermediatePrimaryOptions> {
    let secret = client.get_secret(namespace, secret_name).await.ok()?;

    let keys: HashSet<&str> = secret.keys();
    let required: HashSet<&str> = REQUIRED_KEYS.into_iter().collect();
    if keys != required {
        return None;
    }

    let primary_host = secret.get_string("PRIMARY_HOST")?;
    let primary_port: u16 = secret.get_string("PRIMARY_PORT")?.parse().ok().filter(|&p| p != 0)?;
    let primary_user = secret.get_string("PRIMARY_USER")?;
    let primary_password: SecretString = secret.get_secret("PRIMARY_PASSWORD")?;

    Some(IntermediatePrimaryOptions {
        primary_host,
        primary_port,
        primary_user,
        primary_password,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::client::{MemoryClient, Secret};
    use crate::error::Result;
    use crate::model::InstanceSnapshot;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FakeMySQL {
        snapshots: Vec<InstanceSnapshot>,
    }

    #[async_trait]
    impl MySQLService for FakeMySQL {
        async fn get_instance_snapshots(
            &self,
            _token: &CancellationToken,
            _endpoints: &[InstanceEndpoint],
        ) -> Vec<InstanceSnapshot> {
            self.snapshots.clone()
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

    fn spec(secret_name: Option<&str>) -> ClusterSpec {
        ClusterSpec {
            name: "test".to_string(),
            namespace: "ns".to_string(),
            replicas: 1,
            replication_source_secret_name: secret_name.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn aggregate_computes_latest_from_instance_snapshots() {
        use crate::model::PrimaryStatus;

        let mysql = FakeMySQL {
            snapshots: vec![
                InstanceSnapshot {
                    available: true,
                    primary_status: Some(PrimaryStatus {
                        executed_gtid_set: String::new(),
                    }),
                    ..InstanceSnapshot::unavailable()
                },
                InstanceSnapshot {
                    available: true,
                    primary_status: Some(PrimaryStatus {
                        executed_gtid_set: String::new(),
                    }),
                    ..InstanceSnapshot::unavailable()
                },
            ],
        };
        let client = MemoryClient::new();
        let token = CancellationToken::new();
        let snapshot = aggregate(&token, &mysql, &client, &spec(None), &[]).await;
        assert_eq!(snapshot.latest, Some(0));
    }

    #[tokio::test]
    async fn aggregate_resolves_valid_intermediate_primary_secret() {
        let client = MemoryClient::new();
        let mut fields = HashMap::new();
        fields.insert("PRIMARY_HOST".to_string(), b"dummy-primary".to_vec());
        fields.insert("PRIMARY_PORT".to_string(), b"3306".to_vec());
        fields.insert("PRIMARY_USER".to_string(), b"dummy-user".to_vec());
        fields.insert("PRIMARY_PASSWORD".to_string(), b"dummy-password".to_vec());
        client.put_secret("ns", "upstream", Secret::new(fields)).await;

        let mysql = FakeMySQL { snapshots: vec![] };
        let token = CancellationToken::new();
        let snapshot = aggregate(&token, &mysql, &client, &spec(Some("upstream")), &[]).await;

        let options = snapshot.intermediate_primary_options.unwrap();
        assert_eq!(options.primary_host, "dummy-primary");
        assert_eq!(options.primary_port, 3306);
    }

    #[tokio::test]
    async fn aggregate_rejects_secret_with_extra_key() {
        let client = MemoryClient::new();
        let mut fields = HashMap::new();
        fields.insert("PRIMARY_HOST".to_string(), b"dummy-primary".to_vec());
        fields.insert("PRIMARY_PORT".to_string(), b"3306".to_vec());
        fields.insert("INVALID_OPTION".to_string(), b"x".to_vec());
        client.put_secret("ns", "upstream", Secret::new(fields)).await;

        let mysql = FakeMySQL { snapshots: vec![] };
        let token = CancellationToken::new();
        let snapshot = aggregate(&token, &mysql, &client, &spec(Some("upstream")), &[]).await;
        assert!(snapshot.intermediate_primary_options.is_none());
    }

    #[tokio::test]
    async fn aggregate_rejects_secret_missing_keys() {
        let client = MemoryClient::new();
        let mut fields = HashMap::new();
        fields.insert("PRIMARY_PORT".to_string(), b"3306".to_vec());
        client.put_secret("ns", "upstream", Secret::new(fields)).await;

        let mysql = FakeMySQL { snapshots: vec![] };
        let token = CancellationToken::new();
        let snapshot = aggregate(&token, &mysql, &client, &spec(Some("upstream")), &[]).await;
        assert!(snapshot.intermediate_primary_options.is_none());
    }

    #[tokio::test]
    async fn aggregate_rejects_port_zero() {
        let client = MemoryClient::new();
        let mut fields = HashMap::new();
        fields.insert("PRIMARY_HOST".to_string(), b"dummy-primary".to_vec());
        fields.insert("PRIMARY_PORT".to_string(), b"0".to_vec());
        fields.insert("PRIMARY_USER".to_string(), b"dummy-user".to_vec());
        fields.insert("PRIMARY_PASSWORD".to_string(), b"dummy-password".to_vec());
        client.put_secret("ns", "upstream", Secret::new(fields)).await;

        let mysql = FakeMySQL { snapshots: vec![] };
        let token = CancellationToken::new();
        let snapshot = aggregate(&token, &mysql, &client, &spec(Some("upstream")), &[]).await;
        assert!(snapshot.intermediate_primary_options.is_none());
    }
}
