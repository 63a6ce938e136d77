//! The action the dispatched command asks the runtime to perform, and
//! its handler — mirrors the teacher's `Action::Run` / `handle` split,
//! generalized from a single exporter action to one that knows how to
//! run a tick once or loop until cancelled.

use crate::client::{Client, MemoryClient};
use crate::config::RuntimeConfig;
use crate::mysql_service::{endpoints_for, MySQLService, SqlxMySQLService};
use crate::reconcile::{self, RequeueAfter, TickInputs};
use crate::scheduler::{Clock, ClusterLocks, TokioClock};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone)]
pub enum Action {
    Execute(RuntimeConfig),
}

/// # Errors
///
/// Returns an error if a tick fails with a non-recoverable error, or if
/// the status store cannot be read/written.
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Execute(config) => run(config).await,
    }
}

async fn run(config: RuntimeConfig) -> Result<()> {
    let mysql: Arc<dyn MySQLService> = Arc::new(SqlxMySQLService::new());
    let client: Arc<dyn Client> = Arc::new(MemoryClient::new());
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let locks = ClusterLocks::new();
    let token = CancellationToken::new();

    let endpoints = endpoints_for(
        &config.spec,
        config.port,
        &config.operator_user,
        &config.operator_password,
    );

    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let cluster_key = (config.spec.namespace.clone(), config.spec.name.clone());

    loop {
        // §5: at most one tick per cluster at a time; a tick for this
        // cluster's key waits behind any prior tick still holding the
        // guard before starting. The guard is released once the tick
        // itself completes, not held through the idle/requeue delay.
        let requeue = {
            let guard = locks.acquire(cluster_key.clone()).await;
            let _held = guard.lock().await;

            let inputs = TickInputs {
                spec: &config.spec,
                endpoints: &endpoints,
                replicator_user: &config.replicator_user,
                replicator_password: &config.replicator_password,
            };

            reconcile::reconcile(&token, mysql.as_ref(), client.as_ref(), &inputs).await?
        };

        if config.once {
            info!(?requeue, "ran a single tick, exiting");
            return Ok(());
        }

        if token.is_cancelled() {
            info!("shutdown requested, exiting run loop");
            return Ok(());
        }

        let delay = match requeue {
            RequeueAfter::Delay(duration) => duration,
            RequeueAfter::Idle => config.idle_poll_interval,
        };

        tokio::select! {
            () = clock.sleep(delay) => {}
            () = token.cancelled() => {
                info!("shutdown requested during requeue delay, exiting run loop");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::model::ClusterSpec;
    use secrecy::SecretString;

    #[test]
    fn execute_action_carries_config() {
        let config = RuntimeConfig {
            spec: ClusterSpec {
                name: "test".to_string(),
                namespace: "ns".to_string(),
                replicas: 1,
                replication_source_secret_name: None,
            },
            port: 3306,
            operator_user: "operator".to_string(),
            operator_password: SecretString::from("pw".to_string()),
            replicator_user: "replicator".to_string(),
            replicator_password: SecretString::from("pw".to_string()),
            once: true,
            idle_poll_interval: std::time::Duration::from_secs(30),
        };

        let action = Action::Execute(config);
        match action {
            Action::Execute(config) => assert!(config.once),
        }
    }
}
