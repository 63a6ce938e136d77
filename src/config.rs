//! Runtime configuration for the CLI binary: parsed cluster spec,
//! connection credentials, and scheduling knobs. Grounded on the
//! teacher's `CollectorConfig` — a small, cloneable builder-style struct
//! assembled once from parsed CLI matches.

use crate::model::ClusterSpec;
use anyhow::{anyhow, Result};
use clap::ArgMatches;
use secrecy::SecretString;
use std::time::Duration;

/// Everything the CLI needs to run either a single tick or the `run`
/// loop, resolved once at startup from flags/env.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub spec: ClusterSpec,
    pub port: u16,
    pub operator_user: String,
    pub operator_password: SecretString,
    pub replicator_user: String,
    pub replicator_password: SecretString,
    /// Run a single tick and exit instead of looping.
    pub once: bool,
    /// How long to sleep between ticks when the previous tick did not
    /// itself request a convergence requeue.
    pub idle_poll_interval: Duration,
}

impl RuntimeConfig {
    /// # Errors
    ///
    /// Returns an error if a required argument is missing or malformed.
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let namespace = required_string(matches, "namespace")?;
        let name = required_string(matches, "name")?;
        let replicas: u32 = *matches
            .get_one::<u32>("replicas")
            .ok_or_else(|| anyhow!("--replicas is required"))?;
        let port = *matches
            .get_one::<u16>("port")
            .ok_or_else(|| anyhow!("--port is required"))?;

        let operator_user = required_string(matches, "operator-user")?;
        let operator_password = SecretString::from(required_string(matches, "operator-password")?);
        let replicator_user = required_string(matches, "replicator-user")?;
        let replicator_password = SecretString::from(required_string(matches, "replicator-password")?);

        let replication_source_secret_name = matches
            .get_one::<String>("replication-source-secret-name")
            .cloned();

        let once = matches.get_flag("once");
        let idle_poll_interval_secs = *matches
            .get_one::<u64>("idle-poll-interval-secs")
            .unwrap_or(&30);

        Ok(Self {
            spec: ClusterSpec {
                name,
                namespace,
                replicas,
                replication_source_secret_name,
            },
            port,
            operator_user,
            operator_password,
            replicator_user,
            replicator_password,
            once,
            idle_poll_interval: Duration::from_secs(idle_poll_interval_secs),
        })
    }
}

fn required_string(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .ok_or_else(|| anyhow!("--{id} is required"))
}
