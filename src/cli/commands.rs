//! Builds the top-level `clap::Command`, matching the teacher's builder
//! idiom (`Command`/`Arg` rather than derive) for argument definitions
//! that need env fallbacks and custom value parsers.

use crate::built_info;
use clap::{value_parser, Arg, ArgAction, Command};

/// Long `--version` output: package version plus the git commit and
/// target triple captured at build time by `built_info`.
fn long_version() -> String {
    format!(
        "{}\ncommit: {}\ntarget: {}",
        built_info::PKG_VERSION,
        built_info::GIT_COMMIT_HASH_SHORT.unwrap_or("unknown"),
        built_info::TARGET,
    )
}

#[must_use]
pub fn new() -> Command {
    Command::new("mysql-cluster-controller")
        .about("Reconciles a replicated MySQL cluster toward a declarative spec")
        .version(built_info::PKG_VERSION)
        .long_version(long_version())
        .arg(
            Arg::new("namespace")
                .long("namespace")
                .env("CLUSTER_NAMESPACE")
                .help("Namespace the cluster belongs to")
                .required(true),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .env("CLUSTER_NAME")
                .help("Cluster name")
                .required(true),
        )
        .arg(
            Arg::new("replicas")
                .long("replicas")
                .env("CLUSTER_REPLICAS")
                .help("Expected instance count")
                .value_parser(value_parser!(u32))
                .required(true),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .env("CLUSTER_PORT")
                .help("MySQL port shared by every instance")
                .value_parser(value_parser!(u16))
                .default_value("3306"),
        )
        .arg(
            Arg::new("operator-user")
                .long("operator-user")
                .env("OPERATOR_USER")
                .help("User the controller connects as to read/administer instances")
                .required(true),
        )
        .arg(
            Arg::new("operator-password")
                .long("operator-password")
                .env("OPERATOR_PASSWORD")
                .help("Password for --operator-user")
                .required(true),
        )
        .arg(
            Arg::new("replicator-user")
                .long("replicator-user")
                .env("REPLICATOR_USER")
                .help("User replicas authenticate as against the primary")
                .required(true),
        )
        .arg(
            Arg::new("replicator-password")
                .long("replicator-password")
                .env("REPLICATOR_PASSWORD")
                .help("Password for --replicator-user")
                .required(true),
        )
        .arg(
            Arg::new("replication-source-secret-name")
                .long("replication-source-secret-name")
                .env("REPLICATION_SOURCE_SECRET_NAME")
                .help("Name of the secret carrying intermediate-primary credentials, if any"),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("Run a single tick and exit instead of looping")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("idle-poll-interval-secs")
                .long("idle-poll-interval-secs")
                .env("IDLE_POLL_INTERVAL_SECS")
                .help("Delay between ticks when the previous tick did not request a convergence requeue")
                .value_parser(value_parser!(u64))
                .default_value("30"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_args_are_enforced() {
        let result = new().try_get_matches_from(vec!["mysql-cluster-controller"]);
        assert!(result.is_err());
    }

    #[test]
    fn namespace_falls_back_to_env_var() {
        temp_env::with_var("CLUSTER_NAMESPACE", Some("from-env"), || {
            let matches = new().get_matches_from(vec![
                "mysql-cluster-controller",
                "--name",
                "prod",
                "--replicas",
                "1",
                "--operator-user",
                "operator",
                "--operator-password",
                "pw",
                "--replicator-user",
                "replicator",
                "--replicator-password",
                "pw",
            ]);
            assert_eq!(matches.get_one::<String>("namespace").map(String::as_str), Some("from-env"));
        });
    }

    #[test]
    fn port_defaults_to_3306() {
        let matches = new().get_matches_from(vec![
            "mysql-cluster-controller",
            "--namespace",
            "ns",
            "--name",
            "prod",
            "--replicas",
            "3",
            "--operator-user",
            "operator",
            "--operator-password",
            "pw",
            "--replicator-user",
            "replicator",
            "--replicator-password",
            "pw",
        ]);
        assert_eq!(matches.get_one::<u16>("port").copied(), Some(3306));
    }
}
