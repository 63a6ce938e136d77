//! Turns parsed `ArgMatches` into a typed [`Action`], the way the
//! teacher's dispatch module turns matches into its own `Action::Run`.

use crate::cli::actions::Action;
use crate::config::RuntimeConfig;
use anyhow::Result;
use clap::ArgMatches;

/// # Errors
///
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let config = RuntimeConfig::from_matches(matches)?;
    Ok(Action::Execute(config))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::cli::commands;

    #[test]
    fn handler_builds_execute_action() {
        let matches = commands::new().get_matches_from(vec![
            "mysql-cluster-controller",
            "--namespace",
            "ns",
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
            "--once",
        ]);

        let action = handler(&matches).unwrap();
        match action {
            Action::Execute(config) => assert!(config.once),
        }
    }
}
