//! MySQL cluster reconciliation engine: aggregates per-instance status,
//! selects and promotes a primary, drives replication topology changes,
//! and projects progress through conditions.
//!
//! The CLI binary (`src/main.rs`) is a thin driver over this library —
//! pod/StatefulSet provisioning, the gRPC agent, and Kubernetes RBAC are
//! external collaborators this crate does not implement.

pub mod aggregator;
#[allow(
    clippy::pedantic,
    clippy::unwrap_used,
    unused,
    clippy::needless_raw_string_hashes
)]
pub mod built_info;
pub mod cli;
pub mod client;
pub mod conditions;
pub mod config;
pub mod constraints;
pub mod error;
pub mod gtid;
pub mod model;
pub mod mysql_service;
pub mod primary_selector;
pub mod reconcile;
pub mod replication;
pub mod scheduler;
