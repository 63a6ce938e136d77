//! Typed errors for the reconciliation engine.
//!
//! Every component function returns [`ControllerError`] so the reconcile
//! loop can match on the kind of failure instead of inspecting message
//! strings. See §7 of the design notes for the propagation policy each
//! variant implies.

use thiserror::Error;

/// Errors surfaced by the clustering reconciliation engine.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Transient control-plane failure: secret read, status read/write.
    #[error("control plane error: {0}")]
    ControlPlane(String),

    /// The status document changed between read and write; requeue and
    /// retry rather than overwrite a concurrent update.
    #[error("status update conflict for cluster {namespace}/{name}")]
    StatusConflict { namespace: String, name: String },

    /// Transient data-plane failure talking to a specific instance.
    #[error("mysql error on instance {index}: {source}")]
    DataPlane {
        index: usize,
        #[source]
        source: sqlx::Error,
    },

    /// A cluster-wide safety invariant does not hold.
    #[error("constraint violation: {0}")]
    Violation(String),

    /// GTID sets could not be ordered; human intervention required.
    #[error("cannot compare retrieved/executed GTIDs")]
    GtidInconsistent,

    /// A programmer invariant was breached (e.g. an empty snapshot reached
    /// the validator). Unrecoverable: the caller should abort the process.
    #[error("invariant breach: {0}")]
    Invariant(String),

    /// The reconcile loop was cancelled before completing the tick.
    #[error("reconcile cancelled")]
    Cancelled,
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    /// True for errors the reconcile loop should project as `Violation`
    /// rather than `Failure`.
    #[must_use]
    pub const fn is_violation(&self) -> bool {
        matches!(self, Self::Violation(_))
    }

    /// True for the one error kind that is never auto-recovered and always
    /// carries the literal GTID-inconsistency message.
    #[must_use]
    pub const fn is_gtid_inconsistent(&self) -> bool {
        matches!(self, Self::GtidInconsistent)
    }

    /// True for a breach that must abort the process rather than requeue.
    #[must_use]
    pub const fn is_invariant_breach(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}
