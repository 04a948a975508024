//! # Session Errors
//!
//! All failures an optimization session can surface. Missing metadata is
//! never an error (queries return `None` for unknown values); everything
//! here is either a hard invariant violation or a terminal session outcome.

use crate::rel::SubsetId;

/// Errors raised by the optimizer core.
#[derive(Debug, thiserror::Error)]
pub enum OptError {
    /// A rule's action failed. Fatal to the session unless the driver is
    /// configured to continue past rule errors.
    #[error("rule '{rule}' failed: {source}")]
    Rule {
        rule: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The target subset has no feasible complete plan.
    #[error("no feasible plan found for {subset}")]
    NoPlanFound { subset: SubsetId },

    /// An enforcer refused to materialize a trait on some axis.
    #[error("cannot enforce {axis} trait: no conversion from {from} to {to}")]
    InfeasibleConversion {
        axis: &'static str,
        from: String,
        to: String,
    },

    /// The driver stopped on a cancellation request before any plan existed.
    #[error("optimization cancelled")]
    Cancelled,

    /// An internal invariant was violated. Always fatal; the message carries
    /// a memo diagnostic dump.
    #[error("invalid optimizer state: {0}")]
    InvalidState(String),
}
