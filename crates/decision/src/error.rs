//! Error types for the decision engine.

use thiserror::Error;
use warden_status::DbRole;

/// Result type for decision engine operations.
pub type DecisionResult<T> = Result<T, Error>;

/// Decision engine error.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Cluster membership query failed for a reason other than reachability.
    #[error("membership error: {0}")]
    Membership(String),

    /// Status store read or write failed.
    #[error("status error: {0}")]
    Status(String),

    /// A role reached a decision point that cannot handle it.
    #[error("invariant violated: {context} reached with role {role}")]
    InvariantViolation {
        /// The offending role.
        role: DbRole,
        /// The decision point that rejected it.
        context: &'static str,
    },

    /// The executor stopped consuming commands.
    #[error("command channel closed")]
    CommandChannelClosed,

    /// The decision loop is no longer accepting advice.
    #[error("advice channel closed")]
    AdviceChannelClosed,
}

impl Error {
    /// Returns true if the decision loop must stop on this error.
    ///
    /// Everything else is retried on the next tick.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolation { .. } | Self::CommandChannelClosed
        )
    }

    pub(crate) const fn invariant(role: DbRole, context: &'static str) -> Self {
        Self::InvariantViolation { role, context }
    }
}
