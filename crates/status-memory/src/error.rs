//! Error types for the in-memory status implementation.

use thiserror::Error;
use warden_status::{ClusterRole, StatusError, StatusErrorKind};

/// Error type for the in-memory status implementation.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The member exists but cannot currently be reached.
    #[error("member {0} is unreachable")]
    Unreachable(ClusterRole),

    /// No record was ever registered for the member.
    #[error("member {0} has not joined the cluster")]
    NotRegistered(ClusterRole),

    /// Asked for the data-holding peer of an identity that has none.
    #[error("{0} has no data-holding peer")]
    NoPeer(ClusterRole),
}

impl StatusError for Error {
    fn kind(&self) -> StatusErrorKind {
        match self {
            Self::Unreachable(_) => StatusErrorKind::Unreachable,
            Self::NotRegistered(_) | Self::NoPeer(_) => StatusErrorKind::Other,
        }
    }
}
