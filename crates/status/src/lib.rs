//! Abstract interface for reading cluster membership and reading/writing
//! member status records.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod record;
mod role;

pub use record::{STATE_RUNNING, STATE_SLAVE_RUNNING, StatusRecord};
pub use role::{ClusterRole, DbRole, ParseRoleError};

use std::error::Error;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;

/// The kind of status error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StatusErrorKind {
    /// The requested member is not currently reachable.
    Unreachable,

    /// Error with the backing store or transport.
    External,

    /// Other/unknown error
    Other,
}

impl Display for StatusErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for `ClusterMembership` and `StatusStore` errors
pub trait StatusError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> StatusErrorKind;

    /// Returns true if the error only means a member is out of reach.
    fn is_unreachable(&self) -> bool {
        self.kind() == StatusErrorKind::Unreachable
    }
}

/// Source of cluster snapshots: the records of every member currently
/// reachable from this node, including this node itself.
#[async_trait]
pub trait ClusterMembership
where
    Self: Send + Sync + Clone + 'static,
{
    /// The error type for membership queries.
    type Error: StatusError;

    /// Records of all members reachable from this node, ordered by identity.
    async fn cluster(&self) -> Result<Vec<StatusRecord>, Self::Error>;

    /// The cluster as seen by another member.
    ///
    /// Fails with an `Unreachable` error when that member cannot be reached.
    async fn cluster_seen_by(
        &self,
        identity: ClusterRole,
    ) -> Result<Vec<StatusRecord>, Self::Error>;
}

/// Read/write access to status records.
///
/// Writes only ever touch this node's own record, and are visible to
/// subsequent reads through the same store immediately.
#[async_trait]
pub trait StatusStore
where
    Self: Send + Sync + Clone + 'static,
{
    /// The error type for this store.
    type Error: StatusError;

    /// This node's own record.
    async fn whoami(&self) -> Result<StatusRecord, Self::Error>;

    /// The record of the member with the given identity, if reachable.
    async fn whois(&self, identity: ClusterRole) -> Result<StatusRecord, Self::Error>;

    /// The record of the data-holding member that is not `identity`, if
    /// reachable.
    async fn whoisnot(&self, identity: ClusterRole) -> Result<StatusRecord, Self::Error>;

    /// Persists this node's database role and bumps its `updated_at`.
    async fn set_db_role(&self, role: DbRole) -> Result<(), Self::Error>;

    /// Persists this node's process state and bumps its `updated_at`.
    async fn set_state(&self, state: &str) -> Result<(), Self::Error>;
}
