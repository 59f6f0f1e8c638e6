//! Per-member status records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ClusterRole, DbRole};

/// State reported by a member whose database process is running.
pub const STATE_RUNNING: &str = "running";

/// State reported by a slave that has finished syncing from its master.
pub const STATE_SLAVE_RUNNING: &str = "(slave)running";

/// The role and state of a single cluster member.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Static identity of the member.
    pub cluster_role: ClusterRole,

    /// Current database role.
    pub db_role: DbRole,

    /// Free-form process state, e.g. `running` or `(slave)running`.
    pub state: String,

    /// Address the member is reachable on.
    pub ip: String,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    /// Creates a record for a member that has never started.
    #[must_use]
    pub fn new(cluster_role: ClusterRole, ip: impl Into<String>) -> Self {
        Self {
            cluster_role,
            db_role: DbRole::Initialized,
            state: String::new(),
            ip: ip.into(),
            updated_at: Utc::now(),
        }
    }

    /// Returns true if the member finished syncing as a slave, which is the
    /// precondition for promoting it.
    #[must_use]
    pub fn is_synced_slave(&self) -> bool {
        self.state == STATE_SLAVE_RUNNING
    }
}
