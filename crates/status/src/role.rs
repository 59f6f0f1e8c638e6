//! Static member identities and dynamic database roles.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a role string cannot be parsed.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("unknown {kind} role: {value}")]
pub struct ParseRoleError {
    kind: &'static str,
    value: String,
}

impl ParseRoleError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Static identity of a cluster member, fixed for the lifetime of a process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterRole {
    /// The data-holding member that starts as master on a fresh cluster.
    Primary,

    /// The data-holding member that starts as slave on a fresh cluster.
    Secondary,

    /// The witness. Holds no data and never takes a database role.
    Monitor,
}

impl ClusterRole {
    /// All identities of a fully formed cluster, in snapshot order.
    pub const ALL: [Self; 3] = [Self::Primary, Self::Secondary, Self::Monitor];

    /// Returns true for the witness identity.
    #[must_use]
    pub const fn is_monitor(self) -> bool {
        matches!(self, Self::Monitor)
    }

    /// The other data-holding identity, or `None` for the monitor.
    #[must_use]
    pub const fn peer(self) -> Option<Self> {
        match self {
            Self::Primary => Some(Self::Secondary),
            Self::Secondary => Some(Self::Primary),
            Self::Monitor => None,
        }
    }

    /// The role a data-holding member takes when it has no history.
    #[must_use]
    pub const fn default_db_role(self) -> Option<DbRole> {
        match self {
            Self::Primary => Some(DbRole::Master),
            Self::Secondary => Some(DbRole::Slave),
            Self::Monitor => None,
        }
    }

    /// Text form, matching `Display`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Monitor => "monitor",
        }
    }
}

impl Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterRole {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            "monitor" => Ok(Self::Monitor),
            other => Err(ParseRoleError::new("cluster", other)),
        }
    }
}

/// Dynamic database role of a member.
///
/// The `Dead*` variants are self-declared: a member that decided it is unsafe
/// to keep serving records which role it gave up. This is different from a
/// member that is merely absent from a snapshot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DbRole {
    /// Never started.
    #[serde(rename = "initialized")]
    Initialized,

    /// Serving writes without a replica.
    #[serde(rename = "single")]
    Single,

    /// Serving writes, replicating to the peer.
    #[serde(rename = "master")]
    Master,

    /// Replicating from the peer.
    #[serde(rename = "slave")]
    Slave,

    /// Was single, stopped.
    #[serde(rename = "dead(single)")]
    DeadSingle,

    /// Was master, stopped.
    #[serde(rename = "dead(master)")]
    DeadMaster,

    /// Was slave, stopped.
    #[serde(rename = "dead(slave)")]
    DeadSlave,

    /// Recorded by the witness for itself. Never a valid data role.
    #[serde(rename = "monitor")]
    Monitor,
}

impl DbRole {
    /// Returns true for any of the `dead(*)` roles.
    #[must_use]
    pub const fn is_dead(self) -> bool {
        matches!(self, Self::DeadSingle | Self::DeadMaster | Self::DeadSlave)
    }

    /// Text form, matching `Display` and the serde representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Single => "single",
            Self::Master => "master",
            Self::Slave => "slave",
            Self::DeadSingle => "dead(single)",
            Self::DeadMaster => "dead(master)",
            Self::DeadSlave => "dead(slave)",
            Self::Monitor => "monitor",
        }
    }
}

impl Display for DbRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbRole {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(Self::Initialized),
            "single" => Ok(Self::Single),
            "master" => Ok(Self::Master),
            "slave" => Ok(Self::Slave),
            "dead(single)" => Ok(Self::DeadSingle),
            "dead(master)" => Ok(Self::DeadMaster),
            "dead(slave)" => Ok(Self::DeadSlave),
            "monitor" => Ok(Self::Monitor),
            other => Err(ParseRoleError::new("database", other)),
        }
    }
}
