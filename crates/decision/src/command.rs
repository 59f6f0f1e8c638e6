//! Messages exchanged with the outside world: commands for the executor,
//! advice from operators or health checks, and the record of a transition.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_status::{DbRole, STATE_SLAVE_RUNNING};

/// State an executor reports after stopping the database.
pub const STATE_DOWN: &str = "down";

/// Instruction for the executor that runs the local database process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Stop the database.
    Kill,

    /// Run as master, replicating to the peer.
    Master,

    /// Run as slave, replicating from the peer.
    Slave,

    /// Run alone without replication.
    Single,
}

impl Command {
    /// The command that moves the local database into `role`. `None` for
    /// roles that are not data roles.
    #[must_use]
    pub const fn for_role(role: DbRole) -> Option<Self> {
        match role {
            DbRole::Master => Some(Self::Master),
            DbRole::Slave => Some(Self::Slave),
            DbRole::Single => Some(Self::Single),
            role if role.is_dead() => Some(Self::Kill),
            _ => None,
        }
    }

    /// The state an executor records once it has carried out the command.
    /// A slave only reports `(slave)running` after it has synced.
    #[must_use]
    pub const fn completed_state(self) -> &'static str {
        match self {
            Self::Kill => STATE_DOWN,
            Self::Master => "(master)running",
            Self::Slave => STATE_SLAVE_RUNNING,
            Self::Single => "(single)running",
        }
    }

    /// Text form, matching `Display`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kill => "kill",
            Self::Master => "master",
            Self::Slave => "slave",
            Self::Single => "single",
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kill" => Ok(Self::Kill),
            "master" => Ok(Self::Master),
            "slave" => Ok(Self::Slave),
            "single" => Ok(Self::Single),
            other => Err(ParseCommandError(other.to_string())),
        }
    }
}

/// Error returned when a command string cannot be parsed.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("unknown command: {0}")]
pub struct ParseCommandError(String);

/// Out-of-band prompt delivered to a node's decision loop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Advice {
    /// Step down if currently master.
    Demote,

    /// Any other token. Only triggers a cluster check.
    Other(String),
}

impl From<&str> for Advice {
    fn from(value: &str) -> Self {
        let token = value.trim();
        if token.eq_ignore_ascii_case("demote") {
            Self::Demote
        } else {
            Self::Other(token.to_string())
        }
    }
}

impl From<String> for Advice {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl Display for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Demote => f.write_str("demote"),
            Self::Other(token) => f.write_str(token),
        }
    }
}

/// A role change performed by the engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Transition {
    /// Role before the change.
    pub from: DbRole,

    /// Role after the change.
    pub to: DbRole,

    /// Command emitted to the executor.
    pub command: Command,
}
