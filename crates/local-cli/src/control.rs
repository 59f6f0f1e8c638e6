//! Operator commands read from the control prompt.

use std::str::FromStr;

use thiserror::Error;
use warden_status::{ClusterRole, ParseRoleError};

/// Errors parsing a control line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The line was blank.
    #[error("empty command")]
    Empty,

    /// The first word is not a known command.
    #[error("unknown command: {0}")]
    Unknown(String),

    /// A required argument is missing.
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    /// A member name could not be parsed.
    #[error(transparent)]
    Role(#[from] ParseRoleError),
}

/// One line of operator input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Control {
    /// Print every member's record.
    Status,

    /// Crash a member.
    Down(ClusterRole),

    /// Bring a crashed member back.
    Up(ClusterRole),

    /// Cut the link between two members.
    Partition(ClusterRole, ClusterRole),

    /// Restore the link between two members.
    Heal(ClusterRole, ClusterRole),

    /// Send advice to a member's decision loop.
    Advise(ClusterRole, String),

    /// Stop the simulation.
    Quit,
}

impl FromStr for Control {
    type Err = ControlError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(ControlError::Empty)?;

        let control = match command {
            "status" => Self::Status,
            "down" => Self::Down(next_member(&mut words, "member")?),
            "up" => Self::Up(next_member(&mut words, "member")?),
            "partition" => Self::Partition(
                next_member(&mut words, "first member")?,
                next_member(&mut words, "second member")?,
            ),
            "heal" => Self::Heal(
                next_member(&mut words, "first member")?,
                next_member(&mut words, "second member")?,
            ),
            "advise" => {
                let target = next_member(&mut words, "member")?;
                let advice = words.collect::<Vec<_>>().join(" ");
                if advice.is_empty() {
                    return Err(ControlError::MissingArgument("advice"));
                }
                Self::Advise(target, advice)
            }
            "quit" | "exit" => Self::Quit,
            other => return Err(ControlError::Unknown(other.to_string())),
        };

        Ok(control)
    }
}

fn next_member<'a>(
    words: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
) -> Result<ClusterRole, ControlError> {
    Ok(words
        .next()
        .ok_or(ControlError::MissingArgument(name))?
        .parse()?)
}
