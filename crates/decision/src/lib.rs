//! Failover decisions for one member of a primary/secondary/monitor
//! database cluster.
//!
//! This crate provides:
//! - Startup: waiting for the cluster to form and resolving the initial role
//! - Change detection against the last known cluster
//! - The per-role transition engine
//! - The decision loop driving all of the above on a single task
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod command;
pub mod config;
pub mod error;

mod detector;
mod engine;
mod node;
mod startup;
mod transition;

pub use command::{Advice, Command, ParseCommandError, STATE_DOWN, Transition};
pub use config::DecisionConfig;
pub use engine::DecisionEngine;
pub use error::{DecisionResult, Error};
pub use node::DecisionHandle;
pub use startup::FULL_CLUSTER_SIZE;
