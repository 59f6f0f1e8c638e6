//! Stand-in for the process executor: consumes a member's commands in order
//! and reports the state the database would be in afterwards.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use warden_decision::Command;
use warden_status::{ClusterRole, StatusStore};

/// Applies one member's commands to its status record.
pub struct LocalExecutor<S>
where
    S: StatusStore,
{
    identity: ClusterRole,
    store: S,
}

impl<S> LocalExecutor<S>
where
    S: StatusStore,
{
    /// Creates an executor writing through `store`.
    pub const fn new(identity: ClusterRole, store: S) -> Self {
        Self { identity, store }
    }

    /// Consumes commands until the decision loop drops its sender.
    pub fn spawn(self, mut commands: mpsc::Receiver<Command>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                self.execute(command).await;
            }
        })
    }

    async fn execute(&self, command: Command) {
        let state = command.completed_state();
        info!("{}: executing {} -> {}", self.identity, command, state);

        if let Err(e) = self.store.set_state(state).await {
            warn!("{}: failed to record state {}: {}", self.identity, state, e);
        }
    }
}
