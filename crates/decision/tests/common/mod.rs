//! Shared harness: three decision loops over one in-memory cluster, each
//! with an executor that records commands and reports the resulting state.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use warden_decision::{
    Command, DecisionConfig, DecisionEngine, DecisionHandle, DecisionResult,
};
use warden_status::{ClusterRole, DbRole, StatusRecord, StatusStore};
use warden_status_memory::MemoryCluster;

pub struct TestNode {
    pub handle: DecisionHandle,
    pub task: JoinHandle<DecisionResult<()>>,
    pub commands: Arc<Mutex<Vec<Command>>>,
}

pub struct TestCluster {
    pub cluster: MemoryCluster,
    pub nodes: HashMap<ClusterRole, TestNode>,
    shutdown: CancellationToken,
}

pub fn test_config() -> DecisionConfig {
    DecisionConfig::default()
        .with_decision_timeout(Duration::from_secs(10))
        .with_tick_interval(Duration::from_secs(10))
        .with_gate_poll_interval(Duration::from_secs(1))
}

impl TestCluster {
    /// Joins all three members and starts their decision loops.
    pub async fn start() -> Self {
        let cluster = MemoryCluster::new();
        for (identity, ip) in [
            (ClusterRole::Primary, "10.0.0.1"),
            (ClusterRole::Secondary, "10.0.0.2"),
            (ClusterRole::Monitor, "10.0.0.3"),
        ] {
            cluster.join(StatusRecord::new(identity, ip)).await;
        }

        let shutdown = CancellationToken::new();
        let mut nodes = HashMap::new();

        for identity in ClusterRole::ALL {
            let status = cluster.handle(identity);
            let (engine, mut commands_rx) =
                DecisionEngine::new(status.clone(), status.clone(), test_config());

            let commands = Arc::new(Mutex::new(Vec::new()));
            let log = commands.clone();
            tokio::spawn(async move {
                while let Some(command) = commands_rx.recv().await {
                    log.lock().await.push(command);
                    status
                        .set_state(command.completed_state())
                        .await
                        .expect("executor failed to record state");
                }
            });

            let (handle, task) = engine.spawn(shutdown.child_token());
            nodes.insert(
                identity,
                TestNode {
                    handle,
                    task,
                    commands,
                },
            );
        }

        Self {
            cluster,
            nodes,
            shutdown,
        }
    }

    pub async fn role(&self, identity: ClusterRole) -> DbRole {
        self.cluster
            .record(identity)
            .await
            .expect("member not registered")
            .db_role
    }

    pub async fn roles(&self) -> (DbRole, DbRole) {
        (
            self.role(ClusterRole::Primary).await,
            self.role(ClusterRole::Secondary).await,
        )
    }

    pub async fn commands(&self, identity: ClusterRole) -> Vec<Command> {
        self.nodes[&identity].commands.lock().await.clone()
    }

    pub fn handle(&self, identity: ClusterRole) -> &DecisionHandle {
        &self.nodes[&identity].handle
    }

    /// Lets virtual time pass, asserting every second that the two data
    /// members never both accept writes.
    ///
    /// Engine timers fire on whole seconds, so sampling happens on the half
    /// second to observe settled state. Returns on a whole second.
    pub async fn settle_without_split_brain(&self, duration: Duration) {
        let half = Duration::from_millis(500);
        tokio::time::sleep(half).await;

        let mut elapsed = half;
        loop {
            let (primary, secondary) = self.roles().await;
            assert!(
                !(accepts_writes(primary) && accepts_writes(secondary)),
                "split brain after {elapsed:?}: primary {primary}, secondary {secondary}"
            );

            if elapsed + half >= duration {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            elapsed += Duration::from_secs(1);
        }

        tokio::time::sleep(duration - elapsed).await;
    }

    /// Stops every loop and returns how each one ended.
    pub async fn shutdown(self) -> HashMap<ClusterRole, DecisionResult<()>> {
        self.shutdown.cancel();

        let mut results = HashMap::new();
        for (identity, node) in self.nodes {
            results.insert(identity, node.task.await.expect("decision task panicked"));
        }
        results
    }
}

pub const fn accepts_writes(role: DbRole) -> bool {
    matches!(role, DbRole::Master | DbRole::Single)
}
