//! Startup: waiting for the cluster to form and picking the initial role.

use tracing::{debug, info, warn};
use warden_status::{ClusterMembership, DbRole, STATE_RUNNING, StatusStore};

use crate::command::Command;
use crate::engine::DecisionEngine;
use crate::error::{DecisionResult, Error};

/// Number of members in a fully formed cluster.
pub const FULL_CLUSTER_SIZE: usize = 3;

impl<M, S> DecisionEngine<M, S>
where
    M: ClusterMembership,
    S: StatusStore,
{
    /// Polls membership until all three members are visible. Never gives up.
    pub async fn wait_for_cluster_full(&self) {
        loop {
            match self.snapshot().await {
                Ok(cluster) if cluster.len() == FULL_CLUSTER_SIZE => {
                    info!("members are all online");
                    return;
                }
                Ok(cluster) => info!("waiting for members (cluster({}))", cluster.len()),
                Err(e) => warn!("failed to read cluster while waiting for members: {}", e),
            }

            tokio::time::sleep(self.config.gate_poll_interval).await;
        }
    }

    /// Puts this node into its initial role.
    ///
    /// Monitors record themselves as running and return `None`: they never
    /// make decisions. Data members resolve their role with
    /// [`start_type`](Self::start_type), persist it and emit it as the first
    /// command.
    ///
    /// # Errors
    ///
    /// Fails if the status store cannot be read or written, if the persisted
    /// role is invalid, or if the executor is gone.
    pub async fn startup_db(&mut self) -> DecisionResult<Option<DbRole>> {
        let me = self.whoami().await?;
        debug!("starting up as {:?}", me);

        let Some(default) = me.cluster_role.default_db_role() else {
            debug!("monitors do not make decisions");
            self.set_db_role(DbRole::Monitor).await?;
            self.store
                .set_state(STATE_RUNNING)
                .await
                .map_err(|e| Error::Status(e.to_string()))?;
            return Ok(None);
        };

        let role = self.start_type(default).await?;
        let command = Command::for_role(role).ok_or(Error::invariant(role, "startup"))?;
        self.set_db_role(role).await?;
        info!("starting as {}", role);
        self.emit(command).await?;
        self.refresh_last_known_cluster().await;

        Ok(Some(role))
    }

    /// Resolves the role to start in from this node's last persisted role.
    ///
    /// A node that was master yields to a peer that has since claimed sole
    /// mastership, or that became master after this node's last update.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if the persisted role is not a
    /// data role.
    pub async fn start_type(&self, default: DbRole) -> DecisionResult<DbRole> {
        let me = self.whoami().await?;
        debug!("start type for {:?}", me);

        match me.db_role {
            DbRole::Initialized => Ok(default),
            DbRole::Single | DbRole::DeadSingle => Ok(DbRole::Master),
            DbRole::Slave | DbRole::DeadSlave => Ok(DbRole::Slave),
            DbRole::Master | DbRole::DeadMaster => {
                let peer = self.peer(me.cluster_role).await?;
                debug!("start type peer {:?}", peer);

                match peer {
                    Some(peer) if matches!(peer.db_role, DbRole::Single | DbRole::DeadSingle) => {
                        Ok(DbRole::Slave)
                    }
                    Some(peer)
                        if peer.db_role == DbRole::Master && peer.updated_at > me.updated_at =>
                    {
                        Ok(DbRole::Slave)
                    }
                    _ => Ok(DbRole::Master),
                }
            }
            DbRole::Monitor => Err(Error::invariant(me.db_role, "start type")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use warden_status::{ClusterRole, StatusRecord};
    use warden_status_memory::{MemoryCluster, MemoryStatus};

    use super::*;
    use crate::config::DecisionConfig;

    async fn cluster_with(primary: DbRole, secondary: DbRole) -> MemoryCluster {
        let cluster = MemoryCluster::new();
        for (identity, role) in [
            (ClusterRole::Primary, primary),
            (ClusterRole::Secondary, secondary),
            (ClusterRole::Monitor, DbRole::Monitor),
        ] {
            let mut record = StatusRecord::new(identity, "127.0.0.1");
            record.db_role = role;
            cluster.join(record).await;
        }
        cluster
    }

    fn engine_for(
        cluster: &MemoryCluster,
        identity: ClusterRole,
    ) -> (
        DecisionEngine<MemoryStatus, MemoryStatus>,
        tokio::sync::mpsc::Receiver<Command>,
    ) {
        let status = cluster.handle(identity);
        DecisionEngine::new(status.clone(), status, DecisionConfig::default())
    }

    #[tokio::test]
    async fn test_start_type_table() {
        let cases = [
            (DbRole::Initialized, DbRole::Slave),
            (DbRole::Single, DbRole::Master),
            (DbRole::DeadSingle, DbRole::Master),
            (DbRole::Slave, DbRole::Slave),
            (DbRole::DeadSlave, DbRole::Slave),
        ];

        for (last, expected) in cases {
            let cluster = cluster_with(DbRole::Initialized, last).await;
            let (engine, _commands) = engine_for(&cluster, ClusterRole::Secondary);
            assert_eq!(
                engine.start_type(DbRole::Slave).await.unwrap(),
                expected,
                "last role {last}"
            );
        }
    }

    #[tokio::test]
    async fn test_start_type_yields_to_single_peer() {
        for peer_role in [DbRole::Single, DbRole::DeadSingle] {
            let cluster = cluster_with(DbRole::DeadMaster, peer_role).await;
            let (engine, _commands) = engine_for(&cluster, ClusterRole::Primary);
            assert_eq!(
                engine.start_type(DbRole::Master).await.unwrap(),
                DbRole::Slave
            );
        }
    }

    #[tokio::test]
    async fn test_start_type_master_tie_break() {
        // Secondary joined last, so its master claim is the newer one.
        let cluster = cluster_with(DbRole::Master, DbRole::Master).await;
        let (primary, _p) = engine_for(&cluster, ClusterRole::Primary);
        let (secondary, _s) = engine_for(&cluster, ClusterRole::Secondary);

        assert_eq!(
            primary.start_type(DbRole::Master).await.unwrap(),
            DbRole::Slave
        );
        assert_eq!(
            secondary.start_type(DbRole::Slave).await.unwrap(),
            DbRole::Master
        );
    }

    #[tokio::test]
    async fn test_start_type_stays_master_without_peer() {
        let cluster = cluster_with(DbRole::Master, DbRole::Slave).await;
        cluster
            .partition(ClusterRole::Primary, ClusterRole::Secondary)
            .await;
        let (engine, _commands) = engine_for(&cluster, ClusterRole::Primary);

        assert_eq!(
            engine.start_type(DbRole::Master).await.unwrap(),
            DbRole::Master
        );
    }

    #[tokio::test]
    async fn test_start_type_rejects_monitor_role() {
        let cluster = cluster_with(DbRole::Monitor, DbRole::Slave).await;
        let (engine, _commands) = engine_for(&cluster, ClusterRole::Primary);

        let err = engine.start_type(DbRole::Master).await.unwrap_err();
        assert_matches!(
            err,
            Error::InvariantViolation {
                role: DbRole::Monitor,
                ..
            }
        );
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_startup_db_emits_default_role() {
        let cluster = cluster_with(DbRole::Initialized, DbRole::Initialized).await;
        let (mut engine, mut commands) = engine_for(&cluster, ClusterRole::Primary);

        assert_eq!(engine.startup_db().await.unwrap(), Some(DbRole::Master));
        assert_eq!(commands.recv().await, Some(Command::Master));
        assert_eq!(
            cluster.record(ClusterRole::Primary).await.unwrap().db_role,
            DbRole::Master
        );
        assert_eq!(engine.last_known_cluster().len(), 3);
    }

    #[tokio::test]
    async fn test_monitor_startup_is_passive() {
        let cluster = cluster_with(DbRole::Initialized, DbRole::Initialized).await;
        let (mut engine, mut commands) = engine_for(&cluster, ClusterRole::Monitor);

        assert_eq!(engine.startup_db().await.unwrap(), None);
        let record = cluster.record(ClusterRole::Monitor).await.unwrap();
        assert_eq!(record.db_role, DbRole::Monitor);
        assert_eq!(record.state, STATE_RUNNING);

        drop(engine);
        assert_eq!(commands.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_cluster_full_blocks_until_formed() {
        let cluster = MemoryCluster::new();
        let primary = cluster
            .join(StatusRecord::new(ClusterRole::Primary, "127.0.0.1"))
            .await;
        let (engine, _commands) = DecisionEngine::new(
            primary.clone(),
            primary,
            DecisionConfig::default().with_gate_poll_interval(Duration::from_secs(1)),
        );

        let joiner = {
            let cluster = cluster.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                cluster
                    .join(StatusRecord::new(ClusterRole::Secondary, "127.0.0.2"))
                    .await;
                cluster
                    .join(StatusRecord::new(ClusterRole::Monitor, "127.0.0.3"))
                    .await;
            })
        };

        let started = tokio::time::Instant::now();
        engine.wait_for_cluster_full().await;
        assert!(started.elapsed() >= Duration::from_secs(5));
        joiner.await.unwrap();
    }
}
