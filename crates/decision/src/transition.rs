//! Per-role transition logic.

use tracing::{debug, info};
use warden_status::{ClusterMembership, DbRole, StatusRecord, StatusStore};

use crate::command::Transition;
use crate::engine::DecisionEngine;
use crate::error::{DecisionResult, Error};
use crate::startup::FULL_CLUSTER_SIZE;

impl<M, S> DecisionEngine<M, S>
where
    M: ClusterMembership,
    S: StatusStore,
{
    /// Decides what to do about the current cluster, based on this node's
    /// role. Returns the transition taken, or `None` when staying put.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] when this node's role is not one
    /// of the decision states, and propagates collaborator failures.
    pub async fn perform_action(&mut self) -> DecisionResult<Option<Transition>> {
        let me = self.whoami().await?;
        let peer = self.peer(me.cluster_role).await?;
        debug!("perform action: self {:?}, other {:?}", me, peer);

        match me.db_role {
            DbRole::Single => self.from_single(&me, peer.as_ref()).await,
            DbRole::Master => self.from_master(&me, peer.as_ref()).await,
            DbRole::Slave => self.from_slave(&me, peer.as_ref()).await,
            DbRole::DeadSingle | DbRole::DeadMaster | DbRole::DeadSlave => {
                self.from_dead(&me, peer.as_ref()).await
            }
            DbRole::Initialized | DbRole::Monitor => {
                Err(Error::invariant(me.db_role, "perform action"))
            }
        }
    }

    async fn from_single(
        &mut self,
        me: &StatusRecord,
        peer: Option<&StatusRecord>,
    ) -> DecisionResult<Option<Transition>> {
        let monitor = self.monitor().await?;

        match (peer, monitor) {
            (None, None) => self
                .transition(me.db_role, DbRole::DeadSingle, "alone")
                .await
                .map(Some),
            (None, Some(_)) => {
                info!("single: other is still gone, doing nothing");
                Ok(None)
            }
            (Some(_), None) => {
                info!("single: other back but monitor gone, doing nothing");
                Ok(None)
            }
            (Some(_), Some(_)) => self
                .transition(me.db_role, DbRole::Master, "other came back online")
                .await
                .map(Some),
        }
    }

    async fn from_master(
        &mut self,
        me: &StatusRecord,
        peer: Option<&StatusRecord>,
    ) -> DecisionResult<Option<Transition>> {
        match peer.map(|peer| peer.db_role) {
            // Losing only the monitor is harmless.
            Some(DbRole::Slave) => {
                info!("master: other is slave, doing nothing");
                return Ok(None);
            }
            Some(DbRole::DeadSlave) => {
                return self
                    .transition(me.db_role, DbRole::Single, "other is dead")
                    .await
                    .map(Some);
            }
            _ => {}
        }

        if self.peer_returns_after_timeout(me).await? {
            info!("master: other came back, doing nothing");
            return Ok(None);
        }

        if self.monitor().await?.is_some() {
            self.transition(me.db_role, DbRole::Single, "other gone")
                .await
                .map(Some)
        } else {
            self.transition(me.db_role, DbRole::DeadMaster, "lost connection to cluster")
                .await
                .map(Some)
        }
    }

    async fn from_slave(
        &mut self,
        me: &StatusRecord,
        peer: Option<&StatusRecord>,
    ) -> DecisionResult<Option<Transition>> {
        match peer.map(|peer| peer.db_role) {
            Some(DbRole::Master) => {
                info!("slave: other is master, doing nothing");
                return Ok(None);
            }
            Some(DbRole::DeadMaster) => {
                if !me.is_synced_slave() {
                    return self
                        .transition(
                            me.db_role,
                            DbRole::DeadSlave,
                            "other is dead but I was not synced",
                        )
                        .await
                        .map(Some);
                }
                return self
                    .transition(me.db_role, DbRole::Single, "other is dead")
                    .await
                    .map(Some);
            }
            _ => {}
        }

        if self.peer_returns_after_timeout(me).await? {
            info!("slave: other came back, doing nothing");
            return Ok(None);
        }

        if self.monitor().await?.is_none() {
            return self
                .transition(me.db_role, DbRole::DeadSlave, "lost connection to cluster")
                .await
                .map(Some);
        }

        if !me.is_synced_slave() {
            return self
                .transition(me.db_role, DbRole::DeadSlave, "other is gone but I was not synced")
                .await
                .map(Some);
        }

        // Stricter than the master side: if the monitor can still see the
        // peer, the partition is on our side.
        if let Some(peer_identity) = me.cluster_role.peer() {
            if self.monitor_sees(peer_identity).await? {
                return self
                    .transition(me.db_role, DbRole::DeadSlave, "monitor still sees other")
                    .await
                    .map(Some);
            }
        }

        self.transition(me.db_role, DbRole::Single, "other gone")
            .await
            .map(Some)
    }

    async fn from_dead(
        &mut self,
        me: &StatusRecord,
        peer: Option<&StatusRecord>,
    ) -> DecisionResult<Option<Transition>> {
        let cluster = self.snapshot().await?;
        if peer.is_none() || cluster.len() != FULL_CLUSTER_SIZE {
            debug!("{}: cluster not whole yet, staying down", me.db_role);
            return Ok(None);
        }

        let to = match me.db_role {
            DbRole::DeadSingle => DbRole::Master,
            DbRole::DeadMaster => self.start_type(DbRole::Master).await?,
            DbRole::DeadSlave => self.start_type(DbRole::Slave).await?,
            other => return Err(Error::invariant(other, "dead role handler")),
        };

        self.transition(me.db_role, to, "other online")
            .await
            .map(Some)
    }

    /// Waits out the decision timeout, then checks whether the peer is
    /// reachable again.
    async fn peer_returns_after_timeout(&self, me: &StatusRecord) -> DecisionResult<bool> {
        debug!(
            "{}: other unreachable, waiting {:?} before deciding",
            me.db_role, self.config.decision_timeout
        );
        tokio::time::sleep(self.config.decision_timeout).await;

        Ok(self.peer(me.cluster_role).await?.is_some())
    }
}
