//! The decision loop: startup, then periodic checks and advice handling on a
//! single task.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_status::{ClusterMembership, DbRole, StatusStore};

use crate::command::{Advice, Transition};
use crate::engine::DecisionEngine;
use crate::error::{DecisionResult, Error};

/// Handle for feeding advice to, and stopping, a spawned decision loop.
#[derive(Clone, Debug)]
pub struct DecisionHandle {
    advice: mpsc::Sender<Advice>,
    shutdown: CancellationToken,
}

impl DecisionHandle {
    /// Queues advice for the decision loop. Waits if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdviceChannelClosed`] once the loop has stopped.
    pub async fn advise(&self, advice: impl Into<Advice> + Send) -> DecisionResult<()> {
        self.advice
            .send(advice.into())
            .await
            .map_err(|_| Error::AdviceChannelClosed)
    }

    /// Asks the loop to stop. A decision already in progress finishes first.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl<M, S> DecisionEngine<M, S>
where
    M: ClusterMembership,
    S: StatusStore,
{
    /// Runs the decision loop on a new task.
    ///
    /// The loop stops when `shutdown` is cancelled, and the task resolves to
    /// the fatal error that stopped it, if any.
    pub fn spawn(
        self,
        shutdown: CancellationToken,
    ) -> (DecisionHandle, JoinHandle<DecisionResult<()>>) {
        let (advice_tx, advice_rx) = mpsc::channel(self.config.advice_capacity());

        let handle = DecisionHandle {
            advice: advice_tx,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(self.run(advice_rx, shutdown));

        (handle, task)
    }

    /// Waits for the cluster to form, starts the database in its initial
    /// role and then reacts to ticks and advice until `shutdown` fires.
    ///
    /// Monitors return as soon as they have started.
    ///
    /// # Errors
    ///
    /// Returns only fatal errors: invariant violations, a closed command
    /// channel, or a failure during startup. Errors while handling a tick or
    /// advice are logged and retried on the next tick.
    pub async fn run(
        mut self,
        mut advice_rx: mpsc::Receiver<Advice>,
        shutdown: CancellationToken,
    ) -> DecisionResult<()> {
        tokio::select! {
            () = self.wait_for_cluster_full() => {}
            () = shutdown.cancelled() => {
                info!("shut down before the cluster formed");
                return Ok(());
            }
        }

        let Some(role) = self.startup_db().await? else {
            info!("monitor started, not making decisions");
            return Ok(());
        };
        debug!("started as {}", role);

        let (tick_tx, mut ticks) = mpsc::channel(1);
        let ticker_shutdown = shutdown.child_token();
        let ticker = spawn_ticker(self.config.tick_interval, tick_tx, ticker_shutdown.clone());

        let result = loop {
            let outcome = tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                Some(advice) = advice_rx.recv() => self.on_advice(advice).await,
                Some(()) = ticks.recv() => self.on_tick().await,
            };

            match outcome {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!("decision loop stopping: {}", e);
                    break Err(e);
                }
                Err(e) => warn!("decision failed, retrying on next tick: {}", e),
            }
        };

        ticker_shutdown.cancel();
        if let Err(e) = ticker.await {
            warn!("ticker task failed: {}", e);
        }

        result
    }

    /// Periodic check: act only if the cluster changed.
    ///
    /// # Errors
    ///
    /// Propagates errors from change detection and the transition engine.
    pub async fn on_tick(&mut self) -> DecisionResult<Option<Transition>> {
        debug!("timer triggered check");
        self.evaluate().await
    }

    /// Handles one piece of advice.
    ///
    /// `demote` takes a master straight to `dead(master)` without looking at
    /// the cluster. Anything else is treated like a tick.
    ///
    /// # Errors
    ///
    /// Propagates errors from change detection and the transition engine.
    pub async fn on_advice(&mut self, advice: Advice) -> DecisionResult<Option<Transition>> {
        let me = self.whoami().await?;

        if advice == Advice::Demote && me.db_role == DbRole::Master {
            return self
                .transition(me.db_role, DbRole::DeadMaster, "demoted by advice")
                .await
                .map(Some);
        }

        info!("got some advice: {}", advice);
        self.evaluate().await
    }

    async fn evaluate(&mut self) -> DecisionResult<Option<Transition>> {
        if self.cluster_changes().await? {
            self.perform_action().await
        } else {
            Ok(None)
        }
    }
}

/// Sends a tick every `period` until cancelled. Ticks that find one still
/// pending are dropped, so a slow decision never builds a backlog.
fn spawn_ticker(
    period: Duration,
    ticks: mpsc::Sender<()>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => match ticks.try_send(()) {
                    Ok(()) | Err(TrySendError::Full(())) => {}
                    Err(TrySendError::Closed(())) => break,
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc::error::TryRecvError;
    use tracing_test::traced_test;
    use warden_status::{ClusterRole, StatusRecord};
    use warden_status_memory::{Error as MemoryError, MemoryCluster, MemoryStatus};

    use super::*;
    use crate::command::Command;
    use crate::config::DecisionConfig;

    /// Membership whose snapshots can be made to fail on demand.
    #[derive(Clone)]
    struct FlakyMembership {
        status: MemoryStatus,
        failing: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ClusterMembership for FlakyMembership {
        type Error = MemoryError;

        async fn cluster(&self) -> Result<Vec<StatusRecord>, Self::Error> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(MemoryError::NotRegistered(ClusterRole::Monitor));
            }
            self.status.cluster().await
        }

        async fn cluster_seen_by(
            &self,
            identity: ClusterRole,
        ) -> Result<Vec<StatusRecord>, Self::Error> {
            self.status.cluster_seen_by(identity).await
        }
    }

    async fn steady_cluster() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        for (identity, role) in [
            (ClusterRole::Primary, DbRole::Master),
            (ClusterRole::Secondary, DbRole::Slave),
            (ClusterRole::Monitor, DbRole::Monitor),
        ] {
            let mut record = StatusRecord::new(identity, "127.0.0.1");
            record.db_role = role;
            cluster.join(record).await;
        }
        cluster
    }

    #[tokio::test]
    async fn test_demote_bypasses_change_detection() {
        let cluster = steady_cluster().await;
        let status = cluster.handle(ClusterRole::Primary);
        let (mut engine, mut commands) =
            DecisionEngine::new(status.clone(), status, DecisionConfig::default());
        engine.seed_last_known_cluster().await.unwrap();

        assert!(!engine.cluster_changes().await.unwrap());
        let transition = engine.on_advice(Advice::Demote).await.unwrap().unwrap();

        assert_eq!(transition.to, DbRole::DeadMaster);
        assert_eq!(commands.recv().await, Some(Command::Kill));
    }

    #[tokio::test]
    async fn test_demote_sends_kill_when_snapshot_fails() {
        let cluster = steady_cluster().await;
        let status = cluster.handle(ClusterRole::Primary);
        let failing = Arc::new(AtomicBool::new(false));
        let membership = FlakyMembership {
            status: status.clone(),
            failing: failing.clone(),
        };
        let (mut engine, mut commands) =
            DecisionEngine::new(membership, status, DecisionConfig::default());
        engine.seed_last_known_cluster().await.unwrap();

        failing.store(true, Ordering::SeqCst);
        let transition = engine.on_advice(Advice::Demote).await.unwrap().unwrap();

        assert_eq!(transition.to, DbRole::DeadMaster);
        assert_eq!(commands.try_recv(), Ok(Command::Kill));
        assert_eq!(
            cluster.record(ClusterRole::Primary).await.unwrap().db_role,
            DbRole::DeadMaster
        );
        let own = engine
            .last_known_cluster()
            .iter()
            .find(|member| member.cluster_role == ClusterRole::Primary)
            .unwrap();
        assert_eq!(own.db_role, DbRole::DeadMaster);

        // Once snapshots work again, the patched baseline matches the world.
        failing.store(false, Ordering::SeqCst);
        assert_eq!(engine.on_tick().await.unwrap(), None);
        assert_eq!(commands.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_advice_waits_for_decision_in_progress() {
        let cluster = steady_cluster().await;
        let status = cluster.handle(ClusterRole::Primary);
        let config = DecisionConfig::default()
            .with_decision_timeout(Duration::from_secs(10))
            .with_tick_interval(Duration::from_secs(10));
        let (engine, mut commands) = DecisionEngine::new(status.clone(), status, config);
        let (handle, task) = engine.spawn(CancellationToken::new());
        assert_eq!(commands.recv().await, Some(Command::Master));

        // The tick at 10s sees the peer gone and waits until 20s.
        tokio::time::sleep(Duration::from_secs(5)).await;
        cluster
            .partition(ClusterRole::Primary, ClusterRole::Secondary)
            .await;
        tokio::time::sleep(Duration::from_secs(7)).await;
        cluster
            .heal(ClusterRole::Primary, ClusterRole::Secondary)
            .await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.advise("demote").await.unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(commands.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(
            cluster.record(ClusterRole::Primary).await.unwrap().db_role,
            DbRole::Master
        );

        assert_eq!(commands.recv().await, Some(Command::Kill));
        assert_eq!(
            cluster.record(ClusterRole::Primary).await.unwrap().db_role,
            DbRole::DeadMaster
        );

        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_demote_ignored_by_slave() {
        let cluster = steady_cluster().await;
        let status = cluster.handle(ClusterRole::Secondary);
        let (mut engine, mut commands) =
            DecisionEngine::new(status.clone(), status, DecisionConfig::default());
        engine.seed_last_known_cluster().await.unwrap();

        assert_eq!(engine.on_advice(Advice::Demote).await.unwrap(), None);
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_other_advice_only_checks_cluster() {
        let cluster = steady_cluster().await;
        let status = cluster.handle(ClusterRole::Primary);
        let (mut engine, _commands) =
            DecisionEngine::new(status.clone(), status, DecisionConfig::default());
        engine.seed_last_known_cluster().await.unwrap();

        let advice = Advice::from("recheck");
        assert_eq!(engine.on_advice(advice).await.unwrap(), None);
        assert!(logs_contain("got some advice: recheck"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_loop_exits_after_startup() {
        let cluster = steady_cluster().await;
        let status = cluster.handle(ClusterRole::Monitor);
        let (engine, mut commands) =
            DecisionEngine::new(status.clone(), status, DecisionConfig::default());

        let (_handle, task) = engine.spawn(CancellationToken::new());
        task.await.unwrap().unwrap();
        assert_eq!(commands.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_cluster_forms() {
        let cluster = MemoryCluster::new();
        let status = cluster
            .join(StatusRecord::new(ClusterRole::Primary, "127.0.0.1"))
            .await;
        let (engine, _commands) =
            DecisionEngine::new(status.clone(), status, DecisionConfig::default());

        let (handle, task) = engine.spawn(CancellationToken::new());
        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.shutdown();

        task.await.unwrap().unwrap();
        assert!(handle.is_shutdown());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_coalesces_ticks() {
        let (tx, mut rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let ticker = spawn_ticker(Duration::from_secs(10), tx, shutdown.clone());

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(rx.try_recv(), Ok(()));
        assert!(rx.try_recv().is_err());

        shutdown.cancel();
        ticker.await.unwrap();
    }
}
