//! The per-node decision engine and its access to collaborators.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use warden_status::{ClusterMembership, ClusterRole, DbRole, StatusError, StatusRecord, StatusStore};

use crate::command::{Command, Transition};
use crate::config::DecisionConfig;
use crate::error::{DecisionResult, Error};

/// Decides this node's database role and emits commands for the executor.
///
/// All state lives on the instance and is only touched from the task that
/// owns it, so nothing here is locked.
pub struct DecisionEngine<M, S>
where
    M: ClusterMembership,
    S: StatusStore,
{
    pub(crate) membership: M,
    pub(crate) store: S,
    pub(crate) config: DecisionConfig,
    pub(crate) commands: mpsc::Sender<Command>,
    /// Baseline for change detection. Refreshed on every detected change
    /// and after every role update.
    pub(crate) last_known_cluster: Vec<StatusRecord>,
}

impl<M, S> DecisionEngine<M, S>
where
    M: ClusterMembership,
    S: StatusStore,
{
    /// Creates an engine and the receiving end of its command stream.
    pub fn new(
        membership: M,
        store: S,
        config: DecisionConfig,
    ) -> (Self, mpsc::Receiver<Command>) {
        let (commands, receiver) = mpsc::channel(config.command_capacity());

        let engine = Self {
            membership,
            store,
            config,
            commands,
            last_known_cluster: Vec::new(),
        };

        (engine, receiver)
    }

    /// The engine configuration.
    pub const fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// The snapshot change detection currently compares against.
    pub fn last_known_cluster(&self) -> &[StatusRecord] {
        &self.last_known_cluster
    }

    /// Replaces the change detection baseline with a fresh snapshot.
    pub async fn seed_last_known_cluster(&mut self) -> DecisionResult<()> {
        self.last_known_cluster = self.snapshot().await?;
        Ok(())
    }

    pub(crate) async fn snapshot(&self) -> DecisionResult<Vec<StatusRecord>> {
        self.membership
            .cluster()
            .await
            .map_err(|e| Error::Membership(e.to_string()))
    }

    pub(crate) async fn whoami(&self) -> DecisionResult<StatusRecord> {
        self.store
            .whoami()
            .await
            .map_err(|e| Error::Status(e.to_string()))
    }

    pub(crate) async fn whois(
        &self,
        identity: ClusterRole,
    ) -> DecisionResult<Option<StatusRecord>> {
        absent_if_unreachable(self.store.whois(identity).await)
    }

    /// The other data-holding member, if reachable.
    pub(crate) async fn peer(&self, me: ClusterRole) -> DecisionResult<Option<StatusRecord>> {
        absent_if_unreachable(self.store.whoisnot(me).await)
    }

    pub(crate) async fn monitor(&self) -> DecisionResult<Option<StatusRecord>> {
        self.whois(ClusterRole::Monitor).await
    }

    /// Whether the monitor still lists `identity` in its own view of the
    /// cluster. An unreachable monitor sees nothing.
    pub(crate) async fn monitor_sees(&self, identity: ClusterRole) -> DecisionResult<bool> {
        let seen = match self.membership.cluster_seen_by(ClusterRole::Monitor).await {
            Ok(seen) => seen,
            Err(e) if e.is_unreachable() => Vec::new(),
            Err(e) => return Err(Error::Membership(e.to_string())),
        };

        Ok(seen.iter().any(|member| member.cluster_role == identity))
    }

    pub(crate) async fn set_db_role(&self, role: DbRole) -> DecisionResult<()> {
        self.store
            .set_db_role(role)
            .await
            .map_err(|e| Error::Status(e.to_string()))
    }

    /// Re-baselines change detection against the world that includes our
    /// latest role. If the snapshot fails, only our own entry in the old
    /// baseline is replaced; if that read fails too the baseline is cleared
    /// and the next tick re-evaluates.
    pub(crate) async fn refresh_last_known_cluster(&mut self) {
        let err = match self.snapshot().await {
            Ok(cluster) => {
                self.last_known_cluster = cluster;
                return;
            }
            Err(e) => e,
        };
        warn!("failed to refresh cluster after role update: {}", err);

        match self.whoami().await {
            Ok(me) => {
                if let Some(entry) = self
                    .last_known_cluster
                    .iter_mut()
                    .find(|member| member.cluster_role == me.cluster_role)
                {
                    *entry = me;
                }
            }
            Err(e) => {
                warn!("failed to read own record, re-evaluating on next tick: {}", e);
                self.last_known_cluster.clear();
            }
        }
    }

    pub(crate) async fn emit(&self, command: Command) -> DecisionResult<()> {
        debug!("emitting command {}", command);
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::CommandChannelClosed)
    }

    /// Moves to `to`, emitting the matching command.
    pub(crate) async fn transition(
        &mut self,
        from: DbRole,
        to: DbRole,
        reason: &str,
    ) -> DecisionResult<Transition> {
        let command = Command::for_role(to).ok_or(Error::invariant(to, "transition"))?;

        self.set_db_role(to).await?;
        info!("{}: going {} (was {}, command {})", reason, to, from, command);
        self.emit(command).await?;
        self.refresh_last_known_cluster().await;

        Ok(Transition { from, to, command })
    }
}

fn absent_if_unreachable<E>(result: Result<StatusRecord, E>) -> DecisionResult<Option<StatusRecord>>
where
    E: StatusError,
{
    match result {
        Ok(record) => Ok(Some(record)),
        Err(e) if e.is_unreachable() => Ok(None),
        Err(e) => Err(Error::Status(e.to_string())),
    }
}
