//! In-memory (single process) implementation of cluster membership and
//! status records for tests and local simulation.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use warden_status::{ClusterMembership, ClusterRole, DbRole, StatusRecord, StatusStore};

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<ClusterRole, StatusRecord>,
    down: HashSet<ClusterRole>,
    partitions: HashSet<(ClusterRole, ClusterRole)>,
    last_write: Option<DateTime<Utc>>,
}

impl Inner {
    fn link(a: ClusterRole, b: ClusterRole) -> (ClusterRole, ClusterRole) {
        if (a as u8) <= (b as u8) { (a, b) } else { (b, a) }
    }

    fn reachable(&self, from: ClusterRole, to: ClusterRole) -> bool {
        if !self.records.contains_key(&to) {
            return false;
        }
        if from == to {
            return true;
        }

        !self.down.contains(&from)
            && !self.down.contains(&to)
            && !self.partitions.contains(&Self::link(from, to))
    }

    fn snapshot(&self, from: ClusterRole) -> Vec<StatusRecord> {
        ClusterRole::ALL
            .into_iter()
            .filter(|identity| self.reachable(from, *identity))
            .filter_map(|identity| self.records.get(&identity).cloned())
            .collect()
    }

    // Writes are strictly ordered cluster-wide, even within one clock tick.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_write {
            Some(last) if now <= last => last + TimeDelta::nanoseconds(1),
            _ => now,
        };
        self.last_write = Some(stamp);
        stamp
    }
}

/// Shared in-memory cluster with controllable reachability.
#[derive(Clone, Debug, Default)]
pub struct MemoryCluster {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a member record and returns the member's view.
    pub async fn join(&self, mut record: StatusRecord) -> MemoryStatus {
        let identity = record.cluster_role;
        let mut inner = self.inner.lock().await;
        record.updated_at = inner.next_timestamp();
        inner.records.insert(identity, record);
        debug!("{} joined the memory cluster", identity);

        self.handle(identity)
    }

    /// Returns the view of the cluster from the given member.
    #[must_use]
    pub fn handle(&self, identity: ClusterRole) -> MemoryStatus {
        MemoryStatus {
            cluster: self.clone(),
            identity,
        }
    }

    /// Marks a member as crashed (`true`) or running again (`false`).
    pub async fn set_down(&self, identity: ClusterRole, down: bool) {
        let mut inner = self.inner.lock().await;
        if down {
            inner.down.insert(identity);
        } else {
            inner.down.remove(&identity);
        }
        debug!("{} marked {}", identity, if down { "down" } else { "up" });
    }

    /// Cuts the link between two members.
    pub async fn partition(&self, a: ClusterRole, b: ClusterRole) {
        self.inner.lock().await.partitions.insert(Inner::link(a, b));
        debug!("partitioned {} from {}", a, b);
    }

    /// Restores the link between two members.
    pub async fn heal(&self, a: ClusterRole, b: ClusterRole) {
        self.inner.lock().await.partitions.remove(&Inner::link(a, b));
        debug!("healed link between {} and {}", a, b);
    }

    /// Restores every link and brings every member back up.
    pub async fn heal_all(&self) {
        let mut inner = self.inner.lock().await;
        inner.partitions.clear();
        inner.down.clear();
    }

    /// Whether `from` can currently reach `to`.
    pub async fn is_reachable(&self, from: ClusterRole, to: ClusterRole) -> bool {
        self.inner.lock().await.reachable(from, to)
    }

    /// The stored record of a member, ignoring reachability.
    pub async fn record(&self, identity: ClusterRole) -> Option<StatusRecord> {
        self.inner.lock().await.records.get(&identity).cloned()
    }

    /// All stored records, ignoring reachability.
    pub async fn records(&self) -> Vec<StatusRecord> {
        let inner = self.inner.lock().await;
        ClusterRole::ALL
            .into_iter()
            .filter_map(|identity| inner.records.get(&identity).cloned())
            .collect()
    }
}

/// One member's view of a [`MemoryCluster`].
#[derive(Clone, Debug)]
pub struct MemoryStatus {
    cluster: MemoryCluster,
    identity: ClusterRole,
}

impl MemoryStatus {
    async fn update<F>(&self, apply: F) -> Result<(), Error>
    where
        F: FnOnce(&mut StatusRecord) + Send,
    {
        let mut inner = self.cluster.inner.lock().await;
        let stamp = inner.next_timestamp();
        let record = inner
            .records
            .get_mut(&self.identity)
            .ok_or(Error::NotRegistered(self.identity))?;
        apply(record);
        record.updated_at = stamp;

        Ok(())
    }
}

#[async_trait]
impl ClusterMembership for MemoryStatus {
    type Error = Error;

    async fn cluster(&self) -> Result<Vec<StatusRecord>, Self::Error> {
        Ok(self.cluster.inner.lock().await.snapshot(self.identity))
    }

    async fn cluster_seen_by(
        &self,
        identity: ClusterRole,
    ) -> Result<Vec<StatusRecord>, Self::Error> {
        let inner = self.cluster.inner.lock().await;
        if !inner.reachable(self.identity, identity) {
            return Err(Error::Unreachable(identity));
        }

        Ok(inner.snapshot(identity))
    }
}

#[async_trait]
impl StatusStore for MemoryStatus {
    type Error = Error;

    async fn whoami(&self) -> Result<StatusRecord, Self::Error> {
        self.cluster
            .record(self.identity)
            .await
            .ok_or(Error::NotRegistered(self.identity))
    }

    async fn whois(&self, identity: ClusterRole) -> Result<StatusRecord, Self::Error> {
        let inner = self.cluster.inner.lock().await;
        if !inner.reachable(self.identity, identity) {
            return Err(Error::Unreachable(identity));
        }

        inner
            .records
            .get(&identity)
            .cloned()
            .ok_or(Error::Unreachable(identity))
    }

    async fn whoisnot(&self, identity: ClusterRole) -> Result<StatusRecord, Self::Error> {
        let peer = identity.peer().ok_or(Error::NoPeer(identity))?;
        self.whois(peer).await
    }

    async fn set_db_role(&self, role: DbRole) -> Result<(), Self::Error> {
        self.update(|record| record.db_role = role).await
    }

    async fn set_state(&self, state: &str) -> Result<(), Self::Error> {
        let state = state.to_string();
        self.update(|record| record.state = state).await
    }
}
