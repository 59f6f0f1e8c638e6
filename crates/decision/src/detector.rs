//! Detects decision-worthy changes in cluster membership.

use tracing::{debug, info};
use warden_status::{ClusterMembership, StatusRecord, StatusStore};

use crate::engine::DecisionEngine;
use crate::error::DecisionResult;

impl<M, S> DecisionEngine<M, S>
where
    M: ClusterMembership,
    S: StatusStore,
{
    /// Compares a fresh snapshot against the last known cluster.
    ///
    /// Returns true and adopts the fresh snapshot as the new baseline if the
    /// member count changed, a known member can no longer be looked up, or a
    /// known member's role changed. Leaves the baseline alone otherwise.
    ///
    /// # Errors
    ///
    /// Fails if membership or status lookups fail for reasons other than
    /// reachability.
    pub async fn cluster_changes(&mut self) -> DecisionResult<bool> {
        let current = self.snapshot().await?;

        let Some(reason) = self.change_reason(&current).await? else {
            return Ok(false);
        };

        debug!("{}", reason);
        info!("cluster members changed: {}", describe(&current));
        self.last_known_cluster = current;

        Ok(true)
    }

    async fn change_reason(&self, current: &[StatusRecord]) -> DecisionResult<Option<String>> {
        if self.last_known_cluster.len() != current.len() {
            return Ok(Some(format!(
                "cluster size changed from {} to {}",
                self.last_known_cluster.len(),
                current.len()
            )));
        }

        for member in &self.last_known_cluster {
            match self.whois(member.cluster_role).await? {
                None => {
                    return Ok(Some(format!(
                        "{} died while pulling its updates",
                        member.cluster_role
                    )));
                }
                Some(remote) if remote.db_role != member.db_role => {
                    return Ok(Some(format!(
                        "{} role changed from {} to {}",
                        member.cluster_role, member.db_role, remote.db_role
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(None)
    }
}

fn describe(cluster: &[StatusRecord]) -> String {
    cluster
        .iter()
        .map(|member| format!("({}:{})", member.cluster_role, member.ip))
        .collect()
}
