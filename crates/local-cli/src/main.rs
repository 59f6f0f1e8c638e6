//! CLI binary to run a whole primary/secondary/monitor cluster in one
//! process and poke at it from a prompt.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod control;
mod executor;

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use control::Control;
use executor::LocalExecutor;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use warden_decision::{DecisionConfig, DecisionEngine, DecisionHandle, DecisionResult};
use warden_status::{ClusterRole, StatusRecord};
use warden_status_memory::MemoryCluster;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A decision loop stopped on a fatal error.
    #[error("{member} decision loop failed: {source}")]
    Decision {
        /// The member whose loop failed.
        member: ClusterRole,
        /// The error that stopped it.
        source: warden_decision::Error,
    },

    /// A decision loop panicked or was aborted.
    #[error("{member} decision task failed: {source}")]
    Join {
        /// The member whose task failed.
        member: ClusterRole,
        /// The panic or cancellation.
        source: JoinError,
    },

    /// The task watching a decision loop failed.
    #[error("watcher task failed: {0}")]
    Watcher(#[from] JoinError),

    /// Reading the control prompt failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Seconds to wait after losing the peer before acting on it
    #[arg(long, default_value_t = 10, env = "WARDEN_DECISION_TIMEOUT")]
    decision_timeout: u64,

    /// Seconds between periodic cluster checks
    #[arg(long, default_value_t = 10, env = "WARDEN_TICK_INTERVAL")]
    tick_interval: u64,

    /// Seconds between polls while waiting for all members to join
    #[arg(long, default_value_t = 1, env = "WARDEN_GATE_POLL_INTERVAL")]
    gate_poll_interval: u64,

    /// Address recorded for the primary
    #[arg(long, default_value = "127.0.0.1", env = "WARDEN_PRIMARY_IP")]
    primary_ip: String,

    /// Address recorded for the secondary
    #[arg(long, default_value = "127.0.0.2", env = "WARDEN_SECONDARY_IP")]
    secondary_ip: String,

    /// Address recorded for the monitor
    #[arg(long, default_value = "127.0.0.3", env = "WARDEN_MONITOR_IP")]
    monitor_ip: String,
}

impl Args {
    fn decision_config(&self) -> DecisionConfig {
        DecisionConfig::default()
            .with_decision_timeout(Duration::from_secs(self.decision_timeout))
            .with_tick_interval(Duration::from_secs(self.tick_interval))
            .with_gate_poll_interval(Duration::from_secs(self.gate_poll_interval))
    }

    fn ip(&self, identity: ClusterRole) -> &str {
        match identity {
            ClusterRole::Primary => &self.primary_ip,
            ClusterRole::Secondary => &self.secondary_ip,
            ClusterRole::Monitor => &self.monitor_ip,
        }
    }
}

type NodeTasks = JoinSet<(ClusterRole, Result<(), Error>)>;

/// Waits for a member's decision loop and reports how it ended. A panic is
/// as fatal as an error returned by the loop.
async fn watch_node(
    member: ClusterRole,
    task: JoinHandle<DecisionResult<()>>,
) -> (ClusterRole, Result<(), Error>) {
    let outcome = match task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(Error::Decision { member, source }),
        Err(source) => Err(Error::Join { member, source }),
    };

    (member, outcome)
}

async fn start_cluster(
    args: &Args,
    shutdown: &CancellationToken,
) -> (MemoryCluster, HashMap<ClusterRole, DecisionHandle>, NodeTasks) {
    let cluster = MemoryCluster::new();
    let config = args.decision_config();
    let mut handles = HashMap::new();
    let mut tasks = JoinSet::new();

    for identity in ClusterRole::ALL {
        let status = cluster
            .join(StatusRecord::new(identity, args.ip(identity)))
            .await;
        let (engine, commands) =
            DecisionEngine::new(status.clone(), status.clone(), config.clone());

        LocalExecutor::new(identity, status).spawn(commands);

        let (handle, task) = engine.spawn(shutdown.child_token());
        tasks.spawn(watch_node(identity, task));
        handles.insert(identity, handle);
    }

    info!(
        "started local cluster (decision timeout {:?}, tick interval {:?})",
        config.decision_timeout, config.tick_interval
    );

    (cluster, handles, tasks)
}

async fn print_status(cluster: &MemoryCluster) {
    for record in cluster.records().await {
        println!(
            "{:<10} {:<14} {:<18} {:<15} {}",
            record.cluster_role,
            record.db_role,
            record.state,
            record.ip,
            record.updated_at.to_rfc3339()
        );
    }

    for (a, b) in cut_links(cluster).await {
        println!("{a} -x- {b}");
    }
}

/// Pairs of members that cannot currently see each other.
async fn cut_links(cluster: &MemoryCluster) -> Vec<(ClusterRole, ClusterRole)> {
    let mut cut = Vec::new();
    for (i, a) in ClusterRole::ALL.into_iter().enumerate() {
        for b in ClusterRole::ALL.into_iter().skip(i + 1) {
            if !cluster.is_reachable(a, b).await {
                cut.push((a, b));
            }
        }
    }
    cut
}

/// Applies one control line. Returns `false` when the prompt should stop.
async fn apply(
    control: Control,
    cluster: &MemoryCluster,
    handles: &HashMap<ClusterRole, DecisionHandle>,
) -> bool {
    match control {
        Control::Status => print_status(cluster).await,
        Control::Down(member) => cluster.set_down(member, true).await,
        Control::Up(member) => cluster.set_down(member, false).await,
        Control::Partition(a, b) => cluster.partition(a, b).await,
        Control::Heal(a, b) => cluster.heal(a, b).await,
        Control::Advise(member, advice) => {
            if let Some(handle) = handles.get(&member) {
                if let Err(e) = handle.advise(advice).await {
                    warn!("{} is not taking advice: {}", member, e);
                }
            }
        }
        Control::Quit => return false,
    }

    true
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = sigint.recv() => info!("Received SIGINT"),
                    }
                }
                _ => {
                    warn!("failed to install signal handlers, falling back to ctrl-c");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt signal");
        }

        info!("Shutting down");
        shutdown.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let (cluster, handles, mut tasks) = start_cluster(&args, &shutdown).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut outcome = Ok(());

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            Some(joined) = tasks.join_next() => match joined? {
                (member, Ok(())) => debug!("{} decision loop finished", member),
                (_, Err(e)) => {
                    error!("stopping: {}", e);
                    outcome = Err(e);
                    break;
                }
            },
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match line.parse::<Control>() {
                    Ok(control) => {
                        if !apply(control, &cluster, &handles).await {
                            break;
                        }
                    }
                    Err(e) => warn!("{}", e),
                },
                None => {
                    debug!("control input closed");
                    break;
                }
            },
        }
    }

    shutdown.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let (_, Err(e)) = joined? {
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }
    }

    outcome
}
