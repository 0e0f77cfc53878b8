//! Node process handles and launch reports

use chrono::{DateTime, Utc};
use rendezvous_core::{Error, LaunchCommand, NodeRank, RendezvousConfig, Result};
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// One spawned launcher process standing in for a node
#[derive(Debug)]
pub struct NodeProcess {
    node_rank: NodeRank,
    child: Child,
    started_at: DateTime<Utc>,
}

impl NodeProcess {
    /// Spawn the launcher for one node with its rendezvous variables set.
    ///
    /// The child is killed if its handle is dropped before it was reaped.
    pub fn spawn(
        program: &Path,
        command: &LaunchCommand,
        rdzv: &RendezvousConfig,
    ) -> Result<Self> {
        let node_rank = rdzv.this_node_rank;
        let child = Command::new(program)
            .args(&command.args)
            .envs(rdzv.to_env())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn { node_rank, source })?;

        info!(
            rank = node_rank,
            pid = child.id(),
            endpoint = %rdzv.endpoint(),
            "Spawned node process"
        );

        Ok(Self {
            node_rank,
            child,
            started_at: Utc::now(),
        })
    }

    pub fn node_rank(&self) -> NodeRank {
        self.node_rank
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> NodeOutcome {
        let status = self.child.wait().await;
        let finished_at = Utc::now();

        match status {
            Ok(status) => {
                if status.success() {
                    info!(rank = self.node_rank, "Node process exited cleanly");
                } else {
                    warn!(rank = self.node_rank, %status, "Node process failed");
                }
                NodeOutcome {
                    node_rank: self.node_rank,
                    exit_code: status.code(),
                    success: status.success(),
                    started_at: self.started_at,
                    finished_at,
                }
            }
            Err(e) => {
                warn!(rank = self.node_rank, error = %e, "Error waiting for node process");
                NodeOutcome {
                    node_rank: self.node_rank,
                    exit_code: None,
                    success: false,
                    started_at: self.started_at,
                    finished_at,
                }
            }
        }
    }

    /// Kill the process if it is still running, then reap it
    pub async fn terminate(&mut self) -> NodeOutcome {
        if let Ok(None) = self.child.try_wait() {
            warn!(rank = self.node_rank, "Killing node process");
            if let Err(e) = self.child.start_kill() {
                warn!(rank = self.node_rank, error = %e, "Failed to signal node process");
            }
        }
        self.wait().await
    }
}

/// Exit record of one node process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeOutcome {
    pub node_rank: NodeRank,

    /// `None` when the process was killed by a signal or could not be waited on
    pub exit_code: Option<i32>,

    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Result of one launch, covering every node process it spawned
#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    /// Command run for this node
    pub command: LaunchCommand,

    /// One outcome per spawned process, sorted by node rank
    pub outcomes: Vec<NodeOutcome>,
}

impl LaunchReport {
    pub fn new(command: LaunchCommand, mut outcomes: Vec<NodeOutcome>) -> Self {
        outcomes.sort_by_key(|o| o.node_rank);
        Self { command, outcomes }
    }

    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }

    /// Fail with the lowest-ranked failing node if any node failed
    pub fn into_result(self) -> Result<Self> {
        let failed = self.failures().count();
        let first = self.failures().next().map(|o| (o.node_rank, o.exit_code));
        match first {
            Some((node_rank, exit_code)) => Err(Error::ChildProcessFailed {
                node_rank,
                exit_code,
                failed,
                total: self.outcomes.len(),
            }),
            None => Ok(self),
        }
    }
}
