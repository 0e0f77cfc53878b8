//! Launch coordination
//!
//! Runs the launcher for this node and, when the control process simulates a
//! multi-node run on one machine, one sibling launcher per simulated node.
//! Every command is built before the first process spawns, every process is
//! spawned before the first join, and every process is joined (or killed and
//! reaped) before a launch returns.

use crate::process::{LaunchReport, NodeOutcome, NodeProcess};
use crate::runtime::{shutdown_requested, LaunchRuntime, ShutdownReceiver};
use futures::future::join_all;
use rendezvous_core::{
    CommandBuilder, Error, ExecutionContext, LaunchCommand, LaunchSpec, NodeRole,
    RendezvousConfig, Result,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything one launch needs
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub context: ExecutionContext,
    pub role: NodeRole,
    pub rendezvous: RendezvousConfig,
    pub spec: LaunchSpec,
}

impl LaunchPlan {
    /// Whether this process must also spawn the other simulated nodes
    pub fn fans_out(&self) -> bool {
        self.context.is_local() && self.role == NodeRole::Control
    }
}

/// Why a launch stopped before all nodes exited
enum Cancelled {
    Shutdown,
    Timeout(Duration),
}

/// Spawns and joins node processes
pub struct LaunchCoordinator {
    runtime: LaunchRuntime,
    builder: CommandBuilder,
    program: PathBuf,
    join_timeout: Option<Duration>,
}

impl LaunchCoordinator {
    /// `program` is the already located launcher executable
    pub fn new(
        runtime: LaunchRuntime,
        builder: CommandBuilder,
        program: PathBuf,
        join_timeout: Option<Duration>,
    ) -> Self {
        Self {
            runtime,
            builder,
            program,
            join_timeout,
        }
    }

    pub fn builder(&self) -> &CommandBuilder {
        &self.builder
    }

    pub fn runtime(&self) -> &LaunchRuntime {
        &self.runtime
    }

    /// Build the command of every node this process is responsible for,
    /// this node first
    pub fn plan_commands(&self, plan: &LaunchPlan) -> Result<Vec<(RendezvousConfig, LaunchCommand)>> {
        let own = self.builder.build(&plan.rendezvous, &plan.spec)?;
        let mut commands = vec![(plan.rendezvous.clone(), own)];

        if plan.fans_out() {
            for rank in 0..plan.rendezvous.total_nodes {
                if rank == plan.rendezvous.this_node_rank {
                    continue;
                }
                let sibling = plan.rendezvous.for_rank(rank)?;
                let command = self.builder.build(&sibling, &plan.spec)?;
                commands.push((sibling, command));
            }
        }

        Ok(commands)
    }

    /// Run a launch to completion, blocking the calling thread
    pub fn launch(&self, plan: &LaunchPlan) -> Result<LaunchReport> {
        let commands = self.plan_commands(plan)?;
        let shutdown_rx = self.runtime.shutdown_receiver();

        info!(
            context = %plan.context,
            role = %plan.role,
            rank = plan.rendezvous.this_node_rank,
            total_nodes = plan.rendezvous.total_nodes,
            processes = commands.len(),
            program = %self.program.display(),
            "Starting launch"
        );

        self.runtime.block_on(self.run_nodes(commands, shutdown_rx))?
    }

    async fn run_nodes(
        &self,
        commands: Vec<(RendezvousConfig, LaunchCommand)>,
        mut shutdown_rx: ShutdownReceiver,
    ) -> Result<LaunchReport> {
        if *shutdown_rx.borrow() {
            warn!("Shutdown already requested, nothing spawned");
            return Err(interrupted());
        }

        let own_command = commands[0].1.clone();
        let mut nodes = Vec::with_capacity(commands.len());

        for (rdzv, command) in &commands {
            debug!(rank = rdzv.this_node_rank, command = %command, "Launch command");
            match NodeProcess::spawn(&self.program, command, rdzv) {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    error!(error = %e, "Spawn failed, terminating already spawned nodes");
                    terminate_all(&mut nodes).await;
                    return Err(e);
                }
            }
        }

        let cancelled = {
            let joined = join_all(nodes.iter_mut().map(|node| node.wait()));
            tokio::select! {
                outcomes = joined => {
                    let report = LaunchReport::new(own_command, outcomes);
                    info!(
                        processes = report.outcomes.len(),
                        failed = report.failures().count(),
                        "All node processes joined"
                    );
                    return Ok(report);
                }
                _ = shutdown_requested(&mut shutdown_rx) => Cancelled::Shutdown,
                _ = sleep_or_forever(self.join_timeout) => {
                    Cancelled::Timeout(self.join_timeout.unwrap_or_default())
                }
            }
        };

        let outcomes = terminate_all(&mut nodes).await;
        warn!(
            terminated = outcomes.iter().filter(|o| !o.success).count(),
            "Launch cancelled, node processes reaped"
        );

        Err(match cancelled {
            Cancelled::Shutdown => interrupted(),
            Cancelled::Timeout(timeout) => Error::Timeout {
                operation: "joining node processes".to_string(),
                timeout_ms: timeout.as_millis() as u64,
            },
        })
    }
}

fn interrupted() -> Error {
    Error::Interrupted {
        reason: "shutdown requested".to_string(),
    }
}

async fn terminate_all(nodes: &mut [NodeProcess]) -> Vec<NodeOutcome> {
    join_all(nodes.iter_mut().map(|node| node.terminate())).await
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
