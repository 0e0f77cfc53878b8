//! Launch handle handed to user step code

use crate::coordinator::{LaunchCoordinator, LaunchPlan};
use crate::process::LaunchReport;
use crate::runtime::ShutdownHandle;
use rendezvous_core::command::keys;
use rendezvous_core::{
    ArgMap, EntrypointArgs, ExecutionContext, LaunchSpec, NodeRole, RendezvousConfig, Result,
};
use tracing::info;

/// Read-only view of this node's resolved rendezvous, able to run further
/// distributed launches with it.
///
/// Only created once every bootstrap stage has succeeded.
pub struct RendezvousHandle {
    context: ExecutionContext,
    role: NodeRole,
    rendezvous: RendezvousConfig,
    launcher_args: ArgMap,
    coordinator: LaunchCoordinator,
}

impl RendezvousHandle {
    pub(crate) fn new(
        context: ExecutionContext,
        role: NodeRole,
        rendezvous: RendezvousConfig,
        launcher_args: ArgMap,
        coordinator: LaunchCoordinator,
    ) -> Self {
        Self {
            context,
            role,
            rendezvous,
            launcher_args,
            coordinator,
        }
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn rendezvous(&self) -> &RendezvousConfig {
        &self.rendezvous
    }

    /// Launcher overrides applied to every launch from this handle
    pub fn launcher_args(&self) -> &ArgMap {
        &self.launcher_args
    }

    /// Cancel a running launch from another thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.coordinator.runtime().shutdown_handle()
    }

    /// Run `entrypoint` across the cluster and wait for it.
    ///
    /// `nproc_per_node` takes precedence over a configured `nproc_per_node`
    /// override. Fails if any node process exits non-zero.
    pub fn run(
        &self,
        entrypoint: impl Into<String>,
        args: impl Into<EntrypointArgs>,
        nproc_per_node: u32,
    ) -> Result<LaunchReport> {
        let spec = LaunchSpec::new(entrypoint)
            .with_args(args)
            .with_launcher_arg(keys::NPROC_PER_NODE, nproc_per_node)
            .with_nproc_per_node(nproc_per_node);

        self.launch(spec)
    }

    /// Run a complete launch spec; fails if any node process exits non-zero
    pub fn launch(&self, spec: LaunchSpec) -> Result<LaunchReport> {
        let report = self.execute(spec)?.into_result()?;
        info!(
            command = %report.command,
            processes = report.outcomes.len(),
            "Launch succeeded"
        );
        Ok(report)
    }

    /// Run a complete launch spec and report every node, failed ones included.
    ///
    /// Handle-level overrides sit beneath the spec's own overrides.
    pub fn execute(&self, mut spec: LaunchSpec) -> Result<LaunchReport> {
        let mut launcher_args = self.launcher_args.clone();
        for (key, value) in spec.launcher_args.drain(..) {
            launcher_args.insert(key, value);
        }
        spec.launcher_args = launcher_args;

        let plan = LaunchPlan {
            context: self.context,
            role: self.role,
            rendezvous: self.rendezvous.clone(),
            spec,
        };

        self.coordinator.launch(&plan)
    }
}
