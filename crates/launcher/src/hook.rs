//! Extension point called by the outer step framework
//!
//! The framework calls [`RendezvousHook::before_step`] synchronously right
//! before user step code runs. The hook classifies the environment, resolves
//! the rendezvous, checks the launcher binary, and, when a launch spec is
//! configured, runs it. On success the caller gets a [`RendezvousHandle`]
//! to pass into the step; on any failure no handle exists.

use crate::coordinator::LaunchCoordinator;
use crate::dependency::locate_launcher;
use crate::handle::RendezvousHandle;
use crate::process::LaunchReport;
use crate::runtime::{LaunchRuntime, ShutdownHandle};
use rendezvous_core::resolver::{HostLookup, Resolver, SystemHostLookup};
use rendezvous_core::{
    classify, BootstrapConfig, CommandBuilder, EnvSnapshot, Error, LaunchSpec, LocalTopology,
    NodeRank, NodeRole, RendezvousConfig, Result,
};
use std::ffi::OsStr;
use tracing::info;

/// What the outer framework knows about the step it is about to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    /// Run identifier shared by every node
    pub run_id: String,

    /// Step name shared by every node
    pub step_name: String,

    /// This process's role
    pub role: NodeRole,

    /// Node count of the simulated topology
    pub num_nodes: u32,

    /// Node index of this process in the simulated topology
    pub node_index: NodeRank,
}

impl StepContext {
    /// Rendezvous id, identical on every node of the step
    pub fn rendezvous_id(&self) -> String {
        format!("{}-{}", self.run_id, self.step_name)
    }

    fn local_topology(&self) -> LocalTopology {
        LocalTopology {
            total_nodes: self.num_nodes,
            this_node_rank: self.node_index,
        }
    }
}

/// Output of a successful hook invocation
pub struct StepLaunch {
    /// Handle to pass into the user step
    pub handle: RendezvousHandle,

    /// Report of the configured launch, if one was configured
    pub report: Option<LaunchReport>,
}

/// The single hook wired into the outer framework
pub struct RendezvousHook<H = SystemHostLookup> {
    config: BootstrapConfig,
    spec: Option<LaunchSpec>,
    hosts: H,
    shutdown: ShutdownHandle,
}

impl RendezvousHook<SystemHostLookup> {
    pub fn new(config: BootstrapConfig) -> Self {
        Self::with_hosts(config, SystemHostLookup)
    }
}

impl<H: HostLookup> RendezvousHook<H> {
    /// Hook using custom host lookups
    pub fn with_hosts(config: BootstrapConfig, hosts: H) -> Self {
        Self {
            config,
            spec: None,
            hosts,
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Run `spec` as part of the hook, before the step body
    pub fn with_launch(mut self, spec: LaunchSpec) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Cancel launches through `shutdown`, e.g. from a signal listener
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Resolve this node's rendezvous without touching the launcher
    pub fn resolve(&self, step: &StepContext, env: &EnvSnapshot) -> Result<RendezvousConfig> {
        if step.run_id.trim().is_empty() || step.step_name.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "run id and step name must not be empty".to_string(),
            });
        }

        let context = classify(env);
        let resolver = Resolver::new(env, &self.hosts, &self.config.rendezvous.local_address);
        let topology = resolver.resolve(context, step.role, Some(step.local_topology()))?;

        RendezvousConfig::from_topology(
            step.rendezvous_id(),
            topology,
            self.config.rendezvous.main_port,
        )
    }

    /// Classify, resolve, check the launcher and run the configured launch
    pub fn before_step(&self, step: &StepContext, env: &EnvSnapshot) -> Result<StepLaunch> {
        self.config.validate()?;

        let context = classify(env);
        let rendezvous = self.resolve(step, env)?;

        let launcher = &self.config.launcher;
        let program = locate_launcher(&launcher.program, env.get("PATH").map(OsStr::new))?;

        let runtime = LaunchRuntime::with_shutdown(
            self.config.coordinator.shutdown_grace,
            self.shutdown.clone(),
        )?;
        let coordinator = LaunchCoordinator::new(
            runtime,
            CommandBuilder::new(&launcher.program, &launcher.rdzv_backend),
            program,
            self.config.coordinator.join_timeout,
        );

        info!(
            context = %context,
            role = %step.role,
            rank = rendezvous.this_node_rank,
            total_nodes = rendezvous.total_nodes,
            endpoint = %rendezvous.endpoint(),
            "Rendezvous resolved"
        );

        let handle = RendezvousHandle::new(
            context,
            step.role,
            rendezvous,
            launcher.default_args.clone(),
            coordinator,
        );

        let report = match &self.spec {
            Some(spec) => Some(handle.launch(spec.clone())?),
            None => None,
        };

        Ok(StepLaunch { handle, report })
    }

    /// Run the hook, then the user step with the handle passed in explicitly
    pub fn run_step<T, F>(&self, step: &StepContext, env: &EnvSnapshot, user_step: F) -> Result<T>
    where
        F: FnOnce(&RendezvousHandle, Option<&LaunchReport>) -> Result<T>,
    {
        let launch = self.before_step(step, env)?;
        user_step(&launch.handle, launch.report.as_ref())
    }
}
