//! Launch command assembly

use crate::{ArgMap, ArgValue, EntrypointArgs, Error, LaunchSpec, RendezvousConfig, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Launcher argument names filled in from the resolved rendezvous
pub mod keys {
    pub const RDZV_ID: &str = "rdzv_id";
    pub const RDZV_ENDPOINT: &str = "rdzv_endpoint";
    pub const NNODES: &str = "nnodes";
    pub const MASTER_ADDR: &str = "master_addr";
    pub const MASTER_PORT: &str = "master_port";
    pub const NODE_RANK: &str = "node_rank";
    pub const NPROC_PER_NODE: &str = "nproc_per_node";
    pub const RDZV_BACKEND: &str = "rdzv_backend";
}

/// A fully assembled launcher invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommand {
    /// Launcher program
    pub program: String,

    /// Arguments after the program
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Space-joined command line, as recorded for the step
    pub fn command_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Builds launcher commands from a rendezvous config and a launch spec
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: String,
    rdzv_backend: String,
}

impl CommandBuilder {
    pub fn new(program: impl Into<String>, rdzv_backend: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            rdzv_backend: rdzv_backend.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Launcher arguments computed from the rendezvous alone
    pub fn defaults(&self, rdzv: &RendezvousConfig, nproc_per_node: u32) -> ArgMap {
        let mut defaults = ArgMap::with_capacity(8);
        defaults.insert(keys::RDZV_ID.to_string(), ArgValue::from(rdzv.id.as_str()));
        defaults.insert(keys::RDZV_ENDPOINT.to_string(), ArgValue::from(rdzv.endpoint()));
        defaults.insert(keys::NNODES.to_string(), ArgValue::from(rdzv.total_nodes));
        defaults.insert(
            keys::MASTER_ADDR.to_string(),
            ArgValue::from(rdzv.main_address.as_str()),
        );
        defaults.insert(keys::MASTER_PORT.to_string(), ArgValue::from(rdzv.main_port));
        defaults.insert(keys::NODE_RANK.to_string(), ArgValue::from(rdzv.this_node_rank));
        defaults.insert(keys::NPROC_PER_NODE.to_string(), ArgValue::from(nproc_per_node));
        defaults.insert(
            keys::RDZV_BACKEND.to_string(),
            ArgValue::from(self.rdzv_backend.as_str()),
        );
        defaults
    }

    /// Assemble the command for one node.
    ///
    /// Overrides in `spec.launcher_args` replace defaults key by key; a key
    /// already present keeps its position, new keys follow in override order.
    pub fn build(&self, rdzv: &RendezvousConfig, spec: &LaunchSpec) -> Result<LaunchCommand> {
        let entrypoint_args = spec.entrypoint_args()?;
        if spec.entrypoint.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "entrypoint must not be empty".to_string(),
            });
        }
        if spec.nproc_per_node == 0 {
            return Err(Error::InvalidConfig {
                message: "nproc_per_node must be at least 1".to_string(),
            });
        }

        let mut launcher_args = self.defaults(rdzv, spec.nproc_per_node);
        for (key, value) in &spec.launcher_args {
            launcher_args.insert(key.clone(), value.clone());
        }

        let mut args =
            Vec::with_capacity(launcher_args.len() * 2 + 1 + entrypoint_args.token_count());
        push_pairs(&mut args, &launcher_args);
        args.push(spec.entrypoint.clone());
        match entrypoint_args {
            EntrypointArgs::Keyed(map) => push_pairs(&mut args, &map),
            EntrypointArgs::Raw(tokens) => args.extend(tokens),
        }

        Ok(LaunchCommand {
            program: self.program.clone(),
            args,
        })
    }
}

fn push_pairs(args: &mut Vec<String>, pairs: &ArgMap) {
    for (key, value) in pairs {
        args.push(format!("--{key}"));
        args.push(value.to_string());
    }
}
