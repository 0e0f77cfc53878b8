//! Environment snapshot and execution-context classification

use crate::{ClusterKind, Error, ExecutionContext, Result};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Variables set by the outer framework and the cluster schedulers
pub mod vars {
    /// Runtime marker; missing or `local` means local simulation
    pub const RUNTIME_ENVIRONMENT: &str = "METAFLOW_RUNTIME_ENVIRONMENT";
    pub const LOCAL_RUNTIME: &str = "local";

    // Batch-style multi-node jobs
    pub const BATCH_JOB_ID: &str = "AWS_BATCH_JOB_ID";
    pub const BATCH_NUM_NODES: &str = "AWS_BATCH_JOB_NUM_NODES";
    pub const BATCH_NODE_INDEX: &str = "AWS_BATCH_JOB_NODE_INDEX";
    pub const BATCH_MAIN_NODE_IP: &str = "AWS_BATCH_JOB_MAIN_NODE_PRIVATE_IPV4_ADDRESS";

    // Pod-set style jobs
    pub const WORLD_SIZE: &str = "WORLD_SIZE";
    pub const RANK: &str = "RANK";
    pub const MASTER_ADDR: &str = "MASTER_ADDR";
}

/// Immutable copy of a process environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment; non UTF-8 entries are skipped
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Look up a variable that must be present
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| Error::MissingEnvVar {
            name: name.to_string(),
        })
    }

    /// Look up and parse a variable that must be present
    pub fn require_parsed<T>(&self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.require(name)?;
        value.trim().parse().map_err(|e: T::Err| Error::InvalidEnvVar {
            name: name.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for EnvSnapshot
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Determine which cluster backend, if any, placed this process
pub fn classify(env: &EnvSnapshot) -> ExecutionContext {
    match env.get(vars::RUNTIME_ENVIRONMENT) {
        None | Some(vars::LOCAL_RUNTIME) => ExecutionContext::LocalSimulation,
        Some(_) if env.contains(vars::BATCH_JOB_ID) => {
            ExecutionContext::ClusterScheduled(ClusterKind::Batch)
        }
        Some(_) => ExecutionContext::ClusterScheduled(ClusterKind::PodSet),
    }
}
