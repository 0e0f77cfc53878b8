//! Core type definitions for node rendezvous and launching

use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node index within the cluster
pub type NodeRank = u32;

/// Ordered launcher or entrypoint argument mapping
pub type ArgMap = IndexMap<String, ArgValue>;

/// Environment variables exported to every spawned node process
pub mod exported {
    pub const RDZV_ID: &str = "RDZV_ID";
    pub const RDZV_ENDPOINT: &str = "RDZV_ENDPOINT";
    pub const RDZV_NUM_NODES: &str = "RDZV_NUM_NODES";
    pub const RDZV_NODE_RANK: &str = "RDZV_NODE_RANK";
    pub const RDZV_ROLE: &str = "RDZV_ROLE";
}

/// Role of this process in the cluster
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Establishes the shared coordination values other nodes discover
    Control,

    /// Discovers the control node's coordination values
    Worker,
}

impl NodeRole {
    /// Conventional role for a node index: node 0 is the control node
    pub fn for_rank(rank: NodeRank) -> Self {
        if rank == 0 {
            NodeRole::Control
        } else {
            NodeRole::Worker
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Control => "control",
            NodeRole::Worker => "worker",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cluster backend that scheduled this process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClusterKind {
    /// Batch-style multi-node jobs (node count and index variables, main node IP)
    Batch,

    /// Pod-set style jobs (world size, rank and master address variables)
    PodSet,
}

/// Where this process is running, determined once at process start
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionContext {
    /// All nodes are simulated as processes on this machine
    LocalSimulation,

    /// One process per physical node, placed by an external scheduler
    ClusterScheduled(ClusterKind),
}

impl ExecutionContext {
    pub fn is_local(&self) -> bool {
        matches!(self, ExecutionContext::LocalSimulation)
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::LocalSimulation => f.write_str("local-simulation"),
            ExecutionContext::ClusterScheduled(ClusterKind::Batch) => f.write_str("batch"),
            ExecutionContext::ClusterScheduled(ClusterKind::PodSet) => f.write_str("pod-set"),
        }
    }
}

/// Node topology as known to the caller in local simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTopology {
    pub total_nodes: u32,
    pub this_node_rank: NodeRank,
}

/// Resolver output for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTopology {
    pub total_nodes: u32,
    pub this_node_rank: NodeRank,
    pub main_address: String,
}

/// Fully resolved rendezvous parameters for one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousConfig {
    /// Identifier shared by every node of one run
    pub id: String,

    /// Address of the main node
    pub main_address: String,

    /// Port of the main node's rendezvous store
    pub main_port: u16,

    /// Number of nodes taking part
    pub total_nodes: u32,

    /// This node's index in `[0, total_nodes)`
    pub this_node_rank: NodeRank,
}

impl RendezvousConfig {
    /// Create a config, checking the rank against the node count
    pub fn new(
        id: impl Into<String>,
        main_address: impl Into<String>,
        main_port: u16,
        total_nodes: u32,
        this_node_rank: NodeRank,
    ) -> Result<Self> {
        check_topology(total_nodes, this_node_rank)?;
        Ok(Self {
            id: id.into(),
            main_address: main_address.into(),
            main_port,
            total_nodes,
            this_node_rank,
        })
    }

    /// Build from a resolved topology
    pub fn from_topology(
        id: impl Into<String>,
        topology: ResolvedTopology,
        main_port: u16,
    ) -> Result<Self> {
        Self::new(
            id,
            topology.main_address,
            main_port,
            topology.total_nodes,
            topology.this_node_rank,
        )
    }

    /// `address:port` of the main node
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.main_address, self.main_port)
    }

    /// Same rendezvous, seen from another node
    pub fn for_rank(&self, rank: NodeRank) -> Result<Self> {
        check_topology(self.total_nodes, rank)?;
        Ok(Self {
            this_node_rank: rank,
            ..self.clone()
        })
    }

    pub fn role(&self) -> NodeRole {
        NodeRole::for_rank(self.this_node_rank)
    }

    /// Variables handed to a spawned node process
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (exported::RDZV_ID, self.id.clone()),
            (exported::RDZV_ENDPOINT, self.endpoint()),
            (exported::RDZV_NUM_NODES, self.total_nodes.to_string()),
            (exported::RDZV_NODE_RANK, self.this_node_rank.to_string()),
            (exported::RDZV_ROLE, self.role().to_string()),
        ]
    }
}

fn check_topology(total_nodes: u32, rank: NodeRank) -> Result<()> {
    if total_nodes == 0 || rank >= total_nodes {
        return Err(Error::InvalidTopology { rank, total_nodes });
    }
    Ok(())
}

/// Value of a launcher or entrypoint argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(b) => write!(f, "{b}"),
            ArgValue::Int(i) => write!(f, "{i}"),
            // integral floats keep their decimal point
            ArgValue::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
            ArgValue::Float(x) => write!(f, "{x}"),
            ArgValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Str(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::Str(s)
    }
}

impl From<i64> for ArgValue {
    fn from(i: i64) -> Self {
        ArgValue::Int(i)
    }
}

impl From<i32> for ArgValue {
    fn from(i: i32) -> Self {
        ArgValue::Int(i64::from(i))
    }
}

impl From<u32> for ArgValue {
    fn from(i: u32) -> Self {
        ArgValue::Int(i64::from(i))
    }
}

impl From<u16> for ArgValue {
    fn from(i: u16) -> Self {
        ArgValue::Int(i64::from(i))
    }
}

impl From<f64> for ArgValue {
    fn from(x: f64) -> Self {
        ArgValue::Float(x)
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        ArgValue::Bool(b)
    }
}

/// Entrypoint arguments in exactly one of the two accepted forms
#[derive(Debug, Clone, PartialEq)]
pub enum EntrypointArgs {
    /// Emitted as `--key value` pairs in map order
    Keyed(ArgMap),

    /// Emitted verbatim
    Raw(Vec<String>),
}

impl EntrypointArgs {
    /// Number of argv tokens these arguments contribute
    pub fn token_count(&self) -> usize {
        match self {
            EntrypointArgs::Keyed(map) => map.len() * 2,
            EntrypointArgs::Raw(tokens) => tokens.len(),
        }
    }
}

impl From<ArgMap> for EntrypointArgs {
    fn from(map: ArgMap) -> Self {
        EntrypointArgs::Keyed(map)
    }
}

impl From<Vec<String>> for EntrypointArgs {
    fn from(tokens: Vec<String>) -> Self {
        EntrypointArgs::Raw(tokens)
    }
}

/// Everything needed to launch the user entrypoint on one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Launcher argument overrides, applied over the computed defaults
    #[serde(default)]
    pub launcher_args: ArgMap,

    /// Script or module handed to the launcher
    pub entrypoint: String,

    /// Entrypoint arguments as `--key value` pairs
    #[serde(default)]
    pub keyed_args: Option<ArgMap>,

    /// Entrypoint arguments as pre-tokenized strings
    #[serde(default)]
    pub raw_args: Option<Vec<String>>,

    /// Worker processes per node
    #[serde(default = "default_nproc_per_node")]
    pub nproc_per_node: u32,
}

fn default_nproc_per_node() -> u32 {
    1
}

impl LaunchSpec {
    /// Spec with no entrypoint arguments
    pub fn new(entrypoint: impl Into<String>) -> Self {
        Self {
            launcher_args: ArgMap::new(),
            entrypoint: entrypoint.into(),
            keyed_args: Some(ArgMap::new()),
            raw_args: None,
            nproc_per_node: default_nproc_per_node(),
        }
    }

    /// Replace the entrypoint arguments
    pub fn with_args(mut self, args: impl Into<EntrypointArgs>) -> Self {
        match args.into() {
            EntrypointArgs::Keyed(map) => {
                self.keyed_args = Some(map);
                self.raw_args = None;
            }
            EntrypointArgs::Raw(tokens) => {
                self.keyed_args = None;
                self.raw_args = Some(tokens);
            }
        }
        self
    }

    /// Add or replace one launcher override
    pub fn with_launcher_arg(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.launcher_args.insert(key.into(), value.into());
        self
    }

    pub fn with_nproc_per_node(mut self, nproc_per_node: u32) -> Self {
        self.nproc_per_node = nproc_per_node;
        self
    }

    /// The single supplied form of entrypoint arguments
    pub fn entrypoint_args(&self) -> Result<EntrypointArgs> {
        match (&self.keyed_args, &self.raw_args) {
            (Some(_), Some(_)) => Err(Error::EntrypointArgsConflict),
            (None, None) => Err(Error::EntrypointArgsMissing),
            (Some(map), None) => Ok(EntrypointArgs::Keyed(map.clone())),
            (None, Some(tokens)) => Ok(EntrypointArgs::Raw(tokens.clone())),
        }
    }
}
