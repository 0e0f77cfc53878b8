//! Rendezvous resolution
//!
//! Turns the classified [`ExecutionContext`] and this node's [`NodeRole`] into
//! a [`ResolvedTopology`]: how many nodes take part, which one this is, and
//! where the main node lives.
//!
//! | Context | Node count | Node rank | Main address |
//! |---------|------------|-----------|--------------|
//! | local simulation | caller | caller | configured local address |
//! | batch | `AWS_BATCH_JOB_NUM_NODES` | `AWS_BATCH_JOB_NODE_INDEX` | own hostname (control) or reverse lookup of the main node IP (worker) |
//! | pod set | `WORLD_SIZE` | `RANK` | `MASTER_ADDR` |
//!
//! Missing variables fail immediately; retrying is left to the outer framework.

use crate::env::{vars, EnvSnapshot};
use crate::{
    ClusterKind, Error, ExecutionContext, LocalTopology, NodeRole, ResolvedTopology, Result,
};
use std::net::IpAddr;
use tracing::debug;

/// Hostname and reverse address lookups
pub trait HostLookup {
    /// Name of the machine this process runs on
    fn local_hostname(&self) -> Result<String>;

    /// Host name registered for an address
    fn reverse_lookup(&self, address: IpAddr) -> Result<String>;
}

/// Lookups against the operating system resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostLookup;

impl HostLookup for SystemHostLookup {
    fn local_hostname(&self) -> Result<String> {
        let hostname = nix::unistd::gethostname().map_err(|e| Error::HostLookup {
            target: "local hostname".to_string(),
            message: e.to_string(),
        })?;

        hostname.into_string().map_err(|raw| Error::HostLookup {
            target: "local hostname".to_string(),
            message: format!("hostname is not valid UTF-8: {raw:?}"),
        })
    }

    fn reverse_lookup(&self, address: IpAddr) -> Result<String> {
        dns_lookup::lookup_addr(&address).map_err(|e| Error::HostLookup {
            target: address.to_string(),
            message: e.to_string(),
        })
    }
}

/// Resolves the rendezvous topology of this node
pub struct Resolver<'a, H> {
    env: &'a EnvSnapshot,
    hosts: &'a H,
    local_address: String,
}

impl<'a, H: HostLookup> Resolver<'a, H> {
    pub fn new(env: &'a EnvSnapshot, hosts: &'a H, local_address: impl Into<String>) -> Self {
        Self {
            env,
            hosts,
            local_address: local_address.into(),
        }
    }

    /// Resolve node count, node rank and main address.
    ///
    /// `simulated` carries the topology the caller already knows; it is
    /// required in local simulation and ignored otherwise.
    pub fn resolve(
        &self,
        context: ExecutionContext,
        role: NodeRole,
        simulated: Option<LocalTopology>,
    ) -> Result<ResolvedTopology> {
        let topology = match context {
            ExecutionContext::LocalSimulation => {
                let local = simulated.ok_or_else(|| Error::InvalidConfig {
                    message: "local simulation requires the simulated node count and index"
                        .to_string(),
                })?;
                ResolvedTopology {
                    total_nodes: local.total_nodes,
                    this_node_rank: local.this_node_rank,
                    main_address: self.local_address.clone(),
                }
            }
            ExecutionContext::ClusterScheduled(ClusterKind::Batch) => self.resolve_batch(role)?,
            ExecutionContext::ClusterScheduled(ClusterKind::PodSet) => self.resolve_pod_set()?,
        };

        if topology.total_nodes == 0 || topology.this_node_rank >= topology.total_nodes {
            return Err(Error::InvalidTopology {
                rank: topology.this_node_rank,
                total_nodes: topology.total_nodes,
            });
        }

        debug!(
            context = %context,
            role = %role,
            total_nodes = topology.total_nodes,
            rank = topology.this_node_rank,
            main_address = %topology.main_address,
            "Resolved rendezvous topology"
        );
        Ok(topology)
    }

    fn resolve_batch(&self, role: NodeRole) -> Result<ResolvedTopology> {
        let total_nodes = self.env.require_parsed(vars::BATCH_NUM_NODES)?;
        let this_node_rank = self.env.require_parsed(vars::BATCH_NODE_INDEX)?;

        let main_address = match role {
            NodeRole::Control => self.hosts.local_hostname()?,
            NodeRole::Worker => {
                let main_ip: IpAddr = self.env.require_parsed(vars::BATCH_MAIN_NODE_IP)?;
                self.hosts.reverse_lookup(main_ip)?
            }
        };

        Ok(ResolvedTopology {
            total_nodes,
            this_node_rank,
            main_address,
        })
    }

    fn resolve_pod_set(&self) -> Result<ResolvedTopology> {
        Ok(ResolvedTopology {
            total_nodes: self.env.require_parsed(vars::WORLD_SIZE)?,
            this_node_rank: self.env.require_parsed(vars::RANK)?,
            main_address: self.env.require(vars::MASTER_ADDR)?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// One physical main node: its hostname and the reverse DNS of its IP agree
    struct FakeHosts {
        hostname: String,
        reverse: HashMap<IpAddr, String>,
    }

    impl FakeHosts {
        fn main_node() -> Self {
            let mut reverse = HashMap::new();
            reverse.insert(
                "10.0.0.1".parse().unwrap(),
                "ip-10-0-0-1.ec2.internal".to_string(),
            );
            Self {
                hostname: "ip-10-0-0-1.ec2.internal".to_string(),
                reverse,
            }
        }
    }

    impl HostLookup for FakeHosts {
        fn local_hostname(&self) -> Result<String> {
            Ok(self.hostname.clone())
        }

        fn reverse_lookup(&self, address: IpAddr) -> Result<String> {
            self.reverse
                .get(&address)
                .cloned()
                .ok_or_else(|| Error::HostLookup {
                    target: address.to_string(),
                    message: "no PTR record".to_string(),
                })
        }
    }

    fn batch_env(index: &str) -> EnvSnapshot {
        [
            (vars::RUNTIME_ENVIRONMENT, "batch"),
            (vars::BATCH_JOB_ID, "job-1"),
            (vars::BATCH_NUM_NODES, "2"),
            (vars::BATCH_NODE_INDEX, index),
            (vars::BATCH_MAIN_NODE_IP, "10.0.0.1"),
        ]
        .into_iter()
        .collect()
    }

    const BATCH: ExecutionContext = ExecutionContext::ClusterScheduled(ClusterKind::Batch);
    const POD_SET: ExecutionContext = ExecutionContext::ClusterScheduled(ClusterKind::PodSet);

    #[test]
    fn test_local_uses_caller_topology() {
        let env = EnvSnapshot::default();
        let hosts = FakeHosts::main_node();
        let resolver = Resolver::new(&env, &hosts, "127.0.0.1");

        let topology = resolver
            .resolve(
                ExecutionContext::LocalSimulation,
                NodeRole::Control,
                Some(LocalTopology {
                    total_nodes: 3,
                    this_node_rank: 0,
                }),
            )
            .unwrap();

        assert_eq!(topology.total_nodes, 3);
        assert_eq!(topology.this_node_rank, 0);
        assert_eq!(topology.main_address, "127.0.0.1");

        assert!(matches!(
            resolver.resolve(ExecutionContext::LocalSimulation, NodeRole::Control, None),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_pod_set_identity() {
        let env: EnvSnapshot = [
            (vars::RUNTIME_ENVIRONMENT, "kubernetes"),
            (vars::WORLD_SIZE, "4"),
            (vars::RANK, "3"),
            (vars::MASTER_ADDR, "trainer-0.trainer"),
        ]
        .into_iter()
        .collect();
        let hosts = FakeHosts::main_node();
        let resolver = Resolver::new(&env, &hosts, "127.0.0.1");

        for role in [NodeRole::Control, NodeRole::Worker] {
            let topology = resolver.resolve(POD_SET, role, None).unwrap();
            assert_eq!(
                topology,
                ResolvedTopology {
                    total_nodes: 4,
                    this_node_rank: 3,
                    main_address: "trainer-0.trainer".to_string(),
                }
            );
        }
    }

    #[test]
    fn test_batch_roles_agree_on_main_address() {
        let hosts = FakeHosts::main_node();

        let control_env = batch_env("0");
        let control = Resolver::new(&control_env, &hosts, "127.0.0.1")
            .resolve(BATCH, NodeRole::Control, None)
            .unwrap();

        let worker_env = batch_env("1");
        let worker = Resolver::new(&worker_env, &hosts, "127.0.0.1")
            .resolve(BATCH, NodeRole::Worker, None)
            .unwrap();

        assert_eq!(control.main_address, worker.main_address);
        assert_eq!(control.total_nodes, 2);
        assert_eq!(worker.this_node_rank, 1);
    }

    #[test]
    fn test_batch_missing_variable() {
        let env: EnvSnapshot = [
            (vars::RUNTIME_ENVIRONMENT, "batch"),
            (vars::BATCH_JOB_ID, "job-1"),
            (vars::BATCH_NUM_NODES, "2"),
            (vars::BATCH_NODE_INDEX, "1"),
        ]
        .into_iter()
        .collect();
        let hosts = FakeHosts::main_node();
        let resolver = Resolver::new(&env, &hosts, "127.0.0.1");

        // control never needs the main node IP
        assert!(resolver.resolve(BATCH, NodeRole::Control, None).is_ok());
        assert!(matches!(
            resolver.resolve(BATCH, NodeRole::Worker, None),
            Err(Error::MissingEnvVar { ref name }) if name == vars::BATCH_MAIN_NODE_IP
        ));
    }

    #[test]
    fn test_pod_set_rank_out_of_range() {
        let env: EnvSnapshot = [
            (vars::RUNTIME_ENVIRONMENT, "kubernetes"),
            (vars::WORLD_SIZE, "2"),
            (vars::RANK, "2"),
            (vars::MASTER_ADDR, "trainer-0"),
        ]
        .into_iter()
        .collect();
        let hosts = FakeHosts::main_node();
        let resolver = Resolver::new(&env, &hosts, "127.0.0.1");

        assert!(matches!(
            resolver.resolve(POD_SET, NodeRole::Worker, None),
            Err(Error::InvalidTopology { rank: 2, total_nodes: 2 })
        ));
    }

    #[test]
    fn test_worker_reverse_lookup_failure() {
        let env: EnvSnapshot = [
            (vars::RUNTIME_ENVIRONMENT, "batch"),
            (vars::BATCH_JOB_ID, "job-1"),
            (vars::BATCH_NUM_NODES, "2"),
            (vars::BATCH_NODE_INDEX, "1"),
            (vars::BATCH_MAIN_NODE_IP, "10.9.9.9"),
        ]
        .into_iter()
        .collect();
        let hosts = FakeHosts::main_node();

        let result = Resolver::new(&env, &hosts, "127.0.0.1").resolve(BATCH, NodeRole::Worker, None);
        assert!(matches!(result, Err(Error::HostLookup { .. })));
    }
}
