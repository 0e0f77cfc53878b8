//! Rendezvous Core - node roles, rendezvous resolution and launch commands
//!
//! Provides the pure, synchronous half of multi-node bootstrapping: which
//! cluster backend placed this process, how many nodes take part, where the
//! main node lives, and the exact launcher invocation for this node.

pub mod command;
pub mod config;
pub mod env;
pub mod error;
pub mod resolver;
pub mod types;

pub use command::{CommandBuilder, LaunchCommand};
pub use config::BootstrapConfig;
pub use env::{classify, EnvSnapshot};
pub use error::{Error, ErrorKind, Result};
pub use resolver::{HostLookup, Resolver, SystemHostLookup};
pub use types::*;
