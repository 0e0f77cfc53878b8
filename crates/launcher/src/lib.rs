//! Node launcher for multi-node distributed runs
//!
//! This crate provides the process-facing half of node bootstrapping:
//! - **Hook**: the extension point the step framework calls before user code
//! - **Coordination**: spawning the launcher for this node, plus one sibling
//!   per simulated node when a multi-node run is simulated on one machine
//! - **Supervision**: joining every node process, killing and reaping them on
//!   a shutdown request or timeout
//! - **Handle**: re-running launches from user code with the resolved rendezvous
//!
//! # Example
//!
//! ```no_run
//! use node_launcher::{RendezvousHook, StepContext};
//! use rendezvous_core::{BootstrapConfig, EnvSnapshot, LaunchSpec, NodeRole};
//!
//! # fn main() -> rendezvous_core::Result<()> {
//! let step = StepContext {
//!     run_id: "1712".to_string(),
//!     step_name: "train".to_string(),
//!     role: NodeRole::Control,
//!     num_nodes: 2,
//!     node_index: 0,
//! };
//!
//! let hook = RendezvousHook::new(BootstrapConfig::default())
//!     .with_launch(LaunchSpec::new("train.py"));
//! hook.run_step(&step, &EnvSnapshot::from_process(), |handle, _report| {
//!     handle.run("evaluate.py", vec!["--split".to_string(), "val".to_string()], 1)?;
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod dependency;
pub mod handle;
pub mod hook;
pub mod process;
pub mod runtime;

pub use coordinator::{LaunchCoordinator, LaunchPlan};
pub use handle::RendezvousHandle;
pub use hook::{RendezvousHook, StepContext, StepLaunch};
pub use process::{LaunchReport, NodeOutcome};
pub use runtime::{LaunchRuntime, ShutdownHandle};
