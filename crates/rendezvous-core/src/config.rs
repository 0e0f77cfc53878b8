//! Bootstrap configuration types

use crate::{ArgMap, ArgValue, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main bootstrap configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// External launcher settings
    pub launcher: LauncherConfig,

    /// Rendezvous settings
    pub rendezvous: RendezvousSettings,

    /// Child process supervision settings
    pub coordinator: CoordinatorConfig,
}

impl BootstrapConfig {
    /// Load a JSON configuration file; missing sections take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail later at launch time
    pub fn validate(&self) -> Result<()> {
        if self.launcher.program.trim().is_empty() {
            return Err(invalid("launcher.program must not be empty"));
        }
        if self.launcher.rdzv_backend.trim().is_empty() {
            return Err(invalid("launcher.rdzv_backend must not be empty"));
        }
        if self.launcher.nproc_per_node == 0 {
            return Err(invalid("launcher.nproc_per_node must be at least 1"));
        }
        if self.rendezvous.main_port == 0 {
            return Err(invalid("rendezvous.main_port must not be 0"));
        }
        if self.rendezvous.local_address.trim().is_empty() {
            return Err(invalid("rendezvous.local_address must not be empty"));
        }
        if self.coordinator.join_timeout == Some(Duration::ZERO) {
            return Err(invalid("coordinator.join_timeout must be positive when set"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfig {
        message: message.to_string(),
    }
}

/// External launcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Launcher program, looked up on `PATH` unless it contains a `/`
    pub program: String,

    /// Rendezvous backend handed to the launcher
    pub rdzv_backend: String,

    /// Worker processes per node
    pub nproc_per_node: u32,

    /// Launcher overrides applied to every launch unless the step overrides them
    pub default_args: ArgMap,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        let mut default_args = ArgMap::new();
        default_args.insert("max-restarts".to_string(), ArgValue::Int(3));

        Self {
            program: "torchrun".to_string(),
            rdzv_backend: "c10d".to_string(),
            nproc_per_node: 1,
            default_args,
        }
    }
}

/// Rendezvous configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousSettings {
    /// Port of the main node's rendezvous store
    pub main_port: u16,

    /// Main node address used in local simulation
    pub local_address: String,
}

impl Default for RendezvousSettings {
    fn default() -> Self {
        Self {
            main_port: 3339,
            local_address: "127.0.0.1".to_string(),
        }
    }
}

/// Child process supervision configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Kill every node still running after this long; unbounded when unset
    #[serde(with = "duration_ms::option")]
    pub join_timeout: Option<Duration>,

    /// How long the launch runtime waits for tasks when shutting down
    #[serde(with = "duration_ms")]
    pub shutdown_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            join_timeout: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Durations are written as integer milliseconds
mod duration_ms {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    pub mod option {
        use serde::{self, Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let millis = Option::<u64>::deserialize(deserializer)?;
            Ok(millis.map(Duration::from_millis))
        }
    }
}
