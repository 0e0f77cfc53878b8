//! Error types for rendezvous resolution and launching

use thiserror::Error;

/// Result type alias using the rendezvous Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for rendezvous bootstrap and launching
#[derive(Error, Debug)]
pub enum Error {
    // Environment errors
    #[error("Required environment variable not set: {name}")]
    MissingEnvVar { name: String },

    #[error("Invalid value for environment variable {name}={value:?}: {reason}")]
    InvalidEnvVar {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Host lookup failed for {target}: {message}")]
    HostLookup { target: String, message: String },

    // Topology errors
    #[error("Invalid topology: node rank {rank} with {total_nodes} total nodes")]
    InvalidTopology { rank: u32, total_nodes: u32 },

    // Launch spec errors
    #[error("Entrypoint arguments supplied both as a keyed mapping and as raw tokens")]
    EntrypointArgsConflict,

    #[error("Entrypoint arguments missing: supply either a keyed mapping or raw tokens")]
    EntrypointArgsMissing,

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // Dependency errors
    #[error("Launcher binary not found: {program}")]
    LauncherNotFound { program: String },

    // Child process errors
    #[error("Failed to spawn node {node_rank}: {source}")]
    Spawn {
        node_rank: u32,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Node {node_rank} exited with {} ({failed} of {total} nodes failed)",
        describe_exit(.exit_code)
    )]
    ChildProcessFailed {
        node_rank: u32,
        exit_code: Option<i32>,
        failed: usize,
        total: usize,
    },

    #[error("Launch interrupted: {reason}")]
    Interrupted { reason: String },

    // Timeout errors
    #[error("Operation timeout: {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {code}"),
        None => "no exit code".to_string(),
    }
}

/// Coarse classification of [`Error`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed input, raised before any process spawns
    Configuration,

    /// The external launcher binary is absent
    DependencyMissing,

    /// A spawned node process failed or could not be spawned
    ChildProcessFailure,

    /// The launch was cancelled or timed out
    Interrupted,

    /// Anything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingEnvVar { .. }
            | Error::InvalidEnvVar { .. }
            | Error::HostLookup { .. }
            | Error::InvalidTopology { .. }
            | Error::EntrypointArgsConflict
            | Error::EntrypointArgsMissing
            | Error::InvalidConfig { .. }
            | Error::Serialization(_) => ErrorKind::Configuration,
            Error::LauncherNotFound { .. } => ErrorKind::DependencyMissing,
            Error::Spawn { .. } | Error::ChildProcessFailed { .. } => {
                ErrorKind::ChildProcessFailure
            }
            Error::Interrupted { .. } | Error::Timeout { .. } => ErrorKind::Interrupted,
            Error::Io(_) | Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if this error is raised before any process is spawned and
    /// can only be fixed by changing the node's configuration
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::DependencyMissing
        )
    }

    /// Process exit code to report for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ChildProcessFailed {
                exit_code: Some(code),
                ..
            } if *code != 0 => *code,
            _ => match self.kind() {
                ErrorKind::Configuration => 2,
                ErrorKind::DependencyMissing => 127,
                ErrorKind::Interrupted => 130,
                ErrorKind::ChildProcessFailure | ErrorKind::Internal => 1,
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
