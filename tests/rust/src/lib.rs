//! Shared fixtures for the launch integration tests
//!
//! [`FakeLauncher`] writes an executable shell script that stands in for the
//! distributed launcher. The script records its argv, one token per line, in
//! `node-<rank>.args` next to itself, then runs a test-specific body.

use anyhow::Result;
use rendezvous_core::BootstrapConfig;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct FakeLauncher {
    dir: TempDir,
    program: PathBuf,
}

impl FakeLauncher {
    /// Launcher that records its arguments, then runs `body`
    pub fn new(body: &str) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let program = dir.path().join("fake-launcher");
        let script = format!(
            "#!/bin/sh\nOUT='{out}'\nprintf '%s\\n' \"$@\" > \"$OUT/node-$RDZV_NODE_RANK.args\"\necho \"$RDZV_NODE_RANK $*\" >> \"$OUT/calls.log\"\n{body}\nexit 0\n",
            out = dir.path().display(),
        );
        fs::write(&program, script)?;
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755))?;

        Ok(Self { dir, program })
    }

    /// Launcher that records its arguments and succeeds
    pub fn recording() -> Result<Self> {
        Self::new("")
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Default configuration pointing at this launcher
    pub fn config(&self) -> BootstrapConfig {
        let mut config = BootstrapConfig::default();
        config.launcher.program = self.program.display().to_string();
        config
    }

    /// Arguments recorded by the given node, if it ran
    pub fn args_of(&self, rank: u32) -> Option<Vec<String>> {
        fs::read_to_string(self.dir().join(format!("node-{rank}.args")))
            .ok()
            .map(|s| s.lines().map(str::to_string).collect())
    }

    /// One line per launcher invocation: `<rank> <args...>`
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.dir().join("calls.log"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// Value following `--key` in a recorded argv
pub fn flag_value<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    let flag = format!("--{key}");
    args.iter()
        .position(|a| *a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Route test logs through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("node_launcher=debug,rendezvous_core=debug")
        .with_test_writer()
        .try_init();
}
