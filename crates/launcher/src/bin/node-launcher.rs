//! Node launcher binary entry point
//!
//! Resolves this node's rendezvous and runs the distributed launcher for it.
//! In local simulation the control process also runs every other simulated node.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use node_launcher::{RendezvousHook, ShutdownHandle, StepContext};
use rendezvous_core::{
    classify, ArgMap, ArgValue, BootstrapConfig, CommandBuilder, EnvSnapshot, Error, LaunchSpec,
    NodeRole, Result,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Control,
    Worker,
}

impl From<RoleArg> for NodeRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Control => NodeRole::Control,
            RoleArg::Worker => NodeRole::Worker,
        }
    }
}

/// Launch a distributed entrypoint on this node
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run identifier shared by all nodes; generated in local simulation when omitted
    #[arg(long)]
    run_id: Option<String>,

    /// Step name shared by all nodes
    #[arg(long, default_value = "step")]
    step: String,

    /// Role of this process; pass `worker` on every non-main cluster node
    #[arg(long, value_enum, default_value_t = RoleArg::Control)]
    role: RoleArg,

    /// Simulated node count (local simulation only)
    #[arg(long, default_value_t = 1)]
    num_nodes: u32,

    /// Simulated node index (local simulation only)
    #[arg(long, default_value_t = 0)]
    node_index: u32,

    /// Worker processes per node
    #[arg(long)]
    nproc_per_node: Option<u32>,

    /// Rendezvous port on the main node
    #[arg(long)]
    main_port: Option<u16>,

    /// Launcher program
    #[arg(long)]
    launcher: Option<String>,

    /// Launcher override as KEY=VALUE, repeatable
    #[arg(long = "launcher-arg", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    launcher_args: Vec<(String, String)>,

    /// Entrypoint argument as KEY=VALUE, emitted as `--KEY VALUE`, repeatable
    #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    args: Vec<(String, String)>,

    /// Print this node's command and exit
    #[arg(long)]
    dry_run: bool,

    /// Write the launch report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Script handed to the launcher
    entrypoint: String,

    /// Entrypoint arguments passed through verbatim
    #[arg(last = true)]
    raw_args: Vec<String>,
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

fn to_arg_map(pairs: &[(String, String)]) -> ArgMap {
    pairs
        .iter()
        .map(|(k, v)| (k.clone(), ArgValue::from(v.as_str())))
        .collect()
}

fn load_config(cli: &Cli) -> Result<BootstrapConfig> {
    let mut config = match &cli.config {
        Some(path) => BootstrapConfig::from_file(path)?,
        None => BootstrapConfig::default(),
    };

    if let Some(program) = &cli.launcher {
        config.launcher.program = program.clone();
    }
    if let Some(port) = cli.main_port {
        config.rendezvous.main_port = port;
    }
    if let Some(nproc) = cli.nproc_per_node {
        config.launcher.nproc_per_node = nproc;
    }

    config.validate()?;
    Ok(config)
}

fn launch_spec(cli: &Cli, config: &BootstrapConfig) -> LaunchSpec {
    let mut spec = LaunchSpec::new(&cli.entrypoint).with_nproc_per_node(config.launcher.nproc_per_node);
    spec.launcher_args = to_arg_map(&cli.launcher_args);

    // both forms are passed through so the builder can reject the mix
    spec.keyed_args = (!cli.args.is_empty() || cli.raw_args.is_empty()).then(|| to_arg_map(&cli.args));
    spec.raw_args = (!cli.raw_args.is_empty()).then(|| cli.raw_args.clone());
    spec
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let env = EnvSnapshot::from_process();
    let context = classify(&env);

    let run_id = match (&cli.run_id, context.is_local()) {
        (Some(id), _) => id.clone(),
        (None, true) => uuid::Uuid::new_v4().to_string(),
        (None, false) => {
            return Err(Error::InvalidConfig {
                message: "--run-id is required when nodes are scheduled by a cluster".to_string(),
            })
        }
    };

    let step = StepContext {
        run_id,
        step_name: cli.step.clone(),
        role: cli.role.into(),
        num_nodes: cli.num_nodes,
        node_index: cli.node_index,
    };
    let spec = launch_spec(&cli, &config);

    if cli.dry_run {
        let hook = RendezvousHook::new(config.clone());
        let rendezvous = hook.resolve(&step, &env)?;

        let mut spec = spec;
        let mut launcher_args = config.launcher.default_args.clone();
        launcher_args.extend(spec.launcher_args.drain(..));
        spec.launcher_args = launcher_args;

        let builder = CommandBuilder::new(&config.launcher.program, &config.launcher.rdzv_backend);
        println!("{}", builder.build(&rendezvous, &spec)?);
        return Ok(());
    }

    let shutdown = forward_signals()?;
    let hook = RendezvousHook::new(config).with_shutdown(shutdown);
    let launch = hook.before_step(&step, &env)?;

    let report = launch.handle.execute(spec)?;
    if let Some(path) = &cli.report {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &report)?;
    }

    let report = report.into_result()?;
    info!(command = %report.command, "Step launch complete");
    Ok(())
}

/// Turn SIGINT and SIGTERM into a launch shutdown so node processes are
/// killed and reaped before this process exits
fn forward_signals() -> Result<ShutdownHandle> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;

    // registered before any node process exists
    let (mut interrupt, mut terminate) = runtime.block_on(async {
        Ok::<_, std::io::Error>((
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        ))
    })?;

    let shutdown = ShutdownHandle::new();
    let forward = shutdown.clone();
    std::thread::Builder::new()
        .name("signal-forwarder".to_string())
        .spawn(move || {
            runtime.block_on(async {
                tokio::select! {
                    _ = interrupt.recv() => warn!("Received SIGINT, shutting down"),
                    _ = terminate.recv() => warn!("Received SIGTERM, shutting down"),
                }
            });
            forward.shutdown();
        })?;

    Ok(shutdown)
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "node_launcher=info,rendezvous_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "Launch failed");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}
