//! End-to-end launches against a recording stand-in launcher

use integration_tests::{flag_value, init_tracing, FakeLauncher};
use node_launcher::{RendezvousHook, StepContext};
use rendezvous_core::env::vars;
use rendezvous_core::{ArgMap, ArgValue, EnvSnapshot, Error, LaunchSpec, NodeRole};
use std::time::{Duration, Instant};

fn step(role: NodeRole, num_nodes: u32, node_index: u32) -> StepContext {
    StepContext {
        run_id: "1712".to_string(),
        step_name: "train".to_string(),
        role,
        num_nodes,
        node_index,
    }
}

fn epochs(n: i64) -> ArgMap {
    let mut args = ArgMap::new();
    args.insert("epochs".to_string(), ArgValue::from(n));
    args
}

#[test]
fn test_local_simulation_runs_every_node() -> anyhow::Result<()> {
    init_tracing();
    let launcher = FakeLauncher::recording()?;
    let hook = RendezvousHook::new(launcher.config())
        .with_launch(LaunchSpec::new("train.py").with_args(epochs(2)));

    let launch = hook.before_step(&step(NodeRole::Control, 3, 0), &EnvSnapshot::default())?;
    let report = launch.report.expect("configured launch must report");

    assert!(report.success());
    assert_eq!(report.outcomes.len(), 3);
    assert!(report.command.command_line().ends_with("train.py --epochs 2"));

    for rank in 0..3u32 {
        let args = launcher.args_of(rank).expect("every simulated node ran");
        assert_eq!(flag_value(&args, "rdzv_endpoint"), Some("127.0.0.1:3339"));
        assert_eq!(flag_value(&args, "rdzv_id"), Some("1712-train"));
        assert_eq!(flag_value(&args, "nnodes"), Some("3"));
        assert_eq!(flag_value(&args, "node_rank"), Some(rank.to_string().as_str()));
        assert_eq!(flag_value(&args, "max-restarts"), Some("3"));
        assert_eq!(&args[args.len() - 3..], ["train.py", "--epochs", "2"]);
    }
    Ok(())
}

#[test]
fn test_failing_node_is_reported_after_all_join() -> anyhow::Result<()> {
    init_tracing();
    let launcher = FakeLauncher::new(
        r#"if [ "$RDZV_NODE_RANK" = 1 ]; then exit 3; fi
if [ "$RDZV_NODE_RANK" = 2 ]; then sleep 0.3; touch "$OUT/node-2.done"; fi"#,
    )?;
    let hook = RendezvousHook::new(launcher.config()).with_launch(LaunchSpec::new("train.py"));

    let result = hook.before_step(&step(NodeRole::Control, 3, 0), &EnvSnapshot::default());

    match result {
        Err(Error::ChildProcessFailed {
            node_rank,
            exit_code,
            failed,
            total,
        }) => {
            assert_eq!(node_rank, 1);
            assert_eq!(exit_code, Some(3));
            assert_eq!(failed, 1);
            assert_eq!(total, 3);
        }
        Err(other) => panic!("expected child failure, got {other}"),
        Ok(_) => panic!("expected child failure"),
    }
    assert!(
        launcher.dir().join("node-2.done").exists(),
        "slow node was not joined before the failure was reported"
    );
    Ok(())
}

#[test]
fn test_pod_set_worker_runs_only_itself() -> anyhow::Result<()> {
    init_tracing();
    let launcher = FakeLauncher::recording()?;
    let hook = RendezvousHook::new(launcher.config()).with_launch(LaunchSpec::new("train.py"));

    let env: EnvSnapshot = [
        (vars::RUNTIME_ENVIRONMENT, "kubernetes"),
        (vars::WORLD_SIZE, "2"),
        (vars::RANK, "1"),
        (vars::MASTER_ADDR, "10.0.0.5"),
    ]
    .into_iter()
    .collect();

    // simulated topology is ignored under a cluster scheduler
    let launch = hook.before_step(&step(NodeRole::Worker, 5, 3), &env)?;
    assert_eq!(launch.handle.rendezvous().this_node_rank, 1);

    let calls = launcher.calls();
    assert_eq!(calls.len(), 1);

    let args = launcher.args_of(1).expect("own node ran");
    assert_eq!(flag_value(&args, "rdzv_endpoint"), Some("10.0.0.5:3339"));
    assert_eq!(flag_value(&args, "nnodes"), Some("2"));
    assert!(launcher.args_of(0).is_none());
    Ok(())
}

#[test]
fn test_handle_reruns_launches_independently() -> anyhow::Result<()> {
    init_tracing();
    let launcher = FakeLauncher::recording()?;
    let hook = RendezvousHook::new(launcher.config());

    let outputs = hook.run_step(
        &step(NodeRole::Control, 1, 0),
        &EnvSnapshot::default(),
        |handle, report| {
            assert!(report.is_none());
            let first = handle.run("train.py", epochs(1), 2)?;
            let second = handle.run(
                "evaluate.py",
                vec!["--split".to_string(), "val".to_string()],
                2,
            )?;
            Ok((first, second))
        },
    )?;

    assert!(outputs.0.command.command_line().ends_with("train.py --epochs 1"));
    assert!(outputs.1.command.command_line().ends_with("evaluate.py --split val"));
    assert_eq!(launcher.calls().len(), 2);

    // the second run overwrote the recorded argv of node 0
    let args = launcher.args_of(0).expect("node 0 ran");
    assert_eq!(flag_value(&args, "nproc_per_node"), Some("2"));
    assert_eq!(&args[args.len() - 3..], ["evaluate.py", "--split", "val"]);
    Ok(())
}

#[test]
fn test_explicit_nproc_beats_configured_override() -> anyhow::Result<()> {
    init_tracing();
    let launcher = FakeLauncher::recording()?;
    let mut config = launcher.config();
    config
        .launcher
        .default_args
        .insert("nproc_per_node".to_string(), ArgValue::from(2));
    let hook = RendezvousHook::new(config);

    let launch = hook.before_step(&step(NodeRole::Control, 1, 0), &EnvSnapshot::default())?;
    launch.handle.run("train.py", ArgMap::new(), 4)?;

    let args = launcher.args_of(0).expect("node 0 ran");
    assert_eq!(flag_value(&args, "nproc_per_node"), Some("4"));
    assert_eq!(args.iter().filter(|a| *a == "--nproc_per_node").count(), 1);
    Ok(())
}

#[test]
fn test_contract_violation_spawns_nothing() -> anyhow::Result<()> {
    init_tracing();
    let launcher = FakeLauncher::recording()?;
    let mut spec = LaunchSpec::new("train.py");
    spec.raw_args = Some(vec!["--epochs".to_string(), "2".to_string()]);
    let hook = RendezvousHook::new(launcher.config()).with_launch(spec);

    let result = hook.before_step(&step(NodeRole::Control, 2, 0), &EnvSnapshot::default());

    assert!(matches!(result, Err(Error::EntrypointArgsConflict)));
    assert!(launcher.calls().is_empty());
    Ok(())
}

#[test]
fn test_join_timeout_kills_nodes() -> anyhow::Result<()> {
    init_tracing();
    let launcher = FakeLauncher::new("sleep 30")?;
    let mut config = launcher.config();
    config.coordinator.join_timeout = Some(Duration::from_millis(300));
    let hook = RendezvousHook::new(config).with_launch(LaunchSpec::new("train.py"));

    let started = Instant::now();
    let result = hook.before_step(&step(NodeRole::Control, 2, 0), &EnvSnapshot::default());

    assert!(matches!(result, Err(Error::Timeout { timeout_ms: 300, .. })));
    assert!(started.elapsed() < Duration::from_secs(10));
    Ok(())
}

#[test]
fn test_shutdown_handle_interrupts_launch() -> anyhow::Result<()> {
    init_tracing();
    let launcher = FakeLauncher::new("sleep 30")?;
    let hook = RendezvousHook::new(launcher.config());
    let launch = hook.before_step(&step(NodeRole::Control, 2, 0), &EnvSnapshot::default())?;

    let shutdown = launch.handle.shutdown_handle();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        shutdown.shutdown();
    });

    let started = Instant::now();
    let result = launch.handle.run("train.py", epochs(1), 1);
    canceller.join().expect("canceller thread panicked");

    match result {
        Err(e @ Error::Interrupted { .. }) => assert_eq!(e.exit_code(), 130),
        Err(other) => panic!("expected interruption, got {other}"),
        Ok(_) => panic!("expected interruption"),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
    Ok(())
}

#[test]
fn test_early_shutdown_cancels_later_run() -> anyhow::Result<()> {
    init_tracing();
    let launcher = FakeLauncher::new("sleep 30")?;
    let hook = RendezvousHook::new(launcher.config());
    let launch = hook.before_step(&step(NodeRole::Control, 2, 0), &EnvSnapshot::default())?;

    launch.handle.shutdown_handle().shutdown();

    let started = Instant::now();
    let result = launch.handle.run("train.py", epochs(1), 1);
    assert!(matches!(result, Err(Error::Interrupted { .. })));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(launcher.calls().is_empty());
    Ok(())
}

#[test]
fn test_execute_reports_failed_nodes() -> anyhow::Result<()> {
    init_tracing();
    let launcher = FakeLauncher::new(r#"if [ "$RDZV_NODE_RANK" = 1 ]; then exit 4; fi"#)?;
    let hook = RendezvousHook::new(launcher.config());
    let launch = hook.before_step(&step(NodeRole::Control, 2, 0), &EnvSnapshot::default())?;

    let report = launch.handle.execute(LaunchSpec::new("train.py"))?;
    assert!(!report.success());
    let failed: Vec<_> = report.failures().map(|o| (o.node_rank, o.exit_code)).collect();
    assert_eq!(failed, vec![(1, Some(4))]);

    assert!(matches!(
        report.into_result(),
        Err(Error::ChildProcessFailed { node_rank: 1, .. })
    ));
    Ok(())
}
