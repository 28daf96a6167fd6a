//! Runs micro simulations against real processes. Shell commands stand in for the OpenFOAM tools.
#![cfg(unix)]

use micro_foam::{
    config::Tool, postprocessing::ParseError, Error, MacroInput, MicroConfig, MicroSimulation,
    MicroSimulator, SystemRunner,
};
use std::fs;
use tempfile::TempDir;

const RESULT: &str = "postProcessing/fieldAverage1/0/volFieldValue.dat";

fn sh(script: &str) -> Tool {
    Tool::new("sh").with_args(["-c", script, "tool"])
}

fn solver_writing(line: &str) -> Tool {
    sh(&format!("mkdir -p postProcessing/fieldAverage1/0 && echo '{line}' >> {RESULT}"))
}

fn setup() -> (TempDir, MicroConfig) {
    let root = tempfile::tempdir().unwrap();
    let template = root.path().join("template");
    fs::create_dir_all(template.join("system")).unwrap();
    fs::write(template.join("system/controlDict"), "application simpleFoam;\n").unwrap();

    let mut config = MicroConfig {
        template_dir: template,
        work_root: root.path().join("runs"),
        timeout_secs: Some(10.),
        ..Default::default()
    };
    config.tools.clone = Tool::new("cp").with_args(["-r"]);
    config.tools.mesh = sh("touch mesh.done");
    config.tools.dictionary = sh("echo \"$@\" >> edits.log");
    config.tools.solver = solver_writing("0.2 (2.5 0 0)");
    (root, config)
}

#[test]
fn step_with_real_processes() {
    let (_root, config) = setup();
    let mut sim = MicroSimulation::new(0, &config, SystemRunner).unwrap();
    let dir = sim.case().dir().to_path_buf();
    assert!(dir.join("system/controlDict").is_file());
    assert!(dir.join("mesh.done").is_file());

    let output = sim.solve(&MacroInput::new(1.5), 0.1).unwrap();
    assert_eq!(output.scalar, 2.5);
    assert_eq!(output.vector, [2.5, 0., 0.]);
    assert_eq!(sim.current_time(), 0.1);

    let edits = fs::read_to_string(dir.join("edits.log")).unwrap();
    let edits: Vec<&str> = edits.lines().collect();
    assert_eq!(
        edits,
        vec![
            "0/U -entry boundaryField.inlet.value -set uniform (1.5 0 0)",
            "system/controlDict -entry startTime -set 0",
            "system/controlDict -entry endTime -set 0.1",
        ]
    );

    sim.remove_case().unwrap();
    assert!(!dir.exists());
}

#[test]
fn tools_see_their_case_directory() {
    let (_root, mut config) = setup();
    config.workdir_var = "MICRO_CASE".to_string();
    config.tools.mesh = sh("[ \"$MICRO_CASE\" = \"$(pwd -P)\" ] || exit 7");
    let sim = MicroSimulation::new("env", &config, SystemRunner).unwrap();
    assert!(sim.case().dir().is_dir());
}

#[test]
fn failed_mesh_discards_case() {
    let (root, mut config) = setup();
    config.tools.mesh = sh("echo 'cannot open blockMeshDict' >&2; exit 1");
    match MicroSimulation::new(0, &config, SystemRunner) {
        Err(Error::Setup(failure)) => {
            assert_eq!(failure.status, Some(1));
            assert!(failure.stderr.contains("cannot open blockMeshDict"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!root.path().join("runs/case_0").exists());
}

#[test]
fn solver_failure_keeps_clock() {
    let (_root, mut config) = setup();
    config.tools.solver = sh("echo diverged >&2; exit 1");
    let mut sim = MicroSimulation::new(0, &config, SystemRunner).unwrap();
    match sim.solve(&MacroInput::new(1.), 0.1) {
        Err(Error::Solver(failure)) => assert_eq!(failure.stderr.trim(), "diverged"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(sim.current_time(), 0.);
}

#[test]
fn hung_solver_is_killed() {
    let (_root, mut config) = setup();
    config.timeout_secs = Some(0.3);
    config.tools.solver = Tool::new("sleep").with_args(["30"]);
    let mut sim = MicroSimulation::new(0, &config, SystemRunner).unwrap();

    let start = std::time::Instant::now();
    match sim.solve(&MacroInput::new(1.), 0.1) {
        Err(Error::Solver(failure)) => assert_eq!(failure.status, None),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(start.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(sim.current_time(), 0.);
}

#[test]
fn hung_solver_helpers_are_killed() {
    let (_root, mut config) = setup();
    config.timeout_secs = Some(0.3);
    // the shell waits for a background job that writes a result after the timeout
    let late = format!("(sleep 1.5; echo '9 (9 0 0)' >> {RESULT})");
    config.tools.solver = sh(&format!("mkdir -p postProcessing/fieldAverage1/0 && {late} & wait"));
    let mut sim = MicroSimulation::new(0, &config, SystemRunner).unwrap();
    assert!(matches!(
        sim.solve(&MacroInput::new(1.), 0.1),
        Err(Error::Solver(_))
    ));
    std::thread::sleep(std::time::Duration::from_secs(2));
    assert!(!sim.case().path(RESULT).exists());
    assert_eq!(sim.current_time(), 0.);
}

#[test]
fn malformed_result_keeps_clock() {
    let (_root, mut config) = setup();
    config.tools.solver = solver_writing("0.2");
    let mut sim = MicroSimulation::new(0, &config, SystemRunner).unwrap();
    assert!(matches!(
        sim.solve(&MacroInput::new(1.), 0.1),
        Err(Error::Parse(ParseError::MissingColumn(_)))
    ));
    assert_eq!(sim.current_time(), 0.);
}

#[test]
fn concurrent_instances() {
    let (_root, config) = setup();
    let mut sims: Vec<_> = (0..3)
        .map(|id| MicroSimulation::new(id, &config, SystemRunner).unwrap())
        .collect();

    std::thread::scope(|s| {
        for (i, sim) in sims.iter_mut().enumerate() {
            s.spawn(move || {
                for _ in 0..=i {
                    sim.solve(&MacroInput::new(i as f64), 0.5).unwrap();
                }
            });
        }
    });

    for (i, sim) in sims.iter().enumerate() {
        assert_eq!(sim.current_time(), 0.5 * (i + 1) as f64);
        let edits = fs::read_to_string(sim.case().path("edits.log")).unwrap();
        assert_eq!(edits.lines().count(), 3 * (i + 1));
        let results = fs::read_to_string(sim.case().path(RESULT)).unwrap();
        assert_eq!(results.lines().count(), i + 1);
    }
}
