use crate::{
    case::{Case, DictEdit},
    config::{MicroConfig, Toolchain},
    error::ToolFailure,
    postprocessing,
    process::{Invocation, ProcessRunner, SystemRunner, ToolOutput},
    Checkpoint, Error, MacroInput, MicroOutput, Result,
};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Interface of micro simulations driven by a macro model.
pub trait MicroSimulator {
    /// Advances the simulation by `dt` using the boundary data of the macro model,
    /// and returns the observables of the micro simulation at the end of the time window.
    ///
    /// The simulation clock only advances if the whole step succeeds.
    fn solve(&mut self, input: &MacroInput, dt: f64) -> Result<MicroOutput>;

    /// Returns the temporal position of the simulation.
    fn get_state(&self) -> Checkpoint;

    /// Moves the simulation to the temporal position of the checkpoint.
    fn set_state(&mut self, state: &Checkpoint);
}

/// Micro simulation that drives an external CFD solver in its own case directory.
///
/// The case directory is cloned from a template case and meshed when the simulation is created.
/// Each call to [`MicroSimulator::solve`] sets the inlet velocity and the time window in the
/// case dictionaries, runs the solver over the window, and reads the average velocity.
#[derive(Debug)]
pub struct MicroSimulation<R = SystemRunner> {
    id: String,
    case: Case,
    tools: Toolchain,
    result_path: PathBuf,
    timeout: Option<Duration>,
    current_time: f64,
    runner: R,
}

impl<R: ProcessRunner> MicroSimulation<R> {
    /// Creates the case directory of a new micro simulation and generates its mesh.
    ///
    /// The case directory is `<work_root>/<case_prefix><id>`. It must not exist beforehand.
    /// If the case cannot be set up, the partially created case directory is removed.
    pub fn new<S: std::fmt::Display>(id: S, config: &MicroConfig, runner: R) -> Result<Self> {
        let id = id.to_string();
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(Error::InvalidId(id));
        }
        let timeout = config.timeout()?;

        let work_root = &config.work_root;
        std::fs::create_dir_all(work_root).map_err(|e| Error::CaseDirectory {
            path: work_root.clone(),
            reason: e.to_string(),
        })?;
        let work_root = std::fs::canonicalize(work_root).map_err(|e| Error::CaseDirectory {
            path: work_root.clone(),
            reason: e.to_string(),
        })?;
        let dir = work_root.join(config.case_name(&id));
        if dir.symlink_metadata().is_ok() {
            return Err(Error::CaseDirectory {
                path: dir,
                reason: "directory already exists".to_string(),
            });
        }

        let sim = Self {
            id,
            case: Case::new(dir, &config.workdir_var),
            tools: config.tools.clone(),
            result_path: config.result_path.clone(),
            timeout,
            current_time: 0.,
            runner,
        };
        if let Err(e) = sim.setup(&config.template_dir) {
            sim.discard_case();
            return Err(e);
        }
        tracing::info!("micro simulation {} ready at {}", sim.id, sim.case.dir().display());
        Ok(sim)
    }

    fn setup(&self, template: &Path) -> Result<()> {
        // the clone tool runs in the work root, so relative templates are resolved beforehand
        let template = std::env::current_dir()?.join(template);
        let clone = self.case.clone_invocation(&self.tools.clone, &template);
        self.run(&clone).map_err(Error::Setup)?;
        if !self.case.dir().is_dir() {
            return Err(Error::CaseDirectory {
                path: self.case.dir().to_path_buf(),
                reason: format!("{} did not create the case directory", self.tools.clone.program),
            });
        }
        let mesh = self.case.invocation(&self.tools.mesh);
        self.run(&mesh).map_err(Error::Setup)?;
        Ok(())
    }

    fn discard_case(&self) {
        let dir = self.case.dir();
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                tracing::warn!("failed to remove case directory {}: {e}", dir.display());
            }
        }
    }

    /// Runs an external tool and checks that it exits successfully.
    fn run(&self, invocation: &Invocation) -> std::result::Result<ToolOutput, ToolFailure> {
        tracing::debug!("micro simulation {}: {invocation}", self.id);
        match self.runner.run(invocation, self.timeout) {
            Ok(output) if output.is_success() => Ok(output),
            Ok(output) => {
                tracing::warn!(
                    "micro simulation {}: {} exited with status {:?}",
                    self.id,
                    invocation.program(),
                    output.status
                );
                Err(ToolFailure::from_output(invocation.program(), output))
            }
            Err(e) => {
                let program = invocation.program();
                tracing::warn!("micro simulation {}: {program} failed: {e}", self.id);
                Err(ToolFailure::from_run_error(program, &e))
            }
        }
    }

    /// Returns the id of the micro simulation.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the current simulation time.
    #[inline]
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Returns the case directory of the micro simulation.
    #[inline]
    pub fn case(&self) -> &Case {
        &self.case
    }

    /// Removes the case directory, consuming the micro simulation.
    pub fn remove_case(self) -> Result<()> {
        std::fs::remove_dir_all(self.case.dir())?;
        tracing::info!("micro simulation {} removed", self.id);
        Ok(())
    }
}

impl<R: ProcessRunner> MicroSimulator for MicroSimulation<R> {
    fn solve(&mut self, input: &MacroInput, dt: f64) -> Result<MicroOutput> {
        if !dt.is_finite() || dt <= 0. {
            return Err(Error::InvalidTimeStep(dt));
        }
        let start_time = self.current_time;
        let end_time = start_time + dt;
        tracing::debug!("micro simulation {} step from t={start_time} to t={end_time}", self.id);

        // Edits applied before a failing one are left in place
        let edits = [
            DictEdit::inlet_velocity(start_time, input.scalar),
            DictEdit::start_time(start_time),
            DictEdit::end_time(end_time),
        ];
        for edit in &edits {
            let invocation = self.case.edit_invocation(&self.tools.dictionary, edit);
            self.run(&invocation).map_err(Error::BoundaryCondition)?;
        }

        let solver = self.case.invocation(&self.tools.solver);
        self.run(&solver).map_err(Error::Solver)?;

        let average = postprocessing::read_last(&self.case.path(&self.result_path))?;
        let velocity = average.value[0];

        self.current_time = end_time;
        tracing::info!(
            "micro simulation {} solved up to t={end_time}: average velocity {velocity}",
            self.id
        );
        Ok(MicroOutput::from_scalar(velocity))
    }

    fn get_state(&self) -> Checkpoint {
        Checkpoint::new(self.current_time)
    }

    fn set_state(&mut self, state: &Checkpoint) {
        self.current_time = state.time();
    }
}
