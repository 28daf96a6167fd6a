use crate::{
    Checkpoint, DynRunner, Error, MacroInput, MicroConfig, MicroOutput, MicroSimulation,
    MicroSimulator, Result,
};
#[cfg(feature = "par_solve")]
use rayon::prelude::*;
use std::collections::HashSet;

/// Set of micro simulations stepped together over the same time windows.
///
/// Every micro simulation owns a distinct case directory, so they can be solved concurrently.
/// If the feature `par_solve` is activated, [`Ensemble::solve`] is parallelized.
#[derive(Debug)]
pub struct Ensemble<R> {
    sims: Vec<MicroSimulation<R>>,
}

impl<R: DynRunner + Clone> Ensemble<R> {
    /// Creates one micro simulation per id. Ids must be unique.
    ///
    /// If any micro simulation cannot be created, the case directories of
    /// the micro simulations created so far are removed.
    pub fn new<I, S>(ids: I, config: &MicroConfig, runner: R) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: std::fmt::Display,
    {
        let ids: Vec<String> = ids.into_iter().map(|id| id.to_string()).collect();
        let mut unique = HashSet::new();
        if let Some(duplicate) = ids.iter().find(|id| !unique.insert(id.as_str())) {
            return Err(Error::InvalidId(duplicate.clone()));
        }

        let mut sims = Vec::with_capacity(ids.len());
        for id in ids {
            match MicroSimulation::new(id, config, runner.clone()) {
                Ok(sim) => sims.push(sim),
                Err(e) => {
                    for sim in sims {
                        let id = sim.id().to_string();
                        if let Err(e) = sim.remove_case() {
                            tracing::warn!("failed to remove micro simulation {id}: {e}");
                        }
                    }
                    return Err(e);
                }
            }
        }
        tracing::info!("ensemble of {} micro simulations ready", sims.len());
        Ok(Self { sims })
    }
}

impl<R: DynRunner> Ensemble<R> {
    #[inline]
    pub fn len(&self) -> usize {
        self.sims.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sims.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MicroSimulation<R>> {
        self.sims.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MicroSimulation<R>> {
        self.sims.iter()
    }

    /// Solves every micro simulation over the same time window,
    /// each one with its own macro input.
    ///
    /// A failing micro simulation does not stop the others, and only its own clock stays put.
    /// It returns an error without solving anything if there is not exactly one input
    /// per micro simulation.
    pub fn solve(&mut self, inputs: &[MacroInput], dt: f64) -> Result<Vec<Result<MicroOutput>>> {
        if inputs.len() != self.sims.len() {
            return Err(Error::InputMismatch {
                expected: self.sims.len(),
                actual: inputs.len(),
            });
        }
        #[cfg(feature = "par_solve")]
        let iter = self.sims.par_iter_mut().zip(inputs.par_iter());
        #[cfg(not(feature = "par_solve"))]
        let iter = self.sims.iter_mut().zip(inputs.iter());
        let results: Vec<_> = iter.map(|(sim, input)| sim.solve(input, dt)).collect();

        let n_failed = results.iter().filter(|r| r.is_err()).count();
        if n_failed > 0 {
            tracing::warn!("{n_failed} of {} micro simulations failed", results.len());
        }
        Ok(results)
    }

    /// Returns the checkpoints of all the micro simulations.
    pub fn get_states(&self) -> Vec<Checkpoint> {
        self.sims.iter().map(|sim| sim.get_state()).collect()
    }

    /// Restores the checkpoints of all the micro simulations.
    pub fn set_states(&mut self, states: &[Checkpoint]) -> Result<()> {
        if states.len() != self.sims.len() {
            return Err(Error::InputMismatch {
                expected: self.sims.len(),
                actual: states.len(),
            });
        }
        self.sims
            .iter_mut()
            .zip(states)
            .for_each(|(sim, state)| sim.set_state(state));
        Ok(())
    }

    /// Removes the case directories of all the micro simulations.
    /// It tries to remove every directory and returns the first error found.
    pub fn remove_cases(self) -> Result<()> {
        let mut result = Ok(());
        for sim in self.sims {
            if let Err(e) = sim.remove_case() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{
        mock::{Behavior, ScriptedRunner},
        ProcessRunner, ToolOutput,
    };
    use std::path::Path;

    const RESULT: &str = "postProcessing/fieldAverage1/0/volFieldValue.dat";

    fn scripted() -> ScriptedRunner {
        ScriptedRunner::new()
            .on("foamCloneCase", Behavior::create_destination())
            .on(
                "simpleFoam",
                // each case reports its own inlet velocity doubled
                Behavior::custom(|invocation| {
                    let dir = invocation.get_current_dir().unwrap_or(Path::new("."));
                    let u = std::fs::read_to_string(dir.join("inlet"))?;
                    let u: f64 = u.trim().parse().unwrap_or_default();
                    let path = dir.join(RESULT);
                    std::fs::create_dir_all(path.parent().unwrap_or(dir))?;
                    std::fs::write(path, format!("0 ({} 0 0)\n", 2. * u))?;
                    Ok(ToolOutput::success())
                }),
            )
            .on(
                "foamDictionary",
                Behavior::custom(|invocation| {
                    let args = invocation.args_lossy();
                    if args[2] == "boundaryField.inlet.value" {
                        let value = args[4].trim_start_matches("uniform (");
                        let u = value.split_whitespace().next().unwrap_or_default();
                        let dir = invocation.get_current_dir().unwrap_or(Path::new("."));
                        std::fs::write(dir.join("inlet"), u)?;
                    }
                    Ok(ToolOutput::success())
                }),
            )
    }

    fn config(root: &tempfile::TempDir) -> MicroConfig {
        MicroConfig {
            work_root: root.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn solve_all() {
        let root = tempfile::tempdir().unwrap();
        let mut ensemble = Ensemble::new(0..3, &config(&root), scripted()).unwrap();
        assert_eq!(ensemble.len(), 3);
        let dirs: HashSet<_> = ensemble.iter().map(|s| s.case().dir().to_path_buf()).collect();
        assert_eq!(dirs.len(), 3);

        let inputs: Vec<_> = [1., 2., 3.].into_iter().map(MacroInput::new).collect();
        let outputs = ensemble.solve(&inputs, 0.1).unwrap();
        let scalars: Vec<f64> = outputs.into_iter().map(|o| o.unwrap().scalar).collect();
        assert_eq!(scalars, vec![2., 4., 6.]);
        assert!(ensemble.iter().all(|s| s.current_time() == 0.1));
    }

    #[test]
    fn partial_failure() {
        let root = tempfile::tempdir().unwrap();
        let runner = scripted();
        let mut ensemble = Ensemble::new(["a", "b"], &config(&root), runner.clone()).unwrap();

        // make the solver fail in case "b" only
        let b = ensemble.get(1).unwrap().case().dir().to_path_buf();
        let working = scripted();
        runner.set_behavior(
            "simpleFoam",
            Behavior::custom(move |invocation| {
                if invocation.get_current_dir() == Some(b.as_path()) {
                    Ok(ToolOutput::failure(1, "diverged"))
                } else {
                    working.run(invocation, None)
                }
            }),
        );
        let inputs = [MacroInput::new(1.), MacroInput::new(1.)];
        let outputs = ensemble.solve(&inputs, 0.5).unwrap();
        assert_eq!(outputs[0].as_ref().unwrap().scalar, 2.);
        assert!(matches!(outputs[1], Err(Error::Solver(_))));
        assert_eq!(ensemble.get(0).unwrap().current_time(), 0.5);
        assert_eq!(ensemble.get(1).unwrap().current_time(), 0.);
    }

    #[test]
    fn mismatches() {
        let root = tempfile::tempdir().unwrap();
        let runner = scripted();
        let mut ensemble = Ensemble::new(0..2, &config(&root), runner.clone()).unwrap();
        runner.clear_calls();

        assert!(matches!(
            ensemble.solve(&[MacroInput::new(1.)], 0.1),
            Err(Error::InputMismatch { expected: 2, actual: 1 })
        ));
        assert!(runner.calls().is_empty());
        assert!(matches!(
            ensemble.set_states(&[]),
            Err(Error::InputMismatch { expected: 2, actual: 0 })
        ));
    }

    #[test]
    fn states() {
        let root = tempfile::tempdir().unwrap();
        let mut ensemble = Ensemble::new(0..2, &config(&root), scripted()).unwrap();
        let inputs = [MacroInput::new(1.), MacroInput::new(1.)];
        ensemble.solve(&inputs, 0.25).unwrap();

        let states = ensemble.get_states();
        assert_eq!(states, vec![Checkpoint::new(0.25); 2]);
        ensemble.solve(&inputs, 0.25).unwrap();
        ensemble.set_states(&states).unwrap();
        assert!(ensemble.iter().all(|s| s.current_time() == 0.25));
    }

    #[test]
    fn construction_failures() {
        let root = tempfile::tempdir().unwrap();
        let config = config(&root);

        assert!(matches!(
            Ensemble::new([1, 2, 1], &config, scripted()),
            Err(Error::InvalidId(id)) if id == "1"
        ));

        // the third mesh generation fails
        let runner = scripted();
        let count = std::sync::atomic::AtomicUsize::new(0);
        runner.set_behavior(
            "blockMesh",
            Behavior::custom(move |_| {
                match count.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                    2 => Ok(ToolOutput::failure(1, "bad mesh")),
                    _ => Ok(ToolOutput::success()),
                }
            }),
        );
        assert!(matches!(
            Ensemble::new(0..3, &config, runner),
            Err(Error::Setup(_))
        ));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn remove_cases() {
        let root = tempfile::tempdir().unwrap();
        let ensemble = Ensemble::new(0..4, &config(&root), scripted()).unwrap();
        assert!(!ensemble.is_empty());
        ensemble.remove_cases().unwrap();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
