use crate::postprocessing::ParseError;
use crate::process::{RunError, ToolOutput};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for micro simulation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of an external tool invocation.
///
/// `status` is `None` when the tool did not exit on its own (it could not be spawned,
/// it was killed after a timeout, or it was terminated by a signal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub program: String,
    pub status: Option<i32>,
    pub stderr: String,
}

impl ToolFailure {
    pub(crate) fn from_output(program: &str, output: ToolOutput) -> Self {
        Self {
            program: program.to_string(),
            status: output.status,
            stderr: output.stderr,
        }
    }

    pub(crate) fn from_run_error(program: &str, error: &RunError) -> Self {
        Self {
            program: program.to_string(),
            status: None,
            stderr: error.to_string(),
        }
    }
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(code) => write!(f, "{} exited with code {code}", self.program)?,
            None => write!(f, "{} did not exit normally", self.program)?,
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {stderr}")?;
        }
        Ok(())
    }
}

/// Errors raised by micro simulations.
///
/// External tool failures are surfaced as soon as they happen, with the captured stderr attached.
/// Nothing is retried here: the simulation clock is left untouched, so callers may retry a step.
#[derive(Debug, Error)]
pub enum Error {
    /// Case cloning or initial meshing failed. The instance cannot be used.
    #[error("case setup failed: {0}")]
    Setup(ToolFailure),

    /// The case directory could not be prepared before running the setup tools.
    #[error("case setup failed for {path}: {reason}")]
    CaseDirectory { path: PathBuf, reason: String },

    /// A dictionary edit failed. Edits applied before the failing one are not rolled back.
    #[error("boundary condition preparation failed: {0}")]
    BoundaryCondition(ToolFailure),

    /// The solver exited with a non-zero code, could not be spawned, or timed out.
    #[error("solver failed: {0}")]
    Solver(ToolFailure),

    /// The solver result file is missing or does not follow the expected format.
    #[error("could not read solver results: {0}")]
    Parse(#[from] ParseError),

    /// Time steps must be finite and strictly positive.
    #[error("invalid time step size {0}")]
    InvalidTimeStep(f64),

    /// Checkpoints hold exactly one value.
    #[error("invalid checkpoint: expected 1 value, got {0}")]
    InvalidState(usize),

    /// Instance ids name a single directory entry.
    #[error("invalid simulation id {0:?}")]
    InvalidId(String),

    /// The number of macro inputs does not match the number of micro simulations.
    #[error("expected {expected} macro inputs, got {actual}")]
    InputMismatch { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
