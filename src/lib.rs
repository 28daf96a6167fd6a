pub mod case;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod postprocessing;
pub mod process;
pub mod simulation;

pub use config::MicroConfig;
pub use ensemble::Ensemble;
pub use error::{Error, Result, ToolFailure};
pub use process::{ProcessRunner, SystemRunner};
pub use simulation::{MicroSimulation, MicroSimulator};

use serde::{Deserialize, Serialize};

/// Helper trait for avoiding verbose trait constraints on process runners.
#[cfg(not(feature = "par_solve"))]
pub trait DynRunner: ProcessRunner {}
/// Helper trait for avoiding verbose trait constraints on process runners.
#[cfg(feature = "par_solve")]
pub trait DynRunner: ProcessRunner + Send {}

#[cfg(not(feature = "par_solve"))]
impl<T: ProcessRunner> DynRunner for T {}
#[cfg(feature = "par_solve")]
impl<T: ProcessRunner + Send> DynRunner for T {}

/// Boundary data sent by the macro model to a micro simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroInput {
    /// Inlet velocity magnitude.
    #[serde(rename = "macro-scalar-data")]
    pub scalar: f64,
}

impl MacroInput {
    pub fn new(scalar: f64) -> Self {
        Self { scalar }
    }
}

/// Observable returned by a micro simulation to the macro model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MicroOutput {
    /// Average velocity.
    #[serde(rename = "micro-scalar-data")]
    pub scalar: f64,
    /// Average velocity along the flow direction, i.e. `[scalar, 0, 0]`.
    #[serde(rename = "micro-vector-data")]
    pub vector: [f64; 3],
}

impl MicroOutput {
    /// Creates an output from the average velocity along the flow direction.
    pub fn from_scalar(scalar: f64) -> Self {
        Self {
            scalar,
            vector: [scalar, 0., 0.],
        }
    }
}

/// Temporal position of a micro simulation. It is represented as a single-element sequence.
///
/// Only the simulation clock is captured. Field data written by the solver in the case
/// directory are not part of the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint([f64; 1]);

impl Checkpoint {
    pub fn new(time: f64) -> Self {
        Self([time])
    }

    #[inline]
    pub fn time(&self) -> f64 {
        self.0[0]
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl TryFrom<&[f64]> for Checkpoint {
    type Error = Error;

    fn try_from(values: &[f64]) -> Result<Self> {
        match values {
            [time] => Ok(Self::new(*time)),
            _ => Err(Error::InvalidState(values.len())),
        }
    }
}

impl From<Checkpoint> for Vec<f64> {
    fn from(checkpoint: Checkpoint) -> Self {
        checkpoint.0.to_vec()
    }
}
