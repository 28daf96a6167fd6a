use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

/// Command line of an external tool.
/// `args` are passed before the operation-specific arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Tool {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<S: Into<String>, I: IntoIterator<Item = S>>(mut self, args: I) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub(crate) fn base_args(&self) -> impl Iterator<Item = OsString> + '_ {
        self.args.iter().map(OsString::from)
    }
}

/// The external toolchain driven by a micro simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    /// Copies the template case. Invoked with `(template, destination)`.
    pub clone: Tool,
    /// Generates the mesh of the case. Invoked without arguments.
    pub mesh: Tool,
    /// Edits case dictionaries. Invoked with `(file, -entry, key, -set, value)`.
    pub dictionary: Tool,
    /// Runs the simulation. Invoked without arguments.
    pub solver: Tool,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            clone: Tool::new("foamCloneCase"),
            mesh: Tool::new("blockMesh"),
            dictionary: Tool::new("foamDictionary"),
            solver: Tool::new("simpleFoam"),
        }
    }
}

/// Configuration shared by micro simulations.
///
/// Every field has a default value, so a JSON configuration only needs the fields that differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroConfig {
    /// Template case cloned by every micro simulation.
    pub template_dir: PathBuf,
    /// Directory where case directories are created.
    pub work_root: PathBuf,
    /// Case directories are named `<case_prefix><id>`.
    pub case_prefix: String,
    /// Location of the averaged field file, relative to the case directory.
    pub result_path: PathBuf,
    /// Environment variable set to the case directory for every tool invocation.
    pub workdir_var: String,
    /// Maximum time for a tool invocation. `None` waits indefinitely.
    pub timeout_secs: Option<f64>,
    pub tools: Toolchain,
}

impl Default for MicroConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("case_template"),
            work_root: PathBuf::from("."),
            case_prefix: "case_".to_string(),
            result_path: PathBuf::from("postProcessing/fieldAverage1/0/volFieldValue.dat"),
            workdir_var: "PWD".to_string(),
            timeout_secs: Some(3600.),
            tools: Toolchain::default(),
        }
    }
}

impl MicroConfig {
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json(&json_str)
    }

    /// Returns the tool timeout, checking that it is a valid duration.
    pub fn timeout(&self) -> Result<Option<Duration>> {
        match self.timeout_secs {
            None => Ok(None),
            Some(secs) if secs.is_finite() && secs > 0. => Ok(Some(Duration::from_secs_f64(secs))),
            Some(secs) => Err(Error::Config(format!("invalid timeout of {secs} seconds"))),
        }
    }

    /// Returns the name of the case directory of a simulation id, relative to `work_root`.
    pub fn case_name(&self, id: &str) -> String {
        format!("{}{id}", self.case_prefix)
    }
}
