use crate::config::Tool;
use crate::process::Invocation;
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

/// Dictionary holding the velocity field and its boundary conditions.
pub const VELOCITY_DICT: &str = "U";
/// Dictionary holding the run control parameters.
pub const CONTROL_DICT: &str = "system/controlDict";
/// Entry of the inlet velocity value in [`VELOCITY_DICT`].
pub const INLET_ENTRY: &str = "boundaryField.inlet.value";

/// Significant digits of time directory names (OpenFOAM's default `timePrecision`).
pub const TIME_PRECISION: usize = 6;

/// Returns the name of the time directory that stores the fields at time `t`.
///
/// Names follow the `%g` format with [`TIME_PRECISION`] significant digits, as OpenFOAM writes them
/// (`0`, `0.1`, `2.5`, `1e-07`). Accumulated round-off such as `0.30000000000000004` names `0.3`.
pub fn time_name(t: f64) -> String {
    if t == 0. {
        return "0".to_string();
    }
    if !t.is_finite() {
        return format!("{t}");
    }
    let precision = TIME_PRECISION as i32;
    let sci = format!("{:.*e}", TIME_PRECISION - 1, t);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if exp < -4 || exp >= precision {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_zeros(mantissa), exp.abs())
    } else {
        let decimals = (precision - 1 - exp).max(0) as usize;
        trim_zeros(&format!("{t:.decimals$}")).to_string()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Returns the value written to time entries of the control dictionary.
fn time_value(t: f64) -> String {
    format!("{t}")
}

/// A single dictionary entry assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictEdit {
    /// Dictionary file, relative to the case directory.
    pub file: PathBuf,
    /// Dot-separated path of the entry.
    pub entry: String,
    pub value: String,
}

impl DictEdit {
    pub fn new<P, S, T>(file: P, entry: S, value: T) -> Self
    where
        P: Into<PathBuf>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            file: file.into(),
            entry: entry.into(),
            value: value.into(),
        }
    }

    /// Sets a uniform inlet velocity `(inlet 0 0)` in the velocity field
    /// of the time directory for `t`.
    pub fn inlet_velocity(t: f64, inlet: f64) -> Self {
        Self::new(
            Path::new(&time_name(t)).join(VELOCITY_DICT),
            INLET_ENTRY,
            format!("uniform ({inlet} 0 0)"),
        )
    }

    pub fn start_time(t: f64) -> Self {
        Self::new(CONTROL_DICT, "startTime", time_value(t))
    }

    pub fn end_time(t: f64) -> Self {
        Self::new(CONTROL_DICT, "endTime", time_value(t))
    }
}

impl std::fmt::Display for DictEdit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} = {}", self.file.display(), self.entry, self.value)
    }
}

/// Case directory owned by a single micro simulation, together with its execution environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Case {
    dir: PathBuf,
    env: Vec<(String, OsString)>,
}

impl Case {
    /// Creates a case located at `dir`.
    /// Every tool run in this case sees `workdir_var` set to `dir`.
    pub fn new<P: Into<PathBuf>>(dir: P, workdir_var: &str) -> Self {
        let dir = dir.into();
        let env = vec![(workdir_var.to_string(), dir.clone().into_os_string())];
        Self { dir, env }
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns an invocation of `tool` running inside this case.
    pub fn invocation(&self, tool: &Tool) -> Invocation {
        Invocation::new(tool.program.as_str())
            .args(tool.base_args())
            .current_dir(&self.dir)
            .envs(&self.env)
    }

    /// Returns the dictionary-tool invocation that applies `edit`.
    pub fn edit_invocation(&self, tool: &Tool, edit: &DictEdit) -> Invocation {
        self.invocation(tool)
            .arg(edit.file.as_os_str())
            .args(["-entry", edit.entry.as_str(), "-set", edit.value.as_str()])
    }

    /// Returns the clone-tool invocation that copies `template` into this case directory.
    ///
    /// The case directory does not exist yet, so the tool runs in its parent directory
    /// without the case environment. `template` should be absolute.
    pub fn clone_invocation(&self, tool: &Tool, template: &Path) -> Invocation {
        let invocation = Invocation::new(tool.program.as_str())
            .args(tool.base_args())
            .arg(template.as_os_str())
            .arg(self.dir.as_os_str());
        match self.dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => invocation.current_dir(parent),
            _ => invocation,
        }
    }

    /// Returns the absolute location of a file of this case.
    pub fn path<P: AsRef<Path>>(&self, relative: P) -> PathBuf {
        self.dir.join(relative)
    }
}
