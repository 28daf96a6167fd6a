//! Scripted process runner for testing without an installed toolchain.
//!
//! Available for integration tests and downstream test suites.

use super::{Invocation, ProcessRunner, RunError, ToolOutput};
use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

type Script = dyn Fn(&Invocation) -> Result<ToolOutput, RunError> + Send + Sync;

/// How a scripted program reacts when it is run.
#[derive(Clone)]
pub enum Behavior {
    /// Exits with code 0.
    Succeed,
    /// Exits with the given code and error message.
    Fail { code: i32, stderr: String },
    /// Never finishes; the runner reports a timeout.
    TimeOut,
    /// The program cannot be spawned.
    SpawnFails,
    /// Arbitrary reaction to the invocation.
    Custom(Arc<Script>),
}

impl Behavior {
    pub fn fail<S: Into<String>>(code: i32, stderr: S) -> Self {
        Self::Fail {
            code,
            stderr: stderr.into(),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Invocation) -> Result<ToolOutput, RunError> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Creates the directory named by the last argument, as a case-cloning tool would.
    pub fn create_destination() -> Self {
        Self::custom(|invocation| {
            let dest = invocation
                .get_args()
                .last()
                .map(PathBuf::from)
                .unwrap_or_default();
            let dest = resolve(invocation, &dest);
            std::fs::create_dir_all(dest)?;
            Ok(ToolOutput::success())
        })
    }

    /// Appends `line` to the file at `path` (relative to the working directory),
    /// as a solver writing its post-processing output would.
    pub fn append_line<P: Into<PathBuf>, S: Into<String>>(path: P, line: S) -> Self {
        let path = path.into();
        let line = line.into();
        Self::custom(move |invocation| {
            let path = resolve(invocation, &path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{line}")?;
            Ok(ToolOutput::success())
        })
    }

    fn react(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, RunError> {
        match self {
            Self::Succeed => Ok(ToolOutput::success()),
            Self::Fail { code, stderr } => Ok(ToolOutput::failure(*code, stderr.clone())),
            Self::TimeOut => Err(RunError::TimedOut(timeout.unwrap_or_default())),
            Self::SpawnFails => Err(RunError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: command not found", invocation.program()),
            ))),
            Self::Custom(script) => (**script)(invocation),
        }
    }
}

impl std::fmt::Debug for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeed => write!(f, "Succeed"),
            Self::Fail { code, stderr } => f
                .debug_struct("Fail")
                .field("code", code)
                .field("stderr", stderr)
                .finish(),
            Self::TimeOut => write!(f, "TimeOut"),
            Self::SpawnFails => write!(f, "SpawnFails"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

fn resolve(invocation: &Invocation, path: &Path) -> PathBuf {
    match invocation.get_current_dir() {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

/// Runner that records every invocation and reacts according to per-program [`Behavior`]s.
///
/// Programs without a registered behavior succeed. Clones share the same script and call log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    behaviors: Arc<Mutex<HashMap<String, Behavior>>>,
    calls: Arc<Mutex<Vec<Invocation>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the behavior of a program and returns the runner.
    pub fn on<S: Into<String>>(self, program: S, behavior: Behavior) -> Self {
        self.set_behavior(program, behavior);
        self
    }

    /// Changes the behavior of a program (for multi-stage tests).
    pub fn set_behavior<S: Into<String>>(&self, program: S, behavior: Behavior) {
        self.behaviors
            .lock()
            .expect("ScriptedRunner behaviors mutex poisoned")
            .insert(program.into(), behavior);
    }

    /// Returns all the invocations run so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls
            .lock()
            .expect("ScriptedRunner calls mutex poisoned")
            .clone()
    }

    /// Returns the invocations of the given program, in order.
    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|invocation| invocation.program() == program)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls
            .lock()
            .expect("ScriptedRunner calls mutex poisoned")
            .clear();
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, RunError> {
        self.calls
            .lock()
            .expect("ScriptedRunner calls mutex poisoned")
            .push(invocation.clone());

        let behavior = self
            .behaviors
            .lock()
            .expect("ScriptedRunner behaviors mutex poisoned")
            .get(invocation.program())
            .cloned()
            .unwrap_or(Behavior::Succeed);

        behavior.react(invocation, timeout)
    }
}
