use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::runtime::RuntimeFlavor;

pub mod mock;

/// A single external tool call: program, arguments, working directory, and environment overlay.
///
/// The environment overlay is applied on top of the environment inherited from the current process.
/// Invocations never modify the environment of the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    env: Vec<(String, OsString)>,
}

impl Invocation {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env<K: Into<String>, V: Into<OsString>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Applies all the variables of an environment overlay.
    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = &'a (String, OsString)>,
    {
        self.env.extend(vars.into_iter().cloned());
        self
    }

    #[inline]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[inline]
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    #[inline]
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    #[inline]
    pub fn get_env(&self) -> &[(String, OsString)] {
        &self.env
    }

    /// Returns the value of an environment variable set by this invocation.
    pub fn get_env_var(&self, key: &str) -> Option<&OsString> {
        self.env.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns the arguments as lossy UTF-8 strings.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of a tool that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code. `None` if the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Output of a tool that exited with code 0 and printed nothing.
    pub fn success() -> Self {
        Self {
            status: Some(0),
            ..Default::default()
        }
    }

    /// Output of a tool that exited with the given code and error message.
    pub fn failure<S: Into<String>>(code: i32, stderr: S) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("process killed after timeout of {0:?}")]
    TimedOut(Duration),
}

/// Interface for running external tools. Micro simulations reach the meshing and solving
/// toolchain only through this trait, so tests can replace it with [`mock::ScriptedRunner`].
pub trait ProcessRunner {
    /// Runs the invocation to completion and captures its output.
    ///
    /// If `timeout` is `Some`, the process must be terminated once the timeout expires
    /// and [`RunError::TimedOut`] returned.
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, RunError>;
}

impl<T: ProcessRunner + ?Sized> ProcessRunner for &T {
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, RunError> {
        (**self).run(invocation, timeout)
    }
}

impl<T: ProcessRunner + ?Sized> ProcessRunner for std::sync::Arc<T> {
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, RunError> {
        (**self).run(invocation, timeout)
    }
}

/// Production runner that spawns real processes.
///
/// Each call blocks the current thread on a dedicated single-threaded tokio runtime.
/// When called from within a tokio runtime, the dedicated runtime lives in a scoped thread.
/// On multi-threaded runtimes, the worker is handed over with [`tokio::task::block_in_place`].
///
/// On Unix, every tool runs in its own process group. When the timeout expires, the whole group
/// is killed, so helpers spawned by the tool (shell wrappers, `mpirun` ranks) do not outlive it.
/// Processes that leave the group (e.g., with `setsid`) are out of reach.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, RunError> {
        tracing::debug!("running {invocation}");
        let output = match tokio::runtime::Handle::try_current() {
            Err(_) => run_blocking(invocation, timeout),
            Ok(handle) => {
                let run =
                    || std::thread::scope(|s| s.spawn(|| run_blocking(invocation, timeout)).join());
                let joined = match handle.runtime_flavor() {
                    RuntimeFlavor::MultiThread => tokio::task::block_in_place(run),
                    _ => run(),
                };
                joined.unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            }
        }?;

        let output = ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!("{} exited with status {:?}", invocation.program(), output.status);
        Ok(output)
    }
}

/// Spawns the invocation and waits for it on a new current-thread runtime.
fn run_blocking(
    invocation: &Invocation,
    timeout: Option<Duration>,
) -> Result<std::process::Output, RunError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let mut cmd = tokio::process::Command::new(invocation.program());
    cmd.args(invocation.get_args())
        .envs(invocation.get_env().iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    if let Some(dir) = invocation.get_current_dir() {
        cmd.current_dir(dir);
    }

    runtime.block_on(async {
        match cmd.spawn() {
            Ok(child) => wait_with_timeout(child, timeout).await,
            Err(e) => Err(RunError::Spawn(e)),
        }
    })
}

async fn wait_with_timeout(
    mut child: Child,
    timeout: Option<Duration>,
) -> Result<std::process::Output, RunError> {
    // the id is gone once the child is reaped, but its group may still be alive
    let pid = child.id();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let output = async {
        let (status, stdout, stderr) =
            tokio::try_join!(child.wait(), read_pipe(stdout), read_pipe(stderr))?;
        Ok::<_, std::io::Error>(std::process::Output {
            status,
            stdout,
            stderr,
        })
    };

    let limit = match timeout {
        Some(limit) => limit,
        None => return Ok(output.await?),
    };
    let result = tokio::time::timeout(limit, output).await;
    match result {
        Ok(output) => Ok(output?),
        Err(_) => {
            terminate(&mut child, pid).await;
            Err(RunError::TimedOut(limit))
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Kills the process group of the child (Unix) or the child itself, and reaps the child.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            // the child leads its own process group, so its pid is the group id
            if unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) } != 0 {
                let e = std::io::Error::last_os_error();
                tracing::warn!("failed to kill process group {pid}: {e}");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
    if let Err(e) = child.start_kill() {
        tracing::debug!("child already exited: {e}");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!("failed to reap killed process: {e}");
    }
}
