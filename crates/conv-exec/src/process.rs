//! Scoped subprocess execution.
//!
//! The child is spawned with `kill_on_drop`, so it is terminated on every exit path: normal
//! return, timeout, interrupt, or the caller's future being dropped.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::interrupt::Interrupt;

/// How long pipe readers may keep draining after the child was killed. A grandchild that
/// inherited the pipes can otherwise keep them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), ..Self::default() }
    }

    /// First element is the program. `None` for an empty argv.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self { program: program.clone(), args: args.to_vec(), ..Self::default() })
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.env.push((k.into(), v.into()));
        self
    }

    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str)).collect::<Vec<_>>().join(" ")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecStatus {
    Exited { code: Option<i32>, success: bool },
    TimedOut,
    Interrupted,
}

#[derive(Clone, Debug)]
pub struct ExecOutput {
    pub status: ExecStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        matches!(self.status, ExecStatus::Exited { success: true, .. })
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run `spec` to completion, or until `timeout` elapses or `interrupt` fires. Only a failure to
/// spawn is an `Err`; timeouts and interrupts are reported in [`ExecOutput::status`].
pub async fn run_bounded(spec: &CommandSpec, timeout: Duration, interrupt: &Interrupt) -> Result<ExecOutput> {
    let started = Instant::now();
    if interrupt.is_triggered() {
        return Ok(ExecOutput { status: ExecStatus::Interrupted, stdout: vec![], stderr: vec![], elapsed: Duration::ZERO });
    }

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }
    let mut child = cmd.spawn().with_context(|| format!("spawn {}", spec.display()))?;
    debug!(command = %spec.display(), pid = ?child.id(), "spawned");

    if let (Some(bytes), Some(mut pipe)) = (spec.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            // A child that exits without reading stdin closes the pipe; that is not our error.
            let _ = pipe.write_all(&bytes).await;
            let _ = pipe.shutdown().await;
        });
    }

    let out_task = tokio::spawn(drain(child.stdout.take()));
    let err_task = tokio::spawn(drain(child.stderr.take()));

    let status = tokio::select! {
        res = child.wait() => {
            let st = res.with_context(|| format!("wait {}", spec.display()))?;
            ExecStatus::Exited { code: st.code(), success: st.success() }
        }
        _ = tokio::time::sleep(timeout) => ExecStatus::TimedOut,
        _ = interrupt.triggered() => ExecStatus::Interrupted,
    };

    let (stdout, stderr) = if matches!(status, ExecStatus::Exited { .. }) {
        (out_task.await.unwrap_or_default(), err_task.await.unwrap_or_default())
    } else {
        warn!(command = %spec.display(), ?status, "killing subprocess");
        let _ = child.kill().await;
        (collect_within(out_task).await, collect_within(err_task).await)
    };

    Ok(ExecOutput { status, stdout, stderr, elapsed: started.elapsed() })
}

async fn drain<R: tokio::io::AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut p) = pipe {
        let _ = p.read_to_end(&mut buf).await;
    }
    buf
}

async fn collect_within(task: tokio::task::JoinHandle<Vec<u8>>) -> Vec<u8> {
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(res) => res.unwrap_or_default(),
        Err(_) => {
            abort.abort();
            Vec::new()
        }
    }
}

/// Whether `program` resolves on `PATH`.
pub fn on_path(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
