use crate::core::environment::EnvOverlay;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// How long to wait for output pipes to drain once the process tree is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to start one external program.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: EnvOverlay,
    pub cwd: Option<PathBuf>,
    pub stdout_log: Option<PathBuf>,
    pub stderr_log: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: EnvOverlay::new(),
            cwd: None,
            stdout_log: None,
            stderr_log: None,
            timeout: None,
        }
    }

    /// Splits a rendered command line into program and arguments.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program).args(args.iter().cloned()))
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: EnvOverlay) -> Self {
        self.env = env;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn logs(mut self, stdout: impl Into<PathBuf>, stderr: impl Into<PathBuf>) -> Self {
        self.stdout_log = Some(stdout.into());
        self.stderr_log = Some(stderr.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a process that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// Exit code, or `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `lines` lines of stderr, for diagnostics.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProcessError {
    #[error("Failed to start '{program}': {message}")]
    Spawn { program: String, message: String },
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(String),
}

/// Runs `spec` to completion, killing its whole process tree on timeout or when
/// `shutdown` turns `true`. Descendants still alive after a normal exit are killed too.
pub async fn run(
    spec: &ProcessSpec,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ProcessOutput, ProcessError> {
    if *shutdown.borrow_and_update() {
        return Err(ProcessError::Cancelled);
    }

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    spec.env.apply(&mut command);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    #[cfg(unix)]
    command.process_group(0);

    debug!("Starting: {}", spec.command_line());
    let started = Instant::now();
    let mut child = command.spawn().map_err(|e| ProcessError::Spawn {
        program: spec.program.display().to_string(),
        message: e.to_string(),
    })?;
    let pid = child.id();

    let stdout_task = tokio::spawn(drain(child.stdout.take()));
    let stderr_task = tokio::spawn(drain(child.stderr.take()));

    let deadline = async {
        match spec.timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let outcome = tokio::select! {
        status = child.wait() => status.map_err(|e| ProcessError::Io(e.to_string())),
        _ = &mut deadline => Err(ProcessError::Timeout(spec.timeout.unwrap_or_default())),
        _ = cancelled(&mut shutdown) => Err(ProcessError::Cancelled),
    };

    terminate_tree(&mut child, pid, outcome.is_err()).await;

    let stdout = collect(stdout_task).await;
    let stderr = collect(stderr_task).await;
    write_log(spec.stdout_log.as_ref(), &stdout).await;
    write_log(spec.stderr_log.as_ref(), &stderr).await;

    let status = outcome?;
    let output = ProcessOutput {
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        elapsed: started.elapsed(),
    };
    trace!(
        "'{}' exited with {:?} after {:?}",
        spec.program.display(),
        output.exit_code,
        output.elapsed
    );
    Ok(output)
}

/// Resolves once `shutdown` turns `true`; never resolves if the sender goes away first.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Kills the process group led by the child. A running child is still unreaped, so its
/// group id cannot have been reused; after a normal exit the group is only signalled
/// while descendants keep it alive.
async fn terminate_tree(child: &mut Child, pid: Option<u32>, child_running: bool) {
    if child_running {
        kill_group(pid);
        if let Err(e) = child.kill().await {
            warn!("Failed to kill child process: {}", e);
        }
    } else if group_alive(pid) {
        debug!("Killing descendants left behind in process group {:?}", pid);
        kill_group(pid);
    }
}

#[cfg(unix)]
fn group_id(pid: Option<u32>) -> Option<i32> {
    pid.and_then(|p| i32::try_from(p).ok())
}

#[cfg(unix)]
fn group_alive(pid: Option<u32>) -> bool {
    let Some(pgid) = group_id(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the permission and existence checks only.
    unsafe { libc::killpg(pgid, 0) == 0 }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    let Some(pgid) = group_id(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created for this child.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc == 0 {
        trace!("Sent SIGKILL to process group {}", pgid);
    }
}

#[cfg(not(unix))]
fn group_alive(_pid: Option<u32>) -> bool {
    false
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!("Stopped reading child output: {}", e);
        }
    }
    buf
}

async fn collect(task: tokio::task::JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            warn!("Output reader task failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            warn!("Output pipe still open {:?} after the process ended", DRAIN_TIMEOUT);
            Vec::new()
        }
    }
}

async fn write_log(path: Option<&PathBuf>, bytes: &[u8]) {
    if let Some(path) = path {
        if let Err(e) = tokio::fs::write(path, bytes).await {
            warn!("Failed to write log {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn idle() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let dir = tempdir().unwrap();
        let spec = sh("echo 0.042; echo oops >&2; exit 3").logs(
            dir.path().join("job.out"),
            dir.path().join("job.err"),
        );
        let output = run(&spec, idle()).await.unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "0.042");
        assert_eq!(output.stderr_tail(1), "oops");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("job.out")).unwrap(),
            "0.042\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("job.err")).unwrap(),
            "oops\n"
        );
    }

    #[tokio::test]
    async fn overlay_reaches_the_child() {
        let spec = sh("printf %s \"$DETECTOR\"").env(EnvOverlay::new().with("DETECTOR", "epic"));
        let output = run(&spec, idle()).await.unwrap();
        assert_eq!(output.stdout, "epic");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let spec = ProcessSpec::new("/nonexistent/bic-mobo-test-binary");
        assert!(matches!(
            run(&spec, idle()).await,
            Err(ProcessError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn already_cancelled_never_starts() {
        let (tx, rx) = watch::channel(true);
        let dir = tempdir().unwrap();
        let marker = dir.path().join("started");
        let spec = sh(&format!("touch {}", marker.display()));
        assert_eq!(run(&spec, rx).await, Err(ProcessError::Cancelled));
        assert!(!marker.exists());
        drop(tx);
    }

    #[tokio::test]
    async fn cancellation_stops_a_running_process() {
        let (tx, rx) = watch::channel(false);
        let spec = sh("sleep 30");
        let handle = tokio::spawn(async move { run(&spec, rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(ProcessError::Cancelled));
    }

    #[cfg(target_os = "linux")]
    fn process_gone(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_the_whole_process_tree() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let spec = sh(&format!(
            "sleep 30 & echo $! > {}; wait",
            pid_file.display()
        ))
        .timeout(Duration::from_millis(300));

        let started = Instant::now();
        let result = run(&spec, idle()).await;
        assert_eq!(result, Err(ProcessError::Timeout(Duration::from_millis(300))));
        assert!(started.elapsed() < Duration::from_secs(10));

        let grandchild: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut gone = false;
        for _ in 0..40 {
            if process_gone(grandchild) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "grandchild {} survived the timeout", grandchild);
    }

    #[cfg(unix)]
    #[test]
    fn group_of_an_exited_leader_is_not_signalled() {
        use std::os::unix::process::CommandExt;
        let mut child = std::process::Command::new("sh")
            .args(["-c", "exit 0"])
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!group_alive(Some(pid)));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn normal_exit_still_kills_lingering_descendants() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let spec = sh(&format!(
            "sleep 30 >/dev/null 2>&1 & echo $! > {}; exit 0",
            pid_file.display()
        ));

        let output = run(&spec, idle()).await.unwrap();
        assert!(output.success());

        let grandchild: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut gone = false;
        for _ in 0..40 {
            if process_gone(grandchild) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "grandchild {} outlived its parent", grandchild);
    }
}
