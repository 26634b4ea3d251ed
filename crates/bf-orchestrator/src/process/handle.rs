//! Child process handle
//!
//! Wraps one spawned OS process. The process is started in its own process
//! group so that a stop signal reaches anything it forked, and its output
//! streams are handed to an [`OutputMultiplexer`].

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::Instant;

use bf_core::error::SpawnError;
use bf_core::types::StreamKind;

use super::multiplexer::{LogSink, OutputMultiplexer};

/// Liveness poll interval while waiting out the grace period
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long output readers may keep draining after the process is gone
const OUTPUT_LINGER: Duration = Duration::from_millis(500);

/// What to run and what to call it
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Logical name used to tag output, e.g. `worker-2`
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            env: Vec::new(),
        }
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program and arguments joined for display (environment is never shown)
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a `terminate` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited
    AlreadyExited,
    /// The process exited within the grace period
    Graceful,
    /// The process had to be killed
    Forced,
}

/// One spawned child process
pub struct ChildProcessHandle {
    name: String,
    pid: Option<u32>,
    child: Child,
    /// Set once, the first time the exit is observed
    status: Option<ExitStatus>,
    output: OutputMultiplexer,
}

impl ChildProcessHandle {
    /// Launch a process and start draining its output into `sink`
    pub fn spawn(spec: ProcessSpec, sink: &LogSink) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(&spec.program, e))?;
        let pid = child.id();

        let mut output = OutputMultiplexer::new(spec.name.clone(), sink.clone());
        if let Some(stdout) = child.stdout.take() {
            output.attach(stdout, StreamKind::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            output.attach(stderr, StreamKind::Stderr);
        }

        tracing::info!(process = %spec.name, pid = ?pid, "Started: {}", spec.command_line());

        Ok(Self {
            name: spec.name,
            pid,
            child,
            status: None,
            output,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, if the process was still running when spawned
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness check
    pub fn is_alive(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(process = %self.name, "Failed to poll process: {}", e);
                false
            }
        }
    }

    /// Exit code once the process has exited; `None` while running or if it
    /// was killed by a signal
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    /// Wait for the process to exit and return its exit code
    ///
    /// Only the calling task waits. Repeated calls return the cached result.
    pub async fn wait(&mut self) -> Option<i32> {
        if let Some(status) = self.status {
            return status.code();
        }

        match self.child.wait().await {
            Ok(status) => {
                self.record_exit(status);
                status.code()
            }
            Err(e) => {
                tracing::warn!(process = %self.name, "Failed to wait for process: {}", e);
                None
            }
        }
    }

    /// Ask the process to stop, then kill it if it is still alive after `grace`
    ///
    /// Anything left in the process group after the process itself is gone
    /// gets the same treatment.
    pub async fn terminate(&mut self, grace: Duration) -> Termination {
        if !self.is_alive() {
            #[cfg(unix)]
            self.stop_group(Instant::now() + grace).await;
            self.output.finish(OUTPUT_LINGER).await;
            return Termination::AlreadyExited;
        }

        tracing::debug!(process = %self.name, "Sending stop signal");
        self.request_stop();

        let deadline = Instant::now() + grace;
        let outcome = loop {
            if !self.is_alive() {
                break Termination::Graceful;
            }
            let now = Instant::now();
            if now >= deadline {
                break Termination::Forced;
            }
            tokio::time::sleep(std::cmp::min(TERMINATE_POLL_INTERVAL, deadline - now)).await;
        };

        if outcome == Termination::Forced {
            tracing::warn!(
                process = %self.name,
                "Still running after {:?}, killing",
                grace
            );
            self.force_kill();
            self.wait().await;
        }

        #[cfg(unix)]
        if outcome == Termination::Graceful {
            self.stop_group(deadline.max(Instant::now() + TERMINATE_POLL_INTERVAL))
                .await;
        }

        self.output.finish(OUTPUT_LINGER).await;
        tracing::info!(process = %self.name, code = ?self.exit_code(), "Stopped");
        outcome
    }

    fn record_exit(&mut self, status: ExitStatus) {
        if self.status.is_none() {
            tracing::debug!(process = %self.name, %status, "Process exited");
            self.status = Some(status);
        }
    }

    fn request_stop(&mut self) {
        #[cfg(unix)]
        self.signal_group(libc::SIGTERM);

        #[cfg(not(unix))]
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(process = %self.name, "Stop request failed: {}", e);
        }
    }

    fn force_kill(&mut self) {
        #[cfg(unix)]
        self.signal_group(libc::SIGKILL);

        if let Err(e) = self.child.start_kill() {
            tracing::debug!(process = %self.name, "Kill failed: {}", e);
        }
    }

    /// Stop processes the child forked that outlived it
    ///
    /// The group is asked to stop, polled until `deadline`, then killed.
    #[cfg(unix)]
    async fn stop_group(&self, deadline: Instant) {
        if !self.signal_group(libc::SIGTERM) {
            return;
        }

        loop {
            // Signal 0 only checks that some member is left
            if !self.signal_group(0) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(std::cmp::min(TERMINATE_POLL_INTERVAL, deadline - now)).await;
        }

        tracing::warn!(process = %self.name, "Forked processes still running, killing group");
        self.signal_group(libc::SIGKILL);
    }

    /// Signal the whole process group led by this child
    ///
    /// Returns false once the group has no members left.
    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };
        let Ok(pgid) = i32::try_from(pid) else {
            return false;
        };

        // SAFETY: kill(2) has no memory-safety preconditions
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::debug!(
                    process = %self.name,
                    signal,
                    "Signal delivery failed: {}",
                    err
                );
            }
            return false;
        }
        true
    }
}

impl std::fmt::Debug for ChildProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcessHandle")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::LogLine;
    use tokio::sync::mpsc;

    fn sh(name: &str, script: &str) -> ProcessSpec {
        ProcessSpec::new(name, "sh", vec!["-c".into(), script.into()])
    }

    async fn next_line(rx: &mut mpsc::UnboundedReceiver<LogLine>) -> LogLine {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for output")
            .expect("sink closed")
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let (sink, _rx) = LogSink::channel();
        let spec = ProcessSpec::new("worker-1", "/nonexistent/definitely-not-here", vec![]);
        let err = ChildProcessHandle::spawn(spec, &sink).unwrap_err();
        assert!(matches!(err, SpawnError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_output_reaches_sink() {
        let (sink, mut rx) = LogSink::channel();
        let mut handle =
            ChildProcessHandle::spawn(sh("worker-1", "echo hello; echo oops >&2"), &sink).unwrap();

        let mut seen = vec![next_line(&mut rx).await, next_line(&mut rx).await];
        seen.sort_by_key(|l| l.text.clone());
        assert_eq!(seen[0].text, "hello");
        assert_eq!(seen[0].stream, StreamKind::Stdout);
        assert_eq!(seen[1].text, "oops");
        assert_eq!(seen[1].stream, StreamKind::Stderr);
        assert!(seen.iter().all(|l| l.source == "worker-1"));

        assert_eq!(handle.wait().await, Some(0));
    }

    #[tokio::test]
    async fn test_wait_is_idempotent() {
        let (sink, _rx) = LogSink::channel();
        let mut handle = ChildProcessHandle::spawn(sh("worker-1", "exit 3"), &sink).unwrap();

        assert_eq!(handle.wait().await, Some(3));
        assert_eq!(handle.wait().await, Some(3));
        assert!(!handle.is_alive());
        assert_eq!(handle.exit_code(), Some(3));
    }

    #[tokio::test]
    async fn test_env_is_passed() {
        let (sink, mut rx) = LogSink::channel();
        let spec = sh("tunnel-1", "echo \"token=$FLEET_TEST_TOKEN\"").env("FLEET_TEST_TOKEN", "s3cret");
        assert!(!spec.command_line().contains("s3cret"));

        let mut handle = ChildProcessHandle::spawn(spec, &sink).unwrap();
        assert_eq!(next_line(&mut rx).await.text, "token=s3cret");
        handle.wait().await;
    }

    #[tokio::test]
    async fn test_terminate_graceful() {
        let (sink, _rx) = LogSink::channel();
        let mut handle =
            ChildProcessHandle::spawn(ProcessSpec::new("relay-1", "sleep", vec!["30".into()]), &sink)
                .unwrap();
        assert!(handle.is_alive());
        assert!(handle.pid().is_some());

        let outcome = handle.terminate(Duration::from_secs(3)).await;
        assert_eq!(outcome, Termination::Graceful);
        assert!(!handle.is_alive());
        // Killed by a signal, so no exit code
        assert_eq!(handle.exit_code(), None);
    }

    #[tokio::test]
    async fn test_terminate_escalates_when_stop_ignored() {
        let (sink, mut rx) = LogSink::channel();
        let script = "trap '' TERM; echo ready; while true; do sleep 1; done";
        let mut handle = ChildProcessHandle::spawn(sh("worker-1", script), &sink).unwrap();
        assert_eq!(next_line(&mut rx).await.text, "ready");

        let started = std::time::Instant::now();
        let outcome = handle.terminate(Duration::from_millis(300)).await;
        assert_eq!(outcome, Termination::Forced);
        assert!(!handle.is_alive());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_terminate_after_exit() {
        let (sink, _rx) = LogSink::channel();
        let mut handle = ChildProcessHandle::spawn(sh("worker-1", "exit 0"), &sink).unwrap();
        handle.wait().await;
        assert_eq!(
            handle.terminate(Duration::from_millis(100)).await,
            Termination::AlreadyExited
        );
    }

    /// Whether `pid` names a live process; zombies count as gone
    fn pid_running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map_or(true, |(_, rest)| !matches!(rest.trim_start().chars().next(), Some('Z' | 'X'))),
            Err(_) if std::path::Path::new("/proc/self").exists() => false,
            // SAFETY: signal 0 only checks for existence
            Err(_) => unsafe { libc::kill(pid, 0) == 0 },
        }
    }

    async fn forked_pid(rx: &mut mpsc::UnboundedReceiver<LogLine>) -> i32 {
        next_line(rx).await.text.trim().parse().expect("pid line")
    }

    async fn assert_gone_soon(pid: i32) {
        for _ in 0..50 {
            if !pid_running(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("process {} still running", pid);
    }

    #[tokio::test]
    async fn test_terminate_after_exit_stops_forked_processes() {
        let (sink, mut rx) = LogSink::channel();
        let mut handle =
            ChildProcessHandle::spawn(sh("worker-1", "sleep 30 & echo $!; exit 0"), &sink).unwrap();
        let grandchild = forked_pid(&mut rx).await;
        assert_eq!(handle.wait().await, Some(0));
        assert!(pid_running(grandchild));

        let outcome = handle.terminate(Duration::from_millis(500)).await;
        assert_eq!(outcome, Termination::AlreadyExited);
        assert_gone_soon(grandchild).await;
    }

    #[tokio::test]
    async fn test_terminate_kills_forked_processes_ignoring_stop() {
        let (sink, mut rx) = LogSink::channel();
        // The background subshell ignores TERM; the leader exits on it
        let script = "(trap '' TERM; while true; do sleep 1; done) & echo $!; exec sleep 30";
        let mut handle = ChildProcessHandle::spawn(sh("relay-1", script), &sink).unwrap();
        let grandchild = forked_pid(&mut rx).await;

        let outcome = handle.terminate(Duration::from_millis(300)).await;
        assert_eq!(outcome, Termination::Graceful);
        assert_gone_soon(grandchild).await;
    }
}
