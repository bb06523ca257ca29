// Child process supervision
// Spawns a command as the leader of its own process group, streams its
// combined output, and stops the whole group (terminate, then kill)
// stdout and stderr share one pipe so lines keep the child's write order

use super::output::LineSplitter;
use crate::error::{ControlError, Result};
use crate::models::CommandSpec;
use log::{debug, info, warn};
use serde::Serialize;
use std::io::{self, Read};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Default wait between the terminate and kill signals
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "code", rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    Exited(i32),
    /// Exited after the forced-kill escalation of [`ProcessHandle::stop`]
    Killed(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    AlreadyExited,
    Terminated,
    Killed,
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

/// Lines from the child's combined stdout and stderr, in emission order.
/// Ends once every holder of the write end (the child and anything it
/// forked) has closed it.
pub struct OutputLines {
    rx: mpsc::UnboundedReceiver<String>,
}

impl OutputLines {
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

struct HandleInner {
    pid: u32,
    program: String,
    exit_rx: watch::Receiver<Option<i32>>,
    killed: AtomicBool,
    output: parking_lot::Mutex<Option<OutputLines>>,
}

/// Shared handle to one supervised child
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.inner.pid)
            .field("program", &self.inner.program)
            .field("state", &self.state())
            .finish()
    }
}

/// Spawn `spec` as a new process group leader. Must run inside a tokio runtime.
pub fn spawn_supervised(spec: &CommandSpec) -> Result<ProcessHandle> {
    let program = spec.program().to_string();
    let spawn_error = |source: io::Error| ControlError::Spawn {
        program: program.clone(),
        source,
    };

    if program.is_empty() {
        return Err(spawn_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty command line",
        )));
    }

    if let Some(dir) = &spec.workdir {
        if !dir.is_dir() {
            return Err(spawn_error(io::Error::new(
                io::ErrorKind::NotFound,
                format!("working directory {:?} does not exist", dir),
            )));
        }
    }

    let (reader, writer) = io::pipe().map_err(&spawn_error)?;
    let writer_err = writer.try_clone().map_err(&spawn_error)?;

    let mut cmd = Command::new(&program);
    cmd.args(&spec.argv[1..])
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(writer_err);

    if let Some(dir) = &spec.workdir {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    let spawned = cmd.spawn();
    // Close our copies of the write end, or the reader never sees EOF
    drop(cmd);
    let mut child = spawned.map_err(&spawn_error)?;
    let pid = match child.id() {
        Some(pid) => pid,
        None => {
            return Err(spawn_error(io::Error::new(
                io::ErrorKind::Other,
                "child exited before its pid was read",
            )))
        }
    };

    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let pumped = thread::Builder::new()
        .name(format!("output-{}", pid))
        .spawn(move || pump_lines(reader, line_tx));
    if let Err(e) = pumped {
        let _ = child.start_kill();
        return Err(spawn_error(e));
    }

    let (exit_tx, exit_rx) = watch::channel(None);
    let waited_program = program.clone();
    tokio::spawn(async move {
        let code = match child.wait().await {
            Ok(status) => exit_code(status),
            Err(e) => {
                warn!("Failed to wait for {} (pid {}): {}", waited_program, pid, e);
                -1
            }
        };
        debug!("{} (pid {}) exited with code {}", waited_program, pid, code);
        let _ = exit_tx.send(Some(code));
    });

    info!("Spawned {} with pid {}", program, pid);

    Ok(ProcessHandle {
        inner: Arc::new(HandleInner {
            pid,
            program,
            exit_rx,
            killed: AtomicBool::new(false),
            output: parking_lot::Mutex::new(Some(OutputLines { rx: line_rx })),
        }),
    })
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn program(&self) -> &str {
        &self.inner.program
    }

    pub fn is_alive(&self) -> bool {
        self.inner.exit_rx.borrow().is_none()
    }

    pub fn state(&self) -> ProcessState {
        match *self.inner.exit_rx.borrow() {
            None => ProcessState::Running,
            Some(code) if self.inner.killed.load(Ordering::SeqCst) => ProcessState::Killed(code),
            Some(code) => ProcessState::Exited(code),
        }
    }

    /// Take the output line stream. Only one reader may own it.
    pub fn take_output(&self) -> Result<OutputLines> {
        self.inner.output.lock().take().ok_or(ControlError::OutputTaken)
    }

    /// Wait for the child to exit and return its code; a signal N reads as `-N`
    pub async fn wait(&self) -> i32 {
        let mut rx = self.inner.exit_rx.clone();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(code) => *code,
            Err(_) => None,
        };
        result.unwrap_or(-1)
    }

    /// Terminate the process group, escalating to a kill after `grace`.
    /// A handle whose child already exited is left alone.
    pub async fn stop(&self, grace: Duration) -> Result<StopOutcome> {
        if !self.is_alive() {
            return Ok(StopOutcome::AlreadyExited);
        }

        let pid = self.inner.pid;
        debug!("Sending terminate to process group {}", pid);
        if !signal_group(pid, GroupSignal::Terminate)? {
            self.wait().await;
            return Ok(StopOutcome::AlreadyExited);
        }

        if tokio::time::timeout(grace, self.wait()).await.is_ok() {
            info!("Process group {} terminated", pid);
            return Ok(StopOutcome::Terminated);
        }

        warn!(
            "Process group {} still alive after {:?}, killing",
            pid, grace
        );
        if signal_group(pid, GroupSignal::Kill)? {
            self.inner.killed.store(true, Ordering::SeqCst);
        }
        self.wait().await;
        Ok(StopOutcome::Killed)
    }
}

fn pump_lines<R: Read>(mut reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut splitter = LineSplitter::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            // Keep draining after the receiver goes away so the child never
            // blocks on a full pipe.
            Ok(n) => {
                for line in splitter.feed(&buf[..n]) {
                    let _ = tx.send(line);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Output stream read failed: {}", e);
                break;
            }
        }
    }
    if let Some(line) = splitter.finish() {
        let _ = tx.send(line);
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Returns `Ok(false)` when the group no longer exists
#[cfg(unix)]
fn signal_group(pid: u32, signal: GroupSignal) -> Result<bool> {
    let sig = match signal {
        GroupSignal::Terminate => libc::SIGTERM,
        GroupSignal::Kill => libc::SIGKILL,
    };
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, sig) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(ControlError::Signal { pid, source: err })
    }
}

/// Without process groups, walk the descendant tree and signal each member
#[cfg(not(unix))]
fn signal_group(pid: u32, signal: GroupSignal) -> Result<bool> {
    use sysinfo::{Pid, Signal, System};

    let mut system = System::new();
    system.refresh_processes();

    let root = Pid::from_u32(pid);
    if system.process(root).is_none() {
        return Ok(false);
    }

    let mut targets = vec![root];
    let mut cursor = 0;
    while cursor < targets.len() {
        let parent = targets[cursor];
        for (child_pid, process) in system.processes() {
            if process.parent() == Some(parent) && !targets.contains(child_pid) {
                targets.push(*child_pid);
            }
        }
        cursor += 1;
    }

    // Leaves first so parents cannot respawn workers mid-teardown
    for target in targets.iter().rev() {
        if let Some(process) = system.process(*target) {
            let delivered = match signal {
                GroupSignal::Terminate => process
                    .kill_with(Signal::Term)
                    .unwrap_or_else(|| process.kill()),
                GroupSignal::Kill => process.kill(),
            };
            if !delivered {
                debug!("Signal not delivered to pid {}", target);
            }
        }
    }
    Ok(true)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new(["/bin/sh", "-c", script])
    }

    async fn collect(handle: &ProcessHandle) -> Vec<String> {
        let mut output = handle.take_output().unwrap();
        let mut lines = Vec::new();
        while let Some(line) = output.next_line().await {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_collects_stdout_and_stderr_in_order() {
        let handle =
            spawn_supervised(&sh("echo out1; echo err1 1>&2; echo out2; echo err2 1>&2; exit 3"))
                .unwrap();
        let lines = collect(&handle).await;
        assert_eq!(lines, vec!["out1", "err1", "out2", "err2"]);
        assert_eq!(handle.wait().await, 3);
        assert_eq!(handle.state(), ProcessState::Exited(3));
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_output_can_only_be_taken_once() {
        let handle = spawn_supervised(&sh("true")).unwrap();
        assert!(handle.take_output().is_ok());
        assert!(matches!(handle.take_output(), Err(ControlError::OutputTaken)));
        handle.wait().await;
    }

    #[tokio::test]
    async fn test_env_and_workdir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let spec = sh("echo \"$PILOT_TEST_VAR\"; pwd")
            .env("PILOT_TEST_VAR", "hello")
            .workdir(dir.path());
        let handle = spawn_supervised(&spec).unwrap();
        let lines = collect(&handle).await;
        assert_eq!(lines[0], "hello");
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(&lines[1]).canonicalize().unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let err = spawn_supervised(&CommandSpec::new(["/nonexistent/pull-tool", "pull"]))
            .unwrap_err();
        assert!(matches!(err, ControlError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_missing_workdir_is_spawn_error() {
        let spec = sh("true").workdir("/nonexistent/workdir");
        assert!(matches!(
            spawn_supervised(&spec),
            Err(ControlError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_terminates_whole_group() {
        // The child forks a worker; both must go when the group is stopped.
        let handle = spawn_supervised(&sh("sleep 30 & echo started; wait")).unwrap();
        let mut output = handle.take_output().unwrap();
        assert_eq!(output.next_line().await.as_deref(), Some("started"));

        let outcome = handle.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, StopOutcome::Terminated);
        assert_eq!(handle.wait().await, -libc::SIGTERM);
        // Stream closes once the forked sleeper is gone too.
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while output.next_line().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let handle =
            spawn_supervised(&sh("trap '' TERM; echo ready; while true; do sleep 1; done"))
                .unwrap();
        let mut output = handle.take_output().unwrap();
        assert_eq!(output.next_line().await.as_deref(), Some("ready"));

        let outcome = handle.stop(Duration::from_millis(300)).await.unwrap();
        assert_eq!(outcome, StopOutcome::Killed);
        assert_eq!(handle.state(), ProcessState::Killed(-libc::SIGKILL));
    }

    #[tokio::test]
    async fn test_stop_on_exited_handle_is_noop() {
        let handle = spawn_supervised(&sh("exit 0")).unwrap();
        assert_eq!(handle.wait().await, 0);
        for _ in 0..2 {
            let outcome = handle.stop(DEFAULT_STOP_GRACE).await.unwrap();
            assert_eq!(outcome, StopOutcome::AlreadyExited);
        }
        assert_eq!(handle.state(), ProcessState::Exited(0));
    }
}
