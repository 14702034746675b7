//! Runs one subordinate process at a time with a bounded wait, interrupting it cooperatively when
//! the wait runs out.
//!
//! A subordinate moves through `Running → Completed` when it exits on its own, or
//! `Running → TimedOut → InterruptRequested → Terminated` when the wait elapses first.

use std::ffi::{OsStr, OsString};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use ota_harness_core::prelude::{
    HarnessError, HarnessResult, IoResultExt, StopListener, StopRequested, ToolCommand,
};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// How long to keep reading output after the subordinate has exited. Grandchildren can hold the
/// pipes open after the subordinate itself is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A command to run as a subordinate process.
#[derive(Debug, Clone)]
pub struct SubordinateCommand {
    label: String,
    tool: ToolCommand,
    args: Vec<OsString>,
}

impl SubordinateCommand {
    /// The `label` names the log target that the subordinate's output is forwarded to.
    pub fn new(label: impl Into<String>, tool: ToolCommand) -> Self {
        Self {
            label: label.into(),
            tool,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn display(&self) -> String {
        self.tool.display_with(&self.args)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubordinateState {
    Running,
    Completed,
    TimedOut,
    InterruptRequested,
    Terminated,
}

/// Handle to a spawned subordinate process.
#[derive(Debug)]
pub struct Subordinate {
    child: Child,
    pid: u32,
    description: String,
    state: SubordinateState,
    exit_status: Option<ExitStatus>,
    forced: bool,
    output: OutputCapture,
}

impl Subordinate {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> SubordinateState {
        self.state
    }

    /// Unset while the subordinate is running.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// True if the subordinate was stopped by the controller rather than finishing by itself.
    pub fn terminated_by_timeout(&self) -> bool {
        self.state == SubordinateState::Terminated
    }

    fn record_exit(&mut self, status: ExitStatus, state: SubordinateState) {
        self.exit_status = Some(status);
        self.state = state;
    }
}

/// How a call to [`LifecycleController::run_with_timeout`] ended.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The subordinate exited with status 0 before the timeout.
    Completed { output: String },
    /// The timeout elapsed and the subordinate was interrupted.
    Terminated {
        status: Option<ExitStatus>,
        /// The subordinate ignored both interrupts and had to be killed.
        forced: bool,
        output: String,
    },
}

impl ProcessOutcome {
    pub fn output(&self) -> &str {
        match self {
            ProcessOutcome::Completed { output } => output,
            ProcessOutcome::Terminated { output, .. } => output,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleController {
    /// Time the subordinate is given to react to the process group interrupt before it is
    /// interrupted directly.
    interrupt_grace: Duration,
    /// Time the subordinate is given to exit after the direct interrupt before it is killed.
    stop_timeout: Duration,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self {
            interrupt_grace: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(300),
        }
    }
}

impl LifecycleController {
    pub fn with_interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = grace;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Spawn the subordinate as the leader of its own process group, forwarding its output to the
    /// log. Must be called from within a Tokio runtime.
    pub fn spawn(&self, command: &SubordinateCommand) -> HarnessResult<Subordinate> {
        let description = command.display();
        log::info!("Running '{description}'");

        let std_cmd = command.tool.command();
        let mut cmd = Command::from(std_cmd);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .io_context(|| format!("Failed to run '{description}'"))?;
        let pid = child.id().ok_or_else(|| {
            HarnessError::io(
                format!("Failed to get the pid of '{description}'"),
                std::io::Error::other("process exited before its pid was read"),
            )
        })?;
        log::debug!("'{description}' running with pid {pid}");

        let target = format!("ota_subordinate::{}", command.label);
        let output = OutputCapture::start(&mut child, &target);

        Ok(Subordinate {
            child,
            pid,
            description,
            state: SubordinateState::Running,
            exit_status: None,
            forced: false,
            output,
        })
    }

    /// Wait up to `timeout` for the subordinate to exit by itself.
    ///
    /// Returns [`SubordinateState::Completed`] on a zero exit and [`SubordinateState::TimedOut`]
    /// if the wait elapses. A nonzero exit is an error.
    pub async fn wait(
        &self,
        subordinate: &mut Subordinate,
        timeout: Duration,
    ) -> HarnessResult<SubordinateState> {
        if subordinate.state != SubordinateState::Running {
            return Ok(subordinate.state);
        }

        match tokio::time::timeout(timeout, subordinate.child.wait()).await {
            Ok(status) => {
                let status = status
                    .io_context(|| format!("Failed to wait for '{}'", subordinate.description))?;
                subordinate.record_exit(status, SubordinateState::Completed);
                if status.success() {
                    Ok(SubordinateState::Completed)
                } else {
                    Err(HarnessError::SubordinateFailed {
                        command: subordinate.description.clone(),
                        status,
                    })
                }
            }
            Err(_) => {
                log::debug!(
                    "'{}' still running after {timeout:?}",
                    subordinate.description
                );
                subordinate.state = SubordinateState::TimedOut;
                Ok(SubordinateState::TimedOut)
            }
        }
    }

    /// Ask the subordinate to stop and wait for it to do so.
    ///
    /// Sends SIGINT to the process group, then SIGINT to the process itself if it has not exited
    /// within the grace period. If it still has not exited within the stop timeout the whole group
    /// is killed. Processes left in the group after the subordinate exits are sent SIGTERM.
    pub async fn interrupt(&self, subordinate: &mut Subordinate) -> HarnessResult<()> {
        if subordinate.exit_status.is_some() {
            return Ok(());
        }

        subordinate.state = SubordinateState::InterruptRequested;
        let pid = Pid::from_raw(i32::try_from(subordinate.pid).map_err(|_| {
            HarnessError::io(
                format!("Invalid pid {} for '{}'", subordinate.pid, subordinate.description),
                std::io::Error::from(std::io::ErrorKind::InvalidInput),
            )
        })?);

        log::info!("Interrupting {} ('{}')", subordinate.pid, subordinate.description);
        if let Err(e) = killpg(pid, Signal::SIGINT) {
            log::warn!("Failed to interrupt process group {pid}: {e}");
        }
        if let Some(status) = self.wait_for_exit(subordinate, self.interrupt_grace).await? {
            subordinate.record_exit(status, SubordinateState::Terminated);
            release_group(pid);
            return Ok(());
        }

        log::info!("{} ignored the group interrupt, interrupting it directly", subordinate.pid);
        if let Err(e) = kill(pid, Signal::SIGINT) {
            log::warn!("Failed to interrupt process {pid}: {e}");
        }
        if let Some(status) = self.wait_for_exit(subordinate, self.stop_timeout).await? {
            subordinate.record_exit(status, SubordinateState::Terminated);
            release_group(pid);
            return Ok(());
        }

        log::error!(
            "'{}' did not stop within {:?} of being interrupted, killing it",
            subordinate.description,
            self.stop_timeout
        );
        if let Err(e) = killpg(pid, Signal::SIGKILL) {
            log::warn!("Failed to kill process group {pid}: {e}");
            subordinate
                .child
                .start_kill()
                .io_context(|| format!("Failed to kill '{}'", subordinate.description))?;
        }
        let status = subordinate
            .child
            .wait()
            .await
            .io_context(|| format!("Failed to wait for '{}'", subordinate.description))?;
        subordinate.forced = true;
        subordinate.record_exit(status, SubordinateState::Terminated);

        Ok(())
    }

    /// Run a command to completion, interrupting it if it is still running after `timeout`.
    pub async fn run_with_timeout(
        &self,
        command: &SubordinateCommand,
        timeout: Duration,
    ) -> HarnessResult<ProcessOutcome> {
        self.run(command, timeout, None).await
    }

    /// Like [`LifecycleController::run_with_timeout`], but a stop request also interrupts the
    /// subordinate. Once it has exited, [`HarnessError::Stopped`] is returned.
    pub async fn run_until_stopped(
        &self,
        command: &SubordinateCommand,
        timeout: Duration,
        stop_listener: &mut StopListener,
    ) -> HarnessResult<ProcessOutcome> {
        self.run(command, timeout, Some(stop_listener)).await
    }

    async fn run(
        &self,
        command: &SubordinateCommand,
        timeout: Duration,
        stop_listener: Option<&mut StopListener>,
    ) -> HarnessResult<ProcessOutcome> {
        let mut subordinate = self.spawn(command)?;

        let waited = match stop_listener {
            Some(stop_listener) => tokio::select! {
                state = self.wait(&mut subordinate, timeout) => Some(state),
                _ = stop_listener.wait_for_stop() => None,
            },
            None => Some(self.wait(&mut subordinate, timeout).await),
        };

        match waited {
            Some(state) => match state? {
                SubordinateState::Completed => Ok(ProcessOutcome::Completed {
                    output: subordinate.output.collect().await,
                }),
                _ => {
                    self.interrupt(&mut subordinate).await?;
                    Ok(ProcessOutcome::Terminated {
                        status: subordinate.exit_status,
                        forced: subordinate.forced,
                        output: subordinate.output.collect().await,
                    })
                }
            },
            None => {
                log::warn!("Stop requested, interrupting '{}'", subordinate.description);
                self.interrupt(&mut subordinate).await?;
                subordinate.output.collect().await;
                Err(StopRequested::default().into())
            }
        }
    }

    async fn wait_for_exit(
        &self,
        subordinate: &mut Subordinate,
        timeout: Duration,
    ) -> HarnessResult<Option<ExitStatus>> {
        match tokio::time::timeout(timeout, subordinate.child.wait()).await {
            Ok(status) => status
                .map(Some)
                .io_context(|| format!("Failed to wait for '{}'", subordinate.description)),
            Err(_) => Ok(None),
        }
    }
}

/// Ask whatever the subordinate left behind in its process group to exit.
///
/// Background children of a shell ignore SIGINT, so they are sent SIGTERM once the leader is gone.
fn release_group(pgid: Pid) {
    match killpg(pgid, Signal::SIGTERM) {
        Ok(()) => log::debug!("Terminated processes left in group {pgid}"),
        Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("Failed to terminate processes left in group {pgid}: {e}"),
    }
}

/// Combined stdout and stderr of a subordinate, in the order lines arrived.
#[derive(Debug)]
struct OutputCapture {
    buffer: Arc<Mutex<String>>,
    readers: Vec<JoinHandle<()>>,
}

impl OutputCapture {
    fn start(child: &mut Child, target: &str) -> Self {
        let buffer = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, target.to_string(), buffer.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, target.to_string(), buffer.clone()));
        }

        Self { buffer, readers }
    }

    async fn collect(&mut self) -> String {
        for reader in &mut self.readers {
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut *reader)
                .await
                .is_err()
            {
                log::debug!("Output still open after the subordinate exited, not waiting for it");
                reader.abort();
            }
        }
        self.readers.clear();

        self.buffer.lock().clone()
    }
}

fn forward_lines<R>(reader: R, target: String, buffer: Arc<Mutex<String>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim_end_matches(['\r', '\n']);
                    log::info!(target: target.as_str(), "{line}");
                    let mut buffer = buffer.lock();
                    buffer.push_str(line);
                    buffer.push('\n');
                }
                Err(e) => {
                    log::warn!(target: target.as_str(), "Failed to read output: {e}");
                    break;
                }
            }
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use ota_harness_core::prelude::StopHandle;

    use super::*;

    fn sh(label: &str, script: &str) -> SubordinateCommand {
        SubordinateCommand::new(label, ToolCommand::new("sh").with_arg("-c")).arg(script)
    }

    fn quick_controller() -> LifecycleController {
        LifecycleController::default()
            .with_interrupt_grace(Duration::from_millis(500))
            .with_stop_timeout(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_completes_within_timeout() {
        let outcome = quick_controller()
            .run_with_timeout(&sh("ok", "echo hello; echo oops >&2"), Duration::from_secs(10))
            .await
            .expect("subordinate should complete");

        match outcome {
            ProcessOutcome::Completed { output } => {
                assert!(output.contains("hello\n"));
                assert!(output.contains("oops\n"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let result = quick_controller()
            .run_with_timeout(&sh("fail", "exit 3"), Duration::from_secs(10))
            .await;

        match result {
            Err(HarnessError::SubordinateFailed { status, .. }) => {
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("expected a subordinate failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_interrupts_after_timeout() {
        let controller = quick_controller();
        let mut subordinate = controller
            .spawn(&sh("sleeper", "sleep 30"))
            .expect("failed to spawn");

        let state = controller
            .wait(&mut subordinate, Duration::from_millis(200))
            .await
            .expect("wait failed");
        assert_eq!(state, SubordinateState::TimedOut);
        assert!(subordinate.exit_status().is_none());

        controller
            .interrupt(&mut subordinate)
            .await
            .expect("interrupt failed");
        assert_eq!(subordinate.state(), SubordinateState::Terminated);
        assert!(subordinate.terminated_by_timeout());
        assert!(subordinate.exit_status().is_some());
    }

    #[tokio::test]
    async fn test_reaches_terminated_when_first_interrupt_is_ignored() {
        let script = r#"
count=0
trap 'count=$((count + 1)); if [ "$count" -ge 2 ]; then exit 7; fi' INT
echo ready
while true; do sleep 0.1; done
"#;
        let outcome = quick_controller()
            .run_with_timeout(&sh("stubborn", script), Duration::from_millis(500))
            .await
            .expect("interrupting should not raise");

        match outcome {
            ProcessOutcome::Terminated { status, forced, .. } => {
                assert!(!forced);
                assert_eq!(status.and_then(|s| s.code()), Some(7));
            }
            other => panic!("expected termination, got {other:?}"),
        }
    }

    /// Whether `pid` is still running. Zombies waiting to be reaped count as gone.
    #[cfg(target_os = "linux")]
    fn process_alive(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z'),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    async fn wait_until_gone(pid: i32) -> bool {
        for _ in 0..50 {
            if !process_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    fn read_pid(path: &std::path::Path) -> i32 {
        std::fs::read_to_string(path)
            .expect("child pid was not recorded")
            .trim()
            .parse()
            .expect("child pid is not a number")
    }

    #[tokio::test]
    async fn test_kills_subordinate_that_ignores_every_interrupt() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let pid_file = temp.path().join("child.pid");
        let controller = LifecycleController::default()
            .with_interrupt_grace(Duration::from_millis(200))
            .with_stop_timeout(Duration::from_millis(500));
        let script = format!(
            "trap '' INT; sleep 300 >/dev/null 2>&1 & echo $! > '{}'; while true; do sleep 0.1; done",
            pid_file.display()
        );

        let started = std::time::Instant::now();
        let outcome = controller
            .run_with_timeout(&sh("immovable", &script), Duration::from_millis(300))
            .await
            .expect("interrupting should not raise");

        assert!(matches!(outcome, ProcessOutcome::Terminated { forced: true, .. }));
        assert!(started.elapsed() < OUTPUT_DRAIN_TIMEOUT);
        #[cfg(target_os = "linux")]
        assert!(
            wait_until_gone(read_pid(&pid_file)).await,
            "child of the killed subordinate is still running"
        );
    }

    #[tokio::test]
    async fn test_stop_request_interrupts_subordinate_and_its_children() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let pid_file = temp.path().join("child.pid");
        let interrupted = temp.path().join("interrupted");
        let script = format!(
            "trap 'touch \"{interrupted}\"; exit 130' INT\n\
             sleep 300 >/dev/null 2>&1 &\n\
             echo $! > '{pid_file}'\n\
             wait\n",
            interrupted = interrupted.display(),
            pid_file = pid_file.display(),
        );
        let stop_handle = StopHandle::new();
        let mut stop_listener = stop_handle.new_listener();

        let controller = quick_controller();
        let command = sh("helper", &script);
        let (result, ()) = tokio::join!(
            controller.run_until_stopped(
                &command,
                Duration::from_secs(60),
                &mut stop_listener,
            ),
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                stop_handle.request_stop();
            }
        );

        assert!(matches!(result, Err(HarnessError::Stopped(_))), "{result:?}");
        assert!(interrupted.exists(), "subordinate was not sent SIGINT");
        #[cfg(target_os = "linux")]
        assert!(
            wait_until_gone(read_pid(&pid_file)).await,
            "child of the stopped subordinate is still running"
        );
    }

    #[tokio::test]
    async fn test_stop_requested_before_spawn_interrupts_at_once() {
        let stop_handle = StopHandle::new();
        stop_handle.request_stop();
        let mut stop_listener = stop_handle.new_listener();

        let result = quick_controller()
            .run_until_stopped(
                &sh("sleeper", "sleep 30"),
                Duration::from_secs(60),
                &mut stop_listener,
            )
            .await;

        assert!(matches!(result, Err(HarnessError::Stopped(_))));
    }
}
