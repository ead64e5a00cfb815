//! Runs one bridge command with a hard timeout and cooperative cancellation

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TIMING_CONFIG;
use crate::error::{FleetError, Result};

/// Captured output of a successful command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Raw stdout; screen captures are binary
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// One command aimed at one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    pub serial: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Pause after a successful run, used to pace scripted sequences
    pub post_delay: Duration,
}

impl DeviceCommand {
    pub fn new(serial: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            serial: serial.into(),
            args,
            timeout: TIMING_CONFIG.command.command(),
            post_delay: Duration::ZERO,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_post_delay(mut self, post_delay: Duration) -> Self {
        self.post_delay = post_delay;
        self
    }
}

/// Launches the bridge binary, e.g. `adb -s <serial> shell input tap 10 20`
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    /// Arguments placed before everything else, e.g. `-H <host>` for a remote adb server
    base_args: Vec<String>,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run a command against one device.
    ///
    /// Every outcome comes back as a value: `Timeout`, `Cancelled` and `Rejected`
    /// are ordinary errors and the process is always reaped.
    pub async fn run(
        &self,
        command: &DeviceCommand,
        token: &CancellationToken,
    ) -> Result<CommandOutput> {
        let mut args = Vec::with_capacity(command.args.len() + 2);
        args.push("-s".to_string());
        args.push(command.serial.clone());
        args.extend(command.args.iter().cloned());

        let output = self.execute(&args, command.timeout, token).await?;

        if !command.post_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(command.post_delay) => {}
                _ = token.cancelled() => return Err(FleetError::Cancelled),
            }
        }

        Ok(output)
    }

    /// Run a bridge command that is not bound to a device, such as `devices`.
    pub async fn run_host(
        &self,
        args: &[String],
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<CommandOutput> {
        self.execute(args, timeout, token).await
    }

    async fn execute(
        &self,
        args: &[String],
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<CommandOutput> {
        if token.is_cancelled() {
            return Err(FleetError::Cancelled);
        }

        debug!("Running: {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // Both pipes are drained while the process runs, or a chatty command
        // stalls on a full pipe and looks like a hang.
        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let deadline = Instant::now() + timeout;

        let exit = tokio::select! {
            status = child.wait() => Exit::Finished(status),
            _ = token.cancelled() => Exit::Cancelled,
            _ = tokio::time::sleep_until(deadline) => Exit::TimedOut,
        };

        let status = match exit {
            Exit::Finished(status) => status?,
            Exit::Cancelled => {
                terminate(&mut child, &self.program).await;
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(FleetError::Cancelled);
            }
            Exit::TimedOut => {
                warn!("Command timed out after {:?}: {}", timeout, args.join(" "));
                terminate(&mut child, &self.program).await;
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(FleetError::Timeout);
            }
        };

        let grace = deadline.max(Instant::now() + PIPE_GRACE);
        let stdout = collect(stdout_reader, grace).await;
        let stderr = String::from_utf8_lossy(&collect(stderr_reader, grace).await).into_owned();

        if !status.success() {
            let diagnostic = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&stdout).trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(FleetError::Rejected {
                code: status.code(),
                diagnostic,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }

    fn spawn_error(&self, err: io::Error) -> FleetError {
        if err.kind() == io::ErrorKind::NotFound {
            FleetError::TransportUnavailable(format!(
                "{} is not installed or not in PATH",
                self.program
            ))
        } else {
            FleetError::Io(err)
        }
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new("adb")
    }
}

const PIPE_GRACE: Duration = Duration::from_secs(1);

enum Exit {
    Finished(io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut reader) = pipe {
            let _ = reader.read_to_end(&mut buffer).await;
        }
        buffer
    })
}

// A grandchild can keep a pipe open after the child exits, so the wait is bounded.
async fn collect(reader: JoinHandle<Vec<u8>>, deadline: Instant) -> Vec<u8> {
    match tokio::time::timeout_at(deadline, reader).await {
        Ok(Ok(buffer)) => buffer,
        _ => Vec::new(),
    }
}

async fn terminate(child: &mut Child, program: &str) {
    if let Err(e) = child.start_kill() {
        debug!("Failed to kill {}: {}", program, e);
    }
    let _ = child.wait().await;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::FakeBridge;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let bridge = FakeBridge::new(r#"shift 2; echo "$@""#);
        let command = DeviceCommand::new("emulator-5554", vec!["shell".into(), "echo".into()]);

        let output = bridge
            .runner()
            .run(&command, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.text().trim(), "shell echo");
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_diagnostic() {
        let bridge = FakeBridge::new(r#"echo "error: device offline" >&2; exit 1"#);
        let command = DeviceCommand::new("emulator-5554", vec!["shell".into()]);

        let err = bridge
            .runner()
            .run(&command, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            FleetError::Rejected { code, diagnostic } => {
                assert_eq!(code, Some(1));
                assert_eq!(diagnostic, "error: device offline");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_terminates_hang() {
        let bridge = FakeBridge::new("exec sleep 10");
        let command = DeviceCommand::new("emulator-5554", vec!["shell".into()])
            .with_timeout(Duration::from_secs(1));

        let started = StdInstant::now();
        let err = bridge
            .runner()
            .run(&command, &CancellationToken::new())
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, FleetError::Timeout));
        assert_eq!(err.to_string(), "Command timed out.");
        assert!(elapsed >= Duration::from_millis(900), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_cancellation_observed_mid_flight() {
        let bridge = FakeBridge::new("exec sleep 10");
        let command = DeviceCommand::new("emulator-5554", vec!["shell".into()]);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let started = StdInstant::now();
        let err = bridge.runner().run(&command, &token).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancelled_token_never_spawns() {
        let bridge = FakeBridge::new("exit 0");
        let token = CancellationToken::new();
        token.cancel();

        let err = bridge
            .runner()
            .run(&DeviceCommand::new("a", vec![]), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_bridge_is_transport_unavailable() {
        let runner = CommandRunner::new("/nonexistent/path/to/adb");
        let err = runner
            .run(&DeviceCommand::new("a", vec![]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn test_large_output_does_not_stall() {
        let bridge = FakeBridge::new(
            "i=0; while [ $i -lt 20000 ]; do echo 1234567890; i=$((i+1)); done",
        );
        let command = DeviceCommand::new("a", vec![]).with_timeout(Duration::from_secs(20));

        let output = bridge
            .runner()
            .run(&command, &CancellationToken::new())
            .await
            .unwrap();
        assert!(output.stdout.len() >= 200_000);
    }

    #[tokio::test]
    async fn test_post_delay_applies_after_success() {
        let bridge = FakeBridge::new("exit 0");
        let command =
            DeviceCommand::new("a", vec![]).with_post_delay(Duration::from_millis(300));

        let started = StdInstant::now();
        bridge
            .runner()
            .run(&command, &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
