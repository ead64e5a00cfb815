//! Bounded fan-out of bridge commands across devices

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::adb::{CommandOutput, CommandRunner, DeviceCommand};
use crate::config::TIMING_CONFIG;
use crate::context::ExecutionContext;
use crate::error::{FleetError, Result};

type CommandFactory = Arc<dyn Fn(&str) -> Vec<Vec<String>> + Send + Sync>;

/// What each device runs for one submission
#[derive(Clone)]
pub enum CommandSource {
    /// The same argument vector on every device
    Single(Vec<String>),
    /// Argument vectors run back to back on every device
    Sequence(Vec<Vec<String>>),
    /// A sequence built per device from its serial
    PerDevice(CommandFactory),
}

impl CommandSource {
    pub fn per_device<F>(factory: F) -> Self
    where
        F: Fn(&str) -> Vec<Vec<String>> + Send + Sync + 'static,
    {
        CommandSource::PerDevice(Arc::new(factory))
    }

    fn commands_for(&self, serial: &str) -> Vec<Vec<String>> {
        match self {
            CommandSource::Single(args) => vec![args.clone()],
            CommandSource::Sequence(commands) => commands.clone(),
            CommandSource::PerDevice(factory) => factory(serial),
        }
    }
}

impl From<Vec<String>> for CommandSource {
    fn from(args: Vec<String>) -> Self {
        CommandSource::Single(args)
    }
}

impl fmt::Debug for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSource::Single(args) => f.debug_tuple("Single").field(args).finish(),
            CommandSource::Sequence(commands) => {
                f.debug_tuple("Sequence").field(&commands.len()).finish()
            }
            CommandSource::PerDevice(_) => f.write_str("PerDevice(..)"),
        }
    }
}

/// Timeout and pacing applied to every command of a submission
#[derive(Debug, Clone, Copy)]
pub struct CommandOptions {
    pub timeout: Duration,
    pub post_delay: Duration,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            timeout: TIMING_CONFIG.command.command(),
            post_delay: Duration::ZERO,
        }
    }
}

impl CommandOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_post_delay(mut self, post_delay: Duration) -> Self {
        self.post_delay = post_delay;
        self
    }
}

/// Result of one device's share of a submission
#[derive(Debug)]
pub struct DispatchOutcome {
    pub serial: String,
    pub result: Result<CommandOutput>,
}

impl DispatchOutcome {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn message(&self) -> String {
        match &self.result {
            Ok(output) => {
                let text = output.text();
                let text = text.trim();
                if text.is_empty() {
                    "ok".to_string()
                } else {
                    text.to_string()
                }
            }
            Err(e) => e.to_string(),
        }
    }
}

/// Awaitable result for one device
#[derive(Debug)]
pub struct DispatchHandle {
    serial: String,
    handle: JoinHandle<Result<CommandOutput>>,
}

impl DispatchHandle {
    pub fn new(serial: impl Into<String>, handle: JoinHandle<Result<CommandOutput>>) -> Self {
        Self {
            serial: serial.into(),
            handle,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub async fn outcome(self) -> DispatchOutcome {
        DispatchOutcome {
            serial: self.serial,
            result: join_job(self.handle).await,
        }
    }
}

/// Await a pool task, folding an aborted or panicked task into an error
pub async fn join_job<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(FleetError::Cancelled),
        Err(e) => Err(FleetError::Io(std::io::Error::other(format!(
            "dispatch task failed: {e}"
        )))),
    }
}

/// Aggregated outcomes of one operator intent
#[derive(Debug)]
pub struct BatchReport {
    pub intent: String,
    pub outcomes: Vec<DispatchOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DispatchOutcome> {
        self.outcomes.iter().filter(|o| !o.success())
    }

    /// `(serial, success, message)` rows
    pub fn rows(&self) -> Vec<(String, bool, String)> {
        self.outcomes
            .iter()
            .map(|o| (o.serial.clone(), o.success(), o.message()))
            .collect()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} succeeded, {} failed",
            self.intent,
            self.succeeded(),
            self.failed()
        )
    }
}

struct Workers {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl Workers {
    fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Run `job` once a permit is free; waiting for the permit observes `token`.
    fn spawn<Fut, T>(&self, token: CancellationToken, job: Fut) -> JoinHandle<Result<T>>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        self.tracker.spawn(async move {
            let _permit = tokio::select! {
                permit = permits.acquire_owned() => {
                    permit.map_err(|_| FleetError::Cancelled)?
                }
                _ = token.cancelled() => return Err(FleetError::Cancelled),
            };
            job.await
        })
    }
}

/// Runs device commands with at most `size` in flight.
///
/// `stop_all` holds the pool write lock for the whole cancel, drain and
/// replace sequence, so a submission either lands in the old pool and gets
/// cancelled or lands in the fresh one and runs normally.
pub struct DispatchPool {
    ctx: Arc<ExecutionContext>,
    runner: CommandRunner,
    size: usize,
    workers: RwLock<Arc<Workers>>,
}

impl DispatchPool {
    pub fn new(ctx: Arc<ExecutionContext>, runner: CommandRunner) -> Self {
        Self::with_size(ctx, runner, TIMING_CONFIG.pool.worker_count())
    }

    pub fn with_size(ctx: Arc<ExecutionContext>, runner: CommandRunner, size: usize) -> Self {
        debug!("Dispatch pool with {} workers", size);
        Self {
            ctx,
            runner,
            size,
            workers: RwLock::new(Arc::new(Workers::new(size))),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    /// Queue the source's commands once per serial and return one handle per serial.
    pub async fn submit(
        &self,
        source: &CommandSource,
        serials: &[String],
        options: CommandOptions,
    ) -> Vec<DispatchHandle> {
        let workers = self.workers.read().await;
        let token = self.ctx.token();

        serials
            .iter()
            .map(|serial| {
                let commands = source.commands_for(serial);
                let runner = self.runner.clone();
                let job_token = token.clone();
                let job_serial = serial.clone();

                let handle = workers.spawn(token.clone(), async move {
                    let mut output = CommandOutput::default();
                    for args in commands {
                        let command = DeviceCommand::new(&job_serial, args)
                            .with_timeout(options.timeout)
                            .with_post_delay(options.post_delay);
                        output = runner.run(&command, &job_token).await?;
                    }
                    Ok(output)
                });

                DispatchHandle::new(serial.clone(), handle)
            })
            .collect()
    }

    /// Run a multi-step device job under the pool bound.
    ///
    /// The job gets the runner and the current token; `stop_all` cancels and
    /// drains it like any submitted command.
    pub async fn spawn_job<F, Fut, T>(&self, job: F) -> JoinHandle<Result<T>>
    where
        F: FnOnce(CommandRunner, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let workers = self.workers.read().await;
        let token = self.ctx.token();
        let job = job(self.runner.clone(), token.clone());
        workers.spawn(token, job)
    }

    /// `spawn_job` bound to a token the caller captured earlier.
    ///
    /// Work belonging to an operation that `stop_all` already cancelled is
    /// refused rather than started under the fresh token; `job` is never
    /// called in that case.
    pub async fn spawn_job_under<F, Fut, T>(
        &self,
        token: &CancellationToken,
        job: F,
    ) -> JoinHandle<Result<T>>
    where
        F: FnOnce(CommandRunner, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let workers = self.workers.read().await;
        if token.is_cancelled() {
            debug!("Refusing job for a cancelled operation");
            return tokio::spawn(async { Err(FleetError::Cancelled) });
        }
        let job = job(self.runner.clone(), token.clone());
        workers.spawn(token.clone(), job)
    }

    /// Run one command on one device through the pool and wait for it.
    pub async fn execute(
        &self,
        serial: &str,
        args: Vec<String>,
        options: CommandOptions,
    ) -> Result<CommandOutput> {
        let mut handles = self
            .submit(&CommandSource::Single(args), &[serial.to_string()], options)
            .await;
        match handles.pop() {
            Some(handle) => handle.outcome().await.result,
            None => Err(FleetError::Cancelled),
        }
    }

    /// Submit and wait for every device, logging each failure.
    pub async fn run_batch(
        &self,
        intent: impl Into<String>,
        source: &CommandSource,
        serials: &[String],
        options: CommandOptions,
    ) -> BatchReport {
        let intent = intent.into();
        let handles = self.submit(source, serials, options).await;
        let outcomes = join_all(handles.into_iter().map(DispatchHandle::outcome)).await;

        for outcome in outcomes.iter().filter(|o| !o.success()) {
            if let Err(e) = &outcome.result {
                if !e.is_cancelled() {
                    warn!("{} failed on {}: {}", intent, outcome.serial, e);
                }
            }
        }

        let report = BatchReport { intent, outcomes };
        info!("{}", report);
        report
    }

    /// Cancel everything in flight, wait for it to unwind, then start over
    /// with a fresh pool and a fresh cancellation token.
    pub async fn stop_all(&self) {
        let mut workers = self.workers.write().await;

        self.ctx.cancel();
        workers.tracker.close();
        workers.tracker.wait().await;

        *workers = Arc::new(Workers::new(self.size));
        self.ctx.reset();
        info!("All device work stopped; dispatch pool reset");
    }
}
