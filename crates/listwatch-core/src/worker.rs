use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Action, DispatcherConfig, JobRequest, JobStatus};
use crate::job_queue::{JobReceiver, JobRegistry, QueuedJob};
use crate::traits::{BrowserSession, SessionProvider};

/// Handle a running action uses to report progress.
#[derive(Debug, Clone)]
pub struct JobContext {
    id: Uuid,
    registry: JobRegistry,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(id: Uuid, registry: JobRegistry, cancel: CancellationToken) -> Self {
        Self {
            id,
            registry,
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Append a line to this job's output.
    pub async fn log(&self, message: impl Into<String>) {
        self.registry.append(self.id, message).await;
    }

    /// Resolves once the job is asked to stop.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// The operation a job runs with its browser session.
///
/// The returned status becomes the job's final status; an error fails the
/// job with the error message appended to its output.
pub trait JobAction<S: BrowserSession>: Send + Sync + 'static {
    fn run(
        &self,
        ctx: &JobContext,
        session: &S,
        request: &JobRequest,
    ) -> impl Future<Output = Result<JobStatus, AppError>> + Send;
}

/// Events emitted by the dispatcher for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        max_concurrent_jobs: usize,
    },
    JobReceived {
        job_id: Uuid,
        action: Action,
    },
    JobStarted {
        job_id: Uuid,
        action: Action,
    },
    JobCompleted {
        job_id: Uuid,
        status: JobStatus,
    },
    JobFailed {
        job_id: Uuid,
        error: &'a str,
    },
    SessionCloseFailed {
        job_id: Uuid,
        error: &'a str,
    },
    ShuttingDown {
        in_flight: usize,
    },
    Stopped {
        aborted: usize,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started {
                max_concurrent_jobs,
            } => {
                tracing::info!(%max_concurrent_jobs, "Dispatcher started");
            }
            WorkerEvent::JobReceived { job_id, action } => {
                tracing::debug!(%job_id, %action, "Job received");
            }
            WorkerEvent::JobStarted { job_id, action } => {
                tracing::info!(%job_id, %action, "Running job");
            }
            WorkerEvent::JobCompleted { job_id, status } => {
                tracing::info!(%job_id, %status, "Job completed");
            }
            WorkerEvent::JobFailed { job_id, error } => {
                tracing::warn!(%job_id, %error, "Job failed");
            }
            WorkerEvent::SessionCloseFailed { job_id, error } => {
                tracing::warn!(%job_id, %error, "Failed to close browser session");
            }
            WorkerEvent::ShuttingDown { in_flight } => {
                tracing::info!(%in_flight, "Dispatcher shutting down");
            }
            WorkerEvent::Stopped { aborted } => {
                tracing::info!(%aborted, "Dispatcher stopped");
            }
        }
    }
}

/// Single consumer of the job queue. Every received job runs as its own
/// task; at most `max_concurrent_jobs` of them hold a browser session at
/// once, the rest wait in `pending`.
pub struct Dispatcher<P, A>
where
    P: SessionProvider,
    A: JobAction<P::Session>,
{
    registry: JobRegistry,
    provider: P,
    action: Arc<A>,
    config: DispatcherConfig,
}

impl<P, A> Dispatcher<P, A>
where
    P: SessionProvider,
    A: JobAction<P::Session>,
{
    pub fn new(registry: JobRegistry, provider: P, action: A, config: DispatcherConfig) -> Self {
        Self {
            registry,
            provider,
            action: Arc::new(action),
            config,
        }
    }

    /// Run the dispatch loop until `cancel_token` fires or the queue closes,
    /// then give in-flight jobs the shutdown grace period before aborting
    /// them.
    pub async fn run<WR>(
        self,
        mut receiver: JobReceiver,
        cancel_token: CancellationToken,
        reporter: WR,
    ) -> Result<(), AppError>
    where
        WR: WorkerReporter + Clone + 'static,
    {
        let max = self.config.max_concurrent_jobs.max(1);
        let semaphore = Arc::new(Semaphore::new(max));
        let mut tasks = JoinSet::new();

        reporter.report(WorkerEvent::Started {
            max_concurrent_jobs: max,
        });

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Job task ended abnormally");
                    }
                }
                received = receiver.recv() => {
                    let Some(job) = received else {
                        tracing::info!("Job queue closed");
                        break;
                    };
                    reporter.report(WorkerEvent::JobReceived {
                        job_id: job.id,
                        action: job.request.action,
                    });
                    let task = JobTask {
                        ctx: JobContext::new(job.id, self.registry.clone(), cancel_token.child_token()),
                        registry: self.registry.clone(),
                        provider: self.provider.clone(),
                        action: self.action.clone(),
                        reporter: reporter.clone(),
                    };
                    let semaphore = semaphore.clone();
                    tasks.spawn(async move {
                        // A job still waiting for a slot at shutdown never starts.
                        let permit = tokio::select! {
                            biased;
                            () = task.ctx.cancelled() => None,
                            permit = semaphore.acquire_owned() => permit.ok(),
                        };
                        match permit {
                            Some(_permit) if !task.ctx.is_cancelled() => task.execute(job).await,
                            _ => task.fail(job.id, "aborted at shutdown".to_string()).await,
                        }
                    });
                }
            }
        }

        reporter.report(WorkerEvent::ShuttingDown {
            in_flight: tasks.len(),
        });

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        let mut aborted = 0;
        if drained.is_err() {
            aborted = tasks.len();
            tasks.shutdown().await;
            for status in [JobStatus::Pending, JobStatus::Running] {
                for id in self.registry.list(Some(status)).await.into_keys() {
                    self.registry
                        .append(id, "error: aborted at shutdown")
                        .await;
                    self.registry.finish(id, JobStatus::Failed).await;
                }
            }
        }

        reporter.report(WorkerEvent::Stopped { aborted });
        Ok(())
    }
}

/// Everything one spawned job needs.
struct JobTask<P, A, WR> {
    ctx: JobContext,
    registry: JobRegistry,
    provider: P,
    action: Arc<A>,
    reporter: WR,
}

impl<P, A, WR> JobTask<P, A, WR>
where
    P: SessionProvider,
    A: JobAction<P::Session>,
    WR: WorkerReporter,
{
    async fn execute(self, job: QueuedJob) {
        let QueuedJob { id, request } = job;
        if !self.registry.mark_running(id).await {
            return;
        }
        self.reporter.report(WorkerEvent::JobStarted {
            job_id: id,
            action: request.action,
        });

        let session = match self.provider.open_session().await {
            Ok(session) => session,
            Err(e) => {
                self.fail(id, e.to_string()).await;
                return;
            }
        };

        let outcome = AssertUnwindSafe(self.action.run(&self.ctx, &session, &request))
            .catch_unwind()
            .await;

        if let Err(e) = self.provider.close_session(session).await {
            let error = e.to_string();
            self.reporter.report(WorkerEvent::SessionCloseFailed {
                job_id: id,
                error: &error,
            });
        }

        match outcome {
            Ok(Ok(status)) => {
                self.registry.finish(id, status).await;
                let status = self
                    .registry
                    .status(id)
                    .await
                    .map(|r| r.status)
                    .unwrap_or(status);
                self.reporter.report(WorkerEvent::JobCompleted { job_id: id, status });
            }
            Ok(Err(e)) => self.fail(id, e.to_string()).await,
            Err(panic) => {
                let message = format!("job panicked: {}", extract_panic_message(&panic));
                self.fail(id, message).await;
            }
        }
    }

    async fn fail(&self, id: Uuid, error: String) {
        self.registry.append(id, format!("error: {error}")).await;
        self.registry.finish(id, JobStatus::Failed).await;
        self.reporter.report(WorkerEvent::JobFailed {
            job_id: id,
            error: &error,
        });
    }
}

fn extract_panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
