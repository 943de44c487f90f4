use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{JobRecord, JobRequest, JobStatus, OutputEntry};

/// How long finished jobs stay queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    /// Keep every job for the lifetime of the process.
    #[default]
    KeepAll,
    /// Keep at most this many jobs, evicting the oldest finished ones first.
    /// Pending and running jobs are never evicted.
    KeepLatest(usize),
}

/// A submitted job travelling from the registry to the dispatcher.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    pub request: JobRequest,
}

/// Consumer end of the job queue, owned by the dispatcher.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<QueuedJob>,
}

impl JobReceiver {
    /// Wait for the next submitted job. `None` once every registry handle
    /// is dropped.
    pub async fn recv(&mut self) -> Option<QueuedJob> {
        self.rx.recv().await
    }
}

#[derive(Debug, Default)]
struct JobTable {
    records: HashMap<Uuid, JobRecord>,
    /// Submission order, oldest first.
    order: VecDeque<Uuid>,
}

impl JobTable {
    fn enforce(&mut self, policy: RetentionPolicy) {
        let RetentionPolicy::KeepLatest(limit) = policy else {
            return;
        };
        let mut excess = self.records.len().saturating_sub(limit);
        if excess == 0 {
            return;
        }
        let records = &mut self.records;
        self.order.retain(|id| {
            if excess == 0 {
                return true;
            }
            let evict = records.get(id).is_none_or(|r| r.status.is_terminal());
            if evict {
                records.remove(id);
                excess -= 1;
            }
            !evict
        });
    }
}

/// In-memory job registry plus the queue feeding the dispatcher.
///
/// Cheap to clone; every clone shares the same table and queue.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    table: Arc<RwLock<JobTable>>,
    sender: mpsc::UnboundedSender<QueuedJob>,
    retention: RetentionPolicy,
}

impl JobRegistry {
    pub fn new(retention: RetentionPolicy) -> (Self, JobReceiver) {
        let (sender, rx) = mpsc::unbounded_channel();
        let registry = Self {
            table: Arc::new(RwLock::new(JobTable::default())),
            sender,
            retention,
        };
        (registry, JobReceiver { rx })
    }

    /// Register and enqueue a job. Returns as soon as the job is queryable;
    /// it does not wait for execution.
    pub async fn submit(&self, request: JobRequest) -> Result<Uuid, AppError> {
        request.validate()?;

        let id = Uuid::new_v4();
        {
            let mut table = self.table.write().await;
            table.records.insert(id, JobRecord::new(id, request.action));
            table.order.push_back(id);
            table.enforce(self.retention);
        }

        if self.sender.send(QueuedJob { id, request }).is_err() {
            self.append(id, "error: job queue is closed").await;
            self.finish(id, JobStatus::Failed).await;
            return Err(AppError::QueueClosed);
        }

        tracing::debug!(job_id = %id, "Job submitted");
        Ok(id)
    }

    /// Snapshot of a job record.
    pub async fn status(&self, id: Uuid) -> Result<JobRecord, AppError> {
        self.table
            .read()
            .await
            .records
            .get(&id)
            .cloned()
            .ok_or(AppError::JobNotFound(id))
    }

    /// Status of every known job, optionally restricted to one status.
    pub async fn list(&self, filter: Option<JobStatus>) -> BTreeMap<Uuid, JobStatus> {
        self.table
            .read()
            .await
            .records
            .values()
            .filter(|r| filter.is_none_or(|s| r.status == s))
            .map(|r| (r.id, r.status))
            .collect()
    }

    /// Number of jobs per status.
    pub async fn counts(&self) -> BTreeMap<JobStatus, usize> {
        let table = self.table.read().await;
        let mut counts: BTreeMap<JobStatus, usize> =
            JobStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for record in table.records.values() {
            *counts.entry(record.status).or_default() += 1;
        }
        counts
    }

    /// Append a timestamped line to a job's output.
    pub async fn append(&self, id: Uuid, message: impl Into<String>) {
        let entry = OutputEntry::new(message);
        let mut table = self.table.write().await;
        match table.records.get_mut(&id) {
            Some(record) => record.output.push(entry),
            None => tracing::debug!(job_id = %id, "Output for unknown or evicted job dropped"),
        }
    }

    /// Move a pending job to running. Returns false if it was not pending.
    pub async fn mark_running(&self, id: Uuid) -> bool {
        self.transition(id, JobStatus::Running).await
    }

    /// Record a terminal status. A job that already finished keeps its
    /// first terminal status.
    pub async fn finish(&self, id: Uuid, status: JobStatus) -> bool {
        let status = if status.is_terminal() {
            status
        } else {
            tracing::warn!(job_id = %id, %status, "Action reported a non-terminal status, recording done");
            JobStatus::Done
        };
        let changed = self.transition(id, status).await;
        if changed {
            let mut table = self.table.write().await;
            table.enforce(self.retention);
        }
        changed
    }

    async fn transition(&self, id: Uuid, next: JobStatus) -> bool {
        let mut table = self.table.write().await;
        let Some(record) = table.records.get_mut(&id) else {
            return false;
        };
        if !record.status.can_transition_to(next) {
            tracing::debug!(job_id = %id, from = %record.status, to = %next, "Ignoring status change");
            return false;
        }
        record.status = next;
        let now = Utc::now();
        match next {
            JobStatus::Running => record.started_at = Some(now),
            s if s.is_terminal() => record.finished_at = Some(now),
            _ => {}
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Action, CrawlParams};

    fn request() -> JobRequest {
        JobRequest::update("bikes", "portland")
    }

    #[tokio::test]
    async fn submission_is_visible_immediately() {
        let (registry, mut rx) = JobRegistry::new(RetentionPolicy::KeepAll);
        let id = registry.submit(request()).await.unwrap();

        let record = registry.status(id).await.unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert!(record.output.is_empty());

        let queued = rx.recv().await.unwrap();
        assert_eq!(queued.id, id);
        assert_eq!(queued.request, request());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let (registry, _rx) = JobRegistry::new(RetentionPolicy::KeepAll);
        let id = Uuid::new_v4();
        let err = registry.status(id).await.unwrap_err();
        assert!(matches!(err, AppError::JobNotFound(x) if x == id));
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_without_a_record() {
        let (registry, _rx) = JobRegistry::new(RetentionPolicy::KeepAll);
        let err = registry
            .submit(JobRequest::new(Action::Update, CrawlParams::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert!(registry.list(None).await.is_empty());
    }

    #[tokio::test]
    async fn closed_queue_fails_the_job() {
        let (registry, rx) = JobRegistry::new(RetentionPolicy::KeepAll);
        drop(rx);
        let err = registry.submit(request()).await.unwrap_err();
        assert!(matches!(err, AppError::QueueClosed));
        let failed = registry.list(Some(JobStatus::Failed)).await;
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let (registry, _rx) = JobRegistry::new(RetentionPolicy::KeepAll);
        let a = registry.submit(request()).await.unwrap();
        let b = registry.submit(request()).await.unwrap();
        registry.mark_running(b).await;

        assert_eq!(registry.list(None).await.len(), 2);
        let running = registry.list(Some(JobStatus::Running)).await;
        assert_eq!(running.keys().collect::<Vec<_>>(), vec![&b]);
        let pending = registry.list(Some(JobStatus::Pending)).await;
        assert!(pending.contains_key(&a));

        let counts = registry.counts().await;
        assert_eq!(counts[&JobStatus::Pending], 1);
        assert_eq!(counts[&JobStatus::Running], 1);
        assert_eq!(counts[&JobStatus::Done], 0);
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let (registry, _rx) = JobRegistry::new(RetentionPolicy::KeepAll);
        let id = registry.submit(request()).await.unwrap();
        assert!(registry.mark_running(id).await);
        assert!(registry.finish(id, JobStatus::Failed).await);
        assert!(!registry.finish(id, JobStatus::Done).await);
        assert!(!registry.mark_running(id).await);

        let record = registry.status(id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.started_at.is_some());
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn output_is_timestamped_and_ordered() {
        let (registry, _rx) = JobRegistry::new(RetentionPolicy::KeepAll);
        let id = registry.submit(request()).await.unwrap();
        registry.append(id, "first").await;
        registry.append(id, "second").await;

        let record = registry.status(id).await.unwrap();
        let messages: Vec<_> = record.output.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["first", "second"]);
        assert!(record.rendered_output()[0].ends_with(" first"));
    }

    #[tokio::test]
    async fn retention_evicts_oldest_finished_jobs_only() {
        let (registry, _rx) = JobRegistry::new(RetentionPolicy::KeepLatest(2));
        let first = registry.submit(request()).await.unwrap();
        let second = registry.submit(request()).await.unwrap();
        registry.mark_running(first).await;

        // Nothing finished yet: the limit is exceeded but nothing is evictable.
        let third = registry.submit(request()).await.unwrap();
        assert_eq!(registry.list(None).await.len(), 3);

        registry.finish(second, JobStatus::Done).await;
        let jobs = registry.list(None).await;
        assert_eq!(jobs.len(), 2);
        assert!(jobs.contains_key(&first));
        assert!(jobs.contains_key(&third));
        assert!(matches!(
            registry.status(second).await,
            Err(AppError::JobNotFound(_))
        ));
    }
}
