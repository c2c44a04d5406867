use crate::{
    models::{ApiError, ListingJob, RunReport},
    pipeline::{Pipeline, PipelineErrorKind, RetryPolicy},
};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{info, warn};

/// Single-worker queue: one listing runs end to end before the next starts,
/// so jobs never race on the same working directory.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<ListingJob>,
    statuses: Arc<Mutex<JobTable>>,
}

/// Job states by id. Only finished jobs count toward `history_limit`; the
/// oldest finished entry goes first.
struct JobTable {
    states: HashMap<String, JobState>,
    finished: VecDeque<String>,
    history_limit: usize,
}

impl JobTable {
    fn new(history_limit: usize) -> Self {
        Self {
            states: HashMap::new(),
            finished: VecDeque::new(),
            history_limit,
        }
    }

    fn mark_active(&mut self, id: &str, state: JobState) {
        self.finished.retain(|done| done != id);
        self.states.insert(id.to_string(), state);
    }

    fn mark_finished(&mut self, id: String, state: JobState) {
        self.finished.retain(|done| *done != id);
        self.finished.push_back(id.clone());
        self.states.insert(id, state);
        while self.finished.len() > self.history_limit {
            if let Some(evicted) = self.finished.pop_front() {
                self.states.remove(&evicted);
            }
        }
    }
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed {
        result: RunReport,
    },
    Failed {
        stage: String,
        kind: PipelineErrorKind,
        retry: RetryPolicy,
        error: String,
    },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(
        pipeline: Pipeline,
        capacity: usize,
        history_limit: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ListingJob>(capacity);
        let statuses = Arc::new(Mutex::new(JobTable::new(history_limit)));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let id = job.id.clone();
                statuses_bg.lock().await.mark_active(&id, JobState::Running);

                let result = pipeline.run(job).await;
                let state = match result {
                    Ok(report) => {
                        info!(target = "reel.queue", job_id = %id, "job_completed");
                        crate::metrics::job_finished("completed");
                        JobState::Completed { result: report }
                    }
                    Err(err) => {
                        warn!(
                            target = "reel.queue",
                            job_id = %id,
                            stage = err.stage(),
                            error = %err,
                            "job_failed"
                        );
                        crate::metrics::job_finished("failed");
                        JobState::Failed {
                            stage: err.stage().to_string(),
                            kind: err.kind(),
                            retry: err.kind().retry_policy(),
                            error: err.detail().to_string(),
                        }
                    }
                };
                statuses_bg.lock().await.mark_finished(id, state);
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue(&self, job: ListingJob) -> Result<String, ApiError> {
        let id = job.id.clone();
        {
            let mut guard = self.statuses.lock().await;
            if matches!(
                guard.states.get(&id),
                Some(JobState::Queued | JobState::Running)
            ) {
                return Err(ApiError {
                    error: "job_in_flight".into(),
                    detail: Some(format!("job {id} is already queued or running")),
                });
            }
            guard.mark_active(&id, JobState::Queued);
        }
        if self.tx.send(job).await.is_err() {
            self.statuses.lock().await.states.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.states.get(id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureError, PageCapturer};
    use crate::copy::{CopyError, CopyGenerator};
    use crate::models::{CaptureResult, GeneratedCopy, VideoResult};
    use crate::pipeline::PipelineConfig;
    use crate::render::TemplateRenderer;
    use crate::video::{VideoAssembler, VideoError};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    struct FailingCopy;

    #[async_trait]
    impl CopyGenerator for FailingCopy {
        async fn generate_copy(&self, _: &str, _: &str) -> Result<GeneratedCopy, CopyError> {
            Err(CopyError::Timeout(Duration::from_secs(1)))
        }
    }

    struct NoCapture;

    #[async_trait]
    impl PageCapturer for NoCapture {
        async fn capture(&self, _: &Path, _: &Path) -> Result<CaptureResult, CaptureError> {
            Err(CaptureError::Launch("unused".into()))
        }
    }

    struct NoVideo;

    #[async_trait]
    impl VideoAssembler for NoVideo {
        async fn assemble_video(&self, _: &str, _: &Path) -> Result<VideoResult, VideoError> {
            Err(VideoError::EmptyCommand)
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(
            PipelineConfig {
                work_dir: PathBuf::from("unused"),
            },
            Arc::new(FailingCopy),
            Arc::new(TemplateRenderer::builtin().unwrap()),
            Arc::new(NoCapture),
            Arc::new(NoVideo),
        )
    }

    fn job(id: &str) -> ListingJob {
        ListingJob {
            id: id.into(),
            product_name: "Lamp".into(),
            product_description: "Warm light".into(),
            image_links: vec![
                "https://img.test/1.jpg".into(),
                "https://img.test/2.jpg".into(),
                "https://img.test/3.jpg".into(),
            ],
        }
    }

    async fn wait_for_settled(queue: &JobQueue, id: &str) -> JobState {
        for _ in 0..200 {
            if let Some(info) = queue.get(id).await
                && matches!(
                    info.state,
                    JobState::Completed { .. } | JobState::Failed { .. }
                )
            {
                return info.state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never settled");
    }

    #[tokio::test]
    async fn failed_job_records_stage_and_retry_hint() {
        let (queue, _worker) = JobQueue::spawn(pipeline(), 4, 16);
        let id = queue.enqueue(job("J1")).await.ok().unwrap();
        match wait_for_settled(&queue, &id).await {
            JobState::Failed {
                stage, kind, retry, ..
            } => {
                assert_eq!(stage, "generate_copy");
                assert_eq!(kind, PipelineErrorKind::CopyGeneration);
                assert_eq!(retry, RetryPolicy::Backoff);
            }
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn invalid_job_fails_validation() {
        let (queue, _worker) = JobQueue::spawn(pipeline(), 4, 16);
        let mut bad = job("J2");
        bad.image_links.pop();
        let id = queue.enqueue(bad).await.ok().unwrap();
        match wait_for_settled(&queue, &id).await {
            JobState::Failed { kind, .. } => assert_eq!(kind, PipelineErrorKind::Validation),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let (queue, _worker) = JobQueue::spawn(pipeline(), 4, 16);
        assert!(queue.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn oldest_finished_jobs_are_evicted() {
        let (queue, _worker) = JobQueue::spawn(pipeline(), 8, 2);
        for id in ["E1", "E2", "E3"] {
            queue.enqueue(job(id)).await.ok().unwrap();
            wait_for_settled(&queue, id).await;
        }
        assert!(queue.get("E1").await.is_none());
        assert!(queue.get("E2").await.is_some());
        assert!(queue.get("E3").await.is_some());
    }

    #[test]
    fn active_jobs_are_never_evicted() {
        let mut table = JobTable::new(1);
        table.mark_active("A", JobState::Queued);
        table.mark_finished("B".into(), JobState::Running);
        table.mark_finished("C".into(), JobState::Running);
        assert!(table.states.contains_key("A"));
        assert!(!table.states.contains_key("B"));
        assert!(table.states.contains_key("C"));

        table.mark_active("C", JobState::Queued);
        table.mark_finished("D".into(), JobState::Running);
        assert!(table.states.contains_key("C"));
        assert_eq!(table.finished, VecDeque::from(["D".to_string()]));
    }

    #[tokio::test]
    async fn serializes_failed_state_flat() {
        let info = JobInfo {
            id: "J3".into(),
            state: JobState::Failed {
                stage: "capture".into(),
                kind: PipelineErrorKind::Launch,
                retry: RetryPolicy::EscalateOnRepeat,
                error: "no chrome".into(),
            },
        };
        let value = serde_json::to_value(info).unwrap();
        assert_eq!(value["state"], "failed");
        assert_eq!(value["kind"], "launch");
        assert_eq!(value["retry"], "escalate_on_repeat");
    }
}
