use generation::{GenerationClient, PollOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::{ArtifactKind, ArtifactRef, JobFailure, JobHandle, JobTicket};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobRequest {
    Image { prompt: String },
    Video {
        prompt: String,
        reference_image: ArtifactRef,
    },
}

impl JobRequest {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Image { .. } => ArtifactKind::Image,
            Self::Video { .. } => ArtifactKind::Video,
        }
    }
}

/// Fixed-interval polling with an optional overall deadline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

/// Receives the transitions of one driven job. Every method returns whether
/// the ticket is still current; `false` stops the driver.
pub trait JobSink: Send + Sync {
    fn submitted(&self, ticket: JobTicket, handle: &JobHandle) -> bool;
    fn progress(&self, ticket: JobTicket, message: &str) -> bool;
    fn succeeded(&self, ticket: JobTicket, artifact: ArtifactRef) -> bool;
    fn failed(&self, ticket: JobTicket, failure: JobFailure) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(ArtifactRef),
    Failed(JobFailure),
    /// The ticket was cancelled or replaced while the job was in flight.
    Superseded,
}

/// Submits `request` and polls it to a terminal state.
pub async fn drive_job(
    client: Arc<dyn GenerationClient>,
    ticket: JobTicket,
    request: JobRequest,
    policy: PollPolicy,
    sink: Arc<dyn JobSink>,
) -> JobOutcome {
    let run = run_to_completion(
        client.as_ref(),
        ticket,
        &request,
        policy.interval,
        sink.as_ref(),
    );
    let result = match policy.timeout {
        Some(limit) => tokio::time::timeout(limit, run)
            .await
            .unwrap_or(Err(JobFailure::Timeout(limit))),
        None => run.await,
    };

    match result {
        Ok(Some(artifact)) if sink.succeeded(ticket, artifact.clone()) => {
            JobOutcome::Succeeded(artifact)
        }
        Err(failure) if sink.failed(ticket, failure.clone()) => JobOutcome::Failed(failure),
        _ => {
            info!(job = %ticket.key, attempt = ticket.attempt, "job superseded");
            JobOutcome::Superseded
        }
    }
}

/// `Ok(None)` means the sink stopped accepting updates.
async fn run_to_completion(
    client: &dyn GenerationClient,
    ticket: JobTicket,
    request: &JobRequest,
    interval: Duration,
    sink: &dyn JobSink,
) -> Result<Option<ArtifactRef>, JobFailure> {
    let handle = match request {
        JobRequest::Image { prompt } => client.submit_image_job(prompt).await?,
        JobRequest::Video {
            prompt,
            reference_image,
        } => client.submit_video_job(prompt, reference_image).await?,
    };
    info!(job = %ticket.key, handle = %handle, client = client.name(), "remote job accepted");
    if !sink.submitted(ticket, &handle) {
        return Ok(None);
    }

    let kind = ticket.key.kind;
    let mut polls = 0u32;
    loop {
        tokio::time::sleep(interval).await;
        polls += 1;
        let outcome = client.poll_job(&handle).await?;
        debug!(job = %ticket.key, polls, ?outcome, "polled job");

        match outcome {
            PollOutcome::Pending { progress } => {
                let message = match progress {
                    Some(detail) => format!("Generating {kind}... ({detail})"),
                    None => format!("Generating {kind}... (poll {polls})"),
                };
                if !sink.progress(ticket, &message) {
                    return Ok(None);
                }
            }
            PollOutcome::Succeeded { artifact } => return Ok(Some(artifact)),
            PollOutcome::Failed { reason } => return Err(JobFailure::Rejected(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobKey, JobStatus, JobTracker, SceneId};
    use generation::{ClientError, MockGenerationClient, MockStep};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct TrackerSink {
        tracker: Mutex<JobTracker>,
    }

    impl JobSink for TrackerSink {
        fn submitted(&self, ticket: JobTicket, handle: &JobHandle) -> bool {
            self.tracker.lock().mark_submitted(ticket, handle.clone())
        }

        fn progress(&self, ticket: JobTicket, message: &str) -> bool {
            self.tracker.lock().record_progress(ticket, message)
        }

        fn succeeded(&self, ticket: JobTicket, artifact: ArtifactRef) -> bool {
            self.tracker.lock().succeed(ticket, artifact)
        }

        fn failed(&self, ticket: JobTicket, failure: JobFailure) -> bool {
            self.tracker.lock().fail(ticket, failure)
        }
    }

    fn image_request() -> JobRequest {
        JobRequest::Image {
            prompt: "a lighthouse".to_string(),
        }
    }

    async fn run(
        client: MockGenerationClient,
        request: JobRequest,
        policy: PollPolicy,
    ) -> (JobOutcome, Arc<TrackerSink>, JobKey) {
        let sink = Arc::new(TrackerSink::default());
        let key = JobKey::new(SceneId::new(), request.kind());
        let ticket = sink.tracker.lock().submit(key).unwrap();
        let outcome = drive_job(Arc::new(client), ticket, request, policy, sink.clone()).await;
        (outcome, sink, key)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_then_success() {
        let client = MockGenerationClient::new().with_script(
            ArtifactKind::Image,
            vec![
                MockStep::Pending(Some("starting".into())),
                MockStep::Pending(None),
                MockStep::Succeed("https://cdn/a.png".into()),
            ],
        );
        let (outcome, sink, key) = run(client, image_request(), PollPolicy::default()).await;

        assert_eq!(
            outcome,
            JobOutcome::Succeeded(ArtifactRef::new("https://cdn/a.png"))
        );
        let tracker = sink.tracker.lock();
        let job = tracker.job(key).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result, Some(ArtifactRef::new("https://cdn/a.png")));
        assert!(job.handle.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_transport_error_fails_job() {
        let client = MockGenerationClient::new().with_script(
            ArtifactKind::Image,
            vec![
                MockStep::Pending(None),
                MockStep::Error(ClientError::transport("connection reset")),
            ],
        );
        let (outcome, sink, key) = run(client, image_request(), PollPolicy::default()).await;

        assert!(matches!(
            outcome,
            JobOutcome::Failed(JobFailure::Transport(_))
        ));
        let snapshot = sink.tracker.lock().status(key);
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert!(snapshot.message.contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_error_fails_job() {
        let client = MockGenerationClient::new();
        client.fail_next_submit(ArtifactKind::Image, ClientError::transport("dns"));
        let (outcome, _, _) = run(client, image_request(), PollPolicy::default()).await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed(JobFailure::Transport(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_is_rejected() {
        let client = MockGenerationClient::new().with_script(
            ArtifactKind::Video,
            vec![MockStep::Fail("bad reference".into())],
        );
        let request = JobRequest::Video {
            prompt: "zoom".into(),
            reference_image: ArtifactRef::new("mock://image/1.png"),
        };
        let (outcome, _, _) = run(client, request, PollPolicy::default()).await;
        assert_eq!(
            outcome,
            JobOutcome::Failed(JobFailure::Rejected("bad reference".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_stuck_job() {
        let client = MockGenerationClient::new().with_script(ArtifactKind::Image, vec![]);
        let policy = PollPolicy {
            interval: Duration::from_secs(5),
            timeout: Some(Duration::from_secs(12)),
        };
        let (outcome, sink, key) = run(client, image_request(), policy).await;

        assert_eq!(
            outcome,
            JobOutcome::Failed(JobFailure::Timeout(Duration::from_secs(12)))
        );
        assert_eq!(sink.tracker.lock().status(key).status, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_ticket_stops_driver() {
        let sink = Arc::new(TrackerSink::default());
        let key = JobKey::image(SceneId::new());
        let ticket = sink.tracker.lock().submit(key).unwrap();
        sink.tracker.lock().cancel(key);

        let client = Arc::new(MockGenerationClient::new());
        let outcome = drive_job(
            client.clone(),
            ticket,
            image_request(),
            PollPolicy::default(),
            sink.clone(),
        )
        .await;

        assert_eq!(outcome, JobOutcome::Superseded);
        assert_eq!(client.poll_count(), 0);
        assert_eq!(
            sink.tracker.lock().status(key).error,
            Some(JobFailure::Cancelled)
        );
    }
}
