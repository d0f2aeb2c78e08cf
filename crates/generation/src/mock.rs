use super::{ArtifactKind, ArtifactRef, ClientError, GenerationClient, JobHandle, PollOutcome};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// One scripted answer to a poll.
#[derive(Debug, Clone, PartialEq)]
pub enum MockStep {
    Pending(Option<String>),
    Succeed(String),
    Fail(String),
    /// The poll call itself errors.
    Error(ClientError),
}

/// A job the mock has accepted, recorded for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub handle: JobHandle,
    pub kind: ArtifactKind,
    pub prompt: String,
    pub reference_image: Option<ArtifactRef>,
}

/// In-memory stand-in for the generation service.
///
/// Each submission consumes the next queued script for its kind. Without a
/// queued script the job succeeds on the first poll with a `mock://` URI. A
/// script that runs out while pending stays pending forever, which is how
/// tests hold a job in `running`.
#[derive(Default)]
pub struct MockGenerationClient {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    scripts: HashMap<ArtifactKind, VecDeque<Vec<MockStep>>>,
    submit_failures: HashMap<ArtifactKind, VecDeque<ClientError>>,
    jobs: HashMap<JobHandle, VecDeque<MockStep>>,
    submissions: Vec<Submission>,
    polls: usize,
    artifacts: HashMap<String, Vec<u8>>,
}

impl MockGenerationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, kind: ArtifactKind, steps: Vec<MockStep>) -> Self {
        self.push_script(kind, steps);
        self
    }

    pub fn push_script(&self, kind: ArtifactKind, steps: Vec<MockStep>) {
        self.state
            .lock()
            .scripts
            .entry(kind)
            .or_default()
            .push_back(steps);
    }

    pub fn fail_next_submit(&self, kind: ArtifactKind, error: ClientError) {
        self.state
            .lock()
            .submit_failures
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    pub fn with_artifact_bytes(self, uri: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.state.lock().artifacts.insert(uri.into(), bytes);
        self
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().submissions.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.state.lock().polls
    }

    fn accept(
        &self,
        kind: ArtifactKind,
        prompt: &str,
        reference_image: Option<&ArtifactRef>,
    ) -> Result<JobHandle, ClientError> {
        let mut state = self.state.lock();
        if let Some(err) = state
            .submit_failures
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        state.next_id += 1;
        let id = state.next_id;
        let handle = JobHandle(format!("mock-{kind}-{id}"));
        let steps = state
            .scripts
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| vec![MockStep::Succeed(default_uri(kind, id))]);

        state.jobs.insert(handle.clone(), steps.into());
        state.submissions.push(Submission {
            handle: handle.clone(),
            kind,
            prompt: prompt.to_string(),
            reference_image: reference_image.cloned(),
        });
        Ok(handle)
    }
}

fn default_uri(kind: ArtifactKind, id: u64) -> String {
    match kind {
        ArtifactKind::Image => format!("mock://image/{id}.png"),
        ArtifactKind::Video => format!("mock://video/{id}.mp4"),
    }
}

#[async_trait::async_trait]
impl GenerationClient for MockGenerationClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit_image_job(&self, prompt: &str) -> Result<JobHandle, ClientError> {
        self.accept(ArtifactKind::Image, prompt, None)
    }

    async fn submit_video_job(
        &self,
        prompt: &str,
        reference_image: &ArtifactRef,
    ) -> Result<JobHandle, ClientError> {
        self.accept(ArtifactKind::Video, prompt, Some(reference_image))
    }

    async fn poll_job(&self, handle: &JobHandle) -> Result<PollOutcome, ClientError> {
        let mut state = self.state.lock();
        state.polls += 1;
        let steps = state
            .jobs
            .get_mut(handle)
            .ok_or_else(|| ClientError::invalid_response(format!("unknown job {handle}")))?;

        let Some(step) = steps.pop_front() else {
            return Ok(PollOutcome::pending());
        };
        match step {
            MockStep::Pending(progress) => Ok(PollOutcome::Pending { progress }),
            MockStep::Succeed(uri) => {
                steps.push_front(MockStep::Succeed(uri.clone()));
                Ok(PollOutcome::succeeded(ArtifactRef::new(uri)))
            }
            MockStep::Fail(reason) => {
                steps.push_front(MockStep::Fail(reason.clone()));
                Ok(PollOutcome::failed(reason))
            }
            MockStep::Error(err) => Err(err),
        }
    }

    async fn fetch_artifact_bytes(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ClientError> {
        let state = self.state.lock();
        if let Some(bytes) = state.artifacts.get(artifact.as_str()) {
            return Ok(bytes.clone());
        }
        if artifact.as_str().starts_with("mock://") {
            return Ok(artifact.as_str().as_bytes().to_vec());
        }
        Err(ClientError::transport(format!("artifact not found: {artifact}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_job_succeeds_on_first_poll() {
        let client = MockGenerationClient::new();
        let handle = client.submit_image_job("a cat").await.unwrap();
        let outcome = client.poll_job(&handle).await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::succeeded(ArtifactRef::new("mock://image/1.png"))
        );
        assert_eq!(client.submissions()[0].prompt, "a cat");
    }

    #[tokio::test]
    async fn test_scripted_steps_in_order() {
        let client = MockGenerationClient::new().with_script(
            ArtifactKind::Video,
            vec![
                MockStep::Pending(Some("queued".into())),
                MockStep::Fail("out of credits".into()),
            ],
        );
        let still = ArtifactRef::new("mock://image/1.png");
        let handle = client.submit_video_job("pan left", &still).await.unwrap();

        assert_eq!(
            client.poll_job(&handle).await.unwrap(),
            PollOutcome::Pending {
                progress: Some("queued".into())
            }
        );
        assert_eq!(
            client.poll_job(&handle).await.unwrap(),
            PollOutcome::failed("out of credits")
        );
        // terminal answers are sticky
        assert!(client.poll_job(&handle).await.unwrap().is_done());
        assert_eq!(client.submissions()[0].reference_image, Some(still));
        assert_eq!(client.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_script_stays_pending() {
        let client = MockGenerationClient::new().with_script(ArtifactKind::Image, vec![]);
        let handle = client.submit_image_job("x").await.unwrap();
        for _ in 0..3 {
            assert_eq!(
                client.poll_job(&handle).await.unwrap(),
                PollOutcome::pending()
            );
        }
    }

    #[tokio::test]
    async fn test_submit_failure_injection() {
        let client = MockGenerationClient::new();
        client.fail_next_submit(ArtifactKind::Image, ClientError::transport("offline"));
        assert_eq!(
            client.submit_image_job("x").await.unwrap_err(),
            ClientError::transport("offline")
        );
        assert!(client.submit_image_job("x").await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_artifact_bytes() {
        let client =
            MockGenerationClient::new().with_artifact_bytes("https://cdn/a.png", vec![1, 2, 3]);
        assert_eq!(
            client
                .fetch_artifact_bytes(&ArtifactRef::new("https://cdn/a.png"))
                .await
                .unwrap(),
            vec![1, 2, 3]
        );
        assert!(client
            .fetch_artifact_bytes(&ArtifactRef::new("https://cdn/missing.png"))
            .await
            .is_err());
    }
}
