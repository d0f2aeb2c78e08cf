use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub use generation::JobHandle;
pub use storyboard::{ArtifactKind, ArtifactRef, SceneId};

mod driver;
pub use driver::*;

#[derive(Debug, Error, PartialEq)]
pub enum TrackerError {
    #[error("{} job already running for scene {}", .0.kind, .0.scene_id)]
    AlreadyRunning(JobKey),
}

/// One job slot per (scene, kind) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub scene_id: SceneId,
    pub kind: ArtifactKind,
}

impl JobKey {
    pub fn new(scene_id: SceneId, kind: ArtifactKind) -> Self {
        Self { scene_id, kind }
    }

    pub fn image(scene_id: SceneId) -> Self {
        Self::new(scene_id, ArtifactKind::Image)
    }

    pub fn video(scene_id: SceneId) -> Self {
        Self::new(scene_id, ArtifactKind::Video)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scene_id, self.kind)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// Why a job ended in `failed`.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum JobFailure {
    /// A submit or poll call could not reach the service.
    #[error("transport error: {0}")]
    Transport(String),
    /// The service finished the job and reported a failure.
    #[error("generation failed: {0}")]
    Rejected(String),
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl From<generation::ClientError> for JobFailure {
    fn from(err: generation::ClientError) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Proof of a particular submission. Updates carrying an older attempt than the
/// job's current one are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobTicket {
    pub key: JobKey,
    pub attempt: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationJob {
    pub key: JobKey,
    pub status: JobStatus,
    /// Human readable progress line for the UI.
    pub message: String,
    pub attempt: u64,
    pub handle: Option<JobHandle>,
    pub result: Option<ArtifactRef>,
    pub error: Option<JobFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub message: String,
    pub error: Option<JobFailure>,
}

impl From<&GenerationJob> for JobSnapshot {
    fn from(job: &GenerationJob) -> Self {
        Self {
            status: job.status,
            message: job.message.clone(),
            error: job.error.clone(),
        }
    }
}

/// Per-(scene, kind) generation state machine.
///
/// `idle -> running -> succeeded | failed`, and any terminal state may be
/// resubmitted. The tracker holds no artifacts beyond the last result; writing
/// results back to scenes is the caller's job.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: HashMap<JobKey, GenerationJob>,
    next_attempt: u64,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, key: JobKey) -> Result<JobTicket, TrackerError> {
        if self
            .jobs
            .get(&key)
            .is_some_and(|job| job.status == JobStatus::Running)
        {
            return Err(TrackerError::AlreadyRunning(key));
        }

        self.next_attempt += 1;
        let ticket = JobTicket {
            key,
            attempt: self.next_attempt,
        };
        self.jobs.insert(
            key,
            GenerationJob {
                key,
                status: JobStatus::Running,
                message: format!("Submitting {} request...", key.kind),
                attempt: ticket.attempt,
                handle: None,
                result: None,
                error: None,
                started_at: Utc::now(),
                finished_at: None,
            },
        );
        info!(job = %key, attempt = ticket.attempt, "job submitted");
        Ok(ticket)
    }

    /// True while the ticket names the job's latest attempt and it is running.
    pub fn is_current(&self, ticket: JobTicket) -> bool {
        self.jobs
            .get(&ticket.key)
            .is_some_and(|job| job.attempt == ticket.attempt && job.status == JobStatus::Running)
    }

    pub fn mark_submitted(&mut self, ticket: JobTicket, handle: JobHandle) -> bool {
        let Some(job) = self.current_mut(ticket) else {
            return false;
        };
        job.message = format!("Generating {}...", ticket.key.kind);
        job.handle = Some(handle);
        true
    }

    pub fn record_progress(&mut self, ticket: JobTicket, message: impl Into<String>) -> bool {
        let Some(job) = self.current_mut(ticket) else {
            return false;
        };
        job.message = message.into();
        true
    }

    pub fn succeed(&mut self, ticket: JobTicket, artifact: ArtifactRef) -> bool {
        let Some(job) = self.current_mut(ticket) else {
            return false;
        };
        job.status = JobStatus::Succeeded;
        job.message = format!("{} ready", capitalized(ticket.key.kind));
        job.result = Some(artifact);
        job.finished_at = Some(Utc::now());
        info!(job = %ticket.key, "job succeeded");
        true
    }

    pub fn fail(&mut self, ticket: JobTicket, failure: JobFailure) -> bool {
        let Some(job) = self.current_mut(ticket) else {
            return false;
        };
        warn!(job = %ticket.key, error = %failure, "job failed");
        job.status = JobStatus::Failed;
        job.message = failure.to_string();
        job.error = Some(failure);
        job.finished_at = Some(Utc::now());
        true
    }

    /// Fails a running job with [`JobFailure::Cancelled`]. Returns the ticket
    /// that was cancelled, if any.
    pub fn cancel(&mut self, key: JobKey) -> Option<JobTicket> {
        let ticket = self
            .jobs
            .get(&key)
            .filter(|job| job.status == JobStatus::Running)
            .map(|job| JobTicket {
                key,
                attempt: job.attempt,
            })?;
        self.fail(ticket, JobFailure::Cancelled);
        Some(ticket)
    }

    /// Drops every job belonging to one of `scenes`. Returns the keys that were
    /// still running.
    pub fn forget_scenes(&mut self, scenes: &[SceneId]) -> Vec<JobKey> {
        let mut running = Vec::new();
        self.jobs.retain(|key, job| {
            if !scenes.contains(&key.scene_id) {
                return true;
            }
            if job.status == JobStatus::Running {
                running.push(*key);
            }
            false
        });
        running
    }

    pub fn status(&self, key: JobKey) -> JobSnapshot {
        self.jobs
            .get(&key)
            .map(JobSnapshot::from)
            .unwrap_or_default()
    }

    pub fn job(&self, key: JobKey) -> Option<&GenerationJob> {
        self.jobs.get(&key)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &GenerationJob> {
        self.jobs.values()
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .count()
    }

    fn current_mut(&mut self, ticket: JobTicket) -> Option<&mut GenerationJob> {
        let job = self
            .jobs
            .get_mut(&ticket.key)
            .filter(|job| job.attempt == ticket.attempt && job.status == JobStatus::Running);
        if job.is_none() {
            warn!(job = %ticket.key, attempt = ticket.attempt, "ignoring stale job update");
        }
        job
    }
}

fn capitalized(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Image => "Image",
        ArtifactKind::Video => "Video",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_job_is_idle() {
        let tracker = JobTracker::new();
        let snapshot = tracker.status(JobKey::image(SceneId::new()));
        assert_eq!(snapshot.status, JobStatus::Idle);
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_second_submit_while_running_fails() {
        let mut tracker = JobTracker::new();
        let key = JobKey::image(SceneId::new());
        tracker.submit(key).unwrap();
        assert_eq!(
            tracker.submit(key).unwrap_err(),
            TrackerError::AlreadyRunning(key)
        );
        assert_eq!(tracker.status(key).status, JobStatus::Running);
    }

    #[test]
    fn test_resubmit_after_terminal_state() {
        let mut tracker = JobTracker::new();
        let key = JobKey::image(SceneId::new());

        let first = tracker.submit(key).unwrap();
        assert!(tracker.succeed(first, ArtifactRef::new("a.png")));
        let second = tracker.submit(key).unwrap();
        assert!(second.attempt > first.attempt);
        assert!(tracker.fail(second, JobFailure::Transport("down".into())));
        let third = tracker.submit(key).unwrap();
        let job = tracker.job(key).unwrap();
        assert_eq!(job.attempt, third.attempt);
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_keys_are_independent() {
        let mut tracker = JobTracker::new();
        let scene = SceneId::new();
        tracker.submit(JobKey::image(scene)).unwrap();
        tracker.submit(JobKey::video(scene)).unwrap();
        tracker.submit(JobKey::image(SceneId::new())).unwrap();
        assert_eq!(tracker.running_count(), 3);
    }

    #[test]
    fn test_stale_ticket_is_ignored() {
        let mut tracker = JobTracker::new();
        let key = JobKey::image(SceneId::new());
        let old = tracker.submit(key).unwrap();
        tracker.cancel(key).unwrap();
        let fresh = tracker.submit(key).unwrap();

        assert!(!tracker.succeed(old, ArtifactRef::new("late.png")));
        assert!(!tracker.record_progress(old, "late"));
        assert!(tracker.is_current(fresh));
        assert_eq!(tracker.status(key).status, JobStatus::Running);
    }

    #[test]
    fn test_terminal_states_do_not_transition_without_submit() {
        let mut tracker = JobTracker::new();
        let key = JobKey::video(SceneId::new());
        let ticket = tracker.submit(key).unwrap();
        assert!(tracker.fail(ticket, JobFailure::Rejected("nsfw".into())));
        assert!(!tracker.succeed(ticket, ArtifactRef::new("v.mp4")));

        let snapshot = tracker.status(key);
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.message, "generation failed: nsfw");
        assert_eq!(snapshot.error, Some(JobFailure::Rejected("nsfw".into())));
    }

    #[test]
    fn test_cancel_only_running() {
        let mut tracker = JobTracker::new();
        let key = JobKey::image(SceneId::new());
        assert!(tracker.cancel(key).is_none());
        let ticket = tracker.submit(key).unwrap();
        assert_eq!(tracker.cancel(key), Some(ticket));
        assert_eq!(tracker.status(key).error, Some(JobFailure::Cancelled));
        assert!(tracker.cancel(key).is_none());
    }

    #[test]
    fn test_forget_scenes_reports_running() {
        let mut tracker = JobTracker::new();
        let gone = SceneId::new();
        let kept = SceneId::new();
        let done = tracker.submit(JobKey::image(gone)).unwrap();
        tracker.succeed(done, ArtifactRef::new("a.png"));
        tracker.submit(JobKey::video(gone)).unwrap();
        tracker.submit(JobKey::image(kept)).unwrap();

        let running = tracker.forget_scenes(&[gone]);
        assert_eq!(running, vec![JobKey::video(gone)]);
        assert!(tracker.job(JobKey::image(gone)).is_none());
        assert!(tracker.job(JobKey::image(kept)).is_some());
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            JobFailure::Timeout(Duration::from_secs(90)).to_string(),
            "timed out after 90s"
        );
        assert_eq!(JobFailure::Cancelled.to_string(), "cancelled");
    }
}
