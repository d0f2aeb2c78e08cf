//! Orchestrator tying the scene store, timeline and generation jobs together.
//!
//! All mutable state lives in one [`Workspace`] behind a single mutex, which is
//! never held across an `.await`. Generation jobs run as Tokio tasks and write
//! back through the same mutex, so every command observes a consistent state.
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use generation::GenerationClient;
use jobs::{
    drive_job, GenerationJob, JobFailure, JobHandle, JobRequest, JobSink, JobSnapshot, JobTicket,
    JobTracker, PollPolicy,
};
use storyboard::{ParseError, Scene, SceneStore, ScriptParser};
use timeline::{ClipId, ClipKind, NewClip, Timeline, TimelineClip, Track};

mod config;
mod error;
mod events;

pub use config::{StudioConfig, TrackConfig};
pub use error::StudioError;
pub use events::{EventHub, StudioEvent};
pub use jobs::{JobKey, JobStatus};
pub use storyboard::{ArtifactKind, ArtifactRef, SceneId};

struct Workspace {
    scenes: SceneStore,
    timeline: Timeline,
    jobs: JobTracker,
}

impl Workspace {
    fn job_event(&self, key: JobKey) -> StudioEvent {
        let snapshot = self.jobs.status(key);
        StudioEvent::JobUpdated {
            key,
            status: snapshot.status,
            message: snapshot.message,
        }
    }
}

struct Shared {
    workspace: Mutex<Workspace>,
    events: EventHub,
    tasks: Mutex<HashMap<JobKey, (u64, AbortHandle)>>,
    /// Signalled whenever a task leaves `tasks`.
    task_done: Notify,
}

impl Shared {
    fn abort_task(&self, key: JobKey) {
        let removed = self.tasks.lock().remove(&key);
        if let Some((attempt, task)) = removed {
            info!(job = %key, attempt, "aborting generation task");
            task.abort();
            self.task_done.notify_waiters();
        }
    }
}

/// Deregisters a task when its future completes, panics or is dropped by an
/// abort. Only the entry for the same attempt is removed.
struct TaskGuard {
    shared: Arc<Shared>,
    ticket: JobTicket,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(job = %self.ticket.key, "generation task panicked");
        }
        {
            let mut tasks = self.shared.tasks.lock();
            let current = tasks.get(&self.ticket.key).map(|(attempt, _)| *attempt);
            if current == Some(self.ticket.attempt) {
                tasks.remove(&self.ticket.key);
            }
        }
        self.shared.task_done.notify_waiters();
    }
}

impl JobSink for Shared {
    fn submitted(&self, ticket: JobTicket, handle: &JobHandle) -> bool {
        let event = {
            let mut ws = self.workspace.lock();
            if !ws.jobs.mark_submitted(ticket, handle.clone()) {
                return false;
            }
            ws.job_event(ticket.key)
        };
        self.events.publish(event);
        true
    }

    fn progress(&self, ticket: JobTicket, message: &str) -> bool {
        let event = {
            let mut ws = self.workspace.lock();
            if !ws.jobs.record_progress(ticket, message) {
                return false;
            }
            ws.job_event(ticket.key)
        };
        self.events.publish(event);
        true
    }

    fn succeeded(&self, ticket: JobTicket, artifact: ArtifactRef) -> bool {
        let events = {
            let mut ws = self.workspace.lock();
            if !ws.jobs.is_current(ticket) {
                return false;
            }
            let scene_id = ticket.key.scene_id;
            if let Err(err) = ws
                .scenes
                .attach_artifact(scene_id, ticket.key.kind, artifact.clone())
            {
                warn!(job = %ticket.key, %err, "finished job has no scene to attach to");
                return false;
            }
            ws.jobs.succeed(ticket, artifact);
            [
                StudioEvent::SceneUpdated { scene_id },
                ws.job_event(ticket.key),
            ]
        };
        self.events.publish_all(events);
        true
    }

    fn failed(&self, ticket: JobTicket, failure: JobFailure) -> bool {
        let event = {
            let mut ws = self.workspace.lock();
            if !ws.jobs.fail(ticket, failure) {
                return false;
            }
            ws.job_event(ticket.key)
        };
        self.events.publish(event);
        true
    }
}

/// Command and query surface consumed by the UI layer.
pub struct Studio {
    config: StudioConfig,
    policy: PollPolicy,
    client: Arc<dyn GenerationClient>,
    parser: Arc<dyn ScriptParser>,
    runtime: Handle,
    shared: Arc<Shared>,
}

impl Studio {
    /// Must be called from within a Tokio runtime; generation jobs are spawned
    /// onto it.
    pub fn new(
        config: StudioConfig,
        client: Arc<dyn GenerationClient>,
        parser: Arc<dyn ScriptParser>,
    ) -> Result<Self, StudioError> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| StudioError::Config(format!("no tokio runtime available: {e}")))?;
        let timeline = Timeline::new(config.build_tracks())?;

        info!(
            client = client.name(),
            parser = parser.name(),
            tracks = config.tracks.len(),
            "studio ready"
        );
        Ok(Self {
            policy: config.poll_policy(),
            config,
            client,
            parser,
            runtime,
            shared: Arc::new(Shared {
                workspace: Mutex::new(Workspace {
                    scenes: SceneStore::new(),
                    timeline,
                    jobs: JobTracker::new(),
                }),
                events: EventHub::new(),
                tasks: Mutex::new(HashMap::new()),
                task_done: Notify::new(),
            }),
        })
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn subscribe(&self) -> Receiver<StudioEvent> {
        self.shared.events.subscribe()
    }

    // Queries

    pub fn scenes(&self) -> Vec<Scene> {
        self.shared.workspace.lock().scenes.scenes().to_vec()
    }

    pub fn scene(&self, scene_id: SceneId) -> Option<Scene> {
        self.shared.workspace.lock().scenes.scene(scene_id).cloned()
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.shared.workspace.lock().timeline.tracks().to_vec()
    }

    pub fn clip(&self, clip_id: ClipId) -> Option<TimelineClip> {
        self.shared.workspace.lock().timeline.clip(clip_id).cloned()
    }

    pub fn clips_for_scene(&self, scene_id: SceneId) -> Vec<TimelineClip> {
        self.shared
            .workspace
            .lock()
            .timeline
            .clips_for_scene(scene_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn job_status(&self, scene_id: SceneId, kind: ArtifactKind) -> JobSnapshot {
        self.shared
            .workspace
            .lock()
            .jobs
            .status(JobKey::new(scene_id, kind))
    }

    pub fn job(&self, scene_id: SceneId, kind: ArtifactKind) -> Option<GenerationJob> {
        self.shared
            .workspace
            .lock()
            .jobs
            .job(JobKey::new(scene_id, kind))
            .cloned()
    }

    pub fn jobs(&self) -> Vec<GenerationJob> {
        self.shared.workspace.lock().jobs.jobs().cloned().collect()
    }

    // Commands

    /// Parses `raw` and replaces the scene list. A parse failure leaves the
    /// current scenes untouched.
    pub async fn request_parse(&self, raw: &str) -> Result<Vec<Scene>, StudioError> {
        let drafts = self.parser.parse(raw).await.map_err(|err| {
            warn!(parser = self.parser.name(), %err, "script parse failed");
            err
        })?;
        if drafts.is_empty() {
            return Err(ParseError::Empty.into());
        }
        let scenes: Vec<Scene> = drafts.into_iter().map(Scene::from_draft).collect();

        let (dropped, stopped) = {
            let mut ws = self.shared.workspace.lock();
            let dropped = ws.scenes.replace_scenes(scenes.clone())?;
            let stopped = ws.jobs.forget_scenes(&dropped);
            (dropped, stopped)
        };
        for key in stopped {
            self.shared.abort_task(key);
        }

        info!(
            scenes = scenes.len(),
            dropped = dropped.len(),
            "scenes replaced"
        );
        self.shared.events.publish(StudioEvent::ScenesReplaced {
            count: scenes.len(),
            dropped,
        });
        Ok(scenes)
    }

    pub fn request_image_generation(&self, scene_id: SceneId) -> Result<JobTicket, StudioError> {
        let (ticket, request, event) = {
            let mut ws = self.shared.workspace.lock();
            let scene = ws
                .scenes
                .scene(scene_id)
                .ok_or(StudioError::UnknownScene(scene_id))?;
            let request = JobRequest::Image {
                prompt: prompt_for(scene),
            };
            let ticket = ws.jobs.submit(JobKey::image(scene_id))?;
            (ticket, request, ws.job_event(ticket.key))
        };
        self.shared.events.publish(event);
        self.spawn_job(ticket, request);
        Ok(ticket)
    }

    /// Requires the scene to already have a still image, which becomes the
    /// reference frame for the video.
    pub fn request_video_generation(&self, scene_id: SceneId) -> Result<JobTicket, StudioError> {
        let (ticket, request, event) = {
            let mut ws = self.shared.workspace.lock();
            let scene = ws
                .scenes
                .scene(scene_id)
                .ok_or(StudioError::UnknownScene(scene_id))?;
            let reference_image = scene.image.clone().ok_or_else(|| {
                StudioError::MissingPrerequisite(format!(
                    "scene {} has no still image to animate",
                    scene.ordinal
                ))
            })?;
            let request = JobRequest::Video {
                prompt: prompt_for(scene),
                reference_image,
            };
            let ticket = ws.jobs.submit(JobKey::video(scene_id))?;
            (ticket, request, ws.job_event(ticket.key))
        };
        self.shared.events.publish(event);
        self.spawn_job(ticket, request);
        Ok(ticket)
    }

    /// Stops a running job, marking it failed. Returns `false` when nothing
    /// was running.
    pub fn cancel_generation(
        &self,
        scene_id: SceneId,
        kind: ArtifactKind,
    ) -> Result<bool, StudioError> {
        let key = JobKey::new(scene_id, kind);
        let event = {
            let mut ws = self.shared.workspace.lock();
            if !ws.scenes.contains(scene_id) {
                return Err(StudioError::UnknownScene(scene_id));
            }
            if ws.jobs.cancel(key).is_none() {
                return Ok(false);
            }
            ws.job_event(key)
        };
        self.shared.abort_task(key);
        self.shared.events.publish(event);
        Ok(true)
    }

    /// Sets the scene duration and pushes it to every linked clip in one step.
    pub fn edit_scene_duration(
        &self,
        scene_id: SceneId,
        duration: f64,
    ) -> Result<Scene, StudioError> {
        let (scene, clip_ids) = {
            let mut ws = self.shared.workspace.lock();
            let scene = ws.scenes.set_duration(scene_id, duration)?;
            let clip_ids = ws
                .timeline
                .propagate_duration_with(scene_id, duration, self.config.propagation);
            (scene, clip_ids)
        };

        info!(scene = %scene_id, duration, clips = clip_ids.len(), "scene duration edited");
        self.shared
            .events
            .publish(StudioEvent::SceneUpdated { scene_id });
        if !clip_ids.is_empty() {
            self.shared
                .events
                .publish(StudioEvent::ClipsUpdated { clip_ids });
        }
        Ok(scene)
    }

    /// Appends a video clip for the scene to the default video track.
    pub fn add_scene_to_timeline(&self, scene_id: SceneId) -> Result<TimelineClip, StudioError> {
        let track_id = self.config.default_video_track_id;
        let clip = {
            let mut ws = self.shared.workspace.lock();
            let scene = ws
                .scenes
                .scene(scene_id)
                .ok_or(StudioError::UnknownScene(scene_id))?;
            let new_clip = NewClip::new(
                format!("{}. {}", scene.ordinal, scene.slugline),
                ClipKind::Video,
                scene.duration,
            )
            .with_color(self.config.scene_clip_color.clone())
            .with_scene(scene_id);
            ws.timeline.append_clip(track_id, new_clip)?
        };

        info!(scene = %scene_id, track = %track_id, start = clip.start, "scene added to timeline");
        self.shared.events.publish(StudioEvent::ClipAdded {
            track_id,
            clip_id: clip.id,
        });
        Ok(clip)
    }

    /// Downloads the bytes of a scene's generated artifact.
    pub async fn fetch_artifact(
        &self,
        scene_id: SceneId,
        kind: ArtifactKind,
    ) -> Result<Vec<u8>, StudioError> {
        let artifact = {
            let ws = self.shared.workspace.lock();
            let scene = ws
                .scenes
                .scene(scene_id)
                .ok_or(StudioError::UnknownScene(scene_id))?;
            scene.artifact(kind).cloned().ok_or_else(|| {
                StudioError::MissingPrerequisite(format!(
                    "scene {} has no generated {kind} yet",
                    scene.ordinal
                ))
            })?
        };
        Ok(self.client.fetch_artifact_bytes(&artifact).await?)
    }

    /// Waits until the job for `key` has no background task left, then
    /// returns its status. The task stays registered while waiting, so a
    /// cancel or re-parse from elsewhere still aborts it.
    pub async fn wait_for_job(&self, key: JobKey) -> JobSnapshot {
        loop {
            let done = self.shared.task_done.notified();
            tokio::pin!(done);
            // Registered before the check so a wakeup in between is not lost.
            done.as_mut().enable();
            if !self.shared.tasks.lock().contains_key(&key) {
                break;
            }
            done.await;
        }
        self.shared.workspace.lock().jobs.status(key)
    }

    fn spawn_job(&self, ticket: JobTicket, request: JobRequest) {
        let client = Arc::clone(&self.client);
        let shared = Arc::clone(&self.shared);
        let sink: Arc<dyn JobSink> = shared.clone();
        let policy = self.policy;

        // Held across the spawn so the task cannot finish and clean up before
        // its handle is registered.
        let mut tasks = self.shared.tasks.lock();
        let task = self.runtime.spawn(async move {
            let _guard = TaskGuard { shared, ticket };
            drive_job(client, ticket, request, policy, sink).await
        });
        tasks.insert(ticket.key, (ticket.attempt, task.abort_handle()));
    }
}

impl Drop for Studio {
    fn drop(&mut self) {
        let tasks: Vec<_> = self.shared.tasks.lock().drain().collect();
        for (_, (_, task)) in tasks {
            task.abort();
        }
    }
}

fn prompt_for(scene: &Scene) -> String {
    if scene.description.trim().is_empty() {
        scene.slugline.clone()
    } else {
        scene.description.clone()
    }
}
