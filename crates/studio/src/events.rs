use crossbeam_channel::{unbounded, Receiver, Sender};
use jobs::{JobKey, JobStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use storyboard::SceneId;
use timeline::{ClipId, TrackId};
use tracing::debug;

/// State-change notification for the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StudioEvent {
    ScenesReplaced { count: usize, dropped: Vec<SceneId> },
    SceneUpdated { scene_id: SceneId },
    ClipAdded { track_id: TrackId, clip_id: ClipId },
    ClipsUpdated { clip_ids: Vec<ClipId> },
    JobUpdated {
        key: JobKey,
        status: JobStatus,
        message: String,
    },
}

/// Fan-out of [`StudioEvent`]s to every live subscriber.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<StudioEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<StudioEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: StudioEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(?event, subscribers = subscribers.len(), "published event");
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = StudioEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
