use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub use storyboard::SceneId;

mod model;
pub use model::*;

#[derive(Debug, Error, PartialEq)]
pub enum TimelineError {
    #[error("track not found: {0}")]
    TrackNotFound(TrackId),
    #[error("track already exists: {0}")]
    TrackExists(TrackId),
    #[error("invalid clip duration: {0}")]
    InvalidDuration(f64),
}

/// Seconds on the timeline.
pub type Seconds = f64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ClipId(pub Uuid);

impl ClipId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClipId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClipKind {
    Video,
    Audio,
    Effect,
    Title,
}

/// How a scene duration edit reaches the clips linked to that scene.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PropagationMode {
    /// Only the linked clip's duration changes. Neighbours keep their start
    /// times, so gaps and overlaps are left as they fall.
    #[default]
    Static,
    /// Clips that started at or after the linked clip's old end move by the
    /// duration delta.
    Ripple,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineClip {
    pub id: ClipId,
    pub track_id: TrackId,
    pub start: Seconds,
    pub duration: Seconds,
    pub name: String,
    pub kind: ClipKind,
    pub color: String,
    /// Non-owning link back to the scene the clip was made from.
    #[serde(default)]
    pub scene_id: Option<SceneId>,
}

impl TimelineClip {
    pub fn end(&self) -> Seconds {
        self.start + self.duration
    }
}

/// Clip as requested by a caller. Placement is decided by the timeline, so a
/// requested start is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewClip {
    pub name: String,
    pub kind: ClipKind,
    pub duration: Seconds,
    pub color: String,
    #[serde(default)]
    pub scene_id: Option<SceneId>,
    #[serde(default)]
    pub start: Option<Seconds>,
}

impl NewClip {
    pub fn new(name: impl Into<String>, kind: ClipKind, duration: Seconds) -> Self {
        Self {
            name: name.into(),
            kind,
            duration,
            color: default_clip_color(kind).to_string(),
            scene_id: None,
            start: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_scene(mut self, scene_id: SceneId) -> Self {
        self.scene_id = Some(scene_id);
        self
    }
}

fn default_clip_color(kind: ClipKind) -> &'static str {
    match kind {
        ClipKind::Video => "#4C6EF5",
        ClipKind::Audio => "#2F9E44",
        ClipKind::Effect => "#AE3EC9",
        ClipKind::Title => "#F59F00",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub kind: TrackKind,
    /// Ordered by start time.
    pub clips: Vec<TimelineClip>,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            clips: Vec::new(),
        }
    }

    /// Where the next appended clip will start.
    pub fn end(&self) -> Seconds {
        self.clips.last().map(TimelineClip::end).unwrap_or(0.0)
    }
}
