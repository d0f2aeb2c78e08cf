use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

mod script;
pub use script::*;
mod store;
pub use store::*;

/// Shot length used when a script gives no usable duration.
pub const DEFAULT_SCENE_SECONDS: f64 = 5.0;

#[derive(Debug, Error, PartialEq)]
pub enum StoryboardError {
    #[error("invalid duration: {0}")]
    InvalidDuration(f64),
    #[error("scene not found: {0}")]
    SceneNotFound(SceneId),
    #[error("duplicate scene id: {0}")]
    DuplicateScene(SceneId),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SceneId(pub Uuid);

impl SceneId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SceneId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which generated artifact a scene slot (and a generation job) refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Video,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Opaque reference to a generated artifact, as handed back by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scene {
    pub id: SceneId,
    pub ordinal: u32,
    pub slugline: String,
    /// Prompt text sent to the generation service.
    pub description: String,
    /// Seconds, always > 0.
    pub duration: f64,
    #[serde(default)]
    pub image: Option<ArtifactRef>,
    #[serde(default)]
    pub video: Option<ArtifactRef>,
}

impl Scene {
    pub fn new(
        ordinal: u32,
        slugline: impl Into<String>,
        description: impl Into<String>,
        duration: f64,
    ) -> Result<Self, StoryboardError> {
        validate_duration(duration)?;
        Ok(Self {
            id: SceneId::new(),
            ordinal,
            slugline: slugline.into(),
            description: description.into(),
            duration,
            image: None,
            video: None,
        })
    }

    /// Builds a scene from parser output. Unusable estimates fall back to
    /// [`DEFAULT_SCENE_SECONDS`].
    pub fn from_draft(draft: SceneDraft) -> Self {
        let duration = draft
            .estimated_duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(DEFAULT_SCENE_SECONDS);
        Self {
            id: SceneId::new(),
            ordinal: draft.ordinal,
            slugline: draft.slugline,
            description: draft.description,
            duration,
            image: None,
            video: None,
        }
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ArtifactRef> {
        match kind {
            ArtifactKind::Image => self.image.as_ref(),
            ArtifactKind::Video => self.video.as_ref(),
        }
    }
}

pub fn validate_duration(duration: f64) -> Result<(), StoryboardError> {
    if duration.is_finite() && duration > 0.0 {
        Ok(())
    } else {
        Err(StoryboardError::InvalidDuration(duration))
    }
}
