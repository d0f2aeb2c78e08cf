use thiserror::Error;

use generation::ClientError;
use jobs::{JobKey, TrackerError};
use storyboard::{ParseError, SceneId, StoryboardError};
use timeline::{TimelineError, TrackId};

/// Errors surfaced synchronously by [`crate::Studio`] commands.
///
/// Failures that happen while a job is polling, timeouts included, are not
/// returned here. They end up on the job as a `JobFailure` and are observed
/// through `job_status`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StudioError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{} job already running for scene {}", .0.kind, .0.scene_id)]
    AlreadyRunning(JobKey),
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),
    #[error("unknown scene: {0}")]
    UnknownScene(SceneId),
    #[error("unknown track: {0}")]
    UnknownTrack(TrackId),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StoryboardError> for StudioError {
    fn from(err: StoryboardError) -> Self {
        match err {
            StoryboardError::SceneNotFound(id) => Self::UnknownScene(id),
            other => Self::InvalidArgument(other.to_string()),
        }
    }
}

impl From<TimelineError> for StudioError {
    fn from(err: TimelineError) -> Self {
        match err {
            TimelineError::TrackNotFound(id) => Self::UnknownTrack(id),
            TimelineError::TrackExists(_) => Self::Config(err.to_string()),
            TimelineError::InvalidDuration(_) => Self::InvalidArgument(err.to_string()),
        }
    }
}

impl From<TrackerError> for StudioError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::AlreadyRunning(key) => Self::AlreadyRunning(key),
        }
    }
}

impl From<ClientError> for StudioError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Configuration(msg) => Self::Config(msg),
            other => Self::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_errors_map_to_taxonomy() {
        let scene = SceneId::new();
        assert_eq!(
            StudioError::from(StoryboardError::SceneNotFound(scene)),
            StudioError::UnknownScene(scene)
        );
        assert!(matches!(
            StudioError::from(StoryboardError::InvalidDuration(-5.0)),
            StudioError::InvalidArgument(_)
        ));
        assert_eq!(
            StudioError::from(TimelineError::TrackNotFound(TrackId(4))),
            StudioError::UnknownTrack(TrackId(4))
        );
        assert!(matches!(
            StudioError::from(ClientError::transport("reset")),
            StudioError::Transport(_)
        ));
        assert_eq!(
            StudioError::from(ParseError::Empty).to_string(),
            "script produced no scenes"
        );
    }
}
