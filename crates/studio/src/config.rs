use generation::ClientConfig;
use jobs::PollPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use timeline::{PropagationMode, Track, TrackId, TrackKind};

use crate::StudioError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackConfig {
    pub id: TrackId,
    pub name: String,
    pub kind: TrackKind,
}

impl TrackConfig {
    pub fn new(id: u32, name: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: TrackId(id),
            name: name.into(),
            kind,
        }
    }
}

/// Studio configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StudioConfig {
    /// Fixed track set created at startup
    pub tracks: Vec<TrackConfig>,

    /// Track that "add to timeline" appends scene clips to
    pub default_video_track_id: TrackId,

    /// Delay between polls of a running job
    pub poll_interval_ms: u64,

    /// Fail a job that is still running after this long
    pub job_timeout_secs: Option<u64>,

    /// How scene duration edits reach linked clips
    pub propagation: PropagationMode,

    /// Display color for clips made from scenes
    pub scene_clip_color: String,

    /// Remote generation service settings
    pub generation: ClientConfig,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            tracks: vec![
                TrackConfig::new(1, "Video 1", TrackKind::Video),
                TrackConfig::new(2, "Video 2", TrackKind::Video),
                TrackConfig::new(3, "Audio 1", TrackKind::Audio),
            ],
            default_video_track_id: TrackId(1),
            poll_interval_ms: 5000,
            job_timeout_secs: None,
            propagation: PropagationMode::Static,
            scene_clip_color: "#4C6EF5".to_string(),
            generation: ClientConfig::default(),
        }
    }
}

impl StudioConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = Some(secs);
        self
    }

    pub fn with_propagation(mut self, mode: PropagationMode) -> Self {
        self.propagation = mode;
        self
    }

    pub fn with_generation(mut self, generation: ClientConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn validate(&self) -> Result<(), StudioError> {
        if self.poll_interval_ms == 0 {
            return Err(StudioError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.job_timeout_secs == Some(0) {
            return Err(StudioError::Config(
                "job_timeout_secs must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for track in &self.tracks {
            if !seen.insert(track.id) {
                return Err(StudioError::Config(format!("duplicate track id {}", track.id)));
            }
        }

        let default_track = self
            .tracks
            .iter()
            .find(|t| t.id == self.default_video_track_id);
        match default_track {
            Some(track) if track.kind == TrackKind::Video => Ok(()),
            Some(track) => Err(StudioError::Config(format!(
                "default track {} is not a video track",
                track.id
            ))),
            None => Err(StudioError::Config(format!(
                "default track {} is not configured",
                self.default_video_track_id
            ))),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            timeout: self.job_timeout_secs.map(Duration::from_secs),
        }
    }

    pub(crate) fn build_tracks(&self) -> Vec<Track> {
        self.tracks
            .iter()
            .map(|t| Track::new(t.id, t.name.clone(), t.kind))
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<(), StudioError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StudioError::Config(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| StudioError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, StudioError> {
        let json = std::fs::read_to_string(path).map_err(|e| StudioError::Config(e.to_string()))?;
        let config: Self =
            serde_json::from_str(&json).map_err(|e| StudioError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
