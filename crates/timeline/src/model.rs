use tracing::debug;

use crate::{
    ClipId, NewClip, PropagationMode, SceneId, Seconds, TimelineClip, TimelineError, Track, TrackId,
};

/// Fixed set of tracks, each holding clips in start-time order.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    tracks: Vec<Track>,
}

impl Timeline {
    pub fn new(tracks: impl IntoIterator<Item = Track>) -> Result<Self, TimelineError> {
        let mut timeline = Self::default();
        for track in tracks {
            if timeline.track(track.id).is_some() {
                return Err(TimelineError::TrackExists(track.id));
            }
            timeline.tracks.push(track);
        }
        Ok(timeline)
    }

    /// Places `clip` directly after the last clip on the track (or at 0 on an
    /// empty track).
    pub fn append_clip(
        &mut self,
        track_id: TrackId,
        clip: NewClip,
    ) -> Result<TimelineClip, TimelineError> {
        if !(clip.duration.is_finite() && clip.duration > 0.0) {
            return Err(TimelineError::InvalidDuration(clip.duration));
        }
        let track = self.track_mut(track_id)?;
        let start = track.end();
        let placed = TimelineClip {
            id: ClipId::new(),
            track_id,
            start,
            duration: clip.duration,
            name: clip.name,
            kind: clip.kind,
            color: clip.color,
            scene_id: clip.scene_id,
        };
        debug!(track = %track_id, clip = %placed.id, start, "appended clip");
        track.clips.push(placed.clone());
        Ok(placed)
    }

    pub fn propagate_duration(&mut self, scene_id: SceneId, duration: Seconds) -> Vec<ClipId> {
        self.propagate_duration_with(scene_id, duration, PropagationMode::Static)
    }

    /// Sets `duration` on every clip linked to `scene_id`. Returns the ids of
    /// all clips whose geometry changed.
    pub fn propagate_duration_with(
        &mut self,
        scene_id: SceneId,
        duration: Seconds,
        mode: PropagationMode,
    ) -> Vec<ClipId> {
        let mut touched = Vec::new();
        for track in &mut self.tracks {
            for idx in 0..track.clips.len() {
                if track.clips[idx].scene_id != Some(scene_id) {
                    continue;
                }
                let old_end = track.clips[idx].end();
                let delta = duration - track.clips[idx].duration;
                track.clips[idx].duration = duration;
                mark(&mut touched, track.clips[idx].id);

                if mode == PropagationMode::Ripple && delta != 0.0 {
                    for later in track.clips.iter_mut().skip(idx + 1) {
                        if later.start >= old_end {
                            later.start += delta;
                            mark(&mut touched, later.id);
                        }
                    }
                }
            }
        }
        touched
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, track_id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    pub fn track_end(&self, track_id: TrackId) -> Result<Seconds, TimelineError> {
        self.track(track_id)
            .map(Track::end)
            .ok_or(TimelineError::TrackNotFound(track_id))
    }

    pub fn clip(&self, clip_id: ClipId) -> Option<&TimelineClip> {
        self.tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .find(|c| c.id == clip_id)
    }

    pub fn clips_for_scene(&self, scene_id: SceneId) -> Vec<&TimelineClip> {
        self.tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .filter(|c| c.scene_id == Some(scene_id))
            .collect()
    }

    fn track_mut(&mut self, track_id: TrackId) -> Result<&mut Track, TimelineError> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == track_id)
            .ok_or(TimelineError::TrackNotFound(track_id))
    }
}

fn mark(touched: &mut Vec<ClipId>, id: ClipId) {
    if !touched.contains(&id) {
        touched.push(id);
    }
}
