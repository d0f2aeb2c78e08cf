use std::collections::HashSet;

use crate::{validate_duration, ArtifactKind, ArtifactRef, Scene, SceneId, StoryboardError};

/// Ordered list of scenes parsed from a script.
///
/// The store is a plain data holder: it validates its own invariants but never
/// reaches into the timeline or the job tracker.
#[derive(Debug, Clone, Default)]
pub struct SceneStore {
    scenes: Vec<Scene>,
}

impl SceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a whole new scene list. Either every scene is accepted or the
    /// store is left untouched. Returns the ids that are no longer present.
    pub fn replace_scenes(&mut self, scenes: Vec<Scene>) -> Result<Vec<SceneId>, StoryboardError> {
        let mut seen = HashSet::with_capacity(scenes.len());
        for scene in &scenes {
            validate_duration(scene.duration)?;
            if !seen.insert(scene.id) {
                return Err(StoryboardError::DuplicateScene(scene.id));
            }
        }

        let dropped = self
            .scenes
            .iter()
            .map(|s| s.id)
            .filter(|id| !seen.contains(id))
            .collect();
        self.scenes = scenes;
        Ok(dropped)
    }

    pub fn set_duration(
        &mut self,
        scene_id: SceneId,
        duration: f64,
    ) -> Result<Scene, StoryboardError> {
        validate_duration(duration)?;
        let scene = self.scene_mut(scene_id)?;
        scene.duration = duration;
        Ok(scene.clone())
    }

    /// Re-attaching overwrites the previous reference.
    pub fn attach_artifact(
        &mut self,
        scene_id: SceneId,
        kind: ArtifactKind,
        artifact: ArtifactRef,
    ) -> Result<(), StoryboardError> {
        let scene = self.scene_mut(scene_id)?;
        match kind {
            ArtifactKind::Image => scene.image = Some(artifact),
            ArtifactKind::Video => scene.video = Some(artifact),
        }
        Ok(())
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn scene(&self, scene_id: SceneId) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == scene_id)
    }

    pub fn contains(&self, scene_id: SceneId) -> bool {
        self.scene(scene_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    fn scene_mut(&mut self, scene_id: SceneId) -> Result<&mut Scene, StoryboardError> {
        self.scenes
            .iter_mut()
            .find(|s| s.id == scene_id)
            .ok_or(StoryboardError::SceneNotFound(scene_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(durations: &[f64]) -> SceneStore {
        let mut store = SceneStore::new();
        let scenes = durations
            .iter()
            .enumerate()
            .map(|(idx, d)| {
                Scene::new(idx as u32 + 1, format!("Scene {}", idx + 1), "", *d).unwrap()
            })
            .collect();
        store.replace_scenes(scenes).unwrap();
        store
    }

    #[test]
    fn test_set_duration_updates_scene() {
        let mut store = store_with(&[5.0]);
        let id = store.scenes()[0].id;
        let updated = store.set_duration(id, 8.5).unwrap();
        assert_eq!(updated.duration, 8.5);
        assert_eq!(store.scene(id).unwrap().duration, 8.5);
    }

    #[test]
    fn test_set_duration_rejects_invalid_and_keeps_prior() {
        let mut store = store_with(&[5.0]);
        let id = store.scenes()[0].id;
        for bad in [0.0, -5.0, f64::NAN] {
            assert!(matches!(
                store.set_duration(id, bad),
                Err(StoryboardError::InvalidDuration(_))
            ));
        }
        assert_eq!(store.scene(id).unwrap().duration, 5.0);
    }

    #[test]
    fn test_set_duration_unknown_scene() {
        let mut store = store_with(&[5.0]);
        let missing = SceneId::new();
        assert_eq!(
            store.set_duration(missing, 3.0).unwrap_err(),
            StoryboardError::SceneNotFound(missing)
        );
    }

    #[test]
    fn test_attach_artifact_overwrites() {
        let mut store = store_with(&[5.0]);
        let id = store.scenes()[0].id;
        store
            .attach_artifact(id, ArtifactKind::Image, ArtifactRef::new("a.png"))
            .unwrap();
        store
            .attach_artifact(id, ArtifactKind::Image, ArtifactRef::new("b.png"))
            .unwrap();
        let scene = store.scene(id).unwrap();
        assert_eq!(scene.image, Some(ArtifactRef::new("b.png")));
        assert_eq!(scene.video, None);
    }

    #[test]
    fn test_replace_scenes_reports_dropped() {
        let mut store = store_with(&[4.0, 6.0]);
        let keep = store.scenes()[0].clone();
        let gone = store.scenes()[1].id;
        let fresh = Scene::new(3, "New", "", 2.0).unwrap();

        let dropped = store.replace_scenes(vec![keep.clone(), fresh]).unwrap();
        assert_eq!(dropped, vec![gone]);
        assert_eq!(store.len(), 2);
        assert!(store.contains(keep.id));
    }

    #[test]
    fn test_replace_scenes_is_all_or_nothing() {
        let mut store = store_with(&[4.0]);
        let before = store.scenes().to_vec();
        let mut bad = Scene::new(2, "Bad", "", 1.0).unwrap();
        bad.duration = -1.0;
        let good = Scene::new(1, "Good", "", 1.0).unwrap();

        assert!(store.replace_scenes(vec![good, bad]).is_err());
        assert_eq!(store.scenes(), before.as_slice());
    }
}
