//! Object key layout.
//!
//! ```text
//! {project}/{script}/{order}-{scene}/{preview|video|audio|final}.{ext}
//! {project}/{script}/final.mp4            first composition
//! {project}/{script}/final-{gen}.mp4      later compositions
//! ```

use reel_models::{ProjectId, Scene, SceneId, ScriptId, SubResourceKind};

/// Key for one scene sub-resource artifact.
pub fn scene_artifact_key(
    project_id: &ProjectId,
    script_id: &ScriptId,
    order: u32,
    scene_id: &SceneId,
    kind: SubResourceKind,
) -> String {
    format!(
        "{}/{}/{}-{}/{}.{}",
        project_id,
        script_id,
        order,
        scene_id,
        kind.as_str(),
        kind.extension()
    )
}

/// Shorthand for [`scene_artifact_key`] from a scene record.
pub fn scene_key(scene: &Scene, kind: SubResourceKind) -> String {
    scene_artifact_key(&scene.project_id, &scene.script_id, scene.order, &scene.id, kind)
}

/// Key for a script's composed video. Generation 1 gets the plain name;
/// storage is append-only, so later generations are suffixed.
pub fn final_video_key(project_id: &ProjectId, script_id: &ScriptId, generation: u64) -> String {
    let ext = SubResourceKind::Final.extension();
    if generation <= 1 {
        format!("{}/{}/final.{}", project_id, script_id, ext)
    } else {
        format!("{}/{}/final-{}.{}", project_id, script_id, generation, ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_key_layout() {
        let key = scene_artifact_key(
            &ProjectId::from("p1"),
            &ScriptId::from("s1"),
            2,
            &SceneId::from("sc9"),
            SubResourceKind::Preview,
        );
        assert_eq!(key, "p1/s1/2-sc9/preview.png");
    }

    #[test]
    fn test_final_key_is_suffixed_after_first_generation() {
        let p = ProjectId::from("p1");
        let s = ScriptId::from("s1");
        assert_eq!(final_video_key(&p, &s, 1), "p1/s1/final.mp4");
        assert_eq!(final_video_key(&p, &s, 3), "p1/s1/final-3.mp4");
    }
}
