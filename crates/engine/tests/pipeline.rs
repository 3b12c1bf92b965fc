use async_trait::async_trait;

use engine::extract::{ChunkAnchors, ChunkRequest};
use engine::{
    assign_zones, build_manifest, embed_for_zones, extract_anchors, score_pool, AnchorSource,
    DialogueEvent, EngineConfig, InferenceError, InferenceGate, SceneCandidate, SceneStats,
    SelectionPolicy, TextEngine, TrailerManifest, VisualDescription, Zone,
};

fn neutral_dialogue() -> Vec<DialogueEvent> {
    vec![
        DialogueEvent::new(0.0, 2.0, "Good morning."),
        DialogueEvent::new(40.0, 42.0, "Pass the salt."),
        DialogueEvent::new(90.0, 92.0, "The train leaves at noon."),
    ]
}

fn evenly_spaced_scenes() -> Vec<SceneCandidate> {
    (0..10)
        .map(|i| {
            let mut scene = SceneCandidate::new(format!("scene-{:02}", i), 5.0 + i as f64 * 10.0, 3.0);
            scene.stats = SceneStats {
                motion: (i % 4) as f64 * 2.5,
                contrast: 40.0 + (i * 7 % 10) as f64,
                saturation: 0.3 + i as f64 * 0.05,
            };
            scene.has_face = Some(i % 2 == 0);
            scene.description = Some(VisualDescription {
                visual_content: format!("shot {}", i),
                mood: "quiet".to_string(),
                action: "walking".to_string(),
                setting: "street".to_string(),
                confidence: None,
            });
            scene
        })
        .collect()
}

async fn run(engine: Option<&dyn TextEngine>) -> TrailerManifest {
    let dialogue = neutral_dialogue();
    let scenes = evenly_spaced_scenes();
    let config = EngineConfig::default();
    let gate = InferenceGate::exclusive();

    let anchors = extract_anchors(&dialogue, 100.0, engine, &gate, &config)
        .await
        .unwrap();
    let embeddings = embed_for_zones(&scenes, None).await;
    let zones = assign_zones(&scenes, &anchors, &embeddings, 100.0, &config);
    let scored = score_pool(&scenes, &dialogue, anchors, &zones, 100.0, &config).unwrap();
    // room for every scene, so each one shows up in the manifest
    let policy = SelectionPolicy {
        target_clip_count: 20,
        ..Default::default()
    };
    build_manifest(&scored, anchors, 100.0, &dialogue, &policy, config.score_epsilon).unwrap()
}

#[tokio::test]
async fn test_end_to_end_without_text_engine() {
    let manifest = run(None).await;

    let anchors = manifest.structural_anchors.unwrap();
    assert_eq!(anchors.as_array(), [5.0, 45.0, 80.0]);
    assert_eq!(anchors.source, AnchorSource::Heuristic);

    for zone in Zone::ALL {
        assert!(manifest.clips_in(zone).count() > 0, "{} has no clips", zone);
    }
    manifest.validate().unwrap();
    for clip in &manifest.clips {
        assert!(!clip.reasoning.trim().is_empty());
        assert!((0.0..=1.0).contains(&clip.score));
    }
    // scene-04 sits on the escalation anchor
    let on_anchor = manifest.clips.iter().find(|c| c.scene_id == "scene-04").unwrap();
    assert_eq!(on_anchor.zone, Zone::Escalation);
}

#[tokio::test]
async fn test_manifest_round_trip() {
    let manifest = run(None).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TRAILER_MANIFEST.json");

    manifest.write_atomic(&path).unwrap();
    let loaded = TrailerManifest::load(&path).unwrap();

    assert_eq!(loaded.structural_anchors, manifest.structural_anchors);
    assert_eq!(loaded.clips, manifest.clips);
    assert_eq!(loaded, manifest);
}

struct FixedEngine;

#[async_trait]
impl TextEngine for FixedEngine {
    async fn locate_anchors(&self, request: &ChunkRequest) -> Result<ChunkAnchors, InferenceError> {
        assert!(request.transcript.starts_with("[0.0s] Good morning."));
        Ok(ChunkAnchors {
            begin_t: 10.0,
            escalation_t: 50.0,
            climax_t: 85.0,
        })
    }
}

#[tokio::test]
async fn test_end_to_end_with_text_engine() {
    let manifest = run(Some(&FixedEngine)).await;

    let anchors = manifest.structural_anchors.unwrap();
    assert_eq!(anchors.as_array(), [10.0, 50.0, 85.0]);
    assert_eq!(anchors.source, AnchorSource::Model);
    // scene-04 at 45s now falls before the escalation anchor
    let scene = manifest.clips.iter().find(|c| c.scene_id == "scene-04").unwrap();
    assert_eq!(scene.zone, Zone::Beginning);
    manifest.validate().unwrap();
}
