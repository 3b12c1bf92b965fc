pub mod anchors;
pub mod assembly;
pub mod beats;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod extract;
pub mod gate;
pub mod manifest;
pub mod scene;
pub mod scoring;
pub mod signals;
pub mod zones;

pub use anchors::*;
pub use assembly::{build_manifest, SelectionPolicy};
pub use beats::BeatType;
pub use config::EngineConfig;
pub use dialogue::{DialogueEvent, Emotion};
pub use error::{EngineError, InferenceError, ManifestError};
pub use extract::{extract_anchors, extract_anchors_with_report, AnchorReport, TextEngine};
pub use gate::InferenceGate;
pub use manifest::{ClipEntry, TrailerManifest};
pub use scene::{SceneCandidate, SceneStats, VisualDescription};
pub use scoring::{score_pool, ScoredScene, ScoringContext};
pub use signals::SignalVector;
pub use zones::{assign_zones, embed_for_zones, Embedder, Zone, ZoneEmbeddings, ZoneMap};
