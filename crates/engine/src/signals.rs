//! The eight per-scene scoring signals and their normalization.

use serde::{Deserialize, Serialize};

use crate::dialogue::{emotional_weight_at, DialogueEvent};
use crate::scene::SceneCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    MotionMagnitude,
    VisualContrast,
    SceneUniqueness,
    DialogueEmotionalWeight,
    FacePresence,
    VisionConfidence,
    Saturation,
    ChronologicalPosition,
}

/// How a raw signal is mapped into [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Already in [0,1]; clamped.
    Fixed,
    /// Divided by the largest value in the pool.
    PoolMax,
    /// Min-max over the pool; a flat pool maps to 0.5.
    PoolMinMax,
}

impl SignalKind {
    pub const ALL: [SignalKind; 8] = [
        SignalKind::MotionMagnitude,
        SignalKind::VisualContrast,
        SignalKind::SceneUniqueness,
        SignalKind::DialogueEmotionalWeight,
        SignalKind::FacePresence,
        SignalKind::VisionConfidence,
        SignalKind::Saturation,
        SignalKind::ChronologicalPosition,
    ];

    pub fn normalization(self) -> Normalization {
        match self {
            SignalKind::MotionMagnitude => Normalization::PoolMax,
            SignalKind::VisualContrast | SignalKind::Saturation => Normalization::PoolMinMax,
            _ => Normalization::Fixed,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SignalKind::MotionMagnitude => "motion",
            SignalKind::VisualContrast => "contrast",
            SignalKind::SceneUniqueness => "uniqueness",
            SignalKind::DialogueEmotionalWeight => "dialogue emotion",
            SignalKind::FacePresence => "face presence",
            SignalKind::VisionConfidence => "vision confidence",
            SignalKind::Saturation => "saturation",
            SignalKind::ChronologicalPosition => "film position",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalVector {
    pub motion_magnitude: f64,
    pub visual_contrast: f64,
    pub scene_uniqueness: f64,
    pub dialogue_emotional_weight: f64,
    pub face_presence: f64,
    pub vision_confidence: f64,
    pub saturation: f64,
    pub chronological_position: f64,
}

impl SignalVector {
    pub fn get(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::MotionMagnitude => self.motion_magnitude,
            SignalKind::VisualContrast => self.visual_contrast,
            SignalKind::SceneUniqueness => self.scene_uniqueness,
            SignalKind::DialogueEmotionalWeight => self.dialogue_emotional_weight,
            SignalKind::FacePresence => self.face_presence,
            SignalKind::VisionConfidence => self.vision_confidence,
            SignalKind::Saturation => self.saturation,
            SignalKind::ChronologicalPosition => self.chronological_position,
        }
    }

    fn get_mut(&mut self, kind: SignalKind) -> &mut f64 {
        match kind {
            SignalKind::MotionMagnitude => &mut self.motion_magnitude,
            SignalKind::VisualContrast => &mut self.visual_contrast,
            SignalKind::SceneUniqueness => &mut self.scene_uniqueness,
            SignalKind::DialogueEmotionalWeight => &mut self.dialogue_emotional_weight,
            SignalKind::FacePresence => &mut self.face_presence,
            SignalKind::VisionConfidence => &mut self.vision_confidence,
            SignalKind::Saturation => &mut self.saturation,
            SignalKind::ChronologicalPosition => &mut self.chronological_position,
        }
    }

    pub fn is_normalized(&self) -> bool {
        SignalKind::ALL
            .iter()
            .all(|k| (0.0..=1.0).contains(&self.get(*k)))
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Raw, unnormalized signals of one scene.
pub fn raw_signals(
    scene: &SceneCandidate,
    dialogue: &[DialogueEvent],
    duration_s: f64,
    dialogue_window_s: f64,
) -> SignalVector {
    let position = if duration_s > 0.0 {
        scene.timestamp_s / duration_s
    } else {
        0.0
    };
    SignalVector {
        motion_magnitude: finite_or_zero(scene.stats.motion).max(0.0),
        visual_contrast: finite_or_zero(scene.stats.contrast),
        scene_uniqueness: finite_or_zero(scene.uniqueness),
        dialogue_emotional_weight: emotional_weight_at(dialogue, scene.timestamp_s, dialogue_window_s),
        face_presence: if scene.has_face.unwrap_or(false) { 1.0 } else { 0.0 },
        vision_confidence: scene.vision_confidence(),
        saturation: finite_or_zero(scene.stats.saturation),
        chronological_position: finite_or_zero(position),
    }
}

/// Pool-wide constants, computed once before any scene is scored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationContext {
    min: [f64; 8],
    max: [f64; 8],
}

impl NormalizationContext {
    pub fn from_pool(raw: &[SignalVector]) -> Self {
        let mut min = [f64::INFINITY; 8];
        let mut max = [f64::NEG_INFINITY; 8];
        for vector in raw {
            for (i, kind) in SignalKind::ALL.iter().enumerate() {
                let v = vector.get(*kind);
                min[i] = min[i].min(v);
                max[i] = max[i].max(v);
            }
        }
        if raw.is_empty() {
            min = [0.0; 8];
            max = [0.0; 8];
        }
        NormalizationContext { min, max }
    }

    pub fn normalize(&self, raw: &SignalVector) -> SignalVector {
        let mut out = SignalVector::default();
        for (i, kind) in SignalKind::ALL.iter().enumerate() {
            let v = raw.get(*kind);
            let normalized = match kind.normalization() {
                Normalization::Fixed => v,
                Normalization::PoolMax => {
                    if self.max[i] > 0.0 {
                        v / self.max[i]
                    } else {
                        0.0
                    }
                }
                Normalization::PoolMinMax => {
                    let range = self.max[i] - self.min[i];
                    if range > 0.0 {
                        (v - self.min[i]) / range
                    } else {
                        0.5
                    }
                }
            };
            *out.get_mut(*kind) = normalized.clamp(0.0, 1.0);
        }
        out
    }
}
