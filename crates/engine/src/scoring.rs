//! Composite scene scoring and ranking.
//!
//! Normalization constants are computed once for the whole pool in
//! [`ScoringContext::new`]; after that every scene is scored independently.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::info;

use crate::anchors::StructuralAnchors;
use crate::beats::{classify_beat, BeatContext, BeatType};
use crate::config::EngineConfig;
use crate::dialogue::{nearest_event, DialogueEvent};
use crate::error::{EngineError, Result};
use crate::scene::SceneCandidate;
use crate::signals::{raw_signals, NormalizationContext, SignalKind, SignalVector};
use crate::zones::{zone_by_position, zone_interval, Zone, ZoneMap};

/// Static signal weights. They sum to 1.0.
pub const SIGNAL_WEIGHTS: [(SignalKind, f64); 8] = [
    (SignalKind::MotionMagnitude, 0.20),
    (SignalKind::VisualContrast, 0.15),
    (SignalKind::SceneUniqueness, 0.15),
    (SignalKind::DialogueEmotionalWeight, 0.20),
    (SignalKind::FacePresence, 0.10),
    (SignalKind::VisionConfidence, 0.10),
    (SignalKind::Saturation, 0.05),
    (SignalKind::ChronologicalPosition, 0.05),
];

pub fn weight_of(kind: SignalKind) -> f64 {
    SIGNAL_WEIGHTS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, w)| *w)
        .unwrap_or(0.0)
}

pub fn composite_score(signals: &SignalVector) -> f64 {
    let sum: f64 = SIGNAL_WEIGHTS
        .iter()
        .map(|(kind, weight)| weight * signals.get(*kind))
        .sum();
    sum.clamp(0.0, 1.0)
}

/// Signals ordered by their weighted contribution, largest first.
pub fn dominant_signals(signals: &SignalVector, n: usize) -> Vec<(SignalKind, f64)> {
    let mut contributions: Vec<(SignalKind, f64)> = SIGNAL_WEIGHTS
        .iter()
        .map(|(kind, weight)| (*kind, weight * signals.get(*kind)))
        .filter(|(_, c)| *c > 0.0)
        .collect();
    contributions.sort_by(|a, b| b.1.total_cmp(&a.1));
    contributions.truncate(n);
    contributions
}

/// A scene after scoring. This is what the assembler selects from and what the
/// scoring checkpoint stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredScene {
    pub scene: SceneCandidate,
    pub zone: Zone,
    pub signals: SignalVector,
    pub score: f64,
    pub beat: BeatType,
}

impl ScoredScene {
    pub fn id(&self) -> &str {
        &self.scene.id
    }

    pub fn timestamp_s(&self) -> f64 {
        self.scene.timestamp_s
    }
}

/// Higher vision confidence, then earlier timestamp, then id.
fn tie_break(a: &ScoredScene, b: &ScoredScene) -> Ordering {
    b.signals
        .vision_confidence
        .total_cmp(&a.signals.vision_confidence)
        .then_with(|| a.timestamp_s().total_cmp(&b.timestamp_s()))
        .then_with(|| a.scene.id.cmp(&b.scene.id))
}

/// Sorts best first. Scores are grouped from the top down: a group starts at
/// its leading score and takes every following score within `epsilon` of it.
/// Inside a group, higher vision confidence goes first, then earlier
/// timestamp, then id.
pub fn rank_by<T>(items: &mut [T], epsilon: f64, scene: impl Fn(&T) -> &ScoredScene) {
    let epsilon = epsilon.max(0.0);
    items.sort_by(|a, b| {
        let (a, b) = (scene(a), scene(b));
        b.score.total_cmp(&a.score).then_with(|| tie_break(a, b))
    });

    let mut start = 0;
    while start < items.len() {
        let lead = scene(&items[start]).score;
        let len = items[start..]
            .iter()
            .take_while(|item| scene(*item).score >= lead - epsilon)
            .count()
            .max(1);
        items[start..start + len].sort_by(|a, b| tie_break(scene(a), scene(b)));
        start += len;
    }
}

pub fn rank(scored: &mut [ScoredScene], epsilon: f64) {
    rank_by(scored, epsilon, |s| s);
}

pub struct ScoringContext<'a> {
    dialogue: &'a [DialogueEvent],
    anchors: StructuralAnchors,
    zones: &'a ZoneMap,
    duration_s: f64,
    config: &'a EngineConfig,
    normalization: NormalizationContext,
    pool_scores: Vec<f64>,
}

impl<'a> ScoringContext<'a> {
    pub fn new(
        scenes: &[SceneCandidate],
        dialogue: &'a [DialogueEvent],
        anchors: StructuralAnchors,
        zones: &'a ZoneMap,
        duration_s: f64,
        config: &'a EngineConfig,
    ) -> Result<Self> {
        if !(duration_s.is_finite() && duration_s > 0.0) {
            return Err(EngineError::InvalidDuration(duration_s));
        }
        if scenes.is_empty() {
            return Err(EngineError::EmptyPool);
        }

        let raw: Vec<SignalVector> = scenes
            .iter()
            .map(|s| raw_signals(s, dialogue, duration_s, config.dialogue_window_s))
            .collect();
        let normalization = NormalizationContext::from_pool(&raw);
        let mut pool_scores: Vec<f64> = raw
            .iter()
            .map(|r| composite_score(&normalization.normalize(r)))
            .collect();
        pool_scores.sort_by(f64::total_cmp);

        Ok(ScoringContext {
            dialogue,
            anchors,
            zones,
            duration_s,
            config,
            normalization,
            pool_scores,
        })
    }

    pub fn zone_of(&self, scene: &SceneCandidate) -> Zone {
        self.zones
            .get(&scene.id)
            .copied()
            .unwrap_or_else(|| zone_by_position(scene.timestamp_s, &self.anchors))
    }

    pub fn signals(&self, scene: &SceneCandidate) -> SignalVector {
        let raw = raw_signals(scene, self.dialogue, self.duration_s, self.config.dialogue_window_s);
        self.normalization.normalize(&raw)
    }

    fn rank_percentile(&self, score: f64) -> f64 {
        let n = self.pool_scores.len();
        if n <= 1 {
            return 1.0;
        }
        let below = self.pool_scores.partition_point(|s| *s < score);
        (below as f64 / (n - 1) as f64).clamp(0.0, 1.0)
    }

    fn beat_context(&self, scene: &SceneCandidate, zone: Zone, signals: &SignalVector, score: f64) -> BeatContext {
        let (start, end) = zone_interval(zone, &self.anchors, self.duration_s);
        let position_in_zone = if end > start {
            ((scene.timestamp_s - start) / (end - start)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let emotion = nearest_event(self.dialogue, scene.timestamp_s, self.config.dialogue_window_s)
            .map(|e| e.emotion());

        BeatContext {
            zone,
            position_in_zone,
            emotion,
            has_face: scene.has_face.unwrap_or(false),
            score,
            visual_peak: signals.motion_magnitude.max(signals.visual_contrast),
            rank_percentile: self.rank_percentile(score),
        }
    }

    /// Composite score in [0,1] and exactly one beat.
    pub fn score_and_classify(&self, scene: &SceneCandidate) -> (f64, BeatType) {
        let scored = self.score(scene);
        (scored.score, scored.beat)
    }

    pub fn score(&self, scene: &SceneCandidate) -> ScoredScene {
        let zone = self.zone_of(scene);
        let signals = self.signals(scene);
        let score = composite_score(&signals);
        let beat = classify_beat(&self.beat_context(scene, zone, &signals, score));
        ScoredScene {
            scene: scene.clone(),
            zone,
            signals,
            score,
            beat,
        }
    }
}

/// Scores the whole pool, best first.
pub fn score_pool(
    scenes: &[SceneCandidate],
    dialogue: &[DialogueEvent],
    anchors: StructuralAnchors,
    zones: &ZoneMap,
    duration_s: f64,
    config: &EngineConfig,
) -> Result<Vec<ScoredScene>> {
    let ctx = ScoringContext::new(scenes, dialogue, anchors, zones, duration_s, config)?;
    let mut scored: Vec<ScoredScene> = scenes.iter().map(|s| ctx.score(s)).collect();
    rank(&mut scored, config.score_epsilon);

    if let Some(top) = scored.first() {
        info!(
            "[SCORING] scored {} scenes, top {} at {:.3} ({})",
            scored.len(),
            top.scene.id,
            top.score,
            top.beat
        );
    }
    Ok(scored)
}
