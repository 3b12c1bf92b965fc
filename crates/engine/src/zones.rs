use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::anchors::StructuralAnchors;
use crate::config::EngineConfig;
use crate::error::InferenceError;
use crate::scene::SceneCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Zone {
    Beginning,
    Escalation,
    Climax,
}

impl Zone {
    /// Trailer order.
    pub const ALL: [Zone; 3] = [Zone::Beginning, Zone::Escalation, Zone::Climax];

    pub fn index(self) -> usize {
        match self {
            Zone::Beginning => 0,
            Zone::Escalation => 1,
            Zone::Climax => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Beginning => "BEGINNING",
            Zone::Escalation => "ESCALATION",
            Zone::Climax => "CLIMAX",
        }
    }

    /// Hand-written description of what a scene in this zone looks like.
    pub fn archetype(self) -> &'static str {
        match self {
            Zone::Beginning => {
                "introduction setup ordinary world character establishment calm before the storm"
            }
            Zone::Escalation => {
                "rising tension conflict confrontation danger intensifying stakes escalating pressure"
            }
            Zone::Climax => {
                "peak crisis final battle decisive moment maximum intensity explosive showdown climax"
            }
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External text embedding service.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, InferenceError>;
}

/// Archetype and per-scene vectors, fetched once before assignment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneEmbeddings {
    pub archetypes: Option<[Vec<f32>; 3]>,
    pub scenes: BTreeMap<String, Vec<f32>>,
}

/// Embeds the three archetypes and every described scene.
///
/// Failures are not fatal: a scene without a vector is placed by position,
/// and without archetype vectors every scene is.
pub async fn embed_for_zones(scenes: &[SceneCandidate], embedder: Option<&dyn Embedder>) -> ZoneEmbeddings {
    let mut out = ZoneEmbeddings::default();
    let Some(embedder) = embedder else {
        return out;
    };

    let mut archetypes = Vec::with_capacity(3);
    for zone in Zone::ALL {
        match embedder.embed(zone.archetype()).await {
            Ok(v) if !v.is_empty() => archetypes.push(v),
            Ok(_) => {
                warn!("[ZONES] empty archetype embedding for {}; zones by position only", zone);
                return out;
            }
            Err(e) => {
                warn!("[ZONES] archetype embedding failed for {}: {}; zones by position only", zone, e);
                return out;
            }
        }
    }
    out.archetypes = archetypes.try_into().ok();

    for scene in scenes {
        let Some(text) = scene.embedding_text() else {
            continue;
        };
        match embedder.embed(&text).await {
            Ok(v) if !v.is_empty() => {
                out.scenes.insert(scene.id.clone(), v);
            }
            Ok(_) => debug!("[ZONES] empty embedding for scene {}", scene.id),
            Err(e) => warn!("[ZONES] embedding failed for scene {}: {}", scene.id, e),
        }
    }
    out
}

/// Cosine similarity over the shared prefix of both vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dim = a.len().min(b.len());
    if dim == 0 {
        return 0.0;
    }
    let (a, b) = (&a[..dim], &b[..dim]);

    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// `[start, end)` of a zone on the film timeline. The climax runs to the end.
pub fn zone_interval(zone: Zone, anchors: &StructuralAnchors, duration_s: f64) -> (f64, f64) {
    match zone {
        Zone::Beginning => (0.0, anchors.escalation_t),
        Zone::Escalation => (anchors.escalation_t, anchors.climax_t),
        Zone::Climax => (anchors.climax_t, duration_s.max(anchors.climax_t)),
    }
}

pub fn zone_by_position(t: f64, anchors: &StructuralAnchors) -> Zone {
    if t < anchors.escalation_t {
        Zone::Beginning
    } else if t < anchors.climax_t {
        Zone::Escalation
    } else {
        Zone::Climax
    }
}

/// 1.0 inside the zone interval, decaying linearly with distance relative to
/// the film length outside it.
pub fn positional_affinity(t: f64, zone: Zone, anchors: &StructuralAnchors, duration_s: f64) -> f64 {
    if zone_by_position(t, anchors) == zone {
        return 1.0;
    }
    let (start, end) = zone_interval(zone, anchors, duration_s);
    let distance = if t < start { start - t } else { t - end };
    (1.0 - distance / duration_s.max(1.0)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneMethod {
    /// No usable embedding; placed by timestamp.
    Position,
    /// Weighted semantic + positional score.
    Combined,
    /// Archetype similarities too close to call; nearest zone by timestamp.
    TieBreak,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDecision {
    pub zone: Zone,
    pub method: ZoneMethod,
    pub similarity: Option<[f64; 3]>,
    pub positional: [f64; 3],
}

/// Picks the zone with the highest `score`; exact ties go to the higher
/// positional affinity, then to the earlier zone.
fn best_zone(candidates: &[Zone], score: impl Fn(Zone) -> f64, positional: &[f64; 3]) -> Zone {
    let mut best = candidates[0];
    for &zone in &candidates[1..] {
        let (s, best_s) = (score(zone), score(best));
        if s > best_s || (s == best_s && positional[zone.index()] > positional[best.index()]) {
            best = zone;
        }
    }
    best
}

pub fn decide_zone(
    scene: &SceneCandidate,
    anchors: &StructuralAnchors,
    embeddings: &ZoneEmbeddings,
    duration_s: f64,
    config: &EngineConfig,
) -> ZoneDecision {
    let t = scene.timestamp_s;
    let positional = Zone::ALL.map(|z| positional_affinity(t, z, anchors, duration_s));

    let vectors = embeddings
        .archetypes
        .as_ref()
        .zip(embeddings.scenes.get(&scene.id));
    let Some((archetypes, scene_vec)) = vectors else {
        return ZoneDecision {
            zone: zone_by_position(t, anchors),
            method: ZoneMethod::Position,
            similarity: None,
            positional,
        };
    };

    let similarity = Zone::ALL.map(|z| cosine_similarity(scene_vec, &archetypes[z.index()]));
    let top = similarity.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let near: Vec<Zone> = Zone::ALL
        .into_iter()
        .filter(|z| top - similarity[z.index()] <= config.zone_epsilon)
        .collect();

    let (zone, method) = if near.len() > 1 {
        let zone = best_zone(&near, |z| positional[z.index()], &positional);
        (zone, ZoneMethod::TieBreak)
    } else {
        let w = config.zone_semantic_weight.clamp(0.0, 1.0);
        let combined =
            |z: Zone| w * similarity[z.index()].clamp(0.0, 1.0) + (1.0 - w) * positional[z.index()];
        (best_zone(&Zone::ALL, combined, &positional), ZoneMethod::Combined)
    };

    ZoneDecision {
        zone,
        method,
        similarity: Some(similarity),
        positional,
    }
}

pub type ZoneMap = BTreeMap<String, Zone>;

/// Assigns every scene exactly one zone. Pure and order-independent.
pub fn assign_zones(
    scenes: &[SceneCandidate],
    anchors: &StructuralAnchors,
    embeddings: &ZoneEmbeddings,
    duration_s: f64,
    config: &EngineConfig,
) -> ZoneMap {
    let mut map = ZoneMap::new();
    let mut pulled = 0usize;
    for scene in scenes {
        let decision = decide_zone(scene, anchors, embeddings, duration_s, config);
        if decision.zone != zone_by_position(scene.timestamp_s, anchors) {
            pulled += 1;
        }
        map.insert(scene.id.clone(), decision.zone);
    }
    debug!(
        "[ZONES] assigned {} scenes ({} placed out of chronological zone)",
        map.len(),
        pulled
    );
    map
}
