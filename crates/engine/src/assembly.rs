use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::anchors::StructuralAnchors;
use crate::beats::BeatType;
use crate::dialogue::DialogueEvent;
use crate::error::{EngineError, Result};
use crate::manifest::{ClipEntry, ClipWindow, TrailerManifest};
use crate::scoring::{dominant_signals, rank_by, ScoredScene};
use crate::zones::Zone;

/// One value per zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerZone {
    pub beginning: f64,
    pub escalation: f64,
    pub climax: f64,
}

impl PerZone {
    pub fn get(&self, zone: Zone) -> f64 {
        match zone {
            Zone::Beginning => self.beginning,
            Zone::Escalation => self.escalation,
            Zone::Climax => self.climax,
        }
    }
}

/// How many clips to keep and how far apart they must be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    #[serde(default = "default_target_clip_count")]
    pub target_clip_count: usize,
    /// Relative share of the target per zone; normalized before use.
    #[serde(default = "default_zone_shares")]
    pub zone_shares: PerZone,
    #[serde(default = "default_min_clips_per_zone")]
    pub min_clips_per_zone: usize,
    /// No two clips of one zone closer than this, unless the zone minimum
    /// cannot be met otherwise.
    #[serde(default = "default_min_gap_s")]
    pub min_gap_s: f64,
    /// Source window length per zone. Breath clips get half as much again.
    #[serde(default = "default_clip_duration_s")]
    pub clip_duration_s: PerZone,
    #[serde(default = "default_excerpt_window_s")]
    pub excerpt_window_s: f64,
}

fn default_target_clip_count() -> usize {
    12
}

fn default_zone_shares() -> PerZone {
    PerZone {
        beginning: 0.3,
        escalation: 0.4,
        climax: 0.3,
    }
}

fn default_min_clips_per_zone() -> usize {
    1
}

fn default_min_gap_s() -> f64 {
    5.0
}

fn default_clip_duration_s() -> PerZone {
    PerZone {
        beginning: 4.0,
        escalation: 3.0,
        climax: 2.0,
    }
}

fn default_excerpt_window_s() -> f64 {
    5.0
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy {
            target_clip_count: default_target_clip_count(),
            zone_shares: default_zone_shares(),
            min_clips_per_zone: default_min_clips_per_zone(),
            min_gap_s: default_min_gap_s(),
            clip_duration_s: default_clip_duration_s(),
            excerpt_window_s: default_excerpt_window_s(),
        }
    }
}

impl SelectionPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.target_clip_count == 0 {
            return Err(EngineError::InvalidInput("target_clip_count must be at least 1".into()));
        }
        let shares = Zone::ALL.map(|z| self.zone_shares.get(z));
        if shares.iter().any(|s| !s.is_finite() || *s < 0.0) || shares.iter().sum::<f64>() <= 0.0 {
            return Err(EngineError::InvalidInput(
                "zone_shares must be non-negative and not all zero".into(),
            ));
        }
        if !(self.min_gap_s.is_finite() && self.min_gap_s >= 0.0) {
            return Err(EngineError::InvalidInput("min_gap_s must be non-negative".into()));
        }
        let bad_duration = Zone::ALL.iter().any(|z| {
            let d = self.clip_duration_s.get(*z);
            !d.is_finite() || d <= 0.0
        });
        if bad_duration {
            return Err(EngineError::InvalidInput("clip_duration_s must be positive".into()));
        }
        Ok(())
    }

    /// Clips wanted per zone: its share of the target, never below the minimum.
    pub fn quotas(&self) -> [usize; 3] {
        let total: f64 = Zone::ALL.iter().map(|z| self.zone_shares.get(*z)).sum();
        Zone::ALL.map(|z| {
            let share = self.zone_shares.get(z) / total;
            ((self.target_clip_count as f64 * share).round() as usize).max(self.min_clips_per_zone)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PickNote {
    RelaxedSpacing,
    Borrowed(Zone),
}

#[derive(Debug, Clone, Copy)]
struct Pick<'a> {
    scene: &'a ScoredScene,
    zone: Zone,
    note: Option<PickNote>,
}

/// Greedy pass over `candidates` (best first) until `upto` picks, skipping
/// anything closer than `gap` to an earlier pick.
fn fill<'a>(candidates: &[&'a ScoredScene], picks: &mut Vec<Pick<'a>>, upto: usize, gap: f64, note: Option<PickNote>) {
    for &candidate in candidates {
        if picks.len() >= upto {
            break;
        }
        if picks.iter().any(|p| p.scene.id() == candidate.id()) {
            continue;
        }
        let spaced = picks
            .iter()
            .all(|p| (p.scene.timestamp_s() - candidate.timestamp_s()).abs() >= gap);
        if spaced {
            picks.push(Pick {
                scene: candidate,
                zone: candidate.zone,
                note,
            });
        }
    }
}

fn select<'a>(
    scored: &'a [ScoredScene],
    policy: &SelectionPolicy,
    score_epsilon: f64,
    warnings: &mut Vec<String>,
) -> [Vec<Pick<'a>>; 3] {
    let mut ranked: Vec<&ScoredScene> = scored.iter().collect();
    rank_by(&mut ranked, score_epsilon, |s| *s);

    let quotas = policy.quotas();
    let mut picks: [Vec<Pick>; 3] = Default::default();

    for zone in Zone::ALL {
        let quota = quotas[zone.index()];
        let minimum = policy.min_clips_per_zone.min(quota);
        let candidates: Vec<&ScoredScene> = ranked.iter().copied().filter(|s| s.zone == zone).collect();
        let zone_picks = &mut picks[zone.index()];

        fill(&candidates, zone_picks, quota, policy.min_gap_s, None);
        if zone_picks.len() >= minimum {
            continue;
        }
        let before = zone_picks.len();
        for gap in [policy.min_gap_s / 2.0, 0.0] {
            fill(&candidates, zone_picks, minimum, gap, Some(PickNote::RelaxedSpacing));
            if zone_picks.len() >= minimum {
                break;
            }
        }
        if zone_picks.len() > before {
            let msg = format!(
                "{}: relaxed the {:.1}s spacing to reach {} clips",
                zone,
                policy.min_gap_s,
                zone_picks.len()
            );
            warn!("[ASSEMBLY] {}", msg);
            warnings.push(msg);
        }
    }

    // Zones still short borrow the best scenes nobody picked.
    for zone in Zone::ALL {
        let minimum = policy.min_clips_per_zone.min(quotas[zone.index()]);
        while picks[zone.index()].len() < minimum {
            let taken: HashSet<&str> = picks.iter().flatten().map(|p| p.scene.id()).collect();
            let Some(&spare) = ranked.iter().find(|s| !taken.contains(s.id())) else {
                let msg = format!(
                    "{}: only {} of {} required clips available",
                    zone,
                    picks[zone.index()].len(),
                    minimum
                );
                warn!("[ASSEMBLY] {}", msg);
                warnings.push(msg);
                break;
            };
            let msg = format!("{}: borrowed scene {} from {}", zone, spare.id(), spare.zone);
            warn!("[ASSEMBLY] {}", msg);
            warnings.push(msg);
            picks[zone.index()].push(Pick {
                scene: spare,
                zone,
                note: Some(PickNote::Borrowed(spare.zone)),
            });
        }
    }

    for zone_picks in picks.iter_mut() {
        rank_by(zone_picks, score_epsilon, |p| p.scene);
    }
    picks
}

/// Source window around the keyframe, 30% before and 70% after, kept inside
/// the film.
pub fn clip_window(timestamp_s: f64, zone: Zone, beat: BeatType, duration_s: f64, policy: &SelectionPolicy) -> ClipWindow {
    let mut length = policy.clip_duration_s.get(zone);
    if beat == BeatType::Breath {
        length *= 1.5;
    }
    let t = timestamp_s.clamp(0.0, duration_s);
    let mut start = (t - 0.3 * length).max(0.0);
    let end = (t + 0.7 * length).min(duration_s);
    if start >= end {
        start = (end - length).max(0.0);
    }
    ClipWindow { start_s: start, end_s: end }
}

/// Text of the line spoken over `t`, else of the line whose midpoint is nearest
/// within `window_s`.
pub fn dialogue_excerpt(events: &[DialogueEvent], t: f64, window_s: f64) -> String {
    if let Some(covering) = events.iter().find(|e| e.contains(t)) {
        return covering.text.clone();
    }
    events
        .iter()
        .map(|e| (e, (t - (e.start_s + e.end_s) / 2.0).abs()))
        .filter(|(_, dist)| *dist <= window_s)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(e, _)| e.text.clone())
        .unwrap_or_default()
}

fn reasoning(pick: &Pick) -> String {
    let scored = pick.scene;
    let mut out = format!(
        "Beat: {}. Score: {:.2}. Zone: {}.",
        scored.beat, scored.score, pick.zone
    );

    let dominant = dominant_signals(&scored.signals, 2);
    if dominant.is_empty() {
        out.push_str(" No standout signal.");
    } else {
        let named: Vec<String> = dominant
            .iter()
            .map(|(kind, _)| format!("{} ({:.2})", kind.label(), scored.signals.get(*kind)))
            .collect();
        out.push_str(&format!(" Driven by {}.", named.join(" and ")));
    }

    if let Some(desc) = &scored.scene.description {
        let visual: Vec<&str> = [desc.mood.trim(), desc.action.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        if !visual.is_empty() {
            out.push_str(&format!(" Visual: {}.", visual.join(", ")));
        }
    }

    match pick.note {
        Some(PickNote::RelaxedSpacing) => out.push_str(" Picked with relaxed spacing."),
        Some(PickNote::Borrowed(from)) => {
            out.push_str(&format!(" Borrowed from {} to fill the zone.", from))
        }
        None => {}
    }
    out
}

/// Selects, orders and explains the clips, and returns a validated manifest.
///
/// Scores within `score_epsilon` of each other are ranked by vision
/// confidence, then timestamp.
pub fn build_manifest(
    scored: &[ScoredScene],
    anchors: StructuralAnchors,
    duration_s: f64,
    dialogue: &[DialogueEvent],
    policy: &SelectionPolicy,
    score_epsilon: f64,
) -> Result<TrailerManifest> {
    if !(duration_s.is_finite() && duration_s > 0.0) {
        return Err(EngineError::InvalidDuration(duration_s));
    }
    if scored.is_empty() {
        return Err(EngineError::EmptyPool);
    }
    policy.validate()?;
    if !(score_epsilon.is_finite() && score_epsilon >= 0.0) {
        return Err(EngineError::InvalidInput(format!(
            "score_epsilon must be non-negative, got {}",
            score_epsilon
        )));
    }

    let mut warnings = Vec::new();
    let picks = select(scored, policy, score_epsilon, &mut warnings);

    let clips: Vec<ClipEntry> = picks
        .iter()
        .flatten()
        .map(|pick| {
            let scene = &pick.scene.scene;
            ClipEntry {
                scene_id: scene.id.clone(),
                timestamp_s: scene.timestamp_s,
                zone: pick.zone,
                beat: pick.scene.beat,
                score: pick.scene.score,
                reasoning: reasoning(pick),
                signals: pick.scene.signals,
                window: Some(clip_window(
                    scene.timestamp_s,
                    pick.zone,
                    pick.scene.beat,
                    duration_s,
                    policy,
                )),
                dialogue_excerpt: dialogue_excerpt(dialogue, scene.timestamp_s, policy.excerpt_window_s),
            }
        })
        .collect();

    let mut manifest = TrailerManifest::new(duration_s, anchors, clips);
    manifest.score_epsilon = score_epsilon;
    manifest.warnings = warnings;
    manifest.validate()?;

    info!(
        "[ASSEMBLY] manifest {} with {} clips ({} / {} / {}), {} warnings",
        manifest.manifest_id,
        manifest.clips.len(),
        picks[0].len(),
        picks[1].len(),
        picks[2].len(),
        manifest.warnings.len()
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{SceneCandidate, VisualDescription};
    use crate::config::DEFAULT_SCORE_EPSILON as EPS;
    use crate::signals::SignalVector;

    fn scored(id: &str, t: f64, zone: Zone, score: f64) -> ScoredScene {
        ScoredScene {
            scene: SceneCandidate::new(id, t, 2.0),
            zone,
            signals: SignalVector {
                motion_magnitude: score,
                ..Default::default()
            },
            score,
            beat: BeatType::EscalationBeat,
        }
    }

    fn policy(target: usize, gap: f64) -> SelectionPolicy {
        SelectionPolicy {
            target_clip_count: target,
            min_gap_s: gap,
            ..Default::default()
        }
    }

    fn ids(m: &TrailerManifest) -> Vec<&str> {
        m.clips.iter().map(|c| c.scene_id.as_str()).collect()
    }

    #[test]
    fn test_quotas() {
        assert_eq!(policy(10, 5.0).quotas(), [3, 4, 3]);
        assert_eq!(policy(1, 5.0).quotas(), [1, 1, 1]);
    }

    #[test]
    fn test_order_and_spacing() {
        let pool = vec![
            scored("b1", 10.0, Zone::Beginning, 0.4),
            scored("b2", 12.0, Zone::Beginning, 0.9),
            scored("b3", 30.0, Zone::Beginning, 0.5),
            scored("e1", 50.0, Zone::Escalation, 0.6),
            scored("e2", 60.0, Zone::Escalation, 0.7),
            scored("c1", 90.0, Zone::Climax, 0.8),
        ];
        let m = build_manifest(&pool, StructuralAnchors::heuristic(100.0), 100.0, &[], &policy(9, 5.0), EPS).unwrap();
        // b1 sits 2s from the better b2
        assert_eq!(ids(&m), vec!["b2", "b3", "e2", "e1", "c1"]);
        assert!(m.warnings.is_empty());
        assert!(m.clips.iter().all(|c| c.reasoning.starts_with("Beat: ")));
    }

    #[test]
    fn test_relaxes_spacing_before_shrinking_zone() {
        let pool = vec![
            scored("b1", 10.0, Zone::Beginning, 0.9),
            scored("b2", 11.0, Zone::Beginning, 0.8),
            scored("e1", 50.0, Zone::Escalation, 0.5),
            scored("c1", 90.0, Zone::Climax, 0.5),
        ];
        let p = SelectionPolicy {
            min_clips_per_zone: 2,
            ..policy(6, 5.0)
        };
        let m = build_manifest(&pool, StructuralAnchors::heuristic(100.0), 100.0, &[], &p, EPS).unwrap();
        let beginning: Vec<&str> = m.clips_in(Zone::Beginning).map(|c| c.scene_id.as_str()).collect();
        assert_eq!(beginning, vec!["b1", "b2"]);
        assert!(m.clips[1].reasoning.contains("relaxed spacing"));
        assert!(m.warnings.iter().any(|w| w.contains("relaxed")));
    }

    #[test]
    fn test_empty_zone_borrows_best_spare_scene() {
        let pool = vec![
            scored("b1", 10.0, Zone::Beginning, 0.9),
            scored("b2", 30.0, Zone::Beginning, 0.8),
            scored("b3", 40.0, Zone::Beginning, 0.3),
            scored("e1", 50.0, Zone::Escalation, 0.5),
        ];
        let m = build_manifest(&pool, StructuralAnchors::heuristic(100.0), 100.0, &[], &policy(3, 5.0), EPS).unwrap();
        let climax: Vec<&ClipEntry> = m.clips_in(Zone::Climax).collect();
        assert_eq!(climax.len(), 1);
        assert_eq!(climax[0].scene_id, "b2");
        assert!(climax[0].reasoning.contains("Borrowed from BEGINNING"));
        assert!(m.is_degraded());
        m.validate().unwrap();
    }

    #[test]
    fn test_windows_and_excerpts() {
        let p = SelectionPolicy::default();
        let w = clip_window(50.0, Zone::Escalation, BeatType::EscalationBeat, 100.0, &p);
        assert!((w.start_s - 49.1).abs() < 1e-9);
        assert!((w.end_s - 52.1).abs() < 1e-9);

        let breath = clip_window(50.0, Zone::Escalation, BeatType::Breath, 100.0, &p);
        assert!((breath.duration_s() - 4.5).abs() < 1e-9);

        let at_end = clip_window(100.0, Zone::Climax, BeatType::ClimaxPeak, 100.0, &p);
        assert_eq!(at_end.end_s, 100.0);
        assert!(at_end.start_s < at_end.end_s);

        let events = vec![
            DialogueEvent::new(0.0, 2.0, "first"),
            DialogueEvent::new(10.0, 12.0, "second"),
        ];
        assert_eq!(dialogue_excerpt(&events, 1.0, 5.0), "first");
        assert_eq!(dialogue_excerpt(&events, 8.0, 5.0), "second");
        assert_eq!(dialogue_excerpt(&events, 40.0, 5.0), "");
    }

    #[test]
    fn test_reasoning_mentions_dominant_signals() {
        let mut s = scored("a", 10.0, Zone::Beginning, 0.9);
        s.signals.face_presence = 1.0;
        s.scene.description = Some(VisualDescription {
            mood: "ominous".to_string(),
            ..Default::default()
        });
        let text = reasoning(&Pick {
            scene: &s,
            zone: Zone::Beginning,
            note: None,
        });
        assert_eq!(
            text,
            "Beat: escalation_beat. Score: 0.90. Zone: BEGINNING. Driven by motion (0.90) and face presence (1.00). Visual: ominous."
        );
    }

    #[test]
    fn test_rejects_bad_policy() {
        let pool = vec![scored("a", 10.0, Zone::Beginning, 0.5)];
        let bad = SelectionPolicy {
            target_clip_count: 0,
            ..Default::default()
        };
        let err = build_manifest(&pool, StructuralAnchors::heuristic(100.0), 100.0, &[], &bad, EPS);
        assert!(matches!(err, Err(EngineError::InvalidInput(_))));

        let err = build_manifest(&pool, StructuralAnchors::heuristic(100.0), 100.0, &[], &policy(3, 5.0), -1.0);
        assert!(matches!(err, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_score_epsilon_decides_near_ties() {
        let mut sharp = scored("sharp", 50.0, Zone::Escalation, 0.51);
        sharp.signals.vision_confidence = 0.1;
        let mut clear = scored("clear", 52.0, Zone::Escalation, 0.50);
        clear.signals.vision_confidence = 0.9;
        let pool = vec![
            scored("b1", 10.0, Zone::Beginning, 0.5),
            sharp,
            clear,
            scored("c1", 90.0, Zone::Climax, 0.5),
        ];
        let escalation = |eps: f64| {
            let m = build_manifest(&pool, StructuralAnchors::heuristic(100.0), 100.0, &[], &policy(3, 5.0), eps).unwrap();
            assert_eq!(m.score_epsilon, eps);
            m.validate().unwrap();
            m.clips_in(Zone::Escalation).map(|c| c.scene_id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(escalation(EPS), vec!["sharp"]);
        assert_eq!(escalation(0.05), vec!["clear"]);
    }
}
