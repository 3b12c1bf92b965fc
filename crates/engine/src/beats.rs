use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dialogue::Emotion;
use crate::zones::Zone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatType {
    IncitingIncident,
    CharacterIntroduction,
    EscalationBeat,
    RelationshipBeat,
    MoneyShot,
    ClimaxPeak,
    /// Low-signal scene kept to pace the edit.
    Breath,
}

impl BeatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BeatType::IncitingIncident => "inciting_incident",
            BeatType::CharacterIntroduction => "character_introduction",
            BeatType::EscalationBeat => "escalation_beat",
            BeatType::RelationshipBeat => "relationship_beat",
            BeatType::MoneyShot => "money_shot",
            BeatType::ClimaxPeak => "climax_peak",
            BeatType::Breath => "breath",
        }
    }
}

impl std::fmt::Display for BeatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a beat rule may look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatContext {
    pub zone: Zone,
    /// 0.0 at the start of the scene's zone, 1.0 at its end.
    pub position_in_zone: f64,
    /// Emotion of nearby dialogue; `None` when nothing is said.
    pub emotion: Option<Emotion>,
    pub has_face: bool,
    pub score: f64,
    /// Larger of normalized motion and contrast.
    pub visual_peak: f64,
    /// Share of the pool scoring below this scene.
    pub rank_percentile: f64,
}

impl BeatContext {
    fn is_quiet(&self) -> bool {
        matches!(self.emotion, None | Some(Emotion::Neutral))
    }

    fn is_intense(&self) -> bool {
        self.emotion == Some(Emotion::Intense)
    }
}

pub struct BeatRule {
    pub name: &'static str,
    pub beat: BeatType,
    pub applies: fn(&BeatContext) -> bool,
}

/// Evaluated top to bottom; the first match wins. The last rule always matches.
pub const BEAT_RULES: &[BeatRule] = &[
    BeatRule {
        name: "low signal, nothing said",
        beat: BeatType::Breath,
        applies: |c| c.score < 0.2 && c.is_quiet(),
    },
    BeatRule {
        name: "strong scene in the climax",
        beat: BeatType::ClimaxPeak,
        applies: |c| c.zone == Zone::Climax && c.score > 0.7,
    },
    BeatRule {
        name: "top scene overall",
        beat: BeatType::MoneyShot,
        applies: |c| c.score > 0.8 || (c.rank_percentile >= 0.9 && c.visual_peak >= 0.9),
    },
    BeatRule {
        name: "face early in the setup",
        beat: BeatType::CharacterIntroduction,
        applies: |c| {
            c.zone == Zone::Beginning && c.position_in_zone < 0.5 && c.has_face && !c.is_intense()
        },
    },
    BeatRule {
        name: "intense moment in the setup",
        beat: BeatType::IncitingIncident,
        applies: |c| c.zone == Zone::Beginning && (c.is_intense() || c.visual_peak >= 0.8),
    },
    BeatRule {
        name: "romantic exchange on screen",
        beat: BeatType::RelationshipBeat,
        applies: |c| c.has_face && c.emotion == Some(Emotion::Romantic),
    },
    BeatRule {
        name: "everything else",
        beat: BeatType::EscalationBeat,
        applies: |_| true,
    },
];

pub const DEFAULT_BEAT: BeatType = BeatType::EscalationBeat;

/// Exactly one beat per scene.
pub fn classify_beat(ctx: &BeatContext) -> BeatType {
    if !ctx.score.is_finite() {
        warn!("[SCORING] non-finite score, defaulting beat to {}", DEFAULT_BEAT);
        return DEFAULT_BEAT;
    }
    BEAT_RULES
        .iter()
        .find(|rule| (rule.applies)(ctx))
        .map(|rule| rule.beat)
        .unwrap_or(DEFAULT_BEAT)
}
