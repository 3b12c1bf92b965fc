use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dialogue events per inference chunk (~1500 tokens of formatted transcript).
pub const CHUNK_SIZE: usize = 75;

/// Seconds a model-returned anchor may fall outside its chunk span before the
/// chunk is discarded as a hallucination.
pub const HALLUCINATION_TOLERANCE_S: f64 = 10.0;

pub const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_SCORE_EPSILON: f64 = 1e-3;

/// Tunables for the anchor extractor, zone assigner and scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_tolerance")]
    pub hallucination_tolerance_s: f64,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    /// Archetype similarities closer than this are decided by timestamp proximity.
    #[serde(default = "default_zone_epsilon")]
    pub zone_epsilon: f64,
    /// Weight of semantic similarity in the zone decision; position gets the rest.
    #[serde(default = "default_semantic_weight")]
    pub zone_semantic_weight: f64,
    /// Scores closer than this are ordered by confidence, then timestamp.
    #[serde(default = "default_score_epsilon")]
    pub score_epsilon: f64,
    /// Dialogue further than this from a scene does not count toward it.
    #[serde(default = "default_dialogue_window")]
    pub dialogue_window_s: f64,
}

fn default_chunk_size() -> usize {
    CHUNK_SIZE
}

fn default_tolerance() -> f64 {
    HALLUCINATION_TOLERANCE_S
}

fn default_chunk_timeout_secs() -> u64 {
    DEFAULT_CHUNK_TIMEOUT_SECS
}

fn default_zone_epsilon() -> f64 {
    0.02
}

fn default_semantic_weight() -> f64 {
    0.6
}

fn default_score_epsilon() -> f64 {
    DEFAULT_SCORE_EPSILON
}

fn default_dialogue_window() -> f64 {
    5.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            chunk_size: default_chunk_size(),
            hallucination_tolerance_s: default_tolerance(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            zone_epsilon: default_zone_epsilon(),
            zone_semantic_weight: default_semantic_weight(),
            score_epsilon: default_score_epsilon(),
            dialogue_window_s: default_dialogue_window(),
        }
    }
}

impl EngineConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }
}
