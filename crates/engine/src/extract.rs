//! Structural anchor extraction from the dialogue corpus.
//!
//! The corpus is cut into fixed-size chunks, each chunk is sent to the text
//! engine on its own, hallucinated answers are discarded and the survivors are
//! combined with a per-anchor median. Any failure degrades to the heuristic
//! 5% / 45% / 80% anchors; model trouble never fails the run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::anchors::{round2, AnchorSource, StructuralAnchors};
use crate::config::EngineConfig;
use crate::dialogue::DialogueEvent;
use crate::error::{EngineError, InferenceError, Result};
use crate::gate::InferenceGate;

/// One chunk's worth of work for the text engine.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRequest {
    pub index: usize,
    pub span_start_s: f64,
    pub span_end_s: f64,
    pub transcript: String,
    pub schema: serde_json::Value,
}

/// Anchors proposed by the model for a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkAnchors {
    pub begin_t: f64,
    pub escalation_t: f64,
    pub climax_t: f64,
}

impl ChunkAnchors {
    fn values(&self) -> [f64; 3] {
        [self.begin_t, self.escalation_t, self.climax_t]
    }
}

/// External text-generation service.
///
/// Implementations must return `Malformed` for anything that is not a
/// schema-conformant object; the extractor adds the timeout.
#[async_trait]
pub trait TextEngine: Send + Sync {
    async fn locate_anchors(&self, request: &ChunkRequest) -> std::result::Result<ChunkAnchors, InferenceError>;
}

/// Outcome of an extraction, including what was thrown away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorReport {
    pub anchors: StructuralAnchors,
    pub chunks_total: usize,
    pub chunks_accepted: usize,
    pub chunks_discarded: usize,
    pub chunks_failed: usize,
    pub warnings: Vec<String>,
}

/// JSON schema handed to the engine for constrained generation.
pub fn anchors_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "begin_t": {"type": "number", "description": "timestamp in seconds where the narrative begins"},
            "escalation_t": {"type": "number", "description": "timestamp in seconds where tension escalates"},
            "climax_t": {"type": "number", "description": "timestamp in seconds of the climax"},
        },
        "required": ["begin_t", "escalation_t", "climax_t"],
        "additionalProperties": false,
    })
}

/// Transcript lines keep absolute timestamps so answers are comparable
/// across chunks.
pub fn format_chunk(chunk: &[DialogueEvent]) -> String {
    chunk
        .iter()
        .map(|e| format!("[{:.1}s] {}", e.start_s, e.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn chunk_span(chunk: &[DialogueEvent]) -> (f64, f64) {
    let start = chunk.iter().map(|e| e.start_s).fold(f64::INFINITY, f64::min);
    let end = chunk.iter().map(|e| e.end_s).fold(f64::NEG_INFINITY, f64::max);
    (start, end)
}

/// Keeps a chunk answer only if every anchor lies within `tolerance_s` of the
/// chunk span.
pub fn accept_chunk_answer(
    answer: ChunkAnchors,
    span_start_s: f64,
    span_end_s: f64,
    tolerance_s: f64,
) -> Option<ChunkAnchors> {
    let low = span_start_s - tolerance_s;
    let high = span_end_s + tolerance_s;
    answer
        .values()
        .iter()
        .all(|v| v.is_finite() && *v >= low && *v <= high)
        .then_some(answer)
}

/// Median of a non-empty series; mean of the middle pair for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn aggregate(accepted: &[ChunkAnchors]) -> Option<StructuralAnchors> {
    let series = |f: fn(&ChunkAnchors) -> f64| accepted.iter().map(f).collect::<Vec<_>>();
    Some(StructuralAnchors {
        begin_t: round2(median(&series(|a| a.begin_t))?),
        escalation_t: round2(median(&series(|a| a.escalation_t))?),
        climax_t: round2(median(&series(|a| a.climax_t))?),
        source: AnchorSource::Model,
    })
}

pub async fn extract_anchors(
    events: &[DialogueEvent],
    duration_s: f64,
    engine: Option<&dyn TextEngine>,
    gate: &InferenceGate,
    config: &EngineConfig,
) -> Result<StructuralAnchors> {
    extract_anchors_with_report(events, duration_s, engine, gate, config)
        .await
        .map(|report| report.anchors)
}

pub async fn extract_anchors_with_report(
    events: &[DialogueEvent],
    duration_s: f64,
    engine: Option<&dyn TextEngine>,
    gate: &InferenceGate,
    config: &EngineConfig,
) -> Result<AnchorReport> {
    if !duration_s.is_finite() || duration_s <= 0.0 {
        return Err(EngineError::InvalidDuration(duration_s));
    }

    let chunk_size = config.chunk_size.max(1);
    let chunks: Vec<&[DialogueEvent]> = events.chunks(chunk_size).collect();
    let mut report = AnchorReport {
        anchors: StructuralAnchors::heuristic(duration_s),
        chunks_total: chunks.len(),
        chunks_accepted: 0,
        chunks_discarded: 0,
        chunks_failed: 0,
        warnings: Vec::new(),
    };

    let Some(engine) = engine else {
        let msg = "no text engine available; using heuristic anchors".to_string();
        warn!("[ANCHORS] {}", msg);
        report.warnings.push(msg);
        return Ok(report);
    };

    let schema = anchors_schema();
    let timeout = config.chunk_timeout();
    let mut accepted = Vec::new();

    // One chunk at a time; the engine is a single device-bound instance.
    for (index, chunk) in chunks.iter().enumerate() {
        let (span_start_s, span_end_s) = chunk_span(chunk);
        let request = ChunkRequest {
            index,
            span_start_s,
            span_end_s,
            transcript: format_chunk(chunk),
            schema: schema.clone(),
        };

        let outcome = match gate.acquire().await {
            Ok(_permit) => match tokio::time::timeout(timeout, engine.locate_anchors(&request)).await {
                Ok(result) => result,
                Err(_) => Err(InferenceError::Timeout(timeout.as_secs_f64())),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(answer) => match accept_chunk_answer(
                answer,
                span_start_s,
                span_end_s,
                config.hallucination_tolerance_s,
            ) {
                Some(kept) => {
                    debug!("[ANCHORS] chunk {} accepted: {:?}", index, kept);
                    accepted.push(kept);
                }
                None => {
                    warn!(
                        "[ANCHORS] chunk {} discarded: {:?} outside span {:.1}-{:.1}s",
                        index, answer, span_start_s, span_end_s
                    );
                    report.chunks_discarded += 1;
                }
            },
            Err(e) => {
                warn!("[ANCHORS] chunk {} failed: {}", index, e);
                report.chunks_failed += 1;
            }
        }
    }
    report.chunks_accepted = accepted.len();

    match aggregate(&accepted) {
        None => {
            let msg = format!(
                "all {} dialogue chunks failed or were discarded; using heuristic anchors",
                report.chunks_total
            );
            warn!("[ANCHORS] {}", msg);
            report.warnings.push(msg);
        }
        Some(anchors) => match anchors.validate(duration_s) {
            Ok(()) => {
                info!(
                    "[ANCHORS] model anchors from {}/{} chunks: {:?}",
                    report.chunks_accepted, report.chunks_total, anchors.as_array()
                );
                report.anchors = anchors;
            }
            Err(e) => {
                let msg = format!("aggregated model anchors rejected ({}); using heuristic anchors", e);
                warn!("[ANCHORS] {}", msg);
                report.warnings.push(msg);
            }
        },
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers per chunk index; missing indices fail.
    struct ScriptedEngine {
        answers: HashMap<usize, ChunkAnchors>,
        calls: Mutex<Vec<usize>>,
    }

    impl ScriptedEngine {
        fn new(answers: Vec<(usize, ChunkAnchors)>) -> Self {
            ScriptedEngine {
                answers: answers.into_iter().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextEngine for ScriptedEngine {
        async fn locate_anchors(
            &self,
            request: &ChunkRequest,
        ) -> std::result::Result<ChunkAnchors, InferenceError> {
            self.calls.lock().unwrap().push(request.index);
            self.answers
                .get(&request.index)
                .copied()
                .ok_or_else(|| InferenceError::Malformed("no answer".to_string()))
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl TextEngine for FailingEngine {
        async fn locate_anchors(
            &self,
            _request: &ChunkRequest,
        ) -> std::result::Result<ChunkAnchors, InferenceError> {
            Err(InferenceError::Unavailable("server crashed".to_string()))
        }
    }

    struct SlowEngine;

    #[async_trait]
    impl TextEngine for SlowEngine {
        async fn locate_anchors(
            &self,
            _request: &ChunkRequest,
        ) -> std::result::Result<ChunkAnchors, InferenceError> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(ChunkAnchors {
                begin_t: 1.0,
                escalation_t: 2.0,
                climax_t: 3.0,
            })
        }
    }

    /// One-second lines every ten seconds.
    fn corpus(n: usize) -> Vec<DialogueEvent> {
        (0..n)
            .map(|i| DialogueEvent::new(i as f64 * 10.0, i as f64 * 10.0 + 1.0, format!("line {}", i)))
            .collect()
    }

    fn small_chunks() -> EngineConfig {
        EngineConfig {
            chunk_size: 5,
            ..Default::default()
        }
    }

    fn anchors(b: f64, e: f64, c: f64) -> ChunkAnchors {
        ChunkAnchors {
            begin_t: b,
            escalation_t: e,
            climax_t: c,
        }
    }

    #[test]
    fn test_format_chunk_uses_absolute_time() {
        let events = vec![DialogueEvent::new(125.3, 127.0, "Hello there")];
        assert_eq!(format_chunk(&events), "[125.3s] Hello there");
    }

    #[test]
    fn test_accept_chunk_answer_tolerance() {
        assert!(accept_chunk_answer(anchors(95.0, 120.0, 150.0), 100.0, 150.0, 10.0).is_some());
        assert!(accept_chunk_answer(anchors(89.0, 120.0, 150.0), 100.0, 150.0, 10.0).is_none());
        assert!(accept_chunk_answer(anchors(100.0, 120.0, 160.5), 100.0, 150.0, 10.0).is_none());
        assert!(accept_chunk_answer(anchors(f64::NAN, 120.0, 140.0), 100.0, 150.0, 10.0).is_none());
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[tokio::test]
    async fn test_absent_engine_gives_heuristic() {
        let anchors = extract_anchors(&corpus(3), 100.0, None, &InferenceGate::exclusive(), &EngineConfig::default())
            .await
            .unwrap();
        assert_eq!(anchors, StructuralAnchors::heuristic(100.0));
        assert_eq!(anchors.as_array(), [5.0, 45.0, 80.0]);
    }

    #[tokio::test]
    async fn test_failing_engine_gives_heuristic() {
        let report = extract_anchors_with_report(
            &corpus(12),
            200.0,
            Some(&FailingEngine),
            &InferenceGate::exclusive(),
            &small_chunks(),
        )
        .await
        .unwrap();
        assert_eq!(report.anchors.as_array(), [10.0, 90.0, 160.0]);
        assert_eq!(report.anchors.source, AnchorSource::Heuristic);
        assert_eq!(report.chunks_total, 3);
        assert_eq!(report.chunks_failed, 3);
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_outlier_chunk_does_not_move_median() {
        // Chunk spans: 0-41, 50-91, 100-141, 150-191
        let engine = ScriptedEngine::new(vec![
            (0, anchors(2.0, 20.0, 40.0)),
            (1, anchors(52.0, 70.0, 90.0)),
            (2, anchors(900.0, 950.0, 990.0)),
            (3, anchors(152.0, 170.0, 190.0)),
        ]);
        let report = extract_anchors_with_report(
            &corpus(20),
            1000.0,
            Some(&engine),
            &InferenceGate::exclusive(),
            &small_chunks(),
        )
        .await
        .unwrap();

        assert_eq!(report.chunks_discarded, 1);
        assert_eq!(report.chunks_accepted, 3);
        assert_eq!(report.anchors.source, AnchorSource::Model);
        assert_eq!(report.anchors.as_array(), [52.0, 70.0, 90.0]);
        for value in report.anchors.as_array() {
            assert!((2.0..=190.0).contains(&value));
        }
        assert_eq!(*engine.calls.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_disordered_median_falls_back() {
        let engine = ScriptedEngine::new(vec![(0, anchors(30.0, 20.0, 10.0))]);
        let report = extract_anchors_with_report(
            &corpus(5),
            100.0,
            Some(&engine),
            &InferenceGate::exclusive(),
            &small_chunks(),
        )
        .await
        .unwrap();
        assert!(report.anchors.is_heuristic());
        assert_eq!(report.chunks_accepted, 1);
        assert!(report.warnings[0].contains("rejected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let config = EngineConfig {
            chunk_size: 5,
            chunk_timeout_secs: 1,
            ..Default::default()
        };
        let report = extract_anchors_with_report(
            &corpus(5),
            100.0,
            Some(&SlowEngine),
            &InferenceGate::exclusive(),
            &config,
        )
        .await
        .unwrap();
        assert_eq!(report.chunks_failed, 1);
        assert!(report.anchors.is_heuristic());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_gate_held_by_another_stage() {
        let gate = InferenceGate::exclusive();
        let vision_stage = gate.clone();
        let permit = vision_stage.acquire().await.unwrap();

        let engine = std::sync::Arc::new(ScriptedEngine::new(vec![(0, anchors(2.0, 20.0, 40.0))]));
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move {
                let config = small_chunks();
                extract_anchors(&corpus(5), 100.0, Some(&*engine), &gate, &config).await
            })
        };

        tokio::time::sleep(std::time::Duration::from_secs(120)).await;
        assert!(engine.calls.lock().unwrap().is_empty());
        assert!(!task.is_finished());

        drop(permit);
        let anchors = task.await.unwrap().unwrap();
        assert_eq!(anchors.source, AnchorSource::Model);
        assert_eq!(*engine.calls.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_invalid_duration_is_rejected() {
        let result = extract_anchors(&corpus(3), 0.0, None, &InferenceGate::exclusive(), &EngineConfig::default()).await;
        assert!(matches!(result, Err(EngineError::InvalidDuration(_))));
    }
}
