use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

pub const HEURISTIC_BEGIN_RATIO: f64 = 0.05;
pub const HEURISTIC_ESCALATION_RATIO: f64 = 0.45;
pub const HEURISTIC_CLIMAX_RATIO: f64 = 0.80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorSource {
    /// Median of per-chunk model answers.
    #[serde(alias = "llm")]
    Model,
    /// Proportional 5% / 45% / 80% split of the film.
    Heuristic,
}

/// The three narrative anchors of a film.
///
/// Invariant once built: `0 <= begin_t < escalation_t < climax_t <= duration`.
/// This one type is used in memory, in checkpoints and in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructuralAnchors {
    pub begin_t: f64,
    pub escalation_t: f64,
    pub climax_t: f64,
    pub source: AnchorSource,
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl StructuralAnchors {
    /// Rounded to centiseconds unless rounding would collapse or overshoot
    /// the anchors, as it does for films shorter than a few hundredths of a
    /// second.
    pub fn heuristic(duration_s: f64) -> Self {
        let exact = StructuralAnchors {
            begin_t: duration_s * HEURISTIC_BEGIN_RATIO,
            escalation_t: duration_s * HEURISTIC_ESCALATION_RATIO,
            climax_t: duration_s * HEURISTIC_CLIMAX_RATIO,
            source: AnchorSource::Heuristic,
        };
        let rounded = StructuralAnchors {
            begin_t: round2(exact.begin_t),
            escalation_t: round2(exact.escalation_t),
            climax_t: round2(exact.climax_t),
            ..exact
        };
        let anchors = if rounded.is_valid(duration_s) { rounded } else { exact };
        debug_assert!(
            !(duration_s.is_finite() && duration_s > 0.0) || anchors.is_valid(duration_s),
            "heuristic anchors invalid for {}s",
            duration_s
        );
        anchors
    }

    pub fn is_heuristic(&self) -> bool {
        self.source == AnchorSource::Heuristic
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.begin_t, self.escalation_t, self.climax_t]
    }

    /// Checks ordering and bounds against the film duration.
    pub fn validate(&self, duration_s: f64) -> Result<(), ManifestError> {
        let named = [
            ("begin_t", self.begin_t),
            ("escalation_t", self.escalation_t),
            ("climax_t", self.climax_t),
        ];
        for (name, value) in named {
            if !value.is_finite() || value < 0.0 {
                return Err(ManifestError::validation(
                    format!("structural_anchors.{}", name),
                    format!("must be a finite non-negative number, got {}", value),
                ));
            }
            if value > duration_s {
                return Err(ManifestError::validation(
                    format!("structural_anchors.{}", name),
                    format!("{} exceeds film duration {}", value, duration_s),
                ));
            }
        }
        if self.begin_t >= self.escalation_t {
            return Err(ManifestError::validation(
                "structural_anchors.escalation_t",
                format!(
                    "must be after begin_t ({} >= {})",
                    self.begin_t, self.escalation_t
                ),
            ));
        }
        if self.escalation_t >= self.climax_t {
            return Err(ManifestError::validation(
                "structural_anchors.climax_t",
                format!(
                    "must be after escalation_t ({} >= {})",
                    self.escalation_t, self.climax_t
                ),
            ));
        }
        Ok(())
    }

    pub fn is_valid(&self, duration_s: f64) -> bool {
        self.validate(duration_s).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_triple() {
        let anchors = StructuralAnchors::heuristic(100.0);
        assert_eq!(anchors.as_array(), [5.0, 45.0, 80.0]);
        assert!(anchors.is_heuristic());
        assert!(anchors.is_valid(100.0));
    }

    #[test]
    fn test_heuristic_valid_for_short_films() {
        for duration in [0.0001, 0.0065, 0.01, 0.03, 1.0, 7.77, 100.0, 7200.0] {
            let anchors = StructuralAnchors::heuristic(duration);
            assert!(anchors.is_valid(duration), "{}: {:?}", duration, anchors);
        }
        // too short to round without collapsing
        let tiny = StructuralAnchors::heuristic(0.01);
        assert!(tiny.begin_t < tiny.escalation_t && tiny.escalation_t < tiny.climax_t);
        assert_eq!(StructuralAnchors::heuristic(7200.0).as_array(), [360.0, 3240.0, 5760.0]);
    }

    #[test]
    fn test_validate_reports_field() {
        let anchors = StructuralAnchors {
            begin_t: 10.0,
            escalation_t: 5.0,
            climax_t: 50.0,
            source: AnchorSource::Model,
        };
        let err = anchors.validate(100.0).unwrap_err();
        assert_eq!(err.field(), Some("structural_anchors.escalation_t"));

        let past_end = StructuralAnchors {
            climax_t: 120.0,
            ..StructuralAnchors::heuristic(100.0)
        };
        assert_eq!(
            past_end.validate(100.0).unwrap_err().field(),
            Some("structural_anchors.climax_t")
        );
    }

    #[test]
    fn test_source_accepts_legacy_tag() {
        let json = r#"{"begin_t":1.0,"escalation_t":2.0,"climax_t":3.0,"source":"llm"}"#;
        let anchors: StructuralAnchors = serde_json::from_str(json).unwrap();
        assert_eq!(anchors.source, AnchorSource::Model);
        assert_eq!(
            serde_json::to_value(anchors).unwrap()["source"],
            serde_json::json!("model")
        );
    }
}
