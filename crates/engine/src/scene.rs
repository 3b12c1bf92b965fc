use serde::{Deserialize, Serialize};

/// Vision-model description of a keyframe. Any field may be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualDescription {
    #[serde(default)]
    pub visual_content: String,
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub setting: String,
    /// Confidence reported by the vision model, when it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl VisualDescription {
    fn fields(&self) -> [&str; 4] {
        [&self.visual_content, &self.mood, &self.action, &self.setting]
    }

    /// Reported confidence, or 0.5 * field completeness + 0.5 * text richness.
    pub fn confidence(&self) -> f64 {
        if let Some(c) = self.confidence {
            return if c.is_finite() { c.clamp(0.0, 1.0) } else { 0.0 };
        }
        let fields = self.fields();
        let filled = fields.iter().filter(|f| !f.trim().is_empty()).count() as f64;
        let chars: usize = fields.iter().map(|f| f.chars().count()).sum();
        0.5 * (filled / 4.0) + 0.5 * (chars as f64 / 200.0).min(1.0)
    }

    /// Text sent to the embedding service.
    pub fn embedding_text(&self) -> String {
        self.fields()
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect::<Vec<_>>()
            .join(". ")
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|f| f.trim().is_empty())
    }
}

/// Low-level visual statistics measured on the keyframe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneStats {
    #[serde(default)]
    pub motion: f64,
    #[serde(default)]
    pub contrast: f64,
    #[serde(default)]
    pub saturation: f64,
}

/// A detected keyframe/segment. Timing is fixed at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneCandidate {
    pub id: String,
    pub timestamp_s: f64,
    pub duration_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<VisualDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_face: Option<bool>,
    #[serde(default)]
    pub stats: SceneStats,
    /// Dissimilarity to neighbouring scenes, already in [0,1].
    #[serde(default = "default_uniqueness")]
    pub uniqueness: f64,
}

fn default_uniqueness() -> f64 {
    0.5
}

impl SceneCandidate {
    pub fn new(id: impl Into<String>, timestamp_s: f64, duration_s: f64) -> Self {
        SceneCandidate {
            id: id.into(),
            timestamp_s,
            duration_s,
            description: None,
            has_face: None,
            stats: SceneStats::default(),
            uniqueness: default_uniqueness(),
        }
    }

    pub fn midpoint_s(&self) -> f64 {
        self.timestamp_s + self.duration_s.max(0.0) / 2.0
    }

    pub fn vision_confidence(&self) -> f64 {
        self.description.as_ref().map(|d| d.confidence()).unwrap_or(0.0)
    }

    pub fn embedding_text(&self) -> Option<String> {
        self.description
            .as_ref()
            .filter(|d| !d.is_empty())
            .map(|d| d.embedding_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_confidence() {
        assert_eq!(VisualDescription::default().confidence(), 0.0);

        let desc = VisualDescription {
            visual_content: "a".repeat(100),
            mood: "tense".to_string(),
            action: String::new(),
            setting: "a".repeat(100),
            confidence: None,
        };
        // 3 of 4 fields, 205 chars
        assert!((desc.confidence() - (0.5 * 0.75 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_reported_confidence_is_clamped() {
        let desc = VisualDescription {
            confidence: Some(1.7),
            ..Default::default()
        };
        assert_eq!(desc.confidence(), 1.0);
    }

    #[test]
    fn test_embedding_text_skips_blank_fields() {
        let mut scene = SceneCandidate::new("s1", 10.0, 2.0);
        assert!(scene.embedding_text().is_none());

        scene.description = Some(VisualDescription {
            mood: "calm".to_string(),
            setting: " village ".to_string(),
            ..Default::default()
        });
        assert_eq!(scene.embedding_text().as_deref(), Some("calm. village"));
        assert_eq!(scene.midpoint_s(), 11.0);
    }
}
