//! The trailer manifest: the only artifact handed to the renderer.
//!
//! A manifest is validated before it leaves the assembler and again whenever it
//! is loaded from disk. Manifests written before schema 2.0 have no warnings,
//! dialogue excerpts, clip windows or anchors; those load with defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::anchors::StructuralAnchors;
use crate::beats::BeatType;
use crate::config::DEFAULT_SCORE_EPSILON;
use crate::error::ManifestError;
use crate::signals::{SignalKind, SignalVector};
use crate::zones::Zone;

pub const SCHEMA_VERSION: &str = "2.0";
pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["1.0", "2.0"];

/// Source-time window cut around a clip's keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipWindow {
    pub start_s: f64,
    pub end_s: f64,
}

impl ClipWindow {
    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipEntry {
    pub scene_id: String,
    pub timestamp_s: f64,
    pub zone: Zone,
    pub beat: BeatType,
    pub score: f64,
    pub reasoning: String,
    /// Normalized per-signal values the score was computed from.
    pub signals: SignalVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<ClipWindow>,
    #[serde(default)]
    pub dialogue_excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailerManifest {
    pub schema_version: String,
    #[serde(default = "Uuid::new_v4")]
    pub manifest_id: Uuid,
    pub film_duration_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structural_anchors: Option<StructuralAnchors>,
    pub clips: Vec<ClipEntry>,
    /// Scores this close count as tied when clips of one zone are ordered.
    #[serde(default = "default_score_epsilon")]
    pub score_epsilon: f64,
    /// Degraded-quality notes from every stage of the run.
    #[serde(default)]
    pub warnings: Vec<String>,
}

fn default_score_epsilon() -> f64 {
    DEFAULT_SCORE_EPSILON
}

fn check(ok: bool, field: impl FnOnce() -> String, message: impl FnOnce() -> String) -> Result<(), ManifestError> {
    if ok {
        Ok(())
    } else {
        Err(ManifestError::validation(field(), message()))
    }
}

impl TrailerManifest {
    pub fn new(film_duration_s: f64, anchors: StructuralAnchors, clips: Vec<ClipEntry>) -> Self {
        TrailerManifest {
            schema_version: SCHEMA_VERSION.to_string(),
            manifest_id: Uuid::new_v4(),
            film_duration_s,
            structural_anchors: Some(anchors),
            clips,
            score_epsilon: DEFAULT_SCORE_EPSILON,
            warnings: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn clips_in(&self, zone: Zone) -> impl Iterator<Item = &ClipEntry> {
        self.clips.iter().filter(move |c| c.zone == zone)
    }

    /// Full structural check. The error names the first offending field.
    pub fn validate(&self) -> Result<(), ManifestError> {
        check(
            SUPPORTED_SCHEMA_VERSIONS.contains(&self.schema_version.as_str()),
            || "schema_version".to_string(),
            || format!("unsupported version {:?}", self.schema_version),
        )?;
        let duration = self.film_duration_s;
        check(
            duration.is_finite() && duration > 0.0,
            || "film_duration_s".to_string(),
            || format!("must be positive, got {}", duration),
        )?;
        if let Some(anchors) = &self.structural_anchors {
            anchors.validate(duration)?;
        }
        let epsilon = self.score_epsilon;
        check(
            epsilon.is_finite() && epsilon >= 0.0,
            || "score_epsilon".to_string(),
            || format!("must be non-negative, got {}", epsilon),
        )?;
        check(
            !self.clips.is_empty(),
            || "clips".to_string(),
            || "manifest has no clips".to_string(),
        )?;

        let mut seen = HashSet::new();
        for (i, clip) in self.clips.iter().enumerate() {
            let at = |name: &str| format!("clips[{}].{}", i, name);
            check(!clip.scene_id.is_empty(), || at("scene_id"), || "empty scene id".to_string())?;
            check(
                seen.insert(clip.scene_id.as_str()),
                || at("scene_id"),
                || format!("scene {} selected twice", clip.scene_id),
            )?;
            check(
                clip.timestamp_s.is_finite() && (0.0..=duration).contains(&clip.timestamp_s),
                || at("timestamp_s"),
                || format!("{} is not inside [0, {}]", clip.timestamp_s, duration),
            )?;
            check(
                clip.score.is_finite() && (0.0..=1.0).contains(&clip.score),
                || at("score"),
                || format!("must be within [0,1], got {}", clip.score),
            )?;
            for kind in SignalKind::ALL {
                let v = clip.signals.get(kind);
                check(
                    (0.0..=1.0).contains(&v),
                    || at(&format!("signals.{}", serde_name(kind))),
                    || format!("must be within [0,1], got {}", v),
                )?;
            }
            check(
                !clip.reasoning.trim().is_empty(),
                || at("reasoning"),
                || "reasoning is empty".to_string(),
            )?;
            if let Some(w) = clip.window {
                check(
                    w.start_s >= 0.0 && w.start_s < w.end_s && w.end_s <= duration,
                    || at("window"),
                    || format!("[{}, {}] is not inside [0, {}]", w.start_s, w.end_s, duration),
                )?;
            }
        }

        for (i, pair) in self.clips.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            check(
                prev.zone <= next.zone,
                || format!("clips[{}].zone", i + 1),
                || format!("{} follows {}", next.zone, prev.zone),
            )?;
            check(
                prev.zone != next.zone || prev.score + epsilon + 1e-12 >= next.score,
                || format!("clips[{}].score", i + 1),
                || format!("{} ranks after lower score {}", next.score, prev.score),
            )?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses and validates.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        let manifest: TrailerManifest = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Validates, then writes through a sibling temp file and a rename so an
    /// interrupted write never leaves a partial manifest at `path`.
    pub fn write_atomic(&self, path: &Path) -> Result<(), ManifestError> {
        self.validate()?;
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn serde_name(kind: SignalKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", kind))
}
