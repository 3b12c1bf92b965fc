//! Runs the four engine stages for one film and checkpoints each of them.
//!
//! A checkpoint is keyed by run id and stage and carries the fingerprint of
//! the inputs it was computed from. Resuming a run skips every stage whose
//! checkpoint fingerprint still matches.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use engine::extract::AnchorReport;
use engine::{
    assign_zones, build_manifest, embed_for_zones, extract_anchors_with_report, score_pool,
    DialogueEvent, Embedder, EngineConfig, EngineError, InferenceGate, ManifestError,
    SceneCandidate, ScoredScene, SelectionPolicy, TextEngine, TrailerManifest, ZoneMap,
};

use crate::db::{Database, RunStatus, Stage};

/// Everything ingestion hands over for one film.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInput {
    pub film_duration_s: f64,
    #[serde(default)]
    pub dialogue: Vec<DialogueEvent>,
    pub scenes: Vec<SceneCandidate>,
    #[serde(default)]
    pub policy: SelectionPolicy,
}

impl RunInput {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.film_duration_s.is_finite() && self.film_duration_s > 0.0) {
            return Err(EngineError::InvalidDuration(self.film_duration_s));
        }
        if self.scenes.is_empty() {
            return Err(EngineError::EmptyPool);
        }
        let mut ids = std::collections::HashSet::new();
        for scene in &self.scenes {
            if !ids.insert(scene.id.as_str()) {
                return Err(EngineError::InvalidInput(format!("duplicate scene id {}", scene.id)));
            }
            if !scene.timestamp_s.is_finite() || !(0.0..=self.film_duration_s).contains(&scene.timestamp_s) {
                return Err(EngineError::InvalidInput(format!(
                    "scene {} has invalid timestamp {}",
                    scene.id, scene.timestamp_s
                )));
            }
        }
        self.policy.validate()
    }
}

/// SHA-256 over the inputs and the engine tunables; any change makes old
/// checkpoints stale.
pub fn fingerprint(input: &RunInput, config: &EngineConfig) -> Result<String, serde_json::Error> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(input)?);
    hasher.update(serde_json::to_vec(config)?);
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("checkpoint encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ZonesCheckpoint {
    zones: ZoneMap,
    warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub manifest_path: String,
    /// Stages restored from checkpoints instead of recomputed.
    pub resumed_stages: Vec<&'static str>,
    pub manifest: TrailerManifest,
}

pub struct Pipeline {
    db: Arc<Database>,
    text_engine: Option<Arc<dyn TextEngine>>,
    embedder: Option<Arc<dyn Embedder>>,
    gate: InferenceGate,
    config: EngineConfig,
    manifest_dir: PathBuf,
}

impl Pipeline {
    pub fn new(db: Arc<Database>, config: EngineConfig, manifest_dir: PathBuf) -> Self {
        Pipeline {
            db,
            text_engine: None,
            embedder: None,
            gate: InferenceGate::exclusive(),
            config,
            manifest_dir,
        }
    }

    pub fn with_text_engine(mut self, engine: Arc<dyn TextEngine>) -> Self {
        self.text_engine = Some(engine);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Shares the gate with other device-bound stages of the host, such as
    /// vision description.
    pub fn with_gate(mut self, gate: InferenceGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn manifest_path(&self, run_id: &str) -> PathBuf {
        self.manifest_dir.join(format!("{}.json", run_id))
    }

    /// Registers a new run and executes every stage.
    pub async fn submit(&self, input: RunInput) -> Result<RunOutcome, PipelineError> {
        input.validate()?;
        let fp = fingerprint(&input, &self.config)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        self.db.create_run(&run_id, &fp, &serde_json::to_string(&input)?)?;
        info!("[PIPELINE] run {} submitted ({} scenes, {} dialogue events)", run_id, input.scenes.len(), input.dialogue.len());
        self.execute(&run_id, &input, &fp).await
    }

    /// Re-executes a stored run, reusing checkpoints that are still fresh.
    pub async fn resume(&self, run_id: &str) -> Result<RunOutcome, PipelineError> {
        let run = self
            .db
            .get_run(run_id)?
            .ok_or_else(|| PipelineError::RunNotFound(run_id.to_string()))?;
        let input: RunInput = serde_json::from_str(&run.input_json)?;
        let fp = fingerprint(&input, &self.config)?;
        let stale = self.db.clear_stale_checkpoints(run_id, &fp)?;
        if stale > 0 {
            warn!("[PIPELINE] run {}: dropped {} stale checkpoints", run_id, stale);
        }
        if fp != run.fingerprint {
            self.db.set_run_fingerprint(run_id, &fp)?;
        }
        self.db.set_run_status(run_id, RunStatus::Running, None)?;
        self.execute(run_id, &input, &fp).await
    }

    async fn execute(&self, run_id: &str, input: &RunInput, fp: &str) -> Result<RunOutcome, PipelineError> {
        match self.run_stages(run_id, input, fp).await {
            Ok(outcome) => {
                self.db.set_run_status(run_id, RunStatus::Completed, None)?;
                Ok(outcome)
            }
            Err(e) => {
                warn!("[PIPELINE] run {} failed: {}", run_id, e);
                self.db.set_run_status(run_id, RunStatus::Failed, Some(&e.to_string()))?;
                Err(e)
            }
        }
    }

    fn restore<T: DeserializeOwned>(&self, run_id: &str, stage: Stage, fp: &str) -> Result<Option<T>, PipelineError> {
        match self.db.load_checkpoint(run_id, stage, fp)? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    fn checkpoint<T: Serialize>(&self, run_id: &str, stage: Stage, fp: &str, value: &T) -> Result<(), PipelineError> {
        self.db
            .save_checkpoint(run_id, stage, fp, &serde_json::to_string(value)?)?;
        Ok(())
    }

    async fn run_stages(&self, run_id: &str, input: &RunInput, fp: &str) -> Result<RunOutcome, PipelineError> {
        let duration = input.film_duration_s;
        let mut resumed = Vec::new();

        let report: AnchorReport = match self.restore(run_id, Stage::Anchors, fp)? {
            Some(report) => {
                resumed.push(Stage::Anchors.as_str());
                report
            }
            None => {
                let report = extract_anchors_with_report(
                    &input.dialogue,
                    duration,
                    self.text_engine.as_deref(),
                    &self.gate,
                    &self.config,
                )
                .await?;
                self.checkpoint(run_id, Stage::Anchors, fp, &report)?;
                report
            }
        };
        let anchors = report.anchors;

        let zones: ZonesCheckpoint = match self.restore(run_id, Stage::Zones, fp)? {
            Some(zones) => {
                resumed.push(Stage::Zones.as_str());
                zones
            }
            None => {
                let embeddings = embed_for_zones(&input.scenes, self.embedder.as_deref()).await;
                let mut warnings = Vec::new();
                if self.embedder.is_some() && embeddings.archetypes.is_none() {
                    warnings.push("embedding service unavailable; zones assigned by position only".to_string());
                }
                let zones = ZonesCheckpoint {
                    zones: assign_zones(&input.scenes, &anchors, &embeddings, duration, &self.config),
                    warnings,
                };
                self.checkpoint(run_id, Stage::Zones, fp, &zones)?;
                zones
            }
        };

        let scored: Vec<ScoredScene> = match self.restore(run_id, Stage::Scoring, fp)? {
            Some(scored) => {
                resumed.push(Stage::Scoring.as_str());
                scored
            }
            None => {
                let scored = score_pool(
                    &input.scenes,
                    &input.dialogue,
                    anchors,
                    &zones.zones,
                    duration,
                    &self.config,
                )?;
                self.checkpoint(run_id, Stage::Scoring, fp, &scored)?;
                scored
            }
        };

        let path = self.manifest_path(run_id);
        let restored: Option<TrailerManifest> = self.restore(run_id, Stage::Manifest, fp)?;
        let manifest = match restored {
            Some(manifest) if path.exists() => {
                resumed.push(Stage::Manifest.as_str());
                manifest
            }
            _ => {
                let mut manifest = build_manifest(
                    &scored,
                    anchors,
                    duration,
                    &input.dialogue,
                    &input.policy,
                    self.config.score_epsilon,
                )?;
                let mut warnings: Vec<String> = report.warnings.iter().chain(&zones.warnings).cloned().collect();
                warnings.append(&mut manifest.warnings);
                manifest.warnings = warnings;
                manifest.write_atomic(&path)?;
                self.checkpoint(run_id, Stage::Manifest, fp, &manifest)?;
                manifest
            }
        };

        let manifest_path = path.to_string_lossy().to_string();
        self.db.set_manifest_path(run_id, &manifest_path)?;
        info!(
            "[PIPELINE] run {} complete: {} clips, {} warnings, resumed {:?}",
            run_id,
            manifest.clips.len(),
            manifest.warnings.len(),
            resumed
        );
        Ok(RunOutcome {
            run_id: run_id.to_string(),
            manifest_path,
            resumed_stages: resumed,
            manifest,
        })
    }
}
