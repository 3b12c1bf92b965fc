use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Pipeline stages that leave a checkpoint behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Anchors,
    Zones,
    Scoring,
    Manifest,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Anchors, Stage::Zones, Stage::Scoring, Stage::Manifest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Anchors => "anchors",
            Stage::Zones => "zones",
            Stage::Scoring => "scoring",
            Stage::Manifest => "manifest",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Run {
    pub id: String,
    pub fingerprint: String,
    pub status: RunStatus,
    pub input_json: String,
    pub manifest_path: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn parse_time(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidColumnType(idx, "TEXT".to_string(), rusqlite::types::Type::Text))
}

impl Run {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status: String = row.get(2)?;
        let status = RunStatus::parse(&status)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(2, "TEXT".to_string(), rusqlite::types::Type::Text))?;
        Ok(Run {
            id: row.get(0)?,
            fingerprint: row.get(1)?,
            status,
            input_json: row.get(3)?,
            manifest_path: row.get(4)?,
            error: row.get(5)?,
            created_at: parse_time(row, 6)?,
            updated_at: parse_time(row, 7)?,
        })
    }
}

const RUN_COLUMNS: &str =
    "id, fingerprint, status, input_json, manifest_path, error, created_at, updated_at";

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database mutex poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                status TEXT NOT NULL,
                input_json TEXT NOT NULL,
                manifest_path TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS stage_checkpoints (
                run_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (run_id, stage),
                FOREIGN KEY (run_id) REFERENCES runs(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_fingerprint ON runs(fingerprint)",
            [],
        )?;

        Ok(())
    }

    pub fn create_run(&self, id: &str, fingerprint: &str, input_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO runs (id, fingerprint, status, input_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, fingerprint, RunStatus::Running.as_str(), input_json, now],
        )?;
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let conn = self.conn()?;
        let run = conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![id],
                |row| Run::from_row(row),
            )
            .optional()?;
        Ok(run)
    }

    pub fn set_run_status(&self, id: &str, status: RunStatus, error: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET status = ?2, error = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, status.as_str(), error, now],
        )?;
        Ok(())
    }

    pub fn set_manifest_path(&self, id: &str, path: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET manifest_path = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, path, now],
        )?;
        Ok(())
    }

    pub fn set_run_fingerprint(&self, id: &str, fingerprint: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET fingerprint = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, fingerprint, now],
        )?;
        Ok(())
    }

    /// Replaces the run's checkpoint for `stage`.
    pub fn save_checkpoint(&self, run_id: &str, stage: Stage, fingerprint: &str, payload_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO stage_checkpoints (run_id, stage, fingerprint, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, stage.as_str(), fingerprint, payload_json, now],
        )?;
        Ok(())
    }

    /// Checkpoint payload, only if it was written for the same inputs.
    pub fn load_checkpoint(&self, run_id: &str, stage: Stage, fingerprint: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT fingerprint, payload_json FROM stage_checkpoints WHERE run_id = ?1 AND stage = ?2",
                params![run_id, stage.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.and_then(|(stored, payload)| (stored == fingerprint).then_some(payload)))
    }

    /// Drops every checkpoint of the run whose fingerprint differs from `fingerprint`.
    pub fn clear_stale_checkpoints(&self, run_id: &str, fingerprint: &str) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM stage_checkpoints WHERE run_id = ?1 AND fingerprint != ?2",
            params![run_id, fingerprint],
        )?;
        Ok(removed)
    }

    pub fn checkpointed_stages(&self, run_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT stage FROM stage_checkpoints WHERE run_id = ?1")?;
        let rows = stmt.query_map(params![run_id], |row| row.get::<_, String>(0))?;

        let mut stages = Vec::new();
        for row in rows {
            stages.push(row?);
        }
        stages.sort_by_key(|s| Stage::ALL.iter().position(|st| *s == st.as_str()));
        Ok(stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("cutline.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_run_lifecycle() {
        let (_dir, db) = db();
        db.create_run("run-1", "abc", "{}").unwrap();

        let run = db.get_run("run-1").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.manifest_path.is_none());

        db.set_manifest_path("run-1", "/tmp/m.json").unwrap();
        db.set_run_status("run-1", RunStatus::Failed, Some("boom")).unwrap();
        let run = db.get_run("run-1").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert_eq!(run.manifest_path.as_deref(), Some("/tmp/m.json"));

        assert!(db.get_run("missing").unwrap().is_none());
    }

    #[test]
    fn test_checkpoint_fingerprint_must_match() {
        let (_dir, db) = db();
        db.create_run("run-1", "abc", "{}").unwrap();
        db.save_checkpoint("run-1", Stage::Anchors, "abc", r#"{"begin_t":5.0}"#).unwrap();

        assert_eq!(
            db.load_checkpoint("run-1", Stage::Anchors, "abc").unwrap().as_deref(),
            Some(r#"{"begin_t":5.0}"#)
        );
        assert!(db.load_checkpoint("run-1", Stage::Anchors, "changed").unwrap().is_none());
        assert!(db.load_checkpoint("run-1", Stage::Zones, "abc").unwrap().is_none());
    }

    #[test]
    fn test_checkpoints_survive_reopen_and_stale_ones_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cutline.db");
        {
            let db = Database::new(&path).unwrap();
            db.create_run("run-1", "abc", "{}").unwrap();
            db.save_checkpoint("run-1", Stage::Scoring, "abc", "[]").unwrap();
            db.save_checkpoint("run-1", Stage::Anchors, "old", "{}").unwrap();
        }
        let db = Database::new(&path).unwrap();
        assert_eq!(db.checkpointed_stages("run-1").unwrap(), vec!["anchors", "scoring"]);
        assert_eq!(db.clear_stale_checkpoints("run-1", "abc").unwrap(), 1);
        assert_eq!(db.checkpointed_stages("run-1").unwrap(), vec!["scoring"]);
    }
}
