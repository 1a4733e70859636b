use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use bbo_core::{params_digest, Experiment, ExperimentId, Trial, TrialId, TrialStatus};
use bbo_storage::TrialStore;
use rusqlite::{params, Connection};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("open sqlite db {}", db_path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        // init schema
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn status_to_str(s: &TrialStatus) -> &'static str {
        match s {
            TrialStatus::New => "new",
            TrialStatus::Running => "running",
            TrialStatus::Completed => "completed",
        }
    }

    fn str_to_status(s: &str) -> TrialStatus {
        match s {
            "running" => TrialStatus::Running,
            "completed" => TrialStatus::Completed,
            _ => TrialStatus::New,
        }
    }

    fn row_to_trial(r: &rusqlite::Row<'_>) -> rusqlite::Result<Trial> {
        let params_json: String = r.get(2)?;
        let results_json: Option<String> = r.get(4)?;
        Ok(Trial {
            id: TrialId::from_str(r.get::<_, String>(0)?),
            experiment_id: ExperimentId::from_str(r.get::<_, String>(1)?),
            params: serde_json::from_str(&params_json).unwrap_or_default(),
            status: Self::str_to_status(&r.get::<_, String>(3)?),
            results: results_json
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            created_at_unix: r.get(5)?,
        })
    }
}

const TRIAL_COLUMNS: &str = "id, experiment_id, params_json, status, results_json, created_at";

impl TrialStore for SqliteStore {
    fn insert_experiment(&self, experiment: &Experiment) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO experiments(id, name, user_script, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                experiment.id.0,
                experiment.name,
                experiment.user_script,
                experiment.created_at_unix
            ],
        )
        .with_context(|| format!("insert experiment {}", experiment.name))?;
        Ok(())
    }

    fn find_experiment(&self, name: &str) -> Result<Option<Experiment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, name, user_script, created_at FROM experiments WHERE name=?1")?;
        let mut rows = stmt.query_map(params![name], |r| {
            Ok(Experiment {
                id: ExperimentId::from_str(r.get::<_, String>(0)?),
                name: r.get(1)?,
                user_script: r.get(2)?,
                created_at_unix: r.get(3)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn insert_trial(&self, trial: &Trial) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let params_json =
            serde_json::to_string(&trial.params).unwrap_or_else(|_| "{}".to_string());
        let digest = params_digest(&trial.params);
        conn.execute(
            "INSERT INTO trials(id, experiment_id, status, params_json, params_digest, results_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7)",
            params![
                trial.id.0,
                trial.experiment_id.0,
                Self::status_to_str(&trial.status),
                params_json,
                digest,
                trial.created_at_unix,
                now_unix()
            ],
        )
        .with_context(|| format!("insert trial {} (duplicate parameter point?)", trial.id.as_str()))?;
        Ok(())
    }

    fn reserve_next_trial(
        &self,
        experiment_id: &ExperimentId,
        now_unix: i64,
    ) -> Result<Option<Trial>> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let candidate: Option<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM trials WHERE experiment_id=?1 AND status='new'
                 ORDER BY created_at, id LIMIT 1",
            )?;
            let mut rows = stmt.query_map(params![experiment_id.0], |r| r.get::<_, String>(0))?;
            match rows.next() {
                Some(row) => Some(row?),
                None => None,
            }
        };

        let id = match candidate {
            Some(id) => id,
            None => {
                tx.commit()?;
                return Ok(None);
            }
        };

        // The status guard keeps two workers from taking the same row.
        let updated = tx.execute(
            "UPDATE trials SET status='running', updated_at=?1 WHERE id=?2 AND status='new'",
            params![now_unix, id],
        )?;
        if updated == 0 {
            tx.commit()?;
            return Ok(None);
        }

        let trial = {
            let sql = format!("SELECT {} FROM trials WHERE id=?1", TRIAL_COLUMNS);
            let mut stmt = tx.prepare(&sql)?;
            let mut rows = stmt.query_map(params![id], Self::row_to_trial)?;
            match rows.next() {
                Some(row) => Some(row?),
                None => None,
            }
        };
        tx.commit()?;
        Ok(trial)
    }

    fn push_completed_trial(&self, trial: &Trial) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let results_json =
            serde_json::to_string(&trial.results).unwrap_or_else(|_| "[]".to_string());
        let updated = conn.execute(
            "UPDATE trials SET status=?1, results_json=?2, updated_at=?3 WHERE id=?4",
            params![
                Self::status_to_str(&trial.status),
                results_json,
                now_unix(),
                trial.id.0
            ],
        )?;
        if updated == 0 {
            return Err(anyhow!("no trial row to complete: {}", trial.id.as_str()));
        }
        Ok(())
    }

    fn write_trial(&self, trial: &Trial) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let results_json = if trial.results.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&trial.results).unwrap_or_else(|_| "[]".to_string()))
        };
        let updated = conn.execute(
            "UPDATE trials SET status=?1, results_json=?2, updated_at=?3 WHERE id=?4",
            params![
                Self::status_to_str(&trial.status),
                results_json,
                now_unix(),
                trial.id.0
            ],
        )?;
        Ok(updated > 0)
    }

    fn trial(&self, id: &TrialId) -> Result<Option<Trial>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM trials WHERE id=?1", TRIAL_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id.0], Self::row_to_trial)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn trials(&self, experiment_id: &ExperimentId) -> Result<Vec<Trial>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM trials WHERE experiment_id=?1 ORDER BY created_at, id",
            TRIAL_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![experiment_id.0], Self::row_to_trial)?;
        let mut out = vec![];
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

pub fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let dur = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    dur.as_secs() as i64
}
