use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row};

use crate::db::Database;
use crate::error::CoreError;
use crate::executor::RunPersistence;
use crate::models::run::{RunRecord, RunStatus, RunTrigger};

const RUN_COLUMNS: &str = "id, agent_id, workspace_id, trigger, status, prompt, error, \
                           messages, tool_calls, created_at, updated_at";

/// Run records keyed by `(agent_id, id)`.
#[derive(Clone)]
pub struct RunStore {
    db: Database,
}

impl RunStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, run: &RunRecord) -> Result<(), CoreError> {
        let r = run.clone();
        let messages = serde_json::to_string(&r.messages)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize messages: {}", e)))?;
        let tool_calls = serde_json::to_string(&r.tool_calls)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize tool calls: {}", e)))?;
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO runs (id, agent_id, workspace_id, trigger, status, prompt, error,
                                       messages, tool_calls, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT(agent_id, id) DO UPDATE SET
                       status = excluded.status,
                       error = excluded.error,
                       messages = excluded.messages,
                       tool_calls = excluded.tool_calls,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        r.id,
                        r.agent_id,
                        r.workspace_id,
                        r.trigger.as_str(),
                        r.status.as_str(),
                        r.prompt,
                        r.error,
                        messages,
                        tool_calls,
                        r.created_at.timestamp_millis(),
                        r.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, agent_id: &str, run_id: &str) -> Result<Option<RunRecord>, CoreError> {
        let agent_id = agent_id.to_string();
        let run_id = run_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM runs WHERE agent_id = ?1 AND id = ?2", RUN_COLUMNS),
                    rusqlite::params![agent_id, run_id],
                    row_to_run,
                )
                .optional()
            })
            .await
    }

    /// Most recent first.
    pub async fn list_by_agent(&self, agent_id: &str, limit: usize) -> Result<Vec<RunRecord>, CoreError> {
        let agent_id = agent_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM runs WHERE agent_id = ?1 ORDER BY created_at DESC LIMIT ?2",
                    RUN_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![agent_id, limit as i64], row_to_run)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Runs left in `running`, e.g. after a crash.
    pub async fn list_running(&self) -> Result<Vec<RunRecord>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM runs WHERE status = 'running' ORDER BY created_at ASC",
                    RUN_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], row_to_run)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn delete(&self, agent_id: &str, run_id: &str) -> Result<bool, CoreError> {
        let agent_id = agent_id.to_string();
        let run_id = run_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "DELETE FROM runs WHERE agent_id = ?1 AND id = ?2",
                    rusqlite::params![agent_id, run_id],
                )?;
                Ok(n > 0)
            })
            .await
    }

    pub async fn delete_by_agent(&self, agent_id: &str) -> Result<usize, CoreError> {
        let agent_id = agent_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.execute("DELETE FROM runs WHERE agent_id = ?1", rusqlite::params![agent_id])
            })
            .await
    }
}

#[async_trait]
impl RunPersistence for RunStore {
    async fn save(&self, run: &RunRecord) -> Result<(), CoreError> {
        RunStore::save(self, run).await
    }

    async fn load(&self, agent_id: &str, run_id: &str) -> Result<Option<RunRecord>, CoreError> {
        self.get(agent_id, run_id).await
    }
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let created_ms: i64 = row.get(9)?;
    let updated_ms: i64 = row.get(10)?;

    Ok(RunRecord {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        workspace_id: row.get(2)?,
        trigger: RunTrigger::from_str(&row.get::<_, String>(3)?).unwrap_or(RunTrigger::Manual),
        status: RunStatus::from_str(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Error),
        prompt: row.get(5)?,
        error: row.get(6)?,
        messages: json_column(row, 7)?,
        tool_calls: json_column(row, 8)?,
        created_at: chrono::DateTime::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::run::Message;

    #[tokio::test]
    async fn test_save_is_an_upsert() {
        let store = RunStore::new(Database::open_in_memory().unwrap());
        let mut run = RunRecord::new(Some("r1".to_string()), "agent", "default", RunTrigger::Schedule, "hi");
        run.push_message(Message::system(""));
        store.save(&run).await.unwrap();

        run.push_message(Message::user("hi"));
        run.transition(RunStatus::Success);
        store.save(&run).await.unwrap();

        let loaded = store.load("agent", "r1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Success);
        assert_eq!(loaded.trigger, RunTrigger::Schedule);
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(store.list_by_agent("agent", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_runs_are_keyed_by_agent() {
        let store = RunStore::new(Database::open_in_memory().unwrap());
        let a = RunRecord::new(Some("same".to_string()), "a", "default", RunTrigger::Manual, "");
        let b = RunRecord::new(Some("same".to_string()), "b", "default", RunTrigger::Manual, "");
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        assert!(store.load("a", "same").await.unwrap().is_some());
        assert_eq!(store.list_running().await.unwrap().len(), 2);
        assert!(store.delete("a", "same").await.unwrap());
        assert!(store.load("a", "same").await.unwrap().is_none());
        assert!(store.load("b", "same").await.unwrap().is_some());
        assert_eq!(store.delete_by_agent("b").await.unwrap(), 1);
    }
}
