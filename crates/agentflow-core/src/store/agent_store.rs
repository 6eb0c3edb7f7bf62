use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row};

use crate::db::Database;
use crate::error::CoreError;
use crate::executor::AgentLookup;
use crate::models::agent::Agent;

/// Agent definitions, stored whole as JSON next to the indexed columns.
#[derive(Clone)]
pub struct AgentStore {
    db: Database,
}

impl AgentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace an agent definition. `created_at` of an existing
    /// row is preserved.
    pub async fn save(&self, agent: &Agent) -> Result<(), CoreError> {
        let mut a = agent.clone();
        a.updated_at = Utc::now();
        let definition = serde_json::to_string(&a)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize agent: {}", e)))?;
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO agents (id, workspace_id, name, source, definition, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                       workspace_id = excluded.workspace_id,
                       name = excluded.name,
                       source = excluded.source,
                       definition = excluded.definition,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        a.id,
                        a.workspace_id,
                        a.name,
                        a.source.as_str(),
                        definition,
                        a.created_at.timestamp_millis(),
                        a.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, agent_id: &str) -> Result<Option<Agent>, CoreError> {
        let id = agent_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    "SELECT definition FROM agents WHERE id = ?1",
                    rusqlite::params![id],
                    row_to_agent,
                )
                .optional()
            })
            .await
    }

    pub async fn list_by_workspace(&self, workspace_id: &str) -> Result<Vec<Agent>, CoreError> {
        let ws_id = workspace_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT definition FROM agents WHERE workspace_id = ?1 ORDER BY name ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![ws_id], row_to_agent)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn delete(&self, agent_id: &str) -> Result<bool, CoreError> {
        let id = agent_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute("DELETE FROM agents WHERE id = ?1", rusqlite::params![id])?;
                Ok(n > 0)
            })
            .await
    }
}

#[async_trait]
impl AgentLookup for AgentStore {
    async fn list_agents(&self, workspace_id: &str) -> Result<Vec<Agent>, CoreError> {
        self.list_by_workspace(workspace_id).await
    }
}

fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let definition: String = row.get(0)?;
    serde_json::from_str(&definition).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}
