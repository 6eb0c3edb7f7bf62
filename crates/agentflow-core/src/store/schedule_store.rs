use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::schedule::{next_run_after, CreateScheduleInput, Schedule, UpdateScheduleInput};
use crate::template::InputValue;

const SCHEDULE_COLUMNS: &str = "id, name, cron_expr, agent_id, workspace_id, prompt, input_values, \
                                enabled, last_run_at, next_run_at, last_run_id, created_at, updated_at";

#[derive(Clone)]
pub struct ScheduleStore {
    db: Database,
}

impl ScheduleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a schedule. The cron expression is validated and the first
    /// fire time computed up front.
    pub async fn create(&self, input: CreateScheduleInput) -> Result<Schedule, CoreError> {
        let now = Utc::now();
        let next_run_at = next_run_after(&input.cron_expr, now)?;
        let s = Schedule {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            cron_expr: input.cron_expr,
            agent_id: input.agent_id,
            workspace_id: input.workspace_id,
            prompt: input.prompt,
            input_values: input.input_values,
            enabled: input.enabled,
            last_run_at: None,
            next_run_at: Some(next_run_at),
            last_run_id: None,
            created_at: now,
            updated_at: now,
        };
        self.write(&s, true).await?;
        Ok(s)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Schedule>, CoreError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM schedules WHERE id = ?1", SCHEDULE_COLUMNS),
                    rusqlite::params![id],
                    |row| Ok(row_to_schedule(row)),
                )
                .optional()
            })
            .await
    }

    pub async fn list_by_workspace(&self, workspace_id: &str) -> Result<Vec<Schedule>, CoreError> {
        let ws = workspace_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM schedules WHERE workspace_id = ?1 ORDER BY created_at DESC",
                    SCHEDULE_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![ws], |row| Ok(row_to_schedule(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Enabled schedules whose next fire time is at or before `now`.
    pub async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>, CoreError> {
        let now_ms = now.timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM schedules \
                     WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1 \
                     ORDER BY next_run_at ASC",
                    SCHEDULE_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![now_ms], |row| Ok(row_to_schedule(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn update(&self, id: &str, input: UpdateScheduleInput) -> Result<Option<Schedule>, CoreError> {
        // Fetch first, then apply patches, then save
        let Some(mut s) = self.get(id).await? else { return Ok(None) };
        let cron_changed = input.cron_expr.is_some();
        if let Some(v) = input.name { s.name = v; }
        if let Some(v) = input.cron_expr { s.cron_expr = v; }
        if let Some(v) = input.agent_id { s.agent_id = v; }
        if let Some(v) = input.prompt { s.prompt = Some(v); }
        if let Some(v) = input.input_values { s.input_values = v; }
        if let Some(v) = input.enabled { s.enabled = v; }
        if let Some(v) = input.last_run_at { s.last_run_at = Some(v); }
        if let Some(v) = input.last_run_id { s.last_run_id = Some(v); }
        if let Some(v) = input.next_run_at {
            s.next_run_at = Some(v);
        } else if cron_changed {
            s.next_run_at = Some(next_run_after(&s.cron_expr, Utc::now())?);
        }
        s.updated_at = Utc::now();
        self.write(&s, false).await?;
        Ok(Some(s))
    }

    /// Record a fire and move `next_run_at` past `fired_at`.
    pub async fn mark_fired(
        &self,
        id: &str,
        run_id: Option<String>,
        fired_at: DateTime<Utc>,
    ) -> Result<Option<Schedule>, CoreError> {
        let Some(s) = self.get(id).await? else { return Ok(None) };
        let next = next_run_after(&s.cron_expr, fired_at)?;
        self.update(
            id,
            UpdateScheduleInput {
                last_run_at: Some(fired_at),
                last_run_id: run_id,
                next_run_at: Some(next),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, CoreError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute("DELETE FROM schedules WHERE id = ?1", rusqlite::params![id])?;
                Ok(n > 0)
            })
            .await
    }

    async fn write(&self, s: &Schedule, insert: bool) -> Result<(), CoreError> {
        let sc = s.clone();
        let inputs = serde_json::to_string(&sc.input_values)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize input values: {}", e)))?;
        let sql = if insert {
            "INSERT INTO schedules (id, name, cron_expr, agent_id, workspace_id, prompt, input_values, \
             enabled, last_run_at, next_run_at, last_run_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        } else {
            "UPDATE schedules SET name=?2, cron_expr=?3, agent_id=?4, workspace_id=?5, prompt=?6, \
             input_values=?7, enabled=?8, last_run_at=?9, next_run_at=?10, last_run_id=?11, \
             created_at=?12, updated_at=?13 WHERE id=?1"
        };
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    sql,
                    rusqlite::params![
                        sc.id,
                        sc.name,
                        sc.cron_expr,
                        sc.agent_id,
                        sc.workspace_id,
                        sc.prompt,
                        inputs,
                        sc.enabled as i64,
                        sc.last_run_at.map(|t| t.timestamp_millis()),
                        sc.next_run_at.map(|t| t.timestamp_millis()),
                        sc.last_run_id,
                        sc.created_at.timestamp_millis(),
                        sc.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }
}

fn row_to_schedule(row: &rusqlite::Row<'_>) -> Schedule {
    use chrono::TimeZone;
    let to_dt = |ms: Option<i64>| ms.and_then(|v| Utc.timestamp_millis_opt(v).single());
    let inputs: String = row.get(6).unwrap_or_default();

    Schedule {
        id: row.get(0).unwrap_or_default(),
        name: row.get(1).unwrap_or_default(),
        cron_expr: row.get(2).unwrap_or_default(),
        agent_id: row.get(3).unwrap_or_default(),
        workspace_id: row.get(4).unwrap_or_default(),
        prompt: row.get(5).unwrap_or(None),
        input_values: serde_json::from_str::<HashMap<String, InputValue>>(&inputs).unwrap_or_default(),
        enabled: row.get::<_, i64>(7).unwrap_or(0) != 0,
        last_run_at: to_dt(row.get(8).unwrap_or(None)),
        next_run_at: to_dt(row.get(9).unwrap_or(None)),
        last_run_id: row.get(10).unwrap_or(None),
        created_at: to_dt(row.get(11).ok()).unwrap_or_else(Utc::now),
        updated_at: to_dt(row.get(12).ok()).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn input(cron: &str) -> CreateScheduleInput {
        CreateScheduleInput {
            name: "Nightly".to_string(),
            cron_expr: cron.to_string(),
            agent_id: "writer".to_string(),
            workspace_id: "default".to_string(),
            prompt: None,
            input_values: HashMap::from([("topic".to_string(), InputValue::from("rust"))]),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_create_computes_next_run() {
        let store = ScheduleStore::new(Database::open_in_memory().unwrap());
        let s = store.create(input("0 3 * * *")).await.unwrap();
        assert!(s.next_run_at.unwrap() > s.created_at);

        let loaded = store.get(&s.id).await.unwrap().unwrap();
        assert_eq!(loaded.input_values["topic"], InputValue::from("rust"));
        assert_eq!(store.list_by_workspace("default").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_cron_is_rejected() {
        let store = ScheduleStore::new(Database::open_in_memory().unwrap());
        assert!(matches!(
            store.create(input("not a cron")).await,
            Err(CoreError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_due_and_mark_fired() {
        let store = ScheduleStore::new(Database::open_in_memory().unwrap());
        let s = store.create(input("*/5 * * * *")).await.unwrap();
        let later = Utc::now() + Duration::minutes(10);

        assert!(store.list_due(Utc::now() - Duration::minutes(10)).await.unwrap().is_empty());
        let due = store.list_due(later).await.unwrap();
        assert_eq!(due.len(), 1);

        let fired = store
            .mark_fired(&s.id, Some("run-1".to_string()), later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired.last_run_id.as_deref(), Some("run-1"));
        assert!(fired.next_run_at.unwrap() > later);
        assert!(store.list_due(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_schedules_are_never_due() {
        let store = ScheduleStore::new(Database::open_in_memory().unwrap());
        let s = store.create(input("* * * * *")).await.unwrap();
        store
            .update(&s.id, UpdateScheduleInput { enabled: Some(false), ..Default::default() })
            .await
            .unwrap();
        let later = Utc::now() + Duration::minutes(5);
        assert!(store.list_due(later).await.unwrap().is_empty());
        assert!(store.delete(&s.id).await.unwrap());
    }
}
