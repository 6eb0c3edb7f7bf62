//! Shared application state for the server and the CLI.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::a2a::{A2aClient, HttpA2aClient};
use crate::db::Database;
use crate::docrepo::DocRepository;
use crate::executor::{executor_for, EngineDefaults, Executor, ExecutorContext};
use crate::generation::{Generation, OpenAiConfig, OpenAiGeneration};
use crate::locale::LocaleSettings;
use crate::models::agent::Agent;
use crate::store::{AgentStore, RunStore, ScheduleStore};
use crate::tools::ToolRegistry;

/// External capabilities wired into every executor.
pub struct EngineConfig {
    pub generation: Arc<dyn Generation>,
    pub a2a: Arc<dyn A2aClient>,
    pub docrepo: Option<Arc<dyn DocRepository>>,
    /// Must be the instance the generation client reads from
    pub locale: LocaleSettings,
    pub defaults: EngineDefaults,
}

impl EngineConfig {
    pub fn new(generation: Arc<dyn Generation>) -> Self {
        Self {
            generation,
            a2a: Arc::new(HttpA2aClient::new()),
            docrepo: None,
            locale: LocaleSettings::default(),
            defaults: EngineDefaults::default(),
        }
    }

    /// OpenAI-compatible generation configured from the environment.
    pub fn from_env() -> Self {
        let locale = LocaleSettings::default();
        let openai = OpenAiConfig::from_env();
        let defaults = EngineDefaults {
            engine: std::env::var("AGENTFLOW_ENGINE").unwrap_or_else(|_| "openai".to_string()),
            model: openai.default_model.clone(),
        };
        Self {
            generation: Arc::new(OpenAiGeneration::new(openai, locale.clone())),
            a2a: Arc::new(HttpA2aClient::new()),
            docrepo: None,
            locale,
            defaults,
        }
    }
}

/// Cancellation handles of in-flight runs, by run id.
#[derive(Clone, Default)]
pub struct ActiveRuns {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl ActiveRuns {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register(&self, run_id: &str, token: CancellationToken) {
        self.lock().insert(run_id.to_string(), token);
    }

    /// Signal a run to stop. Returns false when the run is not in flight.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.lock().get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn finish(&self, run_id: &str) {
        self.lock().remove(run_id);
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.lock().contains_key(run_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

/// Shared state accessible by all API handlers and commands.
pub struct AppStateInner {
    pub db: Database,
    pub agent_store: AgentStore,
    pub run_store: RunStore,
    pub schedule_store: ScheduleStore,
    pub tool_registry: ToolRegistry,
    pub locale: LocaleSettings,
    pub engine: Arc<ExecutorContext>,
    pub active_runs: ActiveRuns,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        let agent_store = AgentStore::new(db.clone());
        let run_store = RunStore::new(db.clone());
        let tool_registry = ToolRegistry::new();

        let engine = Arc::new(ExecutorContext {
            generation: config.generation,
            tools: tool_registry.clone(),
            agents: Arc::new(agent_store.clone()),
            docrepo: config.docrepo,
            runs: Arc::new(run_store.clone()),
            a2a: config.a2a,
            locale: config.locale.clone(),
            defaults: config.defaults,
        });

        Self {
            schedule_store: ScheduleStore::new(db.clone()),
            agent_store,
            run_store,
            tool_registry,
            locale: config.locale,
            engine,
            active_runs: ActiveRuns::default(),
            db,
        }
    }

    pub fn executor(&self, agent: Agent) -> Box<dyn Executor> {
        executor_for(agent, self.engine.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_runs_cancel() {
        let runs = ActiveRuns::default();
        let token = CancellationToken::new();
        runs.register("r1", token.clone());

        assert!(runs.contains("r1"));
        assert!(runs.cancel("r1"));
        assert!(token.is_cancelled());
        assert!(!runs.cancel("missing"));

        runs.finish("r1");
        assert!(runs.ids().is_empty());
    }
}
