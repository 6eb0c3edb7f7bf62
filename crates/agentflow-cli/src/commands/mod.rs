//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses
//! the agentflow-core engine through `AppState`.

pub mod agent;
pub mod output;
pub mod run;
pub mod runs;
pub mod server;

use std::collections::HashMap;
use std::sync::Arc;

use agentflow_core::a2a::HttpA2aClient;
use agentflow_core::executor::EngineDefaults;
use agentflow_core::generation::{EchoGeneration, OpenAiConfig, OpenAiGeneration};
use agentflow_core::locale::LocaleSettings;
use agentflow_core::template::InputValue;
use agentflow_core::{AppState, AppStateInner, Database, EngineConfig};

/// Generation settings shared by every command that runs agents.
#[derive(Debug, Clone, clap::Args)]
pub struct EngineArgs {
    /// Base URL of the OpenAI-compatible endpoint
    #[arg(long, env = "AGENTFLOW_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// API key (falls back to OPENAI_API_KEY)
    #[arg(long, env = "AGENTFLOW_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Engine used when neither the step nor the agent names one
    #[arg(long, env = "AGENTFLOW_ENGINE", default_value = "openai", global = true)]
    pub engine: String,

    /// Model used when neither the step nor the agent names one
    #[arg(long, env = "AGENTFLOW_MODEL", global = true)]
    pub model: Option<String>,

    /// Answer every prompt with the prompt itself instead of calling a model
    #[arg(long, global = true)]
    pub dry_run: bool,
}

impl Default for EngineArgs {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            engine: "openai".to_string(),
            model: None,
            dry_run: false,
        }
    }
}

/// Wire the generation client described by `args`.
pub fn engine_config(args: &EngineArgs) -> EngineConfig {
    if args.dry_run {
        let mut config = EngineConfig::new(Arc::new(EchoGeneration));
        config.defaults.engine = "echo".to_string();
        return config;
    }

    let mut openai = OpenAiConfig::default();
    if let Some(url) = args.base_url.as_ref().filter(|u| !u.trim().is_empty()) {
        openai.base_url = url.clone();
    }
    openai.api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_default();
    if let Some(model) = args.model.as_ref().filter(|m| !m.trim().is_empty()) {
        openai.default_model = model.clone();
    }

    let locale = LocaleSettings::default();
    let defaults = EngineDefaults {
        engine: args.engine.clone(),
        model: openai.default_model.clone(),
    };
    EngineConfig {
        generation: Arc::new(OpenAiGeneration::new(openai, locale.clone())),
        a2a: Arc::new(HttpA2aClient::new()),
        docrepo: None,
        locale,
        defaults,
    }
}

/// Open the database at `db_path` and build the shared `AppState`.
pub fn init_state(db_path: &str, engine: EngineConfig) -> Result<AppState, String> {
    let db = Database::open(db_path)
        .map_err(|e| format!("Failed to open database '{}': {}", db_path, e))?;
    Ok(Arc::new(AppStateInner::new(db, engine)))
}

/// Parse repeated `--input key=value` flags.
pub fn parse_inputs(pairs: &[String]) -> Result<HashMap<String, InputValue>, String> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Invalid input '{}': expected key=value", pair))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("Invalid input '{}': empty key", pair));
            }
            Ok((key.to_string(), InputValue::from(value)))
        })
        .collect()
}

/// Load `.env.local` then `.env` into the environment. Variables that are
/// already set win.
pub fn load_dotenv() {
    for filename in [".env.local", ".env"] {
        let Ok(content) = std::fs::read_to_string(filename) else {
            continue;
        };
        for (key, value) in parse_dotenv(&content) {
            if std::env::var(&key).is_err() {
                std::env::set_var(&key, &value);
            }
        }
        tracing::debug!("[Cli] Loaded environment from '{}'", filename);
    }
}

fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let unquoted = if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                &value[1..value.len() - 1]
            } else {
                value
            };
            Some((key.trim().to_string(), unquoted.to_string()))
        })
        .collect()
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inputs() {
        let inputs = parse_inputs(&["topic=tides".to_string(), "q=a=b".to_string()]).unwrap();
        assert_eq!(inputs["topic"], InputValue::from("tides"));
        assert_eq!(inputs["q"], InputValue::from("a=b"));
        assert!(parse_inputs(&["novalue".to_string()]).is_err());
        assert!(parse_inputs(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_parse_dotenv() {
        let parsed = parse_dotenv(
            "# comment\n\nAGENTFLOW_MODEL=\"gpt-4o\"\nexport AGENTFLOW_ENGINE = openai\nBROKEN\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("AGENTFLOW_MODEL".to_string(), "gpt-4o".to_string()),
                ("AGENTFLOW_ENGINE".to_string(), "openai".to_string()),
            ]
        );
    }
}
