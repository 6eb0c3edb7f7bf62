//! Agent definitions - declarative, multi-step and immutable for the duration
//! of a run.
//!
//! Agents can be written in YAML:
//!
//! ```yaml
//! id: "release-notes"
//! name: "Release Notes"
//! instructions: |
//!   You write concise release notes.
//! engine: "openai"
//! model: "gpt-4o-mini"
//! steps:
//!   - description: "Collect changes"
//!     prompt: "Summarize these commits: {{commits:Commit log}}"
//!     tools: ["git_log"]
//!   - description: "Write notes"
//!     prompt: "Turn this summary into release notes:\n{{output.1}}"
//!     tools: []
//! ```

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an agent's generations happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentSource {
    /// Multi-step generation driven by this process.
    #[default]
    Local,
    /// The whole turn is delegated to a remote agent over the A2A protocol.
    #[serde(alias = "remote-a2a")]
    A2a,
}

impl AgentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::A2a => "a2a",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "a2a" | "remote-a2a" => Self::A2a,
            _ => Self::Local,
        }
    }
}

/// One ordered unit of an agent's workflow.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentStep {
    /// Human-readable status label shown while the step runs
    #[serde(default)]
    pub description: Option<String>,

    /// Prompt template. Supports `{{input}}` placeholders and `{{output.N}}`
    /// references to earlier steps.
    #[serde(default)]
    pub prompt: Option<String>,

    /// Tool allow-list: `None` attaches every enabled plugin, `Some([])` none.
    #[serde(default)]
    pub tools: Option<Vec<String>>,

    /// Sub-agent ids exposed to this step as callable tools
    #[serde(default)]
    pub agents: Vec<String>,

    /// Document repository queried with the step prompt before generation
    #[serde(default)]
    pub docrepo: Option<String>,

    /// JSON schema the step output must follow
    #[serde(default)]
    pub json_schema: Option<serde_json::Value>,

    /// Engine override for this step
    #[serde(default)]
    pub engine: Option<String>,

    /// Model override for this step
    #[serde(default)]
    pub model: Option<String>,
}

/// A declarative agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,

    #[serde(default = "default_workspace")]
    pub workspace_id: String,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub source: AgentSource,

    #[serde(default)]
    pub engine: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    /// Provider-specific tuning fields merged into every generation request
    #[serde(default)]
    pub model_opts: serde_json::Map<String, serde_json::Value>,

    /// Locale the agent should answer in (e.g. `fr-FR`)
    #[serde(default)]
    pub locale: Option<String>,

    /// System prompt; for A2A agents this is the remote agent's base URL
    #[serde(default)]
    pub instructions: Option<String>,

    #[serde(default)]
    pub disable_streaming: bool,

    /// Shared secret expected by the webhook trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_token: Option<String>,

    pub steps: Vec<AgentStep>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_workspace() -> String {
    "default".to_string()
}

impl Agent {
    /// Create a local single-step agent.
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<AgentStep>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workspace_id: default_workspace(),
            name: name.into(),
            description: None,
            source: AgentSource::Local,
            engine: None,
            model: None,
            model_opts: serde_json::Map::new(),
            locale: None,
            instructions: None,
            disable_streaming: false,
            webhook_token: None,
            steps,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse an agent definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse agent YAML: {}", e))
    }

    /// Load an agent definition from a file path (YAML or JSON).
    pub fn from_file(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read agent file '{}': {}", path, e))?;
        if path.ends_with(".json") {
            serde_json::from_str(&content)
                .map_err(|e| format!("Failed to parse agent JSON '{}': {}", path, e))
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn is_remote(&self) -> bool {
        self.source == AgentSource::A2a
    }

    /// Check structural invariants: ids, at least one step, A2A url.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Agent id must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err(format!("Agent '{}' has no name", self.id));
        }
        if self.steps.is_empty() {
            return Err(format!("Agent '{}' must define at least one step", self.id));
        }
        if self.is_remote() {
            let url = self.instructions.as_deref().unwrap_or("").trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!(
                    "A2A agent '{}' needs the remote agent URL in `instructions`",
                    self.id
                ));
            }
        }
        Ok(())
    }
}

/// Loads agent definitions from a directory.
pub struct AgentLoader {
    /// Loaded agents indexed by ID
    pub agents: HashMap<String, Agent>,
}

impl AgentLoader {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Load all agents from a directory (`.yaml`, `.yml` and `.json` files).
    pub fn load_dir(&mut self, dir: &str) -> Result<usize, String> {
        let dir_path = Path::new(dir);
        if !dir_path.is_dir() {
            return Err(format!("Agent directory '{}' does not exist", dir));
        }

        let mut count = 0;
        for entry in std::fs::read_dir(dir_path)
            .map_err(|e| format!("Failed to read directory '{}': {}", dir, e))?
        {
            let entry = entry.map_err(|e| format!("Directory entry error: {}", e))?;
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !matches!(ext, "yaml" | "yml" | "json") {
                continue;
            }

            let agent = Agent::from_file(path.to_str().unwrap_or(""))?;
            agent.validate()?;

            tracing::info!("[AgentLoader] Loaded agent: {} ({})", agent.id, agent.name);
            self.agents.insert(agent.id.clone(), agent);
            count += 1;
        }

        Ok(count)
    }

    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn all(&self) -> &HashMap<String, Agent> {
        &self.agents
    }
}

impl Default for AgentLoader {
    fn default() -> Self {
        Self::new()
    }
}
