//! Tools - plugins callable by the model during a step.
//!
//! A [`Plugin`] either exposes a single tool named after itself or, when
//! [`Plugin::is_multi_tool`] is true, several sub-tools discovered at runtime
//! (e.g. from an MCP server). The process-wide [`ToolRegistry`] holds every
//! installed plugin; each run builds its own [`ToolSet`] from it, step by
//! step, via [`resolve_step_tools`].

pub mod agent_tool;

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

pub use agent_tool::AgentPlugin;

/// Function declaration handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    fn is_multi_tool(&self) -> bool {
        false
    }

    /// Every tool this plugin can expose. Single-tool plugins return one
    /// definition named after the plugin.
    async fn tools(&self) -> Result<Vec<ToolDefinition>, CoreError>;

    async fn execute(
        &self,
        tool: &str,
        params: serde_json::Value,
        abort: &CancellationToken,
    ) -> Result<serde_json::Value, CoreError>;
}

// ─── Registry ───────────────────────────────────────────────────────────

/// Installed plugins, shared across runs.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    plugins: Arc<RwLock<Vec<Arc<dyn Plugin>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a plugin, replacing any plugin with the same name.
    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        let mut plugins = match self.plugins.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        plugins.retain(|p| p.name() != plugin.name());
        tracing::info!("[ToolRegistry] Registered plugin: {}", plugin.name());
        plugins.push(plugin);
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut plugins = match self.plugins.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = plugins.len();
        plugins.retain(|p| p.name() != name);
        before != plugins.len()
    }

    pub fn list(&self) -> Vec<Arc<dyn Plugin>> {
        match self.plugins.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn enabled(&self) -> Vec<Arc<dyn Plugin>> {
        self.list().into_iter().filter(|p| p.is_enabled()).collect()
    }
}

// ─── Per-run tool set ───────────────────────────────────────────────────

struct Attached {
    plugin: Arc<dyn Plugin>,
    /// `None` exposes every tool of the plugin.
    enabled: Option<HashSet<String>>,
}

impl Attached {
    fn exposes(&self, tool: &str) -> bool {
        self.enabled.as_ref().map_or(true, |set| set.contains(tool))
    }
}

/// Tools attached to one run's generation handle.
#[derive(Default)]
pub struct ToolSet {
    attached: Vec<Attached>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.attached.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    /// Attach a plugin with all of its tools exposed. A plugin already
    /// attached under the same name is left as is; returns whether it was
    /// added.
    pub fn add_plugin(&mut self, plugin: Arc<dyn Plugin>) -> bool {
        if self.attached.iter().any(|a| a.plugin.name() == plugin.name()) {
            return false;
        }
        self.attached.push(Attached {
            plugin,
            enabled: None,
        });
        true
    }

    /// Enable one sub-tool of an attached multi-tool plugin. The first call
    /// narrows the plugin from all of its tools to the enabled ones.
    pub fn enable_tool(&mut self, plugin: &str, tool: &str) -> bool {
        let Some(attached) = self.attached.iter_mut().find(|a| a.plugin.name() == plugin) else {
            return false;
        };
        attached
            .enabled
            .get_or_insert_with(HashSet::new)
            .insert(tool.to_string());
        true
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.attached
            .iter()
            .map(|a| a.plugin.name().to_string())
            .collect()
    }

    /// Explicitly enabled sub-tools of a plugin, sorted. `None` when the
    /// plugin is not attached or exposes everything.
    pub fn enabled_tools(&self, plugin: &str) -> Option<Vec<String>> {
        let attached = self.attached.iter().find(|a| a.plugin.name() == plugin)?;
        let mut tools: Vec<String> = attached.enabled.as_ref()?.iter().cloned().collect();
        tools.sort();
        Some(tools)
    }

    /// Definitions of every exposed tool, in attachment order.
    pub async fn definitions(&self) -> Result<Vec<ToolDefinition>, CoreError> {
        let mut defs = Vec::new();
        for attached in &self.attached {
            for def in attached.plugin.tools().await? {
                if attached.exposes(&def.name) {
                    defs.push(def);
                }
            }
        }
        Ok(defs)
    }

    /// Route a tool call to the plugin exposing it.
    pub async fn execute(
        &self,
        tool: &str,
        params: serde_json::Value,
        abort: &CancellationToken,
    ) -> Result<serde_json::Value, CoreError> {
        for attached in &self.attached {
            if !attached.exposes(tool) {
                continue;
            }
            let owns = if attached.plugin.is_multi_tool() {
                attached.plugin.tools().await?.iter().any(|d| d.name == tool)
            } else {
                attached.plugin.name() == tool
            };
            if owns {
                tracing::debug!("[ToolSet] {} -> {}", tool, attached.plugin.name());
                return attached.plugin.execute(tool, params, abort).await;
            }
        }
        Err(CoreError::Tool(format!("Tool '{}' is not available", tool)))
    }
}

// ─── Resolution ─────────────────────────────────────────────────────────

/// Rebuild `toolset` for one step.
///
/// `filter = None` attaches every enabled plugin. Otherwise only plugins
/// named in the allow-list are attached, except multi-tool plugins, which
/// are attached once and get each allow-listed sub-tool enabled.
pub async fn resolve_step_tools(
    toolset: &mut ToolSet,
    registry: &ToolRegistry,
    filter: Option<&[String]>,
) {
    toolset.clear();

    let plugins = registry.enabled();
    let Some(names) = filter else {
        for plugin in plugins {
            toolset.add_plugin(plugin);
        }
        return;
    };

    for plugin in plugins {
        if !plugin.is_multi_tool() {
            if names.iter().any(|n| n == plugin.name()) {
                toolset.add_plugin(plugin);
            }
            continue;
        }

        let sub_tools = match plugin.tools().await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(
                    "[ToolSet] Failed to list tools of plugin {}: {}",
                    plugin.name(),
                    e
                );
                continue;
            }
        };

        for name in names {
            if sub_tools.iter().any(|t| &t.name == name) {
                toolset.add_plugin(plugin.clone());
                toolset.enable_tool(plugin.name(), name);
            }
        }
    }
}
