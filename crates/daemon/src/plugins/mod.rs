// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugin loader and tool host.
//!
//! Plugins are optional subsystems with an init/start/stop lifecycle and
//! optionally a tool/resource surface. A plugin that fails to come up is
//! logged and skipped; the core's own services keep running. Stop order
//! is the reverse of init order.

mod kv_store;

pub use kv_store::KvStorePlugin;

use async_trait::async_trait;
use mesh_core::config::PluginSettings;
use mesh_state::ClusterState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("plugin error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("unknown resource: {0}")]
    UnknownResource(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
}

/// A tool is a plain function over JSON arguments.
pub type ToolHandler =
    Arc<dyn Fn(serde_json::Value) -> Result<serde_json::Value, ToolError> + Send + Sync>;
/// A resource is a parameterless read keyed by URI.
pub type ResourceHandler =
    Arc<dyn Fn() -> Result<serde_json::Value, ToolError> + Send + Sync>;

/// What a plugin gets to work with. Component handles are passed
/// explicitly, never through process-wide singletons.
pub struct PluginContext {
    pub settings: PluginSettings,
    /// Per-plugin data directory (the plugin's own local store lives here).
    pub data_dir: PathBuf,
    /// Read access to the replicated state.
    pub state: Arc<RwLock<ClusterState>>,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;
    async fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError>;
    async fn start(&mut self) -> Result<(), PluginError>;
    async fn stop(&mut self) -> Result<(), PluginError>;

    /// Tool surface to merge into the host. Called after `start`.
    fn tools(&self) -> HashMap<String, ToolHandler> {
        HashMap::new()
    }

    /// Resource surface to merge into the host. Called after `start`.
    fn resources(&self) -> HashMap<String, ResourceHandler> {
        HashMap::new()
    }
}

/// Merged tool/resource surface of every started plugin.
#[derive(Default, Clone)]
pub struct ToolHost {
    tools: HashMap<String, ToolHandler>,
    resources: HashMap<String, ResourceHandler>,
}

impl ToolHost {
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke a tool; handler errors return to the caller, never crash
    /// the core.
    pub fn invoke(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let handler = self.tools.get(name).ok_or_else(|| ToolError::UnknownTool(name.into()))?;
        handler(args)
    }

    pub fn read_resource(&self, uri: &str) -> Result<serde_json::Value, ToolError> {
        let handler =
            self.resources.get(uri).ok_or_else(|| ToolError::UnknownResource(uri.into()))?;
        handler()
    }
}

/// Owns the started plugins so they can be stopped in reverse order.
pub struct PluginLoader {
    started: Vec<Box<dyn Plugin>>,
    host: ToolHost,
}

impl PluginLoader {
    /// Init + start every enabled plugin from the registry, merging tool
    /// surfaces. Disabled plugins are dropped; failing plugins are logged
    /// and skipped.
    pub async fn load(
        registry: Vec<Box<dyn Plugin>>,
        settings: &HashMap<String, PluginSettings>,
        data_dir: PathBuf,
        state: Arc<RwLock<ClusterState>>,
    ) -> Self {
        let mut loader = Self { started: Vec::new(), host: ToolHost::default() };

        for mut plugin in registry {
            let name = plugin.name();
            let plugin_settings = settings.get(name).cloned().unwrap_or_default();
            if !plugin_settings.enabled {
                continue;
            }
            let ctx = PluginContext {
                settings: plugin_settings,
                data_dir: data_dir.join(name),
                state: Arc::clone(&state),
            };
            if let Err(e) = plugin.init(&ctx).await {
                warn!(plugin = name, error = %e, "plugin init failed, skipping");
                continue;
            }
            if let Err(e) = plugin.start().await {
                warn!(plugin = name, error = %e, "plugin start failed, skipping");
                continue;
            }
            for (tool, handler) in plugin.tools() {
                loader.host.tools.insert(tool, handler);
            }
            for (uri, handler) in plugin.resources() {
                loader.host.resources.insert(uri, handler);
            }
            info!(plugin = name, "plugin started");
            loader.started.push(plugin);
        }
        loader
    }

    pub fn host(&self) -> ToolHost {
        self.host.clone()
    }

    pub fn started_names(&self) -> Vec<&'static str> {
        self.started.iter().map(|p| p.name()).collect()
    }

    /// Stop plugins in the reverse of init order.
    pub async fn shutdown(&mut self) {
        while let Some(mut plugin) = self.started.pop() {
            if let Err(e) = plugin.stop().await {
                warn!(plugin = plugin.name(), error = %e, "plugin stop failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "plugins_tests.rs"]
mod tests;
