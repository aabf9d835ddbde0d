// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in key/value plugin: a JSON-file-backed store with `kv_get` /
//! `kv_set` / `kv_delete` tools. Doubles as the reference implementation
//! of the plugin contract.

use super::{Plugin, PluginContext, PluginError, ResourceHandler, ToolError, ToolHandler};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Default)]
pub struct KvStorePlugin {
    store: Option<Arc<Store>>,
}

struct Store {
    path: PathBuf,
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl Store {
    fn load(path: PathBuf) -> Result<Self, PluginError> {
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| PluginError::Other(format!("corrupt kv store: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    fn persist(&self) -> Result<(), ToolError> {
        let entries = self.entries.lock();
        let bytes = serde_json::to_vec_pretty(&*entries)
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        std::fs::write(&self.path, bytes).map_err(|e| ToolError::Failed(e.to_string()))
    }
}

impl KvStorePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> Result<Arc<Store>, ToolError> {
        self.store
            .as_ref()
            .cloned()
            .ok_or_else(|| ToolError::Failed("kv store not initialized".into()))
    }
}

fn string_arg(args: &serde_json::Value, key: &str) -> Result<String, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string field {key:?}")))
}

#[async_trait]
impl Plugin for KvStorePlugin {
    fn name(&self) -> &'static str {
        "kv_store"
    }

    async fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        std::fs::create_dir_all(&ctx.data_dir)?;
        let store = Store::load(ctx.data_dir.join("kv.json"))?;
        self.store = Some(Arc::new(store));
        Ok(())
    }

    async fn start(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PluginError> {
        if let Some(store) = &self.store {
            store.persist().map_err(|e| PluginError::Other(e.to_string()))?;
        }
        Ok(())
    }

    fn tools(&self) -> HashMap<String, ToolHandler> {
        let mut tools: HashMap<String, ToolHandler> = HashMap::new();
        let Ok(store) = self.store() else {
            return tools;
        };

        let get_store = Arc::clone(&store);
        tools.insert(
            "kv_get".to_string(),
            Arc::new(move |args| {
                let key = string_arg(&args, "key")?;
                let value = get_store.entries.lock().get(&key).cloned();
                Ok(serde_json::json!({ "key": key, "value": value }))
            }),
        );

        let set_store = Arc::clone(&store);
        tools.insert(
            "kv_set".to_string(),
            Arc::new(move |args| {
                let key = string_arg(&args, "key")?;
                let value = args
                    .get("value")
                    .cloned()
                    .ok_or_else(|| ToolError::InvalidArguments("missing field \"value\"".into()))?;
                set_store.entries.lock().insert(key.clone(), value);
                set_store.persist()?;
                Ok(serde_json::json!({ "key": key, "ok": true }))
            }),
        );

        let del_store = store;
        tools.insert(
            "kv_delete".to_string(),
            Arc::new(move |args| {
                let key = string_arg(&args, "key")?;
                let removed = del_store.entries.lock().remove(&key).is_some();
                del_store.persist()?;
                Ok(serde_json::json!({ "key": key, "removed": removed }))
            }),
        );

        tools
    }

    fn resources(&self) -> HashMap<String, ResourceHandler> {
        let mut resources: HashMap<String, ResourceHandler> = HashMap::new();
        let Ok(store) = self.store() else {
            return resources;
        };
        resources.insert(
            "kv://keys".to_string(),
            Arc::new(move || {
                let mut keys: Vec<String> = store.entries.lock().keys().cloned().collect();
                keys.sort();
                Ok(serde_json::json!(keys))
            }),
        );
        resources
    }
}
