// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use mesh_core::config::PluginSettings;
use parking_lot::Mutex;

/// Records lifecycle calls into a shared journal.
struct ProbePlugin {
    name: &'static str,
    journal: Arc<Mutex<Vec<String>>>,
    fail_init: bool,
}

impl ProbePlugin {
    fn boxed(
        name: &'static str,
        journal: &Arc<Mutex<Vec<String>>>,
        fail_init: bool,
    ) -> Box<dyn Plugin> {
        Box::new(Self { name, journal: Arc::clone(journal), fail_init })
    }
}

#[async_trait]
impl Plugin for ProbePlugin {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn init(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        self.journal.lock().push(format!("init {}", self.name));
        if self.fail_init {
            return Err(PluginError::Other("boom".into()));
        }
        Ok(())
    }

    async fn start(&mut self) -> Result<(), PluginError> {
        self.journal.lock().push(format!("start {}", self.name));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PluginError> {
        self.journal.lock().push(format!("stop {}", self.name));
        Ok(())
    }

    fn tools(&self) -> HashMap<String, ToolHandler> {
        let name = self.name;
        HashMap::from([(
            format!("{name}_echo"),
            Arc::new(move |args: serde_json::Value| {
                Ok(serde_json::json!({ "plugin": name, "args": args }))
            }) as ToolHandler,
        )])
    }
}

fn enabled() -> PluginSettings {
    PluginSettings { enabled: true, ..PluginSettings::default() }
}

fn test_state() -> Arc<RwLock<ClusterState>> {
    Arc::new(RwLock::new(ClusterState::default()))
}

#[tokio::test]
async fn loads_enabled_plugins_and_stops_in_reverse() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(Mutex::new(Vec::new()));
    let registry = vec![
        ProbePlugin::boxed("alpha", &journal, false),
        ProbePlugin::boxed("beta", &journal, false),
        ProbePlugin::boxed("gamma", &journal, false),
    ];
    let settings = HashMap::from([
        ("alpha".to_string(), enabled()),
        ("beta".to_string(), enabled()),
        // gamma stays disabled
    ]);

    let mut loader =
        PluginLoader::load(registry, &settings, dir.path().to_path_buf(), test_state()).await;
    assert_eq!(loader.started_names(), ["alpha", "beta"]);

    loader.shutdown().await;
    assert_eq!(
        *journal.lock(),
        [
            "init alpha",
            "start alpha",
            "init beta",
            "start beta",
            "stop beta",
            "stop alpha",
        ]
    );
}

#[tokio::test]
async fn failing_plugin_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(Mutex::new(Vec::new()));
    let registry = vec![
        ProbePlugin::boxed("broken", &journal, true),
        ProbePlugin::boxed("healthy", &journal, false),
    ];
    let settings = HashMap::from([
        ("broken".to_string(), enabled()),
        ("healthy".to_string(), enabled()),
    ]);

    let loader =
        PluginLoader::load(registry, &settings, dir.path().to_path_buf(), test_state()).await;
    assert_eq!(loader.started_names(), ["healthy"]);
    // The broken plugin contributed no tools.
    assert_eq!(loader.host().tool_names(), ["healthy_echo"]);
}

#[tokio::test]
async fn merged_tools_are_invokable_and_errors_return() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(Mutex::new(Vec::new()));
    let registry = vec![ProbePlugin::boxed("alpha", &journal, false)];
    let settings = HashMap::from([("alpha".to_string(), enabled())]);

    let loader =
        PluginLoader::load(registry, &settings, dir.path().to_path_buf(), test_state()).await;
    let host = loader.host();

    let result = host.invoke("alpha_echo", serde_json::json!({"x": 1})).unwrap();
    assert_eq!(result, serde_json::json!({"plugin": "alpha", "args": {"x": 1}}));

    assert!(matches!(
        host.invoke("missing_tool", serde_json::Value::Null),
        Err(ToolError::UnknownTool(_))
    ));
}

#[tokio::test]
async fn kv_store_round_trips_through_its_tools() {
    let dir = tempfile::tempdir().unwrap();
    let registry: Vec<Box<dyn Plugin>> = vec![Box::new(KvStorePlugin::new())];
    let settings = HashMap::from([("kv_store".to_string(), enabled())]);

    let mut loader =
        PluginLoader::load(registry, &settings, dir.path().to_path_buf(), test_state()).await;
    let host = loader.host();

    host.invoke("kv_set", serde_json::json!({"key": "region", "value": "eu-1"})).unwrap();
    let got = host.invoke("kv_get", serde_json::json!({"key": "region"})).unwrap();
    assert_eq!(got["value"], "eu-1");

    let keys = host.read_resource("kv://keys").unwrap();
    assert_eq!(keys, serde_json::json!(["region"]));

    // Persisted through stop: a fresh load sees the value.
    loader.shutdown().await;
    let registry: Vec<Box<dyn Plugin>> = vec![Box::new(KvStorePlugin::new())];
    let loader =
        PluginLoader::load(registry, &settings, dir.path().to_path_buf(), test_state()).await;
    let got = loader.host().invoke("kv_get", serde_json::json!({"key": "region"})).unwrap();
    assert_eq!(got["value"], "eu-1");
}
