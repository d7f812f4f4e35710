#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use switchboard::config::{ConfigDefaults, PoolConfig, RegistryConfig};
use switchboard::instance::{InstanceConfig, ModelSelector, NodeOverride};
use switchboard::logging::UsageLogger;
use switchboard::reload::InMemoryBroker;
use switchboard::store::InMemoryConfigStore;
use switchboard::{
    ChangeDetector, InstanceBuilder, OrchestratorInstance, PoolManager, SharedResources, SwitchboardService,
};
use switchboard_agent::backend::{MockModel, ToolDefinition};
use switchboard_agent::plugin::{PluginAgent, PluginMetadata, ToolPlugin};
use switchboard_agent::{ModelClient, ModelClientFactory, ModelError, ModelSpec, PluginError, PluginFactory, PluginRegistry};

/// Hands out pre-scripted mocks by model name and counts client creation.
#[derive(Default)]
pub struct ScriptedModels {
    models: Mutex<HashMap<String, Arc<MockModel>>>,
    /// Remaining failed creations per model name
    failures: Mutex<HashMap<String, usize>>,
    attempts: Mutex<HashMap<String, usize>>,
    creates: AtomicUsize,
}

impl ScriptedModels {
    pub fn script(&self, name: &str, model: MockModel) -> Arc<MockModel> {
        let model = Arc::new(model);
        if let Ok(mut models) = self.models.lock() {
            models.insert(name.to_string(), model.clone());
        }
        model
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Fail the next `times` creations of `name`; `usize::MAX` never recovers.
    pub fn fail(&self, name: &str, times: usize) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(name.to_string(), times);
        }
    }

    /// Creation attempts for `name`, failed ones included.
    pub fn attempts(&self, name: &str) -> usize {
        self.attempts
            .lock()
            .map(|attempts| attempts.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl ModelClientFactory for ScriptedModels {
    fn create(&self, spec: &ModelSpec) -> Result<Arc<dyn ModelClient>, ModelError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut attempts) = self.attempts.lock() {
            *attempts.entry(spec.model.clone()).or_insert(0) += 1;
        }
        if let Ok(mut failures) = self.failures.lock() {
            if let Some(remaining) = failures.get_mut(&spec.model) {
                if *remaining > 0 {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    return Err(ModelError::Unavailable(format!("{} is down", spec.model)));
                }
            }
        }
        let mut models = self
            .models
            .lock()
            .map_err(|_| ModelError::RequestFailed("poisoned".into()))?;
        let model = models
            .entry(spec.model.clone())
            .or_insert_with(|| Arc::new(MockModel::new(spec.model.clone())))
            .clone();
        Ok(model)
    }
}

struct Forward(Arc<ScriptedModels>);

impl ModelClientFactory for Forward {
    fn create(&self, spec: &ModelSpec) -> Result<Arc<dyn ModelClient>, ModelError> {
        self.0.create(spec)
    }
}

/// Wraps a plugin and counts agent creation, i.e. builds that bound it.
pub struct CountingPlugin {
    inner: ToolPlugin,
    agents: AtomicUsize,
}

impl CountingPlugin {
    pub fn new(inner: ToolPlugin) -> Self {
        Self {
            inner,
            agents: AtomicUsize::new(0),
        }
    }

    pub fn agents(&self) -> usize {
        self.agents.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PluginFactory for CountingPlugin {
    fn metadata(&self) -> &PluginMetadata {
        self.inner.metadata()
    }

    fn validate(&self, settings: &serde_json::Value) -> Result<(), PluginError> {
        self.inner.validate(settings)
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        self.inner.tools()
    }

    fn create_agent(
        &self,
        model: Arc<dyn ModelClient>,
        settings: &serde_json::Value,
    ) -> Result<Arc<dyn PluginAgent>, PluginError> {
        self.agents.fetch_add(1, Ordering::SeqCst);
        self.inner.create_agent(model, settings)
    }
}

pub fn math_plugin(stateless: bool) -> ToolPlugin {
    let metadata = PluginMetadata::new("math", "math", "Arithmetic questions");
    let metadata = if stateless { metadata } else { metadata.stateful() };
    ToolPlugin::new(metadata, "You solve arithmetic problems.").with_tool(
        ToolDefinition::new(
            "add",
            "Add two numbers",
            serde_json::json!({
                "type": "object",
                "properties": {"a": {"type": "number"}, "b": {"type": "number"}}
            }),
        ),
        |args| {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok((a + b).to_string())
        },
    )
}

/// Everything a test needs, wired with in-memory backends.
pub struct Harness {
    pub pool: Arc<PoolManager>,
    pub store: Arc<InMemoryConfigStore>,
    pub broker: Arc<InMemoryBroker>,
    pub models: Arc<ScriptedModels>,
    pub math: Arc<CountingPlugin>,
    pub resources: SharedResources,
    pub builder: InstanceBuilder,
    pub service: Arc<SwitchboardService>,
}

pub async fn harness(max_hot: usize, stateless_math: bool) -> Harness {
    let config = PoolConfig {
        max_hot_pool_size: max_hot,
        capacity_wait: Duration::from_millis(100),
        drain_timeout: Duration::from_secs(2),
        ..PoolConfig::default()
    };
    harness_with(config, stateless_math).await
}

pub async fn harness_with(config: PoolConfig, stateless_math: bool) -> Harness {
    let models = Arc::new(ScriptedModels::default());
    let resources = SharedResources::new(Arc::new(Forward(models.clone())), RegistryConfig::default());

    let plugins = PluginRegistry::new();
    let math = Arc::new(CountingPlugin::new(math_plugin(stateless_math)));
    plugins.register(math.clone()).await;

    let builder = InstanceBuilder::new(plugins, resources.clone(), Arc::new(ConfigDefaults::default()));
    let store = Arc::new(InMemoryConfigStore::new());
    let broker = Arc::new(InMemoryBroker::default());
    let pool = Arc::new(PoolManager::new(store.clone(), builder.clone(), config));

    let changes = ChangeDetector::new(store.clone(), broker.clone(), builder.clone(), "node-test");
    let service = Arc::new(SwitchboardService::new(pool.clone(), changes, UsageLogger::new("node-test")));

    Harness {
        pool,
        store,
        broker,
        models,
        math,
        resources,
        builder,
        service,
    }
}

/// An instance whose coordinator, math agent and terminal nodes use
/// separately scripted models.
pub fn math_bot(instance_id: &str) -> OrchestratorInstance {
    tenant_bot("tenant-1", instance_id, "coord")
}

/// Like [`math_bot`], for `tenant_id`, with the coordinator on `coordinator_model`.
pub fn tenant_bot(tenant_id: &str, instance_id: &str, coordinator_model: &str) -> OrchestratorInstance {
    let node = |model: &str| NodeOverride {
        model: Some(ModelSelector::model(model)),
        prompt_override: None,
    };
    OrchestratorInstance::new(tenant_id, instance_id)
        .with_id(instance_id)
        .with_plugin("math".parse().unwrap())
        .with_config(
            InstanceConfig::default()
                .with_default_model(ModelSelector::model("final"))
                .with_node("coordinator", node(coordinator_model))
                .with_node("math", node("math")),
        )
}
