//! # booster-registry
//!
//! The process-wide registry of loadable models. Built from configuration at
//! startup, torn down at shutdown; the one explicitly owned piece of shared
//! mutable state in the server.
//!
//! Lookups after load are read-only (`RwLock` read guard, handles shared via
//! `Arc`); load and unload take the write lock, so they are mutually
//! exclusive per registry. A model that fails to load is marked unavailable
//! and leaves every other model serving.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use booster_config::ModelConfig;
use booster_engine::{InferenceBackend, ModelHandle, ModelSpec};

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("model {0} is not registered")]
    NotFound(String),
    #[error("model {name} is unavailable: {reason}")]
    Unavailable { name: String, reason: String },
    #[error("model {0} is not loaded")]
    NotLoaded(String),
}

/// Load lifecycle of a registered model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loaded,
    Failed(String),
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Unloaded => "unloaded",
            LoadState::Loaded => "loaded",
            LoadState::Failed(_) => "failed",
        }
    }
}

/// A successfully loaded model, as handed to the scheduler. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub handle: Arc<ModelHandle>,
    pub spec: ModelSpec,
}

struct ModelEntry {
    spec: ModelSpec,
    state: LoadState,
    handle: Option<Arc<ModelHandle>>,
}

/// Registry of model definitions and their loaded handles.
pub struct ModelRegistry {
    backend: Arc<dyn InferenceBackend>,
    models: RwLock<HashMap<String, ModelEntry>>,
}

impl ModelRegistry {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            backend,
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Register a model definition without loading it.
    pub fn register(&self, id: impl Into<String>, spec: ModelSpec) {
        let mut models = self.models.write().expect("registry lock poisoned");
        models.insert(
            id.into(),
            ModelEntry {
                spec,
                state: LoadState::Unloaded,
                handle: None,
            },
        );
    }

    /// Load a registered model. Validates the weight path before touching the
    /// backend; any failure marks the entry `Failed` without unregistering it.
    pub fn load(&self, id: &str) -> Result<()> {
        let mut models = self.models.write().expect("registry lock poisoned");
        let entry = models
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if let Err(reason) = check_weight_file(&entry.spec) {
            entry.state = LoadState::Failed(reason.clone());
            tracing::warn!(model = id, %reason, "model load failed");
            return Err(RegistryError::Unavailable {
                name: id.to_string(),
                reason,
            });
        }

        match self.backend.load_model(&entry.spec) {
            Ok(handle) => {
                tracing::info!(model = id, name = %entry.spec.name, "model loaded");
                entry.handle = Some(Arc::new(handle));
                entry.state = LoadState::Loaded;
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                entry.state = LoadState::Failed(reason.clone());
                tracing::warn!(model = id, %reason, "model load failed");
                Err(RegistryError::Unavailable {
                    name: id.to_string(),
                    reason,
                })
            }
        }
    }

    /// Register and load every configured model. Load failures are logged
    /// and isolated; returns how many models came up.
    pub fn load_all(&self, models: &BTreeMap<String, ModelConfig>) -> usize {
        let mut loaded = 0;
        for (id, model) in models {
            self.register(
                id.clone(),
                ModelSpec {
                    name: model.name.clone(),
                    weight_path: model.path.clone(),
                    context_len: model.context,
                    max_predict: model.predict,
                },
            );
            if self.load(id).is_ok() {
                loaded += 1;
            }
        }
        loaded
    }

    /// Look up a loaded model. Read-only; safe under concurrent inference.
    pub fn get(&self, id: &str) -> Result<LoadedModel> {
        let models = self.models.read().expect("registry lock poisoned");
        let entry = models
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        match (&entry.state, &entry.handle) {
            (LoadState::Loaded, Some(handle)) => Ok(LoadedModel {
                handle: Arc::clone(handle),
                spec: entry.spec.clone(),
            }),
            (LoadState::Failed(reason), _) => Err(RegistryError::Unavailable {
                name: id.to_string(),
                reason: reason.clone(),
            }),
            _ => Err(RegistryError::NotLoaded(id.to_string())),
        }
    }

    /// Current load state, if the model is registered.
    pub fn state(&self, id: &str) -> Option<LoadState> {
        let models = self.models.read().expect("registry lock poisoned");
        models.get(id).map(|entry| entry.state.clone())
    }

    /// Unload one model, releasing its backend handle.
    pub fn unload(&self, id: &str) -> Result<()> {
        let mut models = self.models.write().expect("registry lock poisoned");
        let entry = models
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if let Some(handle) = entry.handle.take() {
            if let Err(err) = self.backend.unload_model(&handle) {
                tracing::warn!(model = id, error = %err, "backend unload reported an error");
            }
        }
        entry.state = LoadState::Unloaded;
        tracing::info!(model = id, "model unloaded");
        Ok(())
    }

    /// Unload every model; called on shutdown.
    pub fn unload_all(&self) {
        let ids: Vec<String> = {
            let models = self.models.read().expect("registry lock poisoned");
            models.keys().cloned().collect()
        };
        for id in ids {
            let _ = self.unload(&id);
        }
    }

    /// Snapshot of every model's load state, for the health endpoint.
    pub fn states(&self) -> BTreeMap<String, LoadState> {
        let models = self.models.read().expect("registry lock poisoned");
        models
            .iter()
            .map(|(id, entry)| (id.clone(), entry.state.clone()))
            .collect()
    }
}

/// The weight file must exist and be readable before the backend sees it.
fn check_weight_file(spec: &ModelSpec) -> std::result::Result<(), String> {
    match std::fs::File::open(&spec.weight_path) {
        Ok(_) => Ok(()),
        Err(err) => Err(format!(
            "weight file {} is not readable: {err}",
            spec.weight_path.display()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booster_runtime::StubBackend;
    use std::path::PathBuf;

    /// Create a real (empty) weight file in the system temp directory.
    fn temp_weight_file() -> PathBuf {
        let path = std::env::temp_dir().join(format!("booster-weights-{}.gguf", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"stub-weights").unwrap();
        path
    }

    fn spec(path: PathBuf) -> ModelSpec {
        ModelSpec {
            name: "test-model".to_string(),
            weight_path: path,
            context_len: 2048,
            max_predict: 256,
        }
    }

    #[test]
    fn load_and_get_roundtrip() {
        let path = temp_weight_file();
        let registry = ModelRegistry::new(Arc::new(StubBackend::new()));
        registry.register("m", spec(path.clone()));
        registry.load("m").unwrap();

        let model = registry.get("m").unwrap();
        assert_eq!(model.spec.name, "test-model");
        assert_eq!(model.handle.context_len, 2048);
        assert_eq!(registry.state("m"), Some(LoadState::Loaded));

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_weight_file_marks_failed() {
        let registry = ModelRegistry::new(Arc::new(StubBackend::new()));
        registry.register("m", spec(PathBuf::from("/nonexistent/weights.gguf")));

        let err = registry.load("m").unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable { .. }));
        assert!(matches!(registry.state("m"), Some(LoadState::Failed(_))));

        // Lookup reports the stored failure reason.
        let err = registry.get("m").unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable { .. }));
    }

    #[test]
    fn failed_model_leaves_siblings_loaded() {
        let path = temp_weight_file();
        let registry = ModelRegistry::new(Arc::new(StubBackend::new()));
        registry.register("good", spec(path.clone()));
        registry.register("bad", spec(PathBuf::from("/nonexistent/weights.gguf")));

        assert!(registry.load("good").is_ok());
        assert!(registry.load("bad").is_err());
        assert!(registry.get("good").is_ok());

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn unknown_model_not_found() {
        let registry = ModelRegistry::new(Arc::new(StubBackend::new()));
        assert!(matches!(
            registry.get("ghost").unwrap_err(),
            RegistryError::NotFound(_)
        ));
        assert!(matches!(
            registry.load("ghost").unwrap_err(),
            RegistryError::NotFound(_)
        ));
    }

    #[test]
    fn registered_but_unloaded() {
        let path = temp_weight_file();
        let registry = ModelRegistry::new(Arc::new(StubBackend::new()));
        registry.register("m", spec(path.clone()));
        assert!(matches!(
            registry.get("m").unwrap_err(),
            RegistryError::NotLoaded(_)
        ));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn unload_releases_handle() {
        let path = temp_weight_file();
        let registry = ModelRegistry::new(Arc::new(StubBackend::new()));
        registry.register("m", spec(path.clone()));
        registry.load("m").unwrap();
        registry.unload("m").unwrap();

        assert_eq!(registry.state("m"), Some(LoadState::Unloaded));
        assert!(registry.get("m").is_err());

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn states_snapshot_for_health() {
        let path = temp_weight_file();
        let registry = ModelRegistry::new(Arc::new(StubBackend::new()));
        registry.register("a", spec(path.clone()));
        registry.register("b", spec(PathBuf::from("/nonexistent/weights.gguf")));
        let _ = registry.load("a");
        let _ = registry.load("b");

        let states = registry.states();
        assert_eq!(states["a"], LoadState::Loaded);
        assert!(matches!(states["b"], LoadState::Failed(_)));

        std::fs::remove_file(path).unwrap();
    }
}
