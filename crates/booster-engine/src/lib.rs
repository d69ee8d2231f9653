//! # booster-engine
//!
//! The "narrow waist" of the booster stack. Defines the core [`InferenceBackend`]
//! trait and associated types that all other crates depend on. Implementations can
//! swap the underlying tensor-execution library without changing application code.
//!
//! ## Design Notes
//!
//! ### Interior Mutability
//! `InferenceBackend` methods take `&self` (not `&mut self`) so a single backend
//! instance can serve many pods and requests concurrently. Backends using interior
//! mutability (e.g., `Mutex`, `Arc<RwLock>`) are responsible for thread-safe state
//! management.
//!
//! ### Token Type
//! `TokenId` is aliased as `i32` for FFI compatibility, though token IDs are
//! logically non-negative.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Top-level error type for all backend operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),
    #[error("tokenization failed: {0}")]
    Tokenization(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Specification for loading a model.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    /// Human-readable model name (reported in API responses).
    pub name: String,
    /// Path to the weight file on disk.
    pub weight_path: PathBuf,
    /// Maximum total tokens (prompt + generated) per request.
    pub context_len: usize,
    /// Maximum tokens generated per request.
    pub max_predict: usize,
}

/// Opaque handle to a loaded model.
///
/// Handles are `Arc`-shared by every pod referencing the model; concurrent
/// read access (inference) is safe, load/unload go through the registry's
/// exclusive path.
#[derive(Debug)]
pub struct ModelHandle {
    /// Unique identity of this load (a reload yields a fresh handle).
    pub id: uuid::Uuid,
    /// Model name, carried for logging.
    pub name: String,
    /// Context window of the loaded model.
    pub context_len: usize,
}

impl ModelHandle {
    pub fn new(name: impl Into<String>, context_len: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            context_len,
        }
    }
}

/// The inference boundary — everything else plugs into this.
///
/// The core never reimplements tensor math: `forward` is supplied by an
/// external execution library and returns full-vocabulary logits for the
/// next-token position.
pub trait InferenceBackend: Send + Sync {
    /// Load a model given a specification. The weight path has already been
    /// checked for existence by the registry.
    fn load_model(&self, spec: &ModelSpec) -> Result<ModelHandle>;

    /// Release backend resources for a handle. Default is a no-op for
    /// backends without explicit unload.
    fn unload_model(&self, _handle: &ModelHandle) -> Result<()> {
        Ok(())
    }

    /// Convert text into a sequence of token IDs.
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Convert token IDs back into text.
    fn detokenize(&self, tokens: &[TokenId]) -> Result<String>;

    /// Run one forward pass over the full token sequence, returning logits
    /// for the next-token position (`vocab_size` entries).
    fn forward(&self, handle: &ModelHandle, tokens: &[TokenId]) -> Result<Vec<f32>>;

    /// Batched forward pass over several sequences. Backends that support
    /// true batching override this; the default processes serially.
    fn forward_batch(
        &self,
        handle: &ModelHandle,
        sequences: &[&[TokenId]],
    ) -> Result<Vec<Vec<f32>>> {
        sequences
            .iter()
            .map(|seq| self.forward(handle, seq))
            .collect()
    }

    /// Whether `forward_batch` groups sequences into a single model
    /// invocation. The scheduler only forms batch groups when this is true.
    fn supports_batching(&self) -> bool {
        false
    }

    /// End-of-sequence token ID.
    fn eos_token(&self) -> TokenId;

    /// Size of the vocabulary (length of each logits vector).
    fn vocab_size(&self) -> usize;
}
