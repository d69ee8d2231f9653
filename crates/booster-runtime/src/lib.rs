//! # booster-runtime
//!
//! A deterministic, dependency-free [`InferenceBackend`] used by the server
//! binary and by every integration test. It stands in for the external
//! tensor-execution library: same trait, same call pattern, hash-derived
//! logits instead of real model weights.
//!
//! Determinism matters more than realism here — the same token sequence
//! always produces the same logits, so scheduler and sampler behavior is
//! reproducible end to end.

use std::time::Duration;

use booster_engine::{EngineError, InferenceBackend, ModelHandle, ModelSpec, Result, TokenId};

/// End-of-sequence token emitted by the stub.
pub const EOS_TOKEN: TokenId = 2;

/// First ID handed out for vocabulary words; 0..3 are reserved.
const FIRST_WORD_TOKEN: TokenId = 3;

/// Word list used by `detokenize`; token IDs map onto it cyclically.
const WORDS: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "pack", "my", "box", "with",
    "five", "dozen", "jugs", "liquor",
];

/// Deterministic stub backend.
///
/// Builder knobs exist for tests: a forced forward failure, a per-step
/// delay (to trip deadlines), and a sequence length at which the EOS logit
/// dominates (to terminate generation naturally).
pub struct StubBackend {
    vocab_size: usize,
    eos_at_len: usize,
    step_delay: Option<Duration>,
    forward_failure: Option<String>,
    batching: bool,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            vocab_size: 64,
            eos_at_len: usize::MAX,
            step_delay: None,
            forward_failure: None,
            batching: false,
        }
    }

    /// Force EOS to dominate once the sequence reaches `len` tokens.
    pub fn with_eos_at(mut self, len: usize) -> Self {
        self.eos_at_len = len;
        self
    }

    /// Sleep this long inside every forward pass.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    /// Make every forward pass fail with the given message.
    pub fn with_forward_failure(mut self, message: impl Into<String>) -> Self {
        self.forward_failure = Some(message.into());
        self
    }

    /// Report batching support, so the scheduler forms batch groups.
    pub fn with_batching(mut self) -> Self {
        self.batching = true;
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for StubBackend {
    fn load_model(&self, spec: &ModelSpec) -> Result<ModelHandle> {
        Ok(ModelHandle::new(&spec.name, spec.context_len))
    }

    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        Ok(text
            .split_whitespace()
            .map(|word| {
                let range = (self.vocab_size as u64) - FIRST_WORD_TOKEN as u64;
                FIRST_WORD_TOKEN + (fnv1a(word.as_bytes()) % range) as TokenId
            })
            .collect())
    }

    fn detokenize(&self, tokens: &[TokenId]) -> Result<String> {
        let mut out = String::new();
        for &token in tokens {
            if token == EOS_TOKEN {
                continue;
            }
            out.push_str(WORDS[(token as usize) % WORDS.len()]);
            out.push(' ');
        }
        Ok(out)
    }

    fn forward(&self, handle: &ModelHandle, tokens: &[TokenId]) -> Result<Vec<f32>> {
        if let Some(message) = &self.forward_failure {
            return Err(EngineError::Inference(message.clone()));
        }
        if let Some(delay) = self.step_delay {
            std::thread::sleep(delay);
        }

        // Logits derived from the handle name and the full sequence: the
        // same request always decodes the same way.
        let mut seed = fnv1a(handle.name.as_bytes());
        for &token in tokens {
            seed = mix(seed ^ token as u64);
        }

        let mut logits = Vec::with_capacity(self.vocab_size);
        for i in 0..self.vocab_size {
            let h = mix(seed.wrapping_add(i as u64));
            logits.push((h % 1000) as f32 / 250.0);
        }
        // Reserved IDs stay out of the running unless EOS is due.
        logits[0] = f32::NEG_INFINITY;
        logits[1] = f32::NEG_INFINITY;
        logits[EOS_TOKEN as usize] = if tokens.len() >= self.eos_at_len {
            50.0
        } else {
            f32::NEG_INFINITY
        };
        Ok(logits)
    }

    fn supports_batching(&self) -> bool {
        self.batching
    }

    fn eos_token(&self) -> TokenId {
        EOS_TOKEN
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn mix(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^ (x >> 33)
}
