//! # booster-config
//!
//! Configuration model for the booster server. A single YAML document
//! describes the network endpoint, the loadable models, the prompt
//! templates, the sampling strategies, and the pods that bind them together:
//!
//! ```yaml
//! id: booster-main
//! host: 0.0.0.0
//! port: 8085
//! log: info
//! deadline: 180
//! pods:
//!   chat:
//!     model: mistral
//!     prompt: chat-en
//!     sampling: janus-default
//!     threads: 2
//!     gpus: [50]
//!     batch: 4
//! models:
//!   mistral:
//!     name: mistral-7b-instruct
//!     path: /models/mistral-7b.gguf
//!     context: 8K
//!     predict: 1K
//! prompts:
//!   chat-en:
//!     locale: en_US
//!     prompt: "You are a helpful assistant."
//!     system: "<|system|>{SYSTEM}</s>"
//!     user: "<|user|>{USER}</s>"
//!     assistant: "<|assistant|>{ASSISTANT}"
//! samplings:
//!   janus-default:
//!     strategy: janus
//!     depth: 64
//!     scale: 1.15
//!     hi: 0.92
//!     lo: 0.05
//!     temp: 0.8
//! ```
//!
//! Configuration errors are fatal at startup: every cross-reference
//! (pod → model/prompt/sampling), every GPU budget, and every strategy
//! parameter is validated before a pod accepts its first request.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("pod {pod} references unknown model {model}")]
    UnknownModel { pod: String, model: String },
    #[error("pod {pod} references unknown prompt {prompt}")]
    UnknownPrompt { pod: String, prompt: String },
    #[error("pod {pod} references unknown sampling {sampling}")]
    UnknownSampling { pod: String, sampling: String },
    #[error("pod {pod}: thread count must be at least 1")]
    ZeroThreads { pod: String },
    #[error("pod {pod}: batch size must be at least 1")]
    ZeroBatch { pod: String },
    #[error("pod {pod}: gpu allocation {percent}% exceeds 100%")]
    GpuOutOfRange { pod: String, percent: u16 },
    #[error("gpu {index} oversubscribed: pods reserve {total}% in total")]
    GpuOversubscribed { index: usize, total: u32 },
    #[error("sampling {name}: {detail}")]
    InvalidSampling { name: String, detail: String },
}

/// Top-level booster configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoosterConfig {
    /// Instance identifier, reported by the health endpoint.
    pub id: String,
    #[serde(default = "defaults::host")]
    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
    /// Tracing filter directive (e.g. `info`, `booster=debug`).
    #[serde(default = "defaults::log")]
    pub log: String,
    /// Default per-request deadline in seconds.
    #[serde(default = "defaults::deadline")]
    pub deadline: u64,
    #[serde(default)]
    pub debug: bool,
    pub pods: BTreeMap<String, PodSpec>,
    pub models: BTreeMap<String, ModelConfig>,
    pub prompts: BTreeMap<String, PromptSpec>,
    pub samplings: BTreeMap<String, SamplingSpec>,
}

/// A pod: a named binding of model + prompt + sampling with resource limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PodSpec {
    pub model: String,
    pub prompt: String,
    pub sampling: String,
    #[serde(default = "defaults::threads")]
    pub threads: usize,
    /// Soft GPU reservation, percent per physical GPU index.
    #[serde(default)]
    pub gpus: Vec<u16>,
    #[serde(default = "defaults::batch")]
    pub batch: usize,
}

/// A loadable model definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub name: String,
    pub path: PathBuf,
    /// Context window; accepts `8192` or a human string like `"8K"`.
    #[serde(deserialize_with = "de_size")]
    pub context: usize,
    /// Prediction budget; same size syntax as `context`.
    #[serde(deserialize_with = "de_size")]
    pub predict: usize,
}

/// A prompt template definition. Formats may contain the placeholders
/// `{DATE}`, `{USER}`, `{PROMPT}`, `{ASSISTANT}`, `{SYSTEM}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptSpec {
    /// Locale tag, carried as metadata only.
    #[serde(default)]
    pub locale: String,
    /// Base prompt text, substituted for `{PROMPT}` (and `{SYSTEM}` when no
    /// per-request override is given).
    pub prompt: String,
    pub system: String,
    pub user: String,
    pub assistant: String,
}

/// A sampling strategy. The set is closed: unknown strategy names fail at
/// parse time rather than at request time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum SamplingSpec {
    /// Janus sampling: temperature scaling, a repetition penalty over a
    /// rolling window of `depth` tokens, and a dual-bound cumulative-mass
    /// cutoff (`lo` guarantees a minimum nucleus, `hi` caps it).
    Janus {
        #[serde(default = "defaults::depth")]
        depth: usize,
        #[serde(default = "defaults::scale")]
        scale: f32,
        #[serde(default = "defaults::hi")]
        hi: f32,
        #[serde(default = "defaults::lo")]
        lo: f32,
        #[serde(default = "defaults::temp")]
        temp: f32,
    },
    /// Argmax selection, no randomness.
    Greedy,
}

impl SamplingSpec {
    fn validate(&self, name: &str) -> Result<()> {
        let fail = |detail: String| ConfigError::InvalidSampling {
            name: name.to_string(),
            detail,
        };
        match *self {
            SamplingSpec::Janus {
                scale,
                hi,
                lo,
                temp,
                ..
            } => {
                if temp <= 0.0 {
                    return Err(fail(format!("temp must be > 0, got {temp}")));
                }
                if scale <= 0.0 {
                    return Err(fail(format!("scale must be > 0, got {scale}")));
                }
                if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) {
                    return Err(fail(format!("hi/lo must lie in [0, 1], got hi={hi} lo={lo}")));
                }
                if lo > hi {
                    return Err(fail(format!("lo ({lo}) must not exceed hi ({hi})")));
                }
                Ok(())
            }
            SamplingSpec::Greedy => Ok(()),
        }
    }
}

impl fmt::Display for SamplingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingSpec::Janus { .. } => write!(f, "janus"),
            SamplingSpec::Greedy => write!(f, "greedy"),
        }
    }
}

impl BoosterConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&text)
    }

    /// Parse and validate a configuration document.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self> {
        let config: BoosterConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-references, resource budgets, and strategy parameters.
    pub fn validate(&self) -> Result<()> {
        for (id, pod) in &self.pods {
            if !self.models.contains_key(&pod.model) {
                return Err(ConfigError::UnknownModel {
                    pod: id.clone(),
                    model: pod.model.clone(),
                });
            }
            if !self.prompts.contains_key(&pod.prompt) {
                return Err(ConfigError::UnknownPrompt {
                    pod: id.clone(),
                    prompt: pod.prompt.clone(),
                });
            }
            if !self.samplings.contains_key(&pod.sampling) {
                return Err(ConfigError::UnknownSampling {
                    pod: id.clone(),
                    sampling: pod.sampling.clone(),
                });
            }
            if pod.threads == 0 {
                return Err(ConfigError::ZeroThreads { pod: id.clone() });
            }
            if pod.batch == 0 {
                return Err(ConfigError::ZeroBatch { pod: id.clone() });
            }
            for &percent in &pod.gpus {
                if percent > 100 {
                    return Err(ConfigError::GpuOutOfRange {
                        pod: id.clone(),
                        percent,
                    });
                }
            }
        }

        // Across pods, reservations per physical GPU index must not exceed 100%.
        let mut per_gpu: BTreeMap<usize, u32> = BTreeMap::new();
        for pod in self.pods.values() {
            for (index, &percent) in pod.gpus.iter().enumerate() {
                *per_gpu.entry(index).or_default() += u32::from(percent);
            }
        }
        for (index, total) in per_gpu {
            if total > 100 {
                return Err(ConfigError::GpuOversubscribed { index, total });
            }
        }

        for (name, sampling) in &self.samplings {
            sampling.validate(name)?;
        }
        Ok(())
    }

    /// The default request deadline as a `Duration`.
    pub fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.deadline)
    }

    /// Effective tracing filter: `debug: true` lowers the floor to `debug`.
    pub fn log_filter(&self) -> String {
        if self.debug && self.log == defaults::log() {
            "debug".to_string()
        } else {
            self.log.clone()
        }
    }
}

/// Parse a human token-count string: `"8K"` → 8192, `"2M"` → 2097152,
/// `"512"` → 512.
pub fn parse_size(text: &str) -> std::result::Result<usize, String> {
    let text = text.trim();
    let (digits, multiplier) = match text.chars().last() {
        Some('k') | Some('K') => (&text[..text.len() - 1], 1024),
        Some('m') | Some('M') => (&text[..text.len() - 1], 1024 * 1024),
        _ => (text, 1),
    };
    let value: usize = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size {text:?}"))?;
    Ok(value * multiplier)
}

fn de_size<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(usize),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

mod defaults {
    pub fn host() -> String {
        "127.0.0.1".to_string()
    }
    pub fn port() -> u16 {
        8085
    }
    pub fn log() -> String {
        "info".to_string()
    }
    pub fn deadline() -> u64 {
        180
    }
    pub fn threads() -> usize {
        1
    }
    pub fn batch() -> usize {
        1
    }
    pub fn depth() -> usize {
        64
    }
    pub fn scale() -> f32 {
        1.1
    }
    pub fn hi() -> f32 {
        1.0
    }
    pub fn lo() -> f32 {
        0.0
    }
    pub fn temp() -> f32 {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
id: booster-test
host: 127.0.0.1
port: 8085
log: info
deadline: 180
debug: false
pods:
  chat:
    model: mistral
    prompt: chat-en
    sampling: janus-default
    threads: 2
    gpus: [50]
    batch: 4
models:
  mistral:
    name: mistral-7b-instruct
    path: /models/mistral-7b.gguf
    context: 8K
    predict: 1K
prompts:
  chat-en:
    locale: en_US
    prompt: "You are a helpful assistant."
    system: "<|system|>{SYSTEM}</s>"
    user: "<|user|>{USER}</s>"
    assistant: "<|assistant|>{ASSISTANT}"
samplings:
  janus-default:
    strategy: janus
    depth: 64
    scale: 1.15
    hi: 0.92
    lo: 0.05
    temp: 0.8
"#;

    #[test]
    fn parses_sample_config() {
        let config = BoosterConfig::from_str(SAMPLE).unwrap();
        assert_eq!(config.id, "booster-test");
        assert_eq!(config.port, 8085);
        let model = &config.models["mistral"];
        assert_eq!(model.context, 8192);
        assert_eq!(model.predict, 1024);
        let pod = &config.pods["chat"];
        assert_eq!(pod.threads, 2);
        assert_eq!(pod.gpus, vec![50]);
        assert_eq!(pod.batch, 4);
    }

    #[test]
    fn parses_janus_parameters() {
        let config = BoosterConfig::from_str(SAMPLE).unwrap();
        match config.samplings["janus-default"] {
            SamplingSpec::Janus {
                depth,
                scale,
                hi,
                lo,
                temp,
            } => {
                assert_eq!(depth, 64);
                assert!((scale - 1.15).abs() < 1e-6);
                assert!((hi - 0.92).abs() < 1e-6);
                assert!((lo - 0.05).abs() < 1e-6);
                assert!((temp - 0.8).abs() < 1e-6);
            }
            ref other => panic!("expected janus, got {other}"),
        }
    }

    #[test]
    fn size_strings() {
        assert_eq!(parse_size("8K").unwrap(), 8192);
        assert_eq!(parse_size("1k").unwrap(), 1024);
        assert_eq!(parse_size("2M").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("512").unwrap(), 512);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn unknown_strategy_fails_at_parse_time() {
        let text = SAMPLE.replace("strategy: janus", "strategy: mirostat");
        let err = BoosterConfig::from_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn unknown_model_reference_rejected() {
        let text = SAMPLE.replace("model: mistral\n", "model: missing\n");
        let err = BoosterConfig::from_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModel { .. }), "got {err:?}");
    }

    #[test]
    fn gpu_percent_over_100_rejected() {
        let text = SAMPLE.replace("gpus: [50]", "gpus: [120]");
        let err = BoosterConfig::from_str(&text).unwrap_err();
        assert!(
            matches!(err, ConfigError::GpuOutOfRange { percent: 120, .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn gpu_index_oversubscription_rejected() {
        let text = SAMPLE.replace(
            "pods:\n  chat:",
            "pods:\n  second:\n    model: mistral\n    prompt: chat-en\n    sampling: janus-default\n    threads: 1\n    gpus: [60]\n    batch: 1\n  chat:",
        );
        let err = BoosterConfig::from_str(&text).unwrap_err();
        assert!(
            matches!(err, ConfigError::GpuOversubscribed { index: 0, total: 110 }),
            "got {err:?}"
        );
    }

    #[test]
    fn janus_bounds_validated() {
        let text = SAMPLE.replace("temp: 0.8", "temp: 0.0");
        assert!(matches!(
            BoosterConfig::from_str(&text).unwrap_err(),
            ConfigError::InvalidSampling { .. }
        ));

        let text = SAMPLE.replace("lo: 0.05", "lo: 0.95");
        assert!(matches!(
            BoosterConfig::from_str(&text).unwrap_err(),
            ConfigError::InvalidSampling { .. }
        ));
    }

    #[test]
    fn zero_threads_rejected() {
        let text = SAMPLE.replace("threads: 2", "threads: 0");
        assert!(matches!(
            BoosterConfig::from_str(&text).unwrap_err(),
            ConfigError::ZeroThreads { .. }
        ));
    }

    #[test]
    fn defaults_applied() {
        let text = r#"
id: minimal
pods:
  p:
    model: m
    prompt: t
    sampling: s
models:
  m: { name: m, path: /m.gguf, context: 2048, predict: 256 }
prompts:
  t: { prompt: "base", system: "{SYSTEM}", user: "{USER}", assistant: "{ASSISTANT}" }
samplings:
  s: { strategy: greedy }
"#;
        let config = BoosterConfig::from_str(text).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.deadline, 180);
        assert_eq!(config.pods["p"].threads, 1);
        assert_eq!(config.pods["p"].batch, 1);
        assert!(config.pods["p"].gpus.is_empty());
    }

    #[test]
    fn debug_flag_lowers_log_filter() {
        let config = BoosterConfig::from_str(SAMPLE).unwrap();
        assert_eq!(config.log_filter(), "info");
        let text = SAMPLE.replace("debug: false", "debug: true");
        let config = BoosterConfig::from_str(&text).unwrap();
        assert_eq!(config.log_filter(), "debug");
    }
}
