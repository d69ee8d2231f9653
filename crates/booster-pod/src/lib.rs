//! # booster-pod
//!
//! The pod scheduler. A pod is a named binding of model + prompt template +
//! sampling strategy with resource limits; this crate admits requests against
//! those bindings, queues them FIFO per pod, drives the token-generation loop
//! on a bounded worker pool, and enforces per-request deadlines
//! cooperatively at token-step granularity.
//!
//! Request lifecycle:
//!
//! ```text
//! submit ──▶ Queued ──▶ Running ──▶ Completed
//!    │                     │  │
//!    ▼                     │  └────▶ TimedOut   (deadline exceeded)
//! Rejected                 └───────▶ Failed     (backend / sampler error)
//! ```
//!
//! Terminal phases are sticky: a request that timed out can never be
//! reported completed, even if its generation loop finishes late.

mod request;
mod scheduler;
mod worker;

pub use request::{PodCounts, RequestId, RequestPhase, RequestSnapshot, RequestTable, TokenEvent};
pub use scheduler::{PodStats, Scheduler};
pub use worker::GenerationSession;

use booster_prompt::TemplateError;

/// Why a request was refused at the gateway, before ever being queued.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdmissionError {
    #[error("unknown pod {0}")]
    UnknownPod(String),
    #[error("pod {pod}: invalid resource budget: {detail}")]
    InvalidBudget { pod: String, detail: String },
    #[error("pod {pod}: model {model} unavailable: {reason}")]
    ModelUnavailable {
        pod: String,
        model: String,
        reason: String,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("tokenization failed: {0}")]
    Tokenization(String),
    #[error(
        "prompt ({prompt_tokens} tokens) plus prediction budget ({max_predict}) \
         exceeds context window ({context_len})"
    )]
    ContextOverflow {
        prompt_tokens: usize,
        max_predict: usize,
        context_len: usize,
    },
    #[error("scheduler is shutting down")]
    ShuttingDown,
}
