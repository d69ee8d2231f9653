//! Pod worker loops: dequeue, batch grouping, and the token-generation loop.

use std::sync::Arc;
use std::time::Instant;

use booster_engine::{InferenceBackend, TokenId};
use booster_registry::{LoadedModel, ModelRegistry};
use booster_sampling::Sampler;
use tokio_util::sync::CancellationToken;

use crate::request::{RequestId, RequestPhase, RequestTable};

/// A queued unit of work, produced at admission.
pub(crate) struct WorkItem {
    pub id: RequestId,
    pub prompt_tokens: Vec<TokenId>,
    pub max_new: usize,
    pub context_len: usize,
    pub deadline: Instant,
    pub sampler: Sampler,
}

/// Everything a worker task needs; one per spawned worker, cheaply cloned
/// from the pod's shared handles.
pub(crate) struct WorkerCtx {
    pub pod_id: String,
    pub model_id: String,
    pub batch: usize,
    pub receiver: flume::Receiver<WorkItem>,
    pub table: Arc<RequestTable>,
    pub registry: Arc<ModelRegistry>,
    pub backend: Arc<dyn InferenceBackend>,
    pub shutdown: CancellationToken,
}

/// Ephemeral per-request generation state. Owned exclusively by the worker
/// driving the request; dropped as soon as the request reaches a terminal
/// phase.
pub struct GenerationSession {
    pub id: RequestId,
    /// Prompt plus generated tokens; the backend consumes the whole sequence.
    tokens: Vec<TokenId>,
    sampler: Sampler,
    max_new: usize,
    context_len: usize,
    deadline: Instant,
    started: Instant,
    first_token_at: Option<Instant>,
    generated: usize,
}

impl GenerationSession {
    fn new(item: WorkItem) -> Self {
        Self {
            id: item.id,
            tokens: item.prompt_tokens,
            sampler: item.sampler,
            max_new: item.max_new,
            context_len: item.context_len,
            deadline: item.deadline,
            started: Instant::now(),
            first_token_at: None,
            generated: 0,
        }
    }
}

/// Worker main loop: wait for work, form a batch group, drive it to
/// completion, repeat until shutdown.
pub(crate) async fn run(ctx: WorkerCtx) {
    loop {
        let first = tokio::select! {
            _ = ctx.shutdown.cancelled() => return,
            item = ctx.receiver.recv_async() => match item {
                Ok(item) => item,
                Err(_) => return,
            },
        };

        // Group whatever same-pod work is already queued, up to the pod's
        // batch size. No wall-clock wait: an empty queue means a group of one.
        let mut group = vec![first];
        while group.len() < ctx.batch {
            match ctx.receiver.try_recv() {
                Ok(item) => group.push(item),
                Err(_) => break,
            }
        }

        run_group(&ctx, group).await;
    }
}

/// Drive a group of requests through the token loop, interleaving their
/// steps round-robin. Deadlines and shutdown are checked cooperatively
/// before every token step; a request is never preempted mid-step.
async fn run_group(ctx: &WorkerCtx, group: Vec<WorkItem>) {
    let model = match ctx.registry.get(&ctx.model_id) {
        Ok(model) => model,
        Err(err) => {
            // The model vanished between admission and execution.
            let reason = err.to_string();
            for item in group {
                ctx.table
                    .finish(item.id, RequestPhase::Failed, None, Some(reason.clone()));
            }
            return;
        }
    };

    let mut sessions: Vec<GenerationSession> = Vec::with_capacity(group.len());
    for item in group {
        if Instant::now() >= item.deadline {
            // Spent its whole budget waiting in the queue.
            ctx.table.finish(item.id, RequestPhase::TimedOut, None, None);
            continue;
        }
        if ctx.table.mark_running(item.id) {
            sessions.push(GenerationSession::new(item));
        }
    }

    let eos = ctx.backend.eos_token();
    while !sessions.is_empty() {
        if ctx.shutdown.is_cancelled() {
            for session in &sessions {
                ctx.table.finish(
                    session.id,
                    RequestPhase::Failed,
                    None,
                    Some("cancelled by shutdown".to_string()),
                );
            }
            return;
        }

        // Cooperative deadline check, once per round.
        let now = Instant::now();
        sessions.retain(|session| {
            if now >= session.deadline {
                tracing::debug!(request = %session.id, pod = %ctx.pod_id, "request deadline exceeded");
                ctx.table
                    .finish(session.id, RequestPhase::TimedOut, None, None);
                false
            } else {
                true
            }
        });
        if sessions.is_empty() {
            break;
        }

        step_round(ctx, &model, eos, &mut sessions);

        // The forward pass is synchronous; yield so sibling tasks (and the
        // gateway) get scheduled between rounds.
        tokio::task::yield_now().await;
    }
}

/// One decode round: a forward pass and a sampling step for every live
/// session. Errors are isolated per request except for a failed batched
/// forward, which takes its whole group down.
fn step_round(
    ctx: &WorkerCtx,
    model: &LoadedModel,
    eos: TokenId,
    sessions: &mut Vec<GenerationSession>,
) {
    if sessions.len() > 1 && ctx.backend.supports_batching() {
        let result = {
            let sequences: Vec<&[TokenId]> =
                sessions.iter().map(|s| s.tokens.as_slice()).collect();
            ctx.backend.forward_batch(&model.handle, &sequences)
        };
        match result {
            Ok(all_logits) => {
                let mut index = 0;
                sessions.retain_mut(|session| {
                    let keep = apply_step(ctx, session, eos, Ok(all_logits[index].clone()));
                    index += 1;
                    keep
                });
            }
            Err(err) => {
                let reason = err.to_string();
                for session in sessions.drain(..) {
                    ctx.table
                        .finish(session.id, RequestPhase::Failed, None, Some(reason.clone()));
                }
            }
        }
    } else {
        sessions.retain_mut(|session| {
            let logits = ctx
                .backend
                .forward(&model.handle, &session.tokens)
                .map_err(|err| err.to_string());
            apply_step(ctx, session, eos, logits)
        });
    }
}

/// Apply one step's logits to a session: sample, record the token, and
/// evaluate termination. Returns whether the session stays in the group.
fn apply_step(
    ctx: &WorkerCtx,
    session: &mut GenerationSession,
    eos: TokenId,
    logits: Result<Vec<f32>, String>,
) -> bool {
    let logits = match logits {
        Ok(logits) => logits,
        Err(reason) => {
            ctx.table
                .finish(session.id, RequestPhase::Failed, None, Some(reason));
            return false;
        }
    };

    let token = match session.sampler.next_token(&logits) {
        Ok(token) => token,
        Err(err) => {
            ctx.table
                .finish(session.id, RequestPhase::Failed, None, Some(err.to_string()));
            return false;
        }
    };

    if token == eos {
        finish_with_throughput(ctx, session, "stop");
        return false;
    }

    let text = match ctx.backend.detokenize(&[token]) {
        Ok(text) => text,
        Err(err) => {
            ctx.table
                .finish(session.id, RequestPhase::Failed, None, Some(err.to_string()));
            return false;
        }
    };

    session.tokens.push(token);
    session.generated += 1;
    if session.first_token_at.is_none() {
        session.first_token_at = Some(Instant::now());
    }
    ctx.table.append_token(session.id, &text);

    if session.generated >= session.max_new || session.tokens.len() >= session.context_len {
        finish_with_throughput(ctx, session, "length");
        return false;
    }
    true
}

fn finish_with_throughput(ctx: &WorkerCtx, session: &GenerationSession, reason: &str) {
    if let Some(first) = session.first_token_at {
        let ttft_ms = first.duration_since(session.started).as_secs_f64() * 1000.0;
        let decode_secs = first.elapsed().as_secs_f64();
        let tokens_per_sec = if decode_secs > 0.0 && session.generated > 0 {
            session.generated as f64 / decode_secs
        } else {
            0.0
        };
        ctx.table.set_throughput(session.id, ttft_ms, tokens_per_sec);
    }
    ctx.table
        .finish(session.id, RequestPhase::Completed, Some(reason), None);
    tracing::debug!(
        request = %session.id,
        pod = %ctx.pod_id,
        tokens = session.generated,
        reason,
        "request completed"
    );
}
