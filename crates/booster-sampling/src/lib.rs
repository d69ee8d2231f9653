//! # booster-sampling
//!
//! Token-selection strategies for booster pods.
//!
//! Supports:
//! - Janus sampling: temperature scaling, a repetition penalty over a rolling
//!   window of recently selected tokens, and a dual-bound cumulative-mass
//!   cutoff (`lo` guarantees a minimum nucleus, `hi` caps it)
//! - Greedy (argmax)
//! - Deterministic seeded RNG for reproducible generation

use std::collections::VecDeque;

use booster_config::SamplingSpec;
use booster_engine::TokenId;

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

/// Sampling error type. Degenerate distributions never surface here — the
/// sampler falls back to argmax instead; only malformed input does.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SamplingError {
    #[error("empty logits array")]
    EmptyLogits,
}

/// Deterministic RNG for reproducible sampling.
///
/// Uses a simple xorshift64 algorithm for fast, reproducible random numbers.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Zero state would produce all zeros.
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Generate next random float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Per-session sampler state. One sampler is created per generation request
/// and advances with each selected token.
#[derive(Debug, Clone)]
pub struct Sampler {
    strategy: Strategy,
    rng: SeededRng,
}

#[derive(Debug, Clone)]
enum Strategy {
    Janus {
        depth: usize,
        scale: f32,
        hi: f32,
        lo: f32,
        temp: f32,
        /// Last `depth` selected tokens, oldest first.
        window: VecDeque<TokenId>,
    },
    Greedy,
}

impl Sampler {
    /// Create a sampler session from a configured strategy.
    pub fn from_spec(spec: &SamplingSpec, seed: u64) -> Self {
        let strategy = match *spec {
            SamplingSpec::Janus {
                depth,
                scale,
                hi,
                lo,
                temp,
            } => Strategy::Janus {
                depth,
                scale,
                hi,
                lo,
                temp,
                window: VecDeque::with_capacity(depth),
            },
            SamplingSpec::Greedy => Strategy::Greedy,
        };
        Self {
            strategy,
            rng: SeededRng::new(seed),
        }
    }

    /// Select the next token from a full-vocabulary logits vector.
    pub fn next_token(&mut self, logits: &[f32]) -> SamplingResult<TokenId> {
        if logits.is_empty() {
            return Err(SamplingError::EmptyLogits);
        }

        let token = match &mut self.strategy {
            Strategy::Greedy => argmax(logits) as TokenId,
            Strategy::Janus {
                depth,
                scale,
                hi,
                lo,
                temp,
                window,
            } => {
                let token = janus_step(logits, *scale, *hi, *lo, *temp, window, &mut self.rng);
                if *depth > 0 {
                    window.push_back(token);
                    while window.len() > *depth {
                        window.pop_front();
                    }
                }
                token
            }
        };
        Ok(token)
    }
}

/// One janus selection step.
///
/// Pipeline: scale logits by 1/temp, softmax, divide the probability of
/// window tokens by `scale`, renormalize, then keep the shortest
/// descending-probability prefix whose cumulative mass reaches at least `lo`
/// and at most `hi`, and draw from the renormalized remainder. An emptied
/// candidate set falls back to the single most probable token.
fn janus_step(
    logits: &[f32],
    scale: f32,
    hi: f32,
    lo: f32,
    temp: f32,
    window: &VecDeque<TokenId>,
    rng: &mut SeededRng,
) -> TokenId {
    let temp = temp.max(1e-6);
    let scaled: Vec<f32> = logits.iter().map(|&l| l / temp).collect();
    let mut probs = softmax(&scaled);

    // Repetition penalty over the rolling window.
    if !window.is_empty() {
        for &token in window {
            let idx = token as usize;
            if idx < probs.len() {
                probs[idx] /= scale;
            }
        }
        renormalize(&mut probs);
    }

    // Dual-bound cumulative cutoff. Sorted by descending probability, a
    // candidate is kept while the mass accumulated before it is below `lo`
    // (minimum nucleus) or the mass including it stays within `hi`.
    // Zero-probability tokens never enter the candidate set.
    let mut order: Vec<usize> = (0..probs.len()).filter(|&i| probs[i] > 0.0).collect();
    if order.is_empty() {
        // Penalty or degenerate logits wiped the distribution out.
        return argmax(logits) as TokenId;
    }
    order.sort_by(|&a, &b| {
        probs[b]
            .partial_cmp(&probs[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<usize> = Vec::new();
    let mut cumulative = 0.0f32;
    for &idx in &order {
        let before = cumulative;
        cumulative += probs[idx];
        if before < lo || cumulative <= hi + 1e-6 {
            kept.push(idx);
        } else {
            break;
        }
    }
    if kept.is_empty() {
        // The band excluded everything; fall back to the most probable token.
        return order[0] as TokenId;
    }

    // Renormalized stochastic draw over the kept candidates.
    let total: f32 = kept.iter().map(|&i| probs[i]).sum();
    let r = rng.next_f32() * total;
    let mut acc = 0.0f32;
    for &idx in &kept {
        acc += probs[idx];
        if r < acc {
            return idx as TokenId;
        }
    }
    // Float round-off: the draw landed past the last bucket.
    kept[kept.len() - 1] as TokenId
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max_logit).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|&e| e / sum).collect()
    } else {
        vec![1.0 / logits.len() as f32; logits.len()]
    }
}

fn renormalize(probs: &mut [f32]) {
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        for p in probs.iter_mut() {
            *p /= sum;
        }
    }
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}
