//! Admission and pod runtime wiring.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use booster_config::{BoosterConfig, SamplingSpec};
use booster_engine::InferenceBackend;
use booster_prompt::PromptTemplate;
use booster_registry::ModelRegistry;
use booster_sampling::Sampler;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::request::{RequestId, RequestPhase, RequestSnapshot, RequestTable, TokenEvent};
use crate::worker::{self, WorkItem, WorkerCtx};
use crate::AdmissionError;

/// Per-pod utilization, for the health endpoint.
#[derive(Debug, Clone)]
pub struct PodStats {
    pub queued: usize,
    pub running: usize,
    pub threads: usize,
    pub batch: usize,
}

struct PodRuntime {
    model: String,
    template: Arc<PromptTemplate>,
    sampling: SamplingSpec,
    threads: usize,
    batch: usize,
    /// Set when the pod's GPU budget is structurally invalid; admission
    /// rejects with this detail instead of queuing.
    budget_error: Option<String>,
    queue: flume::Sender<WorkItem>,
}

/// The pod scheduler: owns the request table, one FIFO queue and worker pool
/// per pod, and the process-wide shutdown token.
pub struct Scheduler {
    table: Arc<RequestTable>,
    registry: Arc<ModelRegistry>,
    backend: Arc<dyn InferenceBackend>,
    pods: HashMap<String, PodRuntime>,
    default_deadline: Duration,
    shutdown: CancellationToken,
    base_seed: u64,
}

impl Scheduler {
    /// Build the pod runtimes from configuration and spawn their worker
    /// pools onto the current tokio runtime.
    pub fn start(
        config: &BoosterConfig,
        backend: Arc<dyn InferenceBackend>,
        registry: Arc<ModelRegistry>,
        base_seed: u64,
    ) -> Arc<Self> {
        let table = Arc::new(RequestTable::new());
        let shutdown = CancellationToken::new();

        // Budget problems are recomputed here so pods built from an
        // unvalidated config still reject at admission instead of running
        // oversubscribed.
        let budget_errors = budget_errors(config);

        let mut pods = HashMap::new();
        for (pod_id, spec) in &config.pods {
            let (tx, rx) = flume::unbounded::<WorkItem>();
            let template = Arc::new(PromptTemplate::from_spec(
                spec.prompt.clone(),
                &config.prompts[&spec.prompt],
            ));

            for worker_index in 0..spec.threads {
                let ctx = WorkerCtx {
                    pod_id: pod_id.clone(),
                    model_id: spec.model.clone(),
                    batch: spec.batch,
                    receiver: rx.clone(),
                    table: Arc::clone(&table),
                    registry: Arc::clone(&registry),
                    backend: Arc::clone(&backend),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(async move {
                    tracing::debug!(pod = %ctx.pod_id, worker = worker_index, "pod worker started");
                    worker::run(ctx).await;
                });
            }

            pods.insert(
                pod_id.clone(),
                PodRuntime {
                    model: spec.model.clone(),
                    template,
                    sampling: config.samplings[&spec.sampling].clone(),
                    threads: spec.threads,
                    batch: spec.batch,
                    budget_error: budget_errors.get(pod_id).cloned(),
                    queue: tx,
                },
            );
        }

        Arc::new(Self {
            table,
            registry,
            backend,
            pods,
            default_deadline: config.deadline(),
            shutdown,
            base_seed,
        })
    }

    /// Admit a generation request. On success the request is `Queued` and its
    /// ID can immediately be polled or subscribed to; every failure is a
    /// structured rejection and nothing is queued.
    pub fn submit(
        &self,
        pod_id: &str,
        user_text: &str,
        system_override: Option<&str>,
        deadline_override: Option<Duration>,
    ) -> Result<RequestId, AdmissionError> {
        if self.shutdown.is_cancelled() {
            return Err(AdmissionError::ShuttingDown);
        }
        let pod = self
            .pods
            .get(pod_id)
            .ok_or_else(|| AdmissionError::UnknownPod(pod_id.to_string()))?;

        if let Some(detail) = &pod.budget_error {
            return Err(AdmissionError::InvalidBudget {
                pod: pod_id.to_string(),
                detail: detail.clone(),
            });
        }

        let model = self.registry.get(&pod.model).map_err(|err| {
            AdmissionError::ModelUnavailable {
                pod: pod_id.to_string(),
                model: pod.model.clone(),
                reason: err.to_string(),
            }
        })?;

        let prompt = pod.template.render_request(user_text, system_override)?;
        let prompt_tokens = self
            .backend
            .tokenize(&prompt)
            .map_err(|err| AdmissionError::Tokenization(err.to_string()))?;

        // Reject rather than truncate when the request cannot fit.
        let context_len = model.spec.context_len;
        let max_predict = model.spec.max_predict;
        if prompt_tokens.len() + max_predict > context_len {
            return Err(AdmissionError::ContextOverflow {
                prompt_tokens: prompt_tokens.len(),
                max_predict,
                context_len,
            });
        }

        let id = Uuid::new_v4();
        let deadline = Instant::now() + deadline_override.unwrap_or(self.default_deadline);
        let sampler = Sampler::from_spec(&pod.sampling, self.request_seed(id));

        self.table.insert_queued(id, pod_id, prompt_tokens.len());
        let item = WorkItem {
            id,
            prompt_tokens,
            max_new: max_predict,
            context_len,
            deadline,
            sampler,
        };
        if pod.queue.send(item).is_err() {
            // Workers are gone; roll the entry into a rejection.
            self.table
                .finish(id, RequestPhase::Rejected, None, Some("scheduler is shutting down".into()));
            return Err(AdmissionError::ShuttingDown);
        }
        tracing::debug!(request = %id, pod = pod_id, "request admitted");
        Ok(id)
    }

    pub fn snapshot(&self, id: RequestId) -> Option<RequestSnapshot> {
        self.table.snapshot(id)
    }

    pub fn subscribe(
        &self,
        id: RequestId,
    ) -> Option<(RequestSnapshot, broadcast::Receiver<TokenEvent>)> {
        self.table.subscribe(id)
    }

    /// Queue depth and utilization per pod.
    pub fn pod_stats(&self) -> BTreeMap<String, PodStats> {
        self.pods
            .iter()
            .map(|(id, pod)| {
                let counts = self.table.pod_counts(id);
                (
                    id.clone(),
                    PodStats {
                        queued: counts.queued,
                        running: counts.running,
                        threads: pod.threads,
                        batch: pod.batch,
                    },
                )
            })
            .collect()
    }

    /// Signal every worker to stop after its current token step.
    pub fn shutdown(&self) {
        tracing::info!("scheduler shutting down");
        self.shutdown.cancel();
    }

    /// Cancellation token observed by the worker pools; the server's
    /// graceful-shutdown path awaits it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Per-request sampler seed: deterministic given the base seed and the
    /// request ID, distinct across requests.
    fn request_seed(&self, id: Uuid) -> u64 {
        let bytes = id.as_bytes();
        let mut low = [0u8; 8];
        low.copy_from_slice(&bytes[..8]);
        self.base_seed ^ u64::from_le_bytes(low)
    }
}

/// Structural GPU-budget problems per pod: an entry above 100%, or membership
/// in an oversubscribed GPU index (sum across pods above 100%).
fn budget_errors(config: &BoosterConfig) -> HashMap<String, String> {
    let mut errors: HashMap<String, String> = HashMap::new();

    let mut per_gpu: BTreeMap<usize, u32> = BTreeMap::new();
    for pod in config.pods.values() {
        for (index, &percent) in pod.gpus.iter().enumerate() {
            *per_gpu.entry(index).or_default() += u32::from(percent);
        }
    }

    for (pod_id, pod) in &config.pods {
        for &percent in &pod.gpus {
            if percent > 100 {
                errors
                    .entry(pod_id.clone())
                    .or_insert_with(|| format!("gpu allocation {percent}% exceeds 100%"));
            }
        }
        for (index, _) in pod.gpus.iter().enumerate() {
            if let Some(&total) = per_gpu.get(&index) {
                if total > 100 {
                    errors.entry(pod_id.clone()).or_insert_with(|| {
                        format!("gpu {index} oversubscribed: {total}% reserved in total")
                    });
                }
            }
        }
    }
    errors
}
