//! Integration tests for the pod scheduler.
//!
//! Each test stands up a real scheduler over the deterministic stub backend
//! and observes the request state machine through the public API only.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use booster_config::BoosterConfig;
use booster_engine::InferenceBackend;
use booster_pod::{AdmissionError, RequestId, RequestPhase, Scheduler};
use booster_registry::ModelRegistry;
use booster_runtime::StubBackend;

fn temp_weight_file() -> PathBuf {
    let path = std::env::temp_dir().join(format!("booster-pod-{}.gguf", uuid::Uuid::new_v4()));
    std::fs::write(&path, b"stub-weights").unwrap();
    path
}

/// Standard single-pod config over a real temp weight file.
fn config(weight_path: &PathBuf, threads: usize, batch: usize, context: usize, predict: usize) -> BoosterConfig {
    let yaml = format!(
        r#"
id: pod-tests
deadline: 30
pods:
  chat:
    model: m
    prompt: plain
    sampling: janus
    threads: {threads}
    batch: {batch}
models:
  m:
    name: stub-model
    path: {}
    context: {context}
    predict: {predict}
prompts:
  plain:
    prompt: "sys"
    system: "{{SYSTEM}}"
    user: "{{USER}}"
    assistant: "{{ASSISTANT}}"
samplings:
  janus:
    strategy: janus
    depth: 8
    scale: 1.1
    hi: 0.9
    lo: 0.05
    temp: 0.8
"#,
        weight_path.display()
    );
    BoosterConfig::from_str(&yaml).unwrap()
}

fn start(
    config: &BoosterConfig,
    backend: Arc<dyn InferenceBackend>,
) -> (Arc<Scheduler>, Arc<ModelRegistry>) {
    let registry = Arc::new(ModelRegistry::new(Arc::clone(&backend)));
    registry.load_all(&config.models);
    let scheduler = Scheduler::start(config, backend, Arc::clone(&registry), 42);
    (scheduler, registry)
}

async fn wait_terminal(scheduler: &Scheduler, id: RequestId) -> RequestPhase {
    for _ in 0..2000 {
        let snap = scheduler.snapshot(id).unwrap();
        if snap.phase.is_terminal() {
            return snap.phase;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("request {id} never reached a terminal phase");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_completes_on_eos() {
    let path = temp_weight_file();
    let config = config(&path, 1, 1, 2048, 64);
    // Prompt renders to 2 tokens; EOS dominates at sequence length 4.
    let backend = Arc::new(StubBackend::new().with_eos_at(4));
    let (scheduler, _registry) = start(&config, backend);

    let id = scheduler.submit("chat", "hello", None, None).unwrap();
    assert_eq!(wait_terminal(&scheduler, id).await, RequestPhase::Completed);

    let snap = scheduler.snapshot(id).unwrap();
    assert_eq!(snap.finish_reason.as_deref(), Some("stop"));
    assert_eq!(snap.generated_tokens, 2);
    assert!(!snap.text.is_empty());
    assert_eq!(snap.prompt_tokens, 2);

    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_completes_on_length_budget() {
    let path = temp_weight_file();
    let config = config(&path, 1, 1, 2048, 4);
    let backend = Arc::new(StubBackend::new());
    let (scheduler, _registry) = start(&config, backend);

    let id = scheduler.submit("chat", "hello", None, None).unwrap();
    assert_eq!(wait_terminal(&scheduler, id).await, RequestPhase::Completed);

    let snap = scheduler.snapshot(id).unwrap();
    assert_eq!(snap.finish_reason.as_deref(), Some("length"));
    assert_eq!(snap.generated_tokens, 4);
    assert!(snap.tokens_per_sec.is_some());
    assert!(snap.ttft_ms.is_some());

    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_pod_rejected_immediately() {
    let path = temp_weight_file();
    let config = config(&path, 1, 1, 2048, 16);
    let backend = Arc::new(StubBackend::new());
    let (scheduler, _registry) = start(&config, backend);

    let err = scheduler.submit("ghost", "hello", None, None).unwrap_err();
    assert!(matches!(err, AdmissionError::UnknownPod(_)));

    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unavailable_model_rejected() {
    let path = temp_weight_file();
    let config = config(&path, 1, 1, 2048, 16);
    let backend: Arc<dyn InferenceBackend> = Arc::new(StubBackend::new());
    // Registry deliberately left empty: the pod's model never loads.
    let registry = Arc::new(ModelRegistry::new(Arc::clone(&backend)));
    let scheduler = Scheduler::start(&config, backend, registry, 42);

    let err = scheduler.submit("chat", "hello", None, None).unwrap_err();
    assert!(matches!(err, AdmissionError::ModelUnavailable { .. }));

    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_prompt_rejected_not_truncated() {
    let path = temp_weight_file();
    // Context 10, predict 8: any prompt over 2 tokens cannot fit.
    let config = config(&path, 1, 1, 10, 8);
    let backend = Arc::new(StubBackend::new());
    let (scheduler, _registry) = start(&config, backend);

    let err = scheduler
        .submit("chat", "this prompt is definitely too long", None, None)
        .unwrap_err();
    match err {
        AdmissionError::ContextOverflow {
            prompt_tokens,
            max_predict,
            context_len,
        } => {
            assert!(prompt_tokens + max_predict > context_len);
        }
        other => panic!("expected context overflow, got {other}"),
    }

    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_gpu_budget_rejected_at_admission() {
    let path = temp_weight_file();
    let mut config = config(&path, 1, 1, 2048, 16);
    // Bypass config-load validation to exercise the admission re-check.
    config.pods.get_mut("chat").unwrap().gpus = vec![150];
    let backend = Arc::new(StubBackend::new());
    let (scheduler, _registry) = start(&config, backend);

    let err = scheduler.submit("chat", "hello", None, None).unwrap_err();
    assert!(matches!(err, AdmissionError::InvalidBudget { .. }), "got {err}");

    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_request_queues_behind_single_thread() {
    let path = temp_weight_file();
    let config = config(&path, 1, 1, 4096, 512);
    // Slow steps and a far-off EOS keep the first request running.
    let backend = Arc::new(StubBackend::new().with_step_delay(Duration::from_millis(5)));
    let (scheduler, _registry) = start(&config, backend);

    let first = scheduler.submit("chat", "one", None, None).unwrap();
    // Let the single worker pick up the first request.
    for _ in 0..200 {
        if scheduler.snapshot(first).unwrap().phase == RequestPhase::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(scheduler.snapshot(first).unwrap().phase, RequestPhase::Running);

    let second = scheduler.submit("chat", "two", None, None).unwrap();
    assert_eq!(scheduler.snapshot(second).unwrap().phase, RequestPhase::Queued);

    let stats = scheduler.pod_stats();
    assert_eq!(stats["chat"].running, 1);
    assert_eq!(stats["chat"].queued, 1);

    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deadline_exceeded_times_out_with_partial_output() {
    let path = temp_weight_file();
    let config = config(&path, 1, 1, 4096, 512);
    let backend = Arc::new(StubBackend::new().with_step_delay(Duration::from_millis(10)));
    let (scheduler, _registry) = start(&config, backend);

    let id = scheduler
        .submit("chat", "hello", None, Some(Duration::from_millis(40)))
        .unwrap();
    assert_eq!(wait_terminal(&scheduler, id).await, RequestPhase::TimedOut);

    // Generation had time for a few steps before the deadline fired.
    let snap = scheduler.snapshot(id).unwrap();
    assert!(snap.generated_tokens < 512);
    assert!(snap.finish_reason.is_none());

    // The phase stays TimedOut no matter how long we keep watching.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(scheduler.snapshot(id).unwrap().phase, RequestPhase::TimedOut);

    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backend_failure_marks_request_failed() {
    let path = temp_weight_file();
    let config = config(&path, 1, 1, 2048, 16);
    let backend = Arc::new(StubBackend::new().with_forward_failure("weights corrupted"));
    let (scheduler, _registry) = start(&config, backend);

    let id = scheduler.submit("chat", "hello", None, None).unwrap();
    assert_eq!(wait_terminal(&scheduler, id).await, RequestPhase::Failed);

    let snap = scheduler.snapshot(id).unwrap();
    assert!(snap.error.as_deref().unwrap().contains("weights corrupted"));

    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_group_runs_requests_concurrently() {
    let path = temp_weight_file();
    let config = config(&path, 1, 4, 4096, 64);
    let backend = Arc::new(
        StubBackend::new()
            .with_batching()
            .with_step_delay(Duration::from_millis(5)),
    );
    let (scheduler, _registry) = start(&config, backend);

    // Occupy the single worker so later submissions pile up in the queue,
    // then get drained into one batch group.
    let first = scheduler.submit("chat", "one", None, None).unwrap();
    let second = scheduler
        .submit("chat", "two", None, Some(Duration::from_secs(10)))
        .unwrap();
    let third = scheduler
        .submit("chat", "three", None, Some(Duration::from_secs(10)))
        .unwrap();

    // With threads=1 and batch=4, the worker must at some point report more
    // than one request running at once.
    let mut saw_concurrent = false;
    for _ in 0..500 {
        let stats = scheduler.pod_stats();
        if stats["chat"].running > 1 {
            saw_concurrent = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(saw_concurrent, "batching never ran requests concurrently");

    for id in [first, second, third] {
        let phase = wait_terminal(&scheduler, id).await;
        assert!(
            matches!(phase, RequestPhase::Completed | RequestPhase::TimedOut),
            "unexpected phase {phase}"
        );
    }

    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streaming_subscribers_receive_tokens() {
    let path = temp_weight_file();
    let config = config(&path, 1, 1, 2048, 8);
    let backend = Arc::new(StubBackend::new());
    let (scheduler, _registry) = start(&config, backend);

    let id = scheduler.submit("chat", "hello", None, None).unwrap();
    let (snap, mut rx) = scheduler.subscribe(id).unwrap();

    // The snapshot and the subscription are atomic: everything after the
    // snapshot arrives as events, unless the request already finished.
    let mut streamed = snap.text;
    let mut finished = if snap.phase.is_terminal() {
        Some(snap.phase)
    } else {
        None
    };
    while finished.is_none() {
        match rx.recv().await.unwrap() {
            booster_pod::TokenEvent::Token { text } => streamed.push_str(&text),
            booster_pod::TokenEvent::Finished { phase } => finished = Some(phase),
        }
    }

    assert_eq!(finished, Some(RequestPhase::Completed));
    assert_eq!(streamed, scheduler.snapshot(id).unwrap().text);

    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_rejects_new_submissions() {
    let path = temp_weight_file();
    let config = config(&path, 1, 1, 2048, 16);
    let backend = Arc::new(StubBackend::new());
    let (scheduler, _registry) = start(&config, backend);

    scheduler.shutdown();
    let err = scheduler.submit("chat", "hello", None, None).unwrap_err();
    assert!(matches!(err, AdmissionError::ShuttingDown));

    std::fs::remove_file(path).unwrap();
}
