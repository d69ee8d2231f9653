//! Request tracking: phases, the shared request table, and token events.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type RequestId = Uuid;

/// Capacity of each request's token event channel. A slow subscriber that
/// lags past this falls back to polling the accumulated text.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle phase of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Queued,
    Running,
    Completed,
    TimedOut,
    Rejected,
    Failed,
}

impl RequestPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestPhase::Completed
                | RequestPhase::TimedOut
                | RequestPhase::Rejected
                | RequestPhase::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestPhase::Queued => "queued",
            RequestPhase::Running => "running",
            RequestPhase::Completed => "completed",
            RequestPhase::TimedOut => "timed_out",
            RequestPhase::Rejected => "rejected",
            RequestPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event streamed to subscribers as a request progresses.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    /// One decoded token's text.
    Token { text: String },
    /// The request reached a terminal phase; no further events follow.
    Finished { phase: RequestPhase },
}

/// Point-in-time view of a request, as returned to pollers.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub id: RequestId,
    pub pod: String,
    pub phase: RequestPhase,
    /// Partial text while running, final text afterwards.
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    /// `stop` (EOS) or `length` (budget exhausted), set on completion.
    pub finish_reason: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Time to first token, milliseconds.
    pub ttft_ms: Option<f64>,
    /// Decode throughput, excluding prefill.
    pub tokens_per_sec: Option<f64>,
}

struct RequestEntry {
    pod: String,
    phase: RequestPhase,
    text: String,
    prompt_tokens: usize,
    generated_tokens: usize,
    finish_reason: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    ttft_ms: Option<f64>,
    tokens_per_sec: Option<f64>,
    events: broadcast::Sender<TokenEvent>,
}

impl RequestEntry {
    fn snapshot(&self, id: RequestId) -> RequestSnapshot {
        RequestSnapshot {
            id,
            pod: self.pod.clone(),
            phase: self.phase,
            text: self.text.clone(),
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.generated_tokens,
            finish_reason: self.finish_reason.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            ttft_ms: self.ttft_ms,
            tokens_per_sec: self.tokens_per_sec,
        }
    }
}

/// Per-pod queue/running counts, for the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodCounts {
    pub queued: usize,
    pub running: usize,
}

/// Shared table of every request the scheduler has admitted.
///
/// Writers are the admission path and the pod workers; readers are the
/// gateway's poll and stream handlers. All operations take the lock briefly
/// and never hold it across an await point.
pub struct RequestTable {
    inner: Mutex<HashMap<RequestId, RequestEntry>>,
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Record a freshly admitted request in `Queued` phase.
    pub fn insert_queued(&self, id: RequestId, pod: &str, prompt_tokens: usize) {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut inner = self.inner.lock().expect("request table lock poisoned");
        inner.insert(
            id,
            RequestEntry {
                pod: pod.to_string(),
                phase: RequestPhase::Queued,
                text: String::new(),
                prompt_tokens,
                generated_tokens: 0,
                finish_reason: None,
                error: None,
                created_at: Utc::now(),
                ttft_ms: None,
                tokens_per_sec: None,
                events,
            },
        );
    }

    /// Move a queued request to `Running`. Returns false if the request is
    /// unknown or already terminal (e.g. it timed out while queued).
    pub fn mark_running(&self, id: RequestId) -> bool {
        let mut inner = self.inner.lock().expect("request table lock poisoned");
        match inner.get_mut(&id) {
            Some(entry) if !entry.phase.is_terminal() => {
                entry.phase = RequestPhase::Running;
                true
            }
            _ => false,
        }
    }

    /// Append one decoded token's text and publish it to subscribers.
    pub fn append_token(&self, id: RequestId, text: &str) {
        let mut inner = self.inner.lock().expect("request table lock poisoned");
        if let Some(entry) = inner.get_mut(&id) {
            entry.text.push_str(text);
            entry.generated_tokens += 1;
            let _ = entry.events.send(TokenEvent::Token {
                text: text.to_string(),
            });
        }
    }

    /// Record decode telemetry ahead of the terminal transition.
    pub fn set_throughput(&self, id: RequestId, ttft_ms: f64, tokens_per_sec: f64) {
        let mut inner = self.inner.lock().expect("request table lock poisoned");
        if let Some(entry) = inner.get_mut(&id) {
            entry.ttft_ms = Some(ttft_ms);
            entry.tokens_per_sec = Some(tokens_per_sec);
        }
    }

    /// Drive a request to a terminal phase. Terminal phases are sticky:
    /// the first terminal transition wins and later ones are ignored, so a
    /// timed-out request can never be re-reported as completed.
    pub fn finish(
        &self,
        id: RequestId,
        phase: RequestPhase,
        finish_reason: Option<&str>,
        error: Option<String>,
    ) -> bool {
        debug_assert!(phase.is_terminal());
        let mut inner = self.inner.lock().expect("request table lock poisoned");
        let Some(entry) = inner.get_mut(&id) else {
            return false;
        };
        if entry.phase.is_terminal() {
            return false;
        }
        entry.phase = phase;
        entry.finish_reason = finish_reason.map(str::to_string);
        entry.error = error;
        let _ = entry.events.send(TokenEvent::Finished { phase });
        true
    }

    pub fn snapshot(&self, id: RequestId) -> Option<RequestSnapshot> {
        let inner = self.inner.lock().expect("request table lock poisoned");
        inner.get(&id).map(|entry| entry.snapshot(id))
    }

    /// Subscribe to a request's token events, together with a snapshot taken
    /// atomically with the subscription (no token is lost in between).
    pub fn subscribe(
        &self,
        id: RequestId,
    ) -> Option<(RequestSnapshot, broadcast::Receiver<TokenEvent>)> {
        let inner = self.inner.lock().expect("request table lock poisoned");
        inner
            .get(&id)
            .map(|entry| (entry.snapshot(id), entry.events.subscribe()))
    }

    /// Queue/running counts for one pod.
    pub fn pod_counts(&self, pod: &str) -> PodCounts {
        let inner = self.inner.lock().expect("request table lock poisoned");
        let mut counts = PodCounts::default();
        for entry in inner.values() {
            if entry.pod == pod {
                match entry.phase {
                    RequestPhase::Queued => counts.queued += 1,
                    RequestPhase::Running => counts.running += 1,
                    _ => {}
                }
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phase_is_sticky() {
        let table = RequestTable::new();
        let id = Uuid::new_v4();
        table.insert_queued(id, "chat", 4);
        assert!(table.mark_running(id));
        assert!(table.finish(id, RequestPhase::TimedOut, None, None));

        // A late completion must not overwrite the timeout.
        assert!(!table.finish(id, RequestPhase::Completed, Some("stop"), None));
        assert_eq!(table.snapshot(id).unwrap().phase, RequestPhase::TimedOut);
    }

    #[test]
    fn terminal_requests_cannot_restart() {
        let table = RequestTable::new();
        let id = Uuid::new_v4();
        table.insert_queued(id, "chat", 4);
        table.finish(id, RequestPhase::TimedOut, None, None);
        assert!(!table.mark_running(id));
    }

    #[test]
    fn tokens_accumulate() {
        let table = RequestTable::new();
        let id = Uuid::new_v4();
        table.insert_queued(id, "chat", 4);
        table.append_token(id, "hello ");
        table.append_token(id, "world ");

        let snap = table.snapshot(id).unwrap();
        assert_eq!(snap.text, "hello world ");
        assert_eq!(snap.generated_tokens, 2);
    }

    #[tokio::test]
    async fn subscribers_see_tokens_and_finish() {
        let table = RequestTable::new();
        let id = Uuid::new_v4();
        table.insert_queued(id, "chat", 1);

        let (snap, mut rx) = table.subscribe(id).unwrap();
        assert_eq!(snap.phase, RequestPhase::Queued);

        table.append_token(id, "hi ");
        table.finish(id, RequestPhase::Completed, Some("stop"), None);

        match rx.recv().await.unwrap() {
            TokenEvent::Token { text } => assert_eq!(text, "hi "),
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await.unwrap() {
            TokenEvent::Finished { phase } => assert_eq!(phase, RequestPhase::Completed),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn pod_counts_track_phases() {
        let table = RequestTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        table.insert_queued(a, "chat", 1);
        table.insert_queued(b, "chat", 1);
        table.insert_queued(c, "other", 1);
        table.mark_running(a);

        assert_eq!(table.pod_counts("chat"), PodCounts { queued: 1, running: 1 });
        assert_eq!(table.pod_counts("other"), PodCounts { queued: 1, running: 0 });
    }
}
