//! Single-flight request broker.
//!
//! Every reply goes through one FIFO queue drained by one task, so at most
//! one completion request is outstanding at a time. Requests arriving while
//! the broker is busy are spaced out, and a provider throttle puts the
//! request back at the tail with the provider's delay.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

use crate::assistant::Responder;
use crate::error::ChatError;
use crate::replies::{APOLOGY_REPLY, BUSY_REPLY, THROTTLED_PLACEHOLDER};
use crate::session::{ChatSession, TurnTicket};

/// Stand-in for "never" when a delay would overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn later(at: Instant, delay: Duration) -> Instant {
    at.checked_add(delay).unwrap_or_else(|| at + FAR_FUTURE)
}

fn default_spacing_secs() -> u64 {
    2
}

fn default_max_queue_depth() -> usize {
    32
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_throttle_requeues() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Minimum gap between a completion and the next request when busy.
    #[serde(default = "default_spacing_secs")]
    pub spacing_secs: u64,
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Give up on a request whose next service time falls past this deadline.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_throttle_requeues")]
    pub max_throttle_requeues: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            spacing_secs: default_spacing_secs(),
            max_queue_depth: default_max_queue_depth(),
            request_timeout_secs: default_request_timeout_secs(),
            max_throttle_requeues: default_max_throttle_requeues(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    pub queued: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub completed: u64,
    pub requeued: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelayKind {
    /// Counted from the later of the anchor and the last completion.
    Spacing,
    /// Counted from the anchor only.
    Throttled,
}

struct QueuedRequest {
    session: Arc<ChatSession>,
    message: String,
    ticket: TurnTicket,
    reply: oneshot::Sender<String>,
    enqueued_at: Instant,
    anchor: Instant,
    retry_delay_seconds: u64,
    delay_kind: DelayKind,
    requeues: u32,
}

impl QueuedRequest {
    fn ready_at(&self, last_completed: Option<Instant>) -> Instant {
        let delay = Duration::from_secs(self.retry_delay_seconds);
        match (self.delay_kind, last_completed) {
            (DelayKind::Spacing, Some(done)) if done > self.anchor => later(done, delay),
            _ => later(self.anchor, delay),
        }
    }

    fn deadline(&self, timeout_secs: u64) -> Instant {
        later(self.enqueued_at, Duration::from_secs(timeout_secs))
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedRequest>,
    is_processing: bool,
    in_flight: usize,
    last_completed: Option<Instant>,
    stats: BrokerStats,
}

impl QueueState {
    fn head_remaining(&self, now: Instant) -> Duration {
        self.pending
            .front()
            .map(|head| head.ready_at(self.last_completed).saturating_duration_since(now))
            .unwrap_or_default()
    }
}

struct BrokerInner {
    responder: Arc<dyn Responder>,
    config: BrokerConfig,
    queue: Mutex<QueueState>,
}

/// Reply to an enqueued message. Resolves exactly once; if the broker drops
/// the request it resolves with the apology text.
pub struct PendingReply {
    receiver: oneshot::Receiver<String>,
    retry_delay_seconds: u64,
}

impl PendingReply {
    /// Initial delay assigned at enqueue time.
    pub fn retry_delay_seconds(&self) -> u64 {
        self.retry_delay_seconds
    }
}

impl Future for PendingReply {
    type Output = String;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<String> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_| APOLOGY_REPLY.to_string()))
    }
}

#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(responder: Arc<dyn Responder>, config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                responder,
                config,
                queue: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Accept a message for `session`. The user message is written to the
    /// transcript immediately; the reply is written when it resolves.
    pub async fn enqueue(&self, session: Arc<ChatSession>, message: impl Into<String>) -> PendingReply {
        let message = message.into();
        let (tx, receiver) = oneshot::channel();

        let mut q = self.inner.queue.lock().await;
        let ticket = session.begin_turn(&message).await;

        if q.pending.len() >= self.inner.config.max_queue_depth {
            q.stats.failed += 1;
            drop(q);
            tracing::warn!(session = session.id(), "broker queue full, rejecting message");
            session.finish_turn(&ticket, BUSY_REPLY).await;
            let _ = tx.send(BUSY_REPLY.to_string());
            return PendingReply {
                receiver,
                retry_delay_seconds: 0,
            };
        }

        let now = Instant::now();
        let spacing = Duration::from_secs(self.inner.config.spacing_secs);
        let busy = q.in_flight > 0 || !q.pending.is_empty();
        let recent = q
            .last_completed
            .is_some_and(|done| now.saturating_duration_since(done) < spacing);
        let retry_delay_seconds = if busy || recent {
            self.inner.config.spacing_secs
        } else {
            0
        };

        tracing::debug!(
            session = session.id(),
            queued = q.pending.len(),
            retry_delay_seconds,
            "message enqueued"
        );
        q.pending.push_back(QueuedRequest {
            session,
            message,
            ticket,
            reply: tx,
            enqueued_at: now,
            anchor: now,
            retry_delay_seconds,
            delay_kind: DelayKind::Spacing,
            requeues: 0,
        });

        if !q.is_processing {
            q.is_processing = true;
            spawn_drain(self.inner.clone());
        }

        PendingReply {
            receiver,
            retry_delay_seconds,
        }
    }

    /// Whole seconds until the head of the queue may be serviced; 0 when the
    /// queue is empty or the head is ready.
    pub async fn pending_delay_seconds(&self) -> u64 {
        let q = self.inner.queue.lock().await;
        ceil_secs(q.head_remaining(Instant::now()))
    }

    /// Like [`Broker::pending_delay_seconds`], but 0 unless `session_id` has a
    /// request waiting.
    pub async fn pending_delay_seconds_for(&self, session_id: &str) -> u64 {
        let q = self.inner.queue.lock().await;
        if !q.pending.iter().any(|r| r.session.id() == session_id) {
            return 0;
        }
        ceil_secs(q.head_remaining(Instant::now()))
    }

    pub async fn stats(&self) -> BrokerStats {
        let q = self.inner.queue.lock().await;
        BrokerStats {
            queued: q.pending.len(),
            in_flight: q.in_flight,
            ..q.stats
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Run the drain loop. If it dies, clear the busy flags so the next enqueue
/// can start a new one, and keep going while requests are waiting.
fn spawn_drain(inner: Arc<BrokerInner>) {
    tokio::spawn(async move {
        let Err(err) = tokio::spawn(inner.clone().drain()).await else {
            return;
        };
        tracing::error!("broker drain task died: {err}");
        let mut q = inner.queue.lock().await;
        q.in_flight = 0;
        if q.pending.is_empty() {
            q.is_processing = false;
        } else {
            drop(q);
            spawn_drain(inner);
        }
    });
}

enum Outcome {
    Resolved(String),
    Requeue(u64),
    Failed(String),
}

impl BrokerInner {
    async fn drain(self: Arc<Self>) {
        loop {
            // Wait out the head's delay without holding the lock. Only this
            // task pops, so the head cannot change underneath us.
            let ready_at = {
                let mut q = self.queue.lock().await;
                let Some(head) = q.pending.front() else {
                    q.is_processing = false;
                    return;
                };
                head.ready_at(q.last_completed)
            };
            tokio::time::sleep_until(ready_at).await;

            let mut request = {
                let mut q = self.queue.lock().await;
                let Some(request) = q.pending.pop_front() else {
                    q.is_processing = false;
                    return;
                };
                if Instant::now() > request.deadline(self.config.request_timeout_secs) {
                    q.stats.failed += 1;
                    drop(q);
                    tracing::warn!(session = request.session.id(), "request expired in queue");
                    self.resolve(request, APOLOGY_REPLY).await;
                    continue;
                }
                if !request.session.is_current(&request.ticket).await {
                    q.stats.failed += 1;
                    drop(q);
                    tracing::debug!(session = request.session.id(), "session reset while queued, skipping");
                    self.resolve(request, APOLOGY_REPLY).await;
                    continue;
                }
                q.in_flight += 1;
                q.stats.max_in_flight = q.stats.max_in_flight.max(q.in_flight);
                request
            };

            let outcome = self.respond(&request).await;

            let now = Instant::now();
            let mut q = self.queue.lock().await;
            q.in_flight = q.in_flight.saturating_sub(1);
            q.last_completed = Some(now);

            match outcome {
                Outcome::Resolved(reply) => {
                    q.stats.completed += 1;
                    drop(q);
                    self.resolve(request, &reply).await;
                }
                Outcome::Failed(err) => {
                    q.stats.failed += 1;
                    drop(q);
                    tracing::warn!(session = request.session.id(), "request failed: {err}");
                    self.resolve(request, APOLOGY_REPLY).await;
                }
                Outcome::Requeue(retry_after_secs) => {
                    let deadline = request.deadline(self.config.request_timeout_secs);
                    let past_deadline = now
                        .checked_add(Duration::from_secs(retry_after_secs))
                        .is_none_or(|retry_at| retry_at > deadline);
                    if request.requeues >= self.config.max_throttle_requeues || past_deadline {
                        q.stats.failed += 1;
                        drop(q);
                        tracing::warn!(
                            session = request.session.id(),
                            requeues = request.requeues,
                            "giving up on throttled request"
                        );
                        self.resolve(request, APOLOGY_REPLY).await;
                        continue;
                    }

                    request.requeues += 1;
                    request.anchor = now;
                    request.retry_delay_seconds = retry_after_secs;
                    request.delay_kind = DelayKind::Throttled;
                    q.stats.requeued += 1;
                    drop(q);

                    tracing::warn!(
                        session = request.session.id(),
                        "provider throttled, requeueing with {retry_after_secs}s delay"
                    );
                    request
                        .session
                        .show_pending(&mut request.ticket, THROTTLED_PLACEHOLDER)
                        .await;
                    self.queue.lock().await.pending.push_back(request);
                }
            }
        }
    }

    /// Answer one request against a snapshot of its session state. The
    /// responder runs in its own task so a panic there fails only this
    /// request.
    async fn respond(&self, request: &QueuedRequest) -> Outcome {
        let session = &request.session;
        let mut state = session.snapshot_state().await;
        let responder = self.responder.clone();
        let message = request.message.clone();
        let history = request.ticket.history.clone();

        let answered = tokio::spawn(async move {
            let result = responder.respond(&mut state, &message, &history).await;
            (state, result)
        })
        .await;

        match answered {
            Ok((state, result)) => {
                if !session.commit_state(&request.ticket, state).await {
                    tracing::debug!(session = session.id(), "session reset mid-request, state discarded");
                }
                match result {
                    Ok(reply) => Outcome::Resolved(reply),
                    Err(ChatError::Throttled { retry_after_secs }) => Outcome::Requeue(retry_after_secs),
                    Err(e) => Outcome::Failed(e.to_string()),
                }
            }
            Err(err) => Outcome::Failed(format!("responder task failed: {err}")),
        }
    }

    async fn resolve(&self, request: QueuedRequest, reply: &str) {
        request.session.finish_turn(&request.ticket, reply).await;
        if request.reply.send(reply.to_string()).is_err() {
            tracing::debug!(session = request.session.id(), "reply receiver dropped");
        }
    }
}
