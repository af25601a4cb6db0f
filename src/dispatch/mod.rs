//! Best-effort outbound notifications.
//!
//! Services hand a [`Notification`] to the [`NotificationDispatcher`], which
//! enqueues it without waiting. A single worker task delivers queued
//! notifications through a [`MessageSender`], retrying transient failures with
//! exponential backoff. A full queue drops the notification; a notification
//! that exhausts its retries is logged and dropped. Neither case ever reaches
//! the ledger transaction that produced it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::utils::retry::{dispatch_backoff, is_retryable_dispatch};

/// Errors from the outbound message client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("Messaging provider unavailable: {0}")]
    Unavailable(String),

    #[error("Messaging provider timed out")]
    Timeout,

    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Something worth telling a customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A reply to a message the customer sent.
    Reply { recipient: String, text: String },
    /// Points were added to a balance.
    PointsAssigned {
        recipient: String,
        tenant_name: String,
        points: i64,
        total_points: i64,
    },
    /// A reward code was minted.
    RewardIssued {
        recipient: String,
        tenant_name: String,
        code: String,
        value: i64,
        expires_at: DateTime<Utc>,
    },
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Notification::Reply { recipient, .. }
            | Notification::PointsAssigned { recipient, .. }
            | Notification::RewardIssued { recipient, .. } => recipient,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Reply { .. } => "reply",
            Notification::PointsAssigned { .. } => "points_assigned",
            Notification::RewardIssued { .. } => "reward_issued",
        }
    }

    /// Message text sent to the customer.
    pub fn render(&self) -> String {
        match self {
            Notification::Reply { text, .. } => text.clone(),
            Notification::PointsAssigned {
                tenant_name,
                points,
                total_points,
                ..
            } => format!(
                "You earned {} points at {}. Your balance is now {} points.",
                points, tenant_name, total_points
            ),
            Notification::RewardIssued {
                tenant_name,
                code,
                value,
                expires_at,
                ..
            } => format!(
                "Congratulations! You unlocked a reward worth {} at {}. Your code is {} and it is valid until {}.",
                value,
                tenant_name,
                code,
                expires_at.format("%Y-%m-%d")
            ),
        }
    }
}

/// Outbound message client (WhatsApp gateway, SMS, ...).
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), DispatchError>;
}

/// Delivery counters.
#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Rejected at enqueue time because the queue was full or closed.
    pub dropped: u64,
}

/// Fire-and-forget handle to the notification queue.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Notification>,
    counters: Arc<Counters>,
}

impl NotificationDispatcher {
    /// Start the delivery worker. It exits once every handle is dropped and
    /// the queue has drained.
    pub fn spawn(
        sender: Arc<dyn MessageSender>,
        config: &DispatchConfig,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run_worker(rx, sender, config.clone(), counters.clone()));
        (Self { tx, counters }, worker)
    }

    /// Enqueue without waiting. Returns `false` if the notification was dropped.
    pub fn notify(&self, notification: Notification) -> bool {
        let kind = notification.kind();
        match self.tx.try_send(notification) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                debug!(kind, "Notification enqueued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind, "Notification queue full, dropping notification");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind, "Notification worker stopped, dropping notification");
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Notification>,
    sender: Arc<dyn MessageSender>,
    config: DispatchConfig,
    counters: Arc<Counters>,
) {
    info!(capacity = config.capacity, "Notification dispatcher started");

    while let Some(notification) = rx.recv().await {
        let recipient = notification.recipient().to_string();
        let text = notification.render();
        let kind = notification.kind();

        let result = (|| async { sender.send(&recipient, &text).await })
            .retry(dispatch_backoff(&config))
            .when(is_retryable_dispatch)
            .notify(|err: &DispatchError, dur: Duration| {
                warn!(
                    kind,
                    error = %err,
                    retry_in = ?dur,
                    "Notification delivery failed, retrying"
                );
            })
            .await;

        match result {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(kind, recipient = %recipient, "Notification delivered");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(kind, recipient = %recipient, error = %e, "Notification dropped");
            }
        }
    }

    info!("Notification dispatcher stopped");
}

/// A message handed to a [`RecordingSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: String,
    pub text: String,
}

/// Sender that keeps messages in memory, with failure injection for tests.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentMessage>>,
    attempts: AtomicU64,
    transient_failures: AtomicU64,
    reject_all: std::sync::atomic::AtomicBool,
    delivered: Notify,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` attempts with a retryable error.
    pub fn fail_next(&self, count: u64) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Reject every message with a non-retryable error.
    pub fn reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    /// Wait until at least `count` messages were delivered, or `timeout` passes.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<SentMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.delivered.notified();
            {
                let sent = self.sent.lock().await;
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.sent.lock().await.clone();
            }
        }
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), DispatchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(DispatchError::Rejected(recipient.to_string()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DispatchError::Unavailable("injected failure".to_string()));
        }
        self.sent.lock().await.push(SentMessage {
            recipient: recipient.to_string(),
            text: text.to_string(),
        });
        self.delivered.notify_waiters();
        Ok(())
    }
}

/// Sender that only logs. Used when no messaging provider is configured.
#[derive(Debug, Default)]
pub struct LogSender;

#[async_trait]
impl MessageSender for LogSender {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), DispatchError> {
        info!(recipient = %recipient, text = %text, "Outbound message");
        Ok(())
    }
}
