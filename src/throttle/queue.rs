//! Throttled, retrying delivery queue for outbound sends.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::api::ApiError;
use crate::config::DeliveryConfig;
use super::limiter::RateLimiter;

/// A re-invocable send operation. Retries run the closure again.
pub type SendOperation =
    Box<dyn Fn() -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;

/// One pending delivery.
struct DeliveryJob {
    recipient: i64,
    send: SendOperation,
    retry_count: u32,
}

/// A delivery that exhausted its retry budget or hit a permanent rejection.
#[derive(Debug)]
pub struct FailedDelivery {
    pub recipient: i64,
    pub retry_count: u32,
    pub error: ApiError,
}

/// Aggregate delivery statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs delivered successfully
    pub success: u64,
    /// Jobs that failed permanently
    pub failed: u64,
    /// Jobs currently waiting in the queue
    pub pending: usize,
    /// Recipients with permanently-failed jobs
    pub failed_recipients: Vec<i64>,
}

/// Single-consumer queue draining send jobs through the shared rate limiter.
///
/// FIFO, except that a job hitting a transient failure rejoins the tail with
/// an exponential-backoff delay; retries never jump ahead of freshly-enqueued
/// jobs. Permanent failures are recorded and surfaced only through
/// [`get_stats`](Self::get_stats).
pub struct DeliveryQueue {
    limiter: Arc<RateLimiter>,
    config: DeliveryConfig,
    tx: mpsc::UnboundedSender<DeliveryJob>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<DeliveryJob>>,
    depth: AtomicUsize,
    success_count: AtomicU64,
    fail_count: AtomicU64,
    is_running: AtomicBool,
    failed_jobs: parking_lot::Mutex<Vec<FailedDelivery>>,
}

impl DeliveryQueue {
    /// Create a queue with default delivery settings.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self::with_config(limiter, DeliveryConfig::default())
    }

    /// Create a queue from configuration.
    pub fn with_config(limiter: Arc<RateLimiter>, config: DeliveryConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            limiter,
            config,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            depth: AtomicUsize::new(0),
            success_count: AtomicU64::new(0),
            fail_count: AtomicU64::new(0),
            is_running: AtomicBool::new(false),
            failed_jobs: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Append a send job to the queue.
    pub fn add_message(&self, recipient: i64, send: SendOperation) {
        self.enqueue(DeliveryJob {
            recipient,
            send,
            retry_count: 0,
        });
    }

    fn enqueue(&self, job: DeliveryJob) {
        self.depth.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as self, so send cannot fail.
        let _ = self.tx.send(job);
    }

    /// Drain the queue until it is empty and idle.
    ///
    /// Pops with a bounded wait so jobs enqueued while the loop is running
    /// are still observed; every send passes through the shared `broadcast`
    /// throttle before it executes.
    pub async fn process_queue(&self) {
        self.is_running.store(true, Ordering::SeqCst);
        let poll = Duration::from_secs(self.config.poll_timeout_secs);
        let mut rx = self.rx.lock().await;

        while self.depth.load(Ordering::SeqCst) > 0 || self.is_running.load(Ordering::SeqCst) {
            let job = match timeout(poll, rx.recv()).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(_) => {
                    if self.depth.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                    continue;
                }
            };
            self.depth.fetch_sub(1, Ordering::SeqCst);

            self.limiter.wait_if_needed("broadcast", None).await;

            match (job.send)().await {
                Ok(()) => {
                    self.success_count.fetch_add(1, Ordering::SeqCst);
                    debug!(recipient = job.recipient, "message sent");
                }
                Err(e) => self.handle_failure(job, e).await,
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
    }

    /// Classify a send failure and either re-enqueue or record it.
    async fn handle_failure(&self, mut job: DeliveryJob, err: ApiError) {
        if err.is_retryable() && job.retry_count < self.config.max_retries {
            job.retry_count += 1;
            let delay = Duration::from_secs(1u64 << job.retry_count);
            warn!(
                recipient = job.recipient,
                attempt = job.retry_count,
                delay_secs = delay.as_secs(),
                error = %err,
                "transient send failure, retrying"
            );
            tokio::time::sleep(delay).await;
            self.enqueue(job);
        } else {
            error!(
                recipient = job.recipient,
                retries = job.retry_count,
                error = %err,
                "delivery failed permanently"
            );
            self.fail_count.fetch_add(1, Ordering::SeqCst);
            self.failed_jobs.lock().push(FailedDelivery {
                recipient: job.recipient,
                retry_count: job.retry_count,
                error: err,
            });
        }
    }

    /// Request a stop and wait, best-effort, for the queue to drain.
    ///
    /// Waits up to the configured drain timeout; remaining jobs are left in
    /// the queue and logged, never force-cancelled.
    pub async fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);

        let deadline = Instant::now() + Duration::from_secs(self.config.drain_timeout_secs);
        while self.depth.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let remaining = self.depth.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!(remaining, "stopped with messages still queued");
        } else {
            info!("delivery queue drained");
        }
    }

    /// Current delivery statistics.
    pub fn get_stats(&self) -> QueueStats {
        let failed_recipients = self
            .failed_jobs
            .lock()
            .iter()
            .map(|f| f.recipient)
            .collect();
        QueueStats {
            success: self.success_count.load(Ordering::SeqCst),
            failed: self.fail_count.load(Ordering::SeqCst),
            pending: self.depth.load(Ordering::SeqCst),
            failed_recipients,
        }
    }

    /// Snapshot of permanently-failed deliveries.
    pub fn failed_deliveries(&self) -> Vec<(i64, u32)> {
        self.failed_jobs
            .lock()
            .iter()
            .map(|f| (f.recipient, f.retry_count))
            .collect()
    }
}
