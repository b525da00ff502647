//! ============================================================================
//! Ingest Queue - Background ingestion off the chat path
//! ============================================================================
//! `enqueue` never waits: a full queue is reported as `QueueFull`. A
//! dispatcher task runs ingests with bounded concurrency and redelivers
//! transiently failed messages with backoff before counting them as failed.
//! ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::error::MemoryError;
use super::retry::{calculate_delay, RetryPolicy};
use super::types::ChatMessage;
use super::writer::MemoryWriter;

#[derive(Debug, Clone)]
pub struct IngestQueueConfig {
    /// Messages waiting for a worker
    pub capacity: usize,
    /// Ingests running at once
    pub concurrency: usize,
    /// Extra attempts after the first failed ingest
    pub redeliveries: u32,
    /// Backoff between redeliveries
    pub backoff: RetryPolicy,
}

impl Default for IngestQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            concurrency: 8,
            redeliveries: 3,
            backoff: RetryPolicy {
                base_delay_ms: 1000,
                max_delay_ms: 30_000,
                ..Default::default()
            },
        }
    }
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub enqueued: u64,
    pub ingested: u64,
    pub failed: u64,
    pub redelivered: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    ingested: AtomicU64,
    failed: AtomicU64,
    redelivered: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> IngestStats {
        IngestStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
        }
    }
}

/// Bounded background ingest worker pool
pub struct IngestQueue {
    sender: Mutex<Option<mpsc::Sender<ChatMessage>>>,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl IngestQueue {
    /// Start the dispatcher on the current tokio runtime
    pub fn spawn(writer: MemoryWriter, config: IngestQueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let counters = Arc::new(Counters::default());

        info!(
            "Starting ingest queue (capacity: {}, concurrency: {})",
            config.capacity, config.concurrency
        );

        let handle = tokio::spawn(dispatch(rx, writer, config, counters.clone()));

        Self {
            sender: Mutex::new(Some(tx)),
            dispatcher: tokio::sync::Mutex::new(Some(handle)),
            counters,
        }
    }

    /// Hand a persisted message to the background writer
    pub fn enqueue(&self, message: ChatMessage) -> Result<(), MemoryError> {
        let guard = self.sender.lock().map_err(|_| MemoryError::QueueClosed)?;
        let sender = guard.as_ref().ok_or(MemoryError::QueueClosed)?;

        match sender.try_send(message) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!("Ingest queue full, dropping message {}", message.id);
                Err(MemoryError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(MemoryError::QueueClosed),
        }
    }

    /// Stop accepting new messages. Already queued ones still run.
    pub fn close(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    /// Stop accepting messages and wait for queued and in-flight ingests
    pub async fn shutdown(&self) {
        self.close();

        let handle = self.dispatcher.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Ingest dispatcher panicked: {}", e);
            }
        }

        let stats = self.stats();
        info!(
            "Ingest queue stopped (ingested: {}, failed: {}, redelivered: {})",
            stats.ingested, stats.failed, stats.redelivered
        );
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<ChatMessage>,
    writer: MemoryWriter,
    config: IngestQueueConfig,
    counters: Arc<Counters>,
) {
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!("Ingest task panicked: {}", e);
                }
            }
            next = rx.recv() => {
                let Some(message) = next else { break };
                let Ok(permit) = semaphore.clone().acquire_owned().await else { break };

                let writer = writer.clone();
                let config = config.clone();
                let counters = counters.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    ingest_with_redelivery(&writer, &message, &config, &counters).await;
                });
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Ingest task panicked: {}", e);
        }
    }
    debug!("Ingest dispatcher drained");
}

async fn ingest_with_redelivery(
    writer: &MemoryWriter,
    message: &ChatMessage,
    config: &IngestQueueConfig,
    counters: &Counters,
) {
    let mut delivery = 0u32;

    loop {
        match writer.ingest(message).await {
            Ok(()) => {
                counters.ingested.fetch_add(1, Ordering::Relaxed);
                return;
            }
            // Permanent failures come back the same way on every delivery
            Err(e) if !e.is_transient() => {
                error!("Dropping message {}: {}", message.id, e);
                counters.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) if delivery < config.redeliveries => {
                let delay = calculate_delay(delivery, &config.backoff);
                warn!(
                    "Ingest of message {} failed, redelivering in {:?}: {}",
                    message.id, delay, e
                );
                counters.redelivered.fetch_add(1, Ordering::Relaxed);
                delivery += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    "Ingest of message {} failed after {} deliveries: {}",
                    message.id,
                    delivery + 1,
                    e
                );
                counters.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }
}
