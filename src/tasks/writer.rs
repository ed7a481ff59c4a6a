//! Disk Writer Pool
//!
//! Background workers that make `put` durable. Jobs flow through a bounded
//! channel whose receiver is shared by a fixed number of workers. When the
//! channel is full the configured [`Backpressure`] policy decides whether the
//! caller waits or performs the write itself.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, EngineCore};
use crate::config::Backpressure;
use crate::error::{CacheError, Result};

/// A durable write for one `put`. `version` identifies the put so stale jobs
/// can be skipped.
#[derive(Debug, Clone)]
pub(crate) struct WriteJob {
    pub(crate) entry: CacheEntry,
    pub(crate) version: u64,
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<WriteJob>>>;

// == Disk Writer ==
pub(crate) struct DiskWriter {
    core: Arc<EngineCore>,
    sender: parking_lot::RwLock<Option<mpsc::Sender<WriteJob>>>,
    receiver: SharedReceiver,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    backpressure: Backpressure,
}

impl DiskWriter {
    /// Spawns `workers` tasks draining a queue of `capacity` jobs.
    pub(crate) fn start(
        core: Arc<EngineCore>,
        workers: usize,
        capacity: usize,
        backpressure: Backpressure,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver: SharedReceiver = Arc::new(Mutex::new(receiver));
        let cancel = CancellationToken::new();

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    core.clone(),
                    receiver.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        info!(workers, capacity, ?backpressure, "Disk writer pool started");

        Self {
            core,
            sender: parking_lot::RwLock::new(Some(sender)),
            receiver,
            workers: parking_lot::Mutex::new(handles),
            cancel,
            backpressure,
        }
    }

    // == Submit ==
    /// Queues a job. A full queue either blocks or writes inline depending on
    /// the backpressure policy; a closed queue always writes inline.
    pub(crate) async fn submit(&self, job: WriteJob) -> Result<()> {
        let sender = self.sender.read().clone();
        let Some(sender) = sender else {
            return self.write_inline(job).await;
        };

        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => match self.backpressure {
                Backpressure::Block => {
                    debug!(key = %job.entry.key, "Write queue full, waiting for capacity");
                    match sender.send(job).await {
                        Ok(()) => Ok(()),
                        Err(mpsc::error::SendError(job)) => self.write_inline(job).await,
                    }
                }
                Backpressure::WriteInline => {
                    debug!(key = %job.entry.key, "Write queue full, writing inline");
                    self.write_inline(job).await
                }
            },
            Err(TrySendError::Closed(job)) => self.write_inline(job).await,
        }
    }

    async fn write_inline(&self, job: WriteJob) -> Result<()> {
        match self.core.persist_once(&job).await {
            Ok(_) => Ok(()),
            Err(source) => {
                warn!(key = %job.entry.key, error = %source, "Inline disk write failed");
                self.core.record_inline_failure(&job);
                Err(CacheError::DurableWriteFailed {
                    key: job.entry.key,
                    source,
                })
            }
        }
    }

    // == Shutdown ==
    /// Stops the pool. With `flush` the queue is drained by the workers;
    /// without it the workers stop after their current job and every job
    /// still queued is dropped and logged.
    pub(crate) async fn shutdown(&self, flush: bool) {
        // Dropping the last sender lets workers see the end of the queue
        self.sender.write().take();

        if !flush {
            self.cancel.cancel();
        }

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Disk writer ended abnormally");
            }
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        let mut dropped = 0usize;
        while let Ok(job) = receiver.try_recv() {
            self.core.drop_job(job);
            dropped += 1;
        }

        if dropped > 0 {
            warn!(dropped, "Disk writer pool stopped with unflushed writes");
        } else {
            info!("Disk writer pool stopped");
        }
    }
}

async fn run_worker(
    id: usize,
    core: Arc<EngineCore>,
    receiver: SharedReceiver,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = receiver.recv() => job,
            }
        };

        let Some(job) = job else { break };
        core.persist_with_retry(job).await;
    }

    debug!(worker = id, "Disk writer stopped");
}
