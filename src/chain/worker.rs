//! Bounded append worker pool.
//!
//! Ingest hands `{event_id, reader_id, timestamp}` to a bounded queue so it
//! never suspends on the VDF computation itself. When the policy requires
//! the response to await the link, the job carries a oneshot the worker
//! completes with the assigned sequence number. Jobs are never dropped: a
//! full queue exerts backpressure on the submitter.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info};
use uuid::Uuid;

use crate::infra::{Result, ShutdownSignal, TollError};
use crate::metrics::Metrics;

use super::VdfChain;

struct ChainJob {
    event_id: Uuid,
    reader_id: String,
    timestamp: i64,
    done: Option<oneshot::Sender<Result<u64>>>,
}

/// Submitter handle to the worker pool.
#[derive(Clone)]
pub struct ChainWorkerHandle {
    tx: mpsc::Sender<ChainJob>,
}

impl ChainWorkerHandle {
    /// Queue an append and return immediately. Applies backpressure when
    /// the queue is full rather than dropping the event.
    pub async fn submit(&self, event_id: Uuid, reader_id: &str, timestamp: i64) -> Result<()> {
        self.tx
            .send(ChainJob {
                event_id,
                reader_id: reader_id.to_string(),
                timestamp,
                done: None,
            })
            .await
            .map_err(|_| TollError::ShuttingDown)
    }

    /// Queue an append and wait for the assigned sequence number.
    pub async fn submit_and_wait(
        &self,
        event_id: Uuid,
        reader_id: &str,
        timestamp: i64,
    ) -> Result<u64> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(ChainJob {
                event_id,
                reader_id: reader_id.to_string(),
                timestamp,
                done: Some(done_tx),
            })
            .await
            .map_err(|_| TollError::ShuttingDown)?;
        done_rx.await.map_err(|_| TollError::ShuttingDown)?
    }
}

/// Spawn the append worker pool over a bounded queue.
pub fn spawn_chain_workers(
    chain: Arc<VdfChain>,
    metrics: Arc<Metrics>,
    workers: usize,
    queue_capacity: usize,
    signal: ShutdownSignal,
) -> ChainWorkerHandle {
    let (tx, rx) = mpsc::channel::<ChainJob>(queue_capacity.max(1));
    let rx = Arc::new(Mutex::new(rx));

    for worker_id in 0..workers.max(1) {
        let chain = chain.clone();
        let metrics = metrics.clone();
        let rx = rx.clone();
        let signal = signal.clone();
        tokio::spawn(async move {
            info!(worker_id, "VDF append worker started");
            loop {
                let job = {
                    let mut rx = rx.lock().await;
                    tokio::select! {
                        job = rx.recv() => job,
                        _ = signal.wait() => None,
                    }
                };
                let Some(job) = job else {
                    info!(worker_id, "VDF append worker stopped");
                    break;
                };

                let result = chain
                    .append(job.event_id, &job.reader_id, job.timestamp)
                    .await
                    .map(|link| link.seq);
                match &result {
                    Ok(_) => Metrics::incr(&metrics.links_appended),
                    Err(err) => {
                        // The reconciliation pass repairs the gap.
                        error!(event_id = %job.event_id, %err, "VDF append failed");
                    }
                }
                if let Some(done) = job.done {
                    let _ = done.send(result);
                }
            }
        });
    }

    ChainWorkerHandle { tx }
}
