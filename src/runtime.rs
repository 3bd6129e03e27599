//! Partitioned stream runtime: entities are sharded across worker tasks by a
//! stable hash of the sender id, so all messages from one entity land on the
//! same worker in arrival order. Determinism holds per partition; entities
//! never share mutable state across partitions.

use crate::config::IdsConfig;
use crate::decision::Verdict;
use crate::error::IdsError;
use crate::message::Message;
use crate::model::Classifier;
use crate::pipeline::IdsPipeline;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const PARTITION_QUEUE_DEPTH: usize = 1024;

/// Final per-worker accounting, returned from `shutdown`.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStats {
    pub partition: usize,
    pub processed: u64,
    pub rejected: u64,
}

/// Stable FNV-1a over the sender id; must not vary across runs or platforms.
pub fn partition_for(sender_id: &str, partitions: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in sender_id.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % partitions as u64) as usize
}

pub struct PartitionedRuntime {
    senders: Vec<mpsc::Sender<Message>>,
    workers: Vec<JoinHandle<PartitionStats>>,
    verdict_rx: mpsc::UnboundedReceiver<Verdict>,
    model_tx: watch::Sender<Arc<dyn Classifier>>,
}

impl PartitionedRuntime {
    /// Spawn `partitions` workers, each owning an independent pipeline over
    /// its shard of the entity space, all sharing one model.
    pub fn spawn(
        config: &IdsConfig,
        classifier: Arc<dyn Classifier>,
        partitions: usize,
    ) -> Self {
        let partitions = partitions.max(1);
        let (verdict_tx, verdict_rx) = mpsc::unbounded_channel();
        let (model_tx, model_rx) = watch::channel(Arc::clone(&classifier));

        let mut senders = Vec::with_capacity(partitions);
        let mut workers = Vec::with_capacity(partitions);
        for partition in 0..partitions {
            let (tx, rx) = mpsc::channel::<Message>(PARTITION_QUEUE_DEPTH);
            let mut pipeline = IdsPipeline::new(config);
            pipeline.install_model(Arc::clone(&classifier));
            workers.push(tokio::spawn(worker_loop(
                partition,
                pipeline,
                rx,
                verdict_tx.clone(),
                model_rx.clone(),
            )));
            senders.push(tx);
        }
        info!(partitions, "runtime started");
        Self {
            senders,
            workers,
            verdict_rx,
            model_tx,
        }
    }

    /// Replace the model on every worker. Each partition picks up the new
    /// model between messages; windows already sealed keep their verdicts.
    pub fn swap_model(&self, classifier: Arc<dyn Classifier>) {
        let _ = self.model_tx.send(classifier);
    }

    /// Route one message to its entity's worker. Applies backpressure when
    /// the partition queue is full.
    pub async fn dispatch(&self, msg: Message) -> Result<(), IdsError> {
        let idx = partition_for(&msg.sender_id, self.senders.len());
        self.senders[idx]
            .send(msg)
            .await
            .map_err(|_| IdsError::model("worker partition has shut down"))
    }

    /// Next verdict from any partition, `None` once all workers finished.
    pub async fn next_verdict(&mut self) -> Option<Verdict> {
        self.verdict_rx.recv().await
    }

    /// Close the intake, let every worker drain its queue and flush its open
    /// windows, then collect final stats and any verdicts not yet consumed.
    pub async fn shutdown(mut self) -> (Vec<PartitionStats>, Vec<Verdict>) {
        drop(self.senders);
        let mut stats = Vec::with_capacity(self.workers.len());
        for handle in self.workers {
            match handle.await {
                Ok(s) => stats.push(s),
                Err(e) => warn!(error = %e, "worker panicked during shutdown"),
            }
        }
        stats.sort_by_key(|s| s.partition);
        let mut remaining = Vec::new();
        while let Ok(v) = self.verdict_rx.try_recv() {
            remaining.push(v);
        }
        (stats, remaining)
    }
}

async fn worker_loop(
    partition: usize,
    mut pipeline: IdsPipeline,
    mut rx: mpsc::Receiver<Message>,
    verdicts: mpsc::UnboundedSender<Verdict>,
    mut model_rx: watch::Receiver<Arc<dyn Classifier>>,
) -> PartitionStats {
    while let Some(msg) = rx.recv().await {
        if model_rx.has_changed().unwrap_or(false) {
            pipeline.install_model(Arc::clone(&model_rx.borrow_and_update()));
        }
        match pipeline.process(&msg) {
            Ok(out) => {
                for v in out {
                    if verdicts.send(v).is_err() {
                        break;
                    }
                }
            }
            // rejection is already logged with the reason; the stream goes on
            Err(_) => {}
        }
    }
    for v in pipeline.finish() {
        let _ = verdicts.send(v);
    }
    PartitionStats {
        partition,
        processed: pipeline.processed(),
        rejected: pipeline.rejected(),
    }
}
