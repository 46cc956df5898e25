//! Synchronize queue (spec.md §4.12): a per-cluster single-writer
//! reconciliation queue, plus the stale-`Maintain` watchdog described in
//! spec.md §9 and bound in SPEC_FULL.md §12.
//!
//! Modeled as a singleton service with explicit start/stop and a
//! message-passing entry point, per spec.md §9's note on global mutable
//! state — callers never touch the worker loop directly, only `queue`.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::datanode::DataNodeClientFactory;
use crate::error::Result;
use crate::model::{ClusterId, Topic};
use crate::store::{ClusterStore, IndexStore};

#[derive(Debug, Clone)]
pub struct SyncJob {
    pub cluster_id: ClusterId,
    pub keep_maintain: bool,
    pub fast: bool,
}

/// One worker per cluster id, so jobs on different clusters run
/// concurrently while jobs on the same cluster are strictly serialized.
pub struct SynchronizeQueue {
    cluster_store: Arc<dyn ClusterStore>,
    index_store: Arc<dyn IndexStore>,
    data_nodes: Arc<dyn DataNodeClientFactory>,
    workers: Mutex<HashMap<ClusterId, mpsc::UnboundedSender<SyncJob>>>,
    stale_since: Mutex<HashMap<ClusterId, tokio::time::Instant>>,
}

impl SynchronizeQueue {
    pub fn new(cluster_store: Arc<dyn ClusterStore>, index_store: Arc<dyn IndexStore>, data_nodes: Arc<dyn DataNodeClientFactory>) -> Arc<Self> {
        Arc::new(Self {
            cluster_store,
            index_store,
            data_nodes,
            workers: Mutex::new(HashMap::new()),
            stale_since: Mutex::new(HashMap::new()),
        })
    }

    /// Enqueue a job for `cluster_id`, spawning its dedicated worker task
    /// on first use.
    pub async fn queue_cluster(self: &Arc<Self>, cluster_id: ClusterId, keep_maintain: bool, fast: bool) {
        let mut workers = self.workers.lock().await;
        let tx = workers.entry(cluster_id.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let this = Arc::clone(self);
            tokio::spawn(this.run_worker(rx));
            tx
        });
        let _ = tx.send(SyncJob { cluster_id, keep_maintain, fast });
    }

    /// Synchronous-feeling wrapper used by callers (e.g. `UnRegisterNode`)
    /// that want the job queued but don't await its completion, matching
    /// `Synchronize.Cluster`'s fire-and-forget semantics in the Go source.
    pub async fn cluster(self: &Arc<Self>, cluster_id: ClusterId, keep_maintain: bool, _immediate: bool, fast: bool) -> Result<()> {
        self.queue_cluster(cluster_id, keep_maintain, fast).await;
        Ok(())
    }

    async fn run_worker(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<SyncJob>) {
        while let Some(job) = rx.recv().await {
            if let Err(e) = self.run_job(&job).await {
                warn!(cluster_id = %job.cluster_id, error = %e, "synchronize job failed");
            }
        }
    }

    async fn run_job(&self, job: &SyncJob) -> Result<()> {
        let cluster = self.cluster_store.get(&job.cluster_id)?;

        let master = match cluster.master() {
            Some(m) => m.clone(),
            None => {
                warn!(cluster_id = %job.cluster_id, "synchronize skipped: no master");
                return Ok(());
            }
        };

        let master_client = self.data_nodes.connect(&master.address);

        if job.fast {
            // Fast mode only refreshes reachability/quality, no chunk diffing.
            let rtt = master_client.ping().await;
            self.cluster_store.save(&job.cluster_id, &mut |c| {
                if let Some(m) = c.master_mut() {
                    m.quality = rtt.unwrap_or(i64::MAX);
                }
                Ok(())
            })?;
        } else {
            let master_chunks: HashSet<String> = master_client.chunk_list().await?.into_iter().collect();

            let mut coverage: HashMap<String, HashSet<crate::model::NodeId>> = HashMap::new();
            for hash in &master_chunks {
                coverage.entry(hash.clone()).or_default().insert(master.id.clone());
            }

            let mut qualities: HashMap<crate::model::NodeId, i64> = HashMap::new();
            let master_rtt = master_client.ping().await;
            qualities.insert(master.id.clone(), master_rtt.unwrap_or(i64::MAX));

            for slave in cluster.slaves() {
                let client = self.data_nodes.connect(&slave.address);
                let rtt = client.ping().await;
                qualities.insert(slave.id.clone(), rtt.unwrap_or(i64::MAX));

                let slave_chunks: HashSet<String> = client.chunk_list().await.unwrap_or_default().into_iter().collect();
                let missing: Vec<String> = master_chunks.difference(&slave_chunks).cloned().collect();
                if !missing.is_empty() {
                    let _ = client.sync_move(&master.address, &missing).await;
                }
                for hash in slave_chunks {
                    coverage.entry(hash).or_default().insert(slave.id.clone());
                }
            }

            for (hash_hex, exists_in) in coverage {
                if let Ok(hash) = crate::model::ChunkHash::new(hash_hex) {
                    self.index_store.upsert(hash, job.cluster_id.clone(), exists_in)?;
                }
            }

            self.cluster_store.save(&job.cluster_id, &mut |c| {
                for node in c.nodes.iter_mut() {
                    if let Some(q) = qualities.get(&node.id) {
                        node.quality = *q;
                    }
                }
                Ok(())
            })?;
        }

        if !job.keep_maintain {
            self.cluster_store.update_maintain(&job.cluster_id, false, Topic::None)?;
        }

        info!(cluster_id = %job.cluster_id, fast = job.fast, "synchronize complete");
        Ok(())
    }

    /// Background watchdog: clears `Maintain=true` on any cluster that has
    /// been observed stuck in `Maintain` for at least `stale_after`, logging
    /// loudly. This is the binding answer to the open question in spec.md
    /// §9 and SPEC_FULL.md §12: each cluster's staleness is tracked against
    /// the tick it was *first* seen stuck, independently of how many other
    /// clusters are also stuck, so the watchdog never blocks on a sleep
    /// inside its poll loop.
    pub fn spawn_maintain_watchdog(self: &Arc<Self>, stale_after: std::time::Duration, poll_interval: std::time::Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                let Ok(clusters) = this.cluster_store.get_all() else { continue };

                let now = tokio::time::Instant::now();
                let still_maintaining: HashSet<ClusterId> = clusters.iter().filter(|c| c.maintain).map(|c| c.id.clone()).collect();

                let mut stale_since = this.stale_since.lock().await;
                stale_since.retain(|id, _| still_maintaining.contains(id));

                for id in &still_maintaining {
                    let since = *stale_since.entry(id.clone()).or_insert(now);
                    if now.duration_since(since) >= stale_after {
                        warn!(cluster_id = %id, "forcing stale Maintain flag clear");
                        let _ = this.cluster_store.update_maintain(id, false, Topic::None);
                        stale_since.remove(id);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datanode::mock::{MockDataNodeClient, MockFactory};
    use crate::model::{Cluster, ClusterState, Node, NodeId};
    use crate::store::{FileClusterStore, FileIndexStore};
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn fast_sync_updates_master_quality_and_clears_maintain() {
        let cdir = tempfile::tempdir().unwrap();
        let idir = tempfile::tempdir().unwrap();
        let cluster_store: Arc<dyn ClusterStore> = Arc::new(FileClusterStore::open(cdir.path()).unwrap());
        let index_store: Arc<dyn IndexStore> = Arc::new(FileIndexStore::open(idir.path()).unwrap());

        let mut cluster = Cluster::new(ClusterId("c1".into()), 1 << 30);
        cluster.state = ClusterState::Online;
        cluster.maintain = true;
        let mut master = Node::new(NodeId("n1".into()), "10.0.0.1:1".into());
        master.master = true;
        cluster.nodes.push(master);
        cluster_store.register_cluster(cluster).unwrap();

        let mut nodes = HashMap::new();
        nodes.insert("10.0.0.1:1".to_string(), StdArc::new(MockDataNodeClient::new("10.0.0.1:1", 1 << 30, "hw1")));
        let factory: Arc<dyn DataNodeClientFactory> = Arc::new(MockFactory { nodes });

        let queue = SynchronizeQueue::new(cluster_store.clone(), index_store, factory);
        queue.cluster(ClusterId("c1".into()), false, false, true).await.unwrap();

        // give the spawned worker a chance to run
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let updated = cluster_store.get(&ClusterId("c1".into())).unwrap();
        assert!(!updated.maintain);
    }
}
