//! The cluster-administration facade: wires `ClusterStore`, `IndexStore`,
//! `DataNodeClientFactory` and the `SynchronizeQueue` together behind one
//! public API, mirroring the Go source's `cluster` struct / `Cluster`
//! interface in `manager/cluster.go`. Every operation logs at its boundary
//! per spec.md §7 — operation name, cluster/node id, and error kind.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use crate::balance::balance_clusters;
use crate::config::Config;
use crate::datanode::DataNodeClientFactory;
use crate::delete::{delete as delete_chunk, delete_many as delete_many_chunks};
use crate::error::Result;
use crate::model::{ChunkHash, Cluster, ClusterId, ClusterState, DeletionResult, Intent, NodeId, ReservationMap};
use crate::move_cluster::move_cluster;
use crate::placement::{find, map as map_chunks, FindOutcome};
use crate::registration::{handshake, register, register_nodes_to};
use crate::reservation::{commit as reservation_commit, discard as reservation_discard, reserve as reservation_reserve};
use crate::snapshot::{create_snapshot, delete_snapshot, restore_snapshot};
use crate::state::{change_state, change_state_all};
use crate::store::{ClusterStore, IndexStore};
use crate::synchronize::SynchronizeQueue;
use crate::unregister::{unregister_cluster, unregister_node};

/// Top-level entry point consumed by the admin binary and (eventually) a
/// head-node RPC server. Cheap to clone: every field is an `Arc`.
#[derive(Clone)]
pub struct Manager {
    cluster_store: Arc<dyn ClusterStore>,
    index_store: Arc<dyn IndexStore>,
    data_nodes: Arc<dyn DataNodeClientFactory>,
    synchronize: Arc<SynchronizeQueue>,
    config: Config,
}

impl Manager {
    pub fn new(
        cluster_store: Arc<dyn ClusterStore>,
        index_store: Arc<dyn IndexStore>,
        data_nodes: Arc<dyn DataNodeClientFactory>,
        config: Config,
    ) -> Self {
        let synchronize = SynchronizeQueue::new(cluster_store.clone(), index_store.clone(), data_nodes.clone());
        Self { cluster_store, index_store, data_nodes, synchronize, config }
    }

    /// Start the background maintenance watchdog (spec.md §9's binding
    /// answer to the stale-`Maintain` open question). Call once at process
    /// startup; idempotent re-calls would spawn duplicate watchdogs, so
    /// callers should only invoke this from `main`.
    pub fn spawn_watchdog(&self) {
        self.synchronize.spawn_maintain_watchdog(self.config.stale_maintain_after, std::time::Duration::from_secs(60));
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn register(&self, addresses: &[String]) -> Result<Cluster> {
        let result = register(&*self.cluster_store, &*self.data_nodes, addresses, self.config.retry_count).await;
        match &result {
            Ok(c) => info!(operation = "register", cluster_id = %c.id, "cluster registered"),
            Err(e) => error!(operation = "register", error = %e, "register failed"),
        }
        result
    }

    pub async fn register_nodes_to(&self, cluster_id: &ClusterId, addresses: &[String]) -> Result<()> {
        let result = register_nodes_to(&*self.cluster_store, &*self.data_nodes, &self.synchronize, cluster_id, addresses, self.config.retry_count).await;
        log_result("register_nodes_to", Some(cluster_id), &result);
        result
    }

    pub async fn handshake(&self) -> Result<()> {
        let result = handshake(&*self.cluster_store, &*self.data_nodes).await;
        log_result::<()>("handshake", None, &result);
        result
    }

    pub async fn unregister_cluster(&self, cluster_id: &ClusterId) -> Result<()> {
        let result = unregister_cluster(&*self.cluster_store, &*self.data_nodes, cluster_id).await;
        log_result("unregister_cluster", Some(cluster_id), &result);
        result
    }

    pub async fn unregister_node(&self, node_id: &NodeId) -> Result<()> {
        let lead_duration = chrono::Duration::from_std(self.config.lead_duration).unwrap_or(chrono::Duration::minutes(5));
        let result = unregister_node(&*self.cluster_store, &*self.data_nodes, &self.synchronize, lead_duration, node_id).await;
        match &result {
            Ok(()) => info!(operation = "unregister_node", node_id = %node_id, "node unregistered"),
            Err(e) => error!(operation = "unregister_node", node_id = %node_id, error = %e, "unregister_node failed"),
        }
        result
    }

    pub fn get_cluster(&self, cluster_id: &ClusterId) -> Result<Cluster> {
        self.cluster_store.get(cluster_id)
    }

    pub fn get_clusters(&self) -> Result<Vec<Cluster>> {
        self.cluster_store.get_all()
    }

    pub fn reserve(&self, size: u64) -> Result<ReservationMap> {
        let result = reservation_reserve(&*self.cluster_store, size, self.config.reservation_ttl);
        log_result::<ReservationMap>("reserve", None, &result);
        result
    }

    pub fn commit(&self, reservation_id: &str, per_cluster_actual: &HashMap<ClusterId, u64>) -> Result<()> {
        let result = reservation_commit(&*self.cluster_store, reservation_id, per_cluster_actual);
        log_result::<()>("commit", None, &result);
        result
    }

    pub fn discard(&self, reservation_id: &str) -> Result<()> {
        let result = reservation_discard(&*self.cluster_store, reservation_id);
        log_result::<()>("discard", None, &result);
        result
    }

    pub fn find(&self, hash: &ChunkHash, intent: Intent) -> Result<FindOutcome> {
        find(&*self.cluster_store, &*self.index_store, hash, intent)
    }

    pub fn map(&self, hashes: &[ChunkHash], intent: Intent) -> Result<Vec<(ChunkHash, Vec<String>)>> {
        map_chunks(&*self.cluster_store, &*self.index_store, hashes, intent)
    }

    pub async fn delete(&self, hash: &ChunkHash, kill_zombies: bool) -> Result<()> {
        let result = delete_chunk(&*self.cluster_store, &*self.index_store, &*self.data_nodes, hash, kill_zombies).await;
        match &result {
            Ok(()) => info!(operation = "delete", hash = %hash, "chunk deleted"),
            Err(e) => error!(operation = "delete", hash = %hash, error = %e, "delete failed"),
        }
        result
    }

    pub async fn delete_many(&self, hashes: &[ChunkHash], kill_zombies: bool) -> Result<DeletionResult> {
        let result = delete_many_chunks(&*self.cluster_store, &*self.index_store, &*self.data_nodes, hashes, kill_zombies).await;
        match &result {
            Ok(r) => info!(operation = "delete_many", deleted = r.deleted.len(), missing = r.missing.len(), untouched = r.untouched.len(), "bulk delete complete"),
            Err(e) => error!(operation = "delete_many", error = %e, "delete_many failed"),
        }
        result
    }

    pub async fn move_cluster(&self, src: &ClusterId, tgt: &ClusterId) -> Result<()> {
        let result = move_cluster(
            &*self.cluster_store,
            &*self.index_store,
            &*self.data_nodes,
            src,
            tgt,
            self.config.batch_size,
            self.config.retry_count,
        )
        .await;
        match &result {
            Ok(()) => info!(operation = "move_cluster", src = %src, tgt = %tgt, "move complete"),
            Err(e) => error!(operation = "move_cluster", src = %src, tgt = %tgt, error = %e, "move failed"),
        }
        result
    }

    pub async fn balance_clusters(&self, cluster_ids: &[ClusterId]) -> Result<()> {
        let result = balance_clusters(
            &*self.cluster_store,
            &*self.index_store,
            &*self.data_nodes,
            cluster_ids,
            self.config.balance_epsilon,
            self.config.batch_size,
            self.config.retry_count,
        )
        .await;
        match &result {
            Ok(()) => info!(operation = "balance_clusters", count = cluster_ids.len(), "balance complete"),
            Err(e) => error!(operation = "balance_clusters", count = cluster_ids.len(), error = %e, "balance failed"),
        }
        result
    }

    pub fn change_state(&self, cluster_id: &ClusterId, state: ClusterState) -> Result<()> {
        let result = change_state(&*self.cluster_store, cluster_id, state);
        log_result("change_state", Some(cluster_id), &result);
        result
    }

    pub fn change_state_all(&self, state: ClusterState) -> Result<()> {
        let result = change_state_all(&*self.cluster_store, state);
        log_result::<()>("change_state_all", None, &result);
        result
    }

    pub async fn create_snapshot(&self, cluster_id: &ClusterId) -> Result<()> {
        let result = create_snapshot(&*self.cluster_store, &*self.data_nodes, &self.synchronize, cluster_id).await;
        log_result("create_snapshot", Some(cluster_id), &result);
        result
    }

    pub async fn delete_snapshot(&self, cluster_id: &ClusterId, index: u64) -> Result<()> {
        let result = delete_snapshot(&*self.cluster_store, &*self.data_nodes, &self.synchronize, cluster_id, index).await;
        log_result("delete_snapshot", Some(cluster_id), &result);
        result
    }

    pub async fn restore_snapshot(&self, cluster_id: &ClusterId, index: u64) -> Result<()> {
        let result = restore_snapshot(&*self.cluster_store, &*self.data_nodes, &self.synchronize, cluster_id, index).await;
        log_result("restore_snapshot", Some(cluster_id), &result);
        result
    }

    /// `sync-cluster` / `sync-clusters` admin verbs: queue a full (non-fast)
    /// reconciliation job without touching `Maintain`.
    pub async fn synchronize_cluster(&self, cluster_id: &ClusterId) -> Result<()> {
        self.synchronize.cluster(cluster_id.clone(), false, false, false).await
    }

    pub async fn synchronize_all(&self) -> Result<()> {
        for cluster in self.cluster_store.get_all()? {
            self.synchronize.cluster(cluster.id, false, false, false).await?;
        }
        Ok(())
    }
}

fn log_result<T>(operation: &'static str, cluster_id: Option<&ClusterId>, result: &Result<T>) {
    match (result, cluster_id) {
        (Ok(_), Some(id)) => info!(operation, cluster_id = %id, "ok"),
        (Ok(_), None) => info!(operation, "ok"),
        (Err(e), Some(id)) => error!(operation, cluster_id = %id, error = %e, "failed"),
        (Err(e), None) => error!(operation, error = %e, "failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datanode::mock::MockFactory;
    use crate::store::{FileClusterStore, FileIndexStore};
    use std::collections::HashMap as StdHashMap;

    fn harness() -> (tempfile::TempDir, tempfile::TempDir, Manager) {
        let cdir = tempfile::tempdir().unwrap();
        let idir = tempfile::tempdir().unwrap();
        let cluster_store: Arc<dyn ClusterStore> = Arc::new(FileClusterStore::open(cdir.path()).unwrap());
        let index_store: Arc<dyn IndexStore> = Arc::new(FileIndexStore::open(idir.path()).unwrap());
        let data_nodes: Arc<dyn DataNodeClientFactory> = Arc::new(MockFactory { nodes: StdHashMap::new() });
        let manager = Manager::new(cluster_store, index_store, data_nodes, Config::default());
        (cdir, idir, manager)
    }

    #[tokio::test]
    async fn register_then_get_cluster_round_trips() {
        let (_c, _i, manager) = harness();
        let cluster = manager.register(&["10.0.0.1:9430".to_string()]).await.unwrap();
        let fetched = manager.get_cluster(&cluster.id).unwrap();
        assert_eq!(fetched.id, cluster.id);
        assert_eq!(manager.get_clusters().unwrap().len(), 1);
    }

    #[test]
    fn reserve_and_discard_round_trip_with_no_side_effect() {
        let (_c, _i, manager) = harness();
        let err = manager.reserve(1024).unwrap_err();
        assert!(matches!(err, crate::error::DosError::NoSpace { .. }));
    }
}
