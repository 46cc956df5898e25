//! Snapshots (spec.md §4.9): Create/Delete/Restore, each serialized
//! through the `Maintain` flag and handed off to `Synchronize` to clear it.

use std::sync::Arc;

use crate::datanode::{DataNodeClientFactory, SnapshotOp};
use crate::error::{DosError, Result};
use crate::model::{ClusterId, Topic};
use crate::store::ClusterStore;
use crate::synchronize::SynchronizeQueue;

async fn run_snapshot_op(
    cluster_store: &dyn ClusterStore,
    data_nodes: &dyn DataNodeClientFactory,
    synchronize: &Arc<SynchronizeQueue>,
    cluster_id: &ClusterId,
    topic: Topic,
    op: SnapshotOp,
) -> Result<()> {
    let cluster = cluster_store.get(cluster_id)?;
    if cluster.maintain {
        return Err(DosError::Maintain(cluster_id.to_string()));
    }
    cluster_store.update_maintain(cluster_id, true, topic)?;

    let master = match cluster.master() {
        Some(m) => m.clone(),
        None => {
            cluster_store.update_maintain(cluster_id, false, Topic::None)?;
            return Err(DosError::NoAvailableActionNode(cluster_id.to_string()));
        }
    };

    let client = data_nodes.connect(&master.address);
    match client.snapshot(op).await {
        Ok(true) => {}
        Ok(false) => {
            cluster_store.update_maintain(cluster_id, false, Topic::None)?;
            return Err(DosError::Snapshot(cluster_id.to_string()));
        }
        Err(e) => {
            cluster_store.update_maintain(cluster_id, false, Topic::None)?;
            return Err(e);
        }
    }

    synchronize.cluster(cluster_id.clone(), true, false, false).await
}

pub async fn create_snapshot(cluster_store: &dyn ClusterStore, data_nodes: &dyn DataNodeClientFactory, synchronize: &Arc<SynchronizeQueue>, cluster_id: &ClusterId) -> Result<()> {
    run_snapshot_op(cluster_store, data_nodes, synchronize, cluster_id, Topic::CreateSnapshot, SnapshotOp::Create).await
}

pub async fn delete_snapshot(
    cluster_store: &dyn ClusterStore,
    data_nodes: &dyn DataNodeClientFactory,
    synchronize: &Arc<SynchronizeQueue>,
    cluster_id: &ClusterId,
    index: u64,
) -> Result<()> {
    run_snapshot_op(cluster_store, data_nodes, synchronize, cluster_id, Topic::DeleteSnapshot, SnapshotOp::Delete(index)).await
}

pub async fn restore_snapshot(
    cluster_store: &dyn ClusterStore,
    data_nodes: &dyn DataNodeClientFactory,
    synchronize: &Arc<SynchronizeQueue>,
    cluster_id: &ClusterId,
    index: u64,
) -> Result<()> {
    run_snapshot_op(cluster_store, data_nodes, synchronize, cluster_id, Topic::RestoreSnapshot, SnapshotOp::Restore(index)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datanode::mock::{MockDataNodeClient, MockFactory};
    use crate::model::{Cluster, Node, NodeId};
    use crate::store::{FileClusterStore, FileIndexStore, IndexStore};
    use std::collections::HashMap;
    use std::sync::Arc as StdArc;

    async fn harness() -> (tempfile::TempDir, Arc<dyn ClusterStore>, Arc<dyn DataNodeClientFactory>, Arc<SynchronizeQueue>) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileClusterStore::open(dir.path()).unwrap();
        let mut c = Cluster::new(ClusterId("c1".into()), 1 << 30);
        let mut master = Node::new(NodeId("n1".into()), "10.0.0.1:1".into());
        master.master = true;
        c.nodes.push(master);
        store.register_cluster(c).unwrap();

        let mut nodes = HashMap::new();
        nodes.insert("10.0.0.1:1".to_string(), StdArc::new(MockDataNodeClient::new("10.0.0.1:1", 1 << 30, "hw1")));
        let factory: Arc<dyn DataNodeClientFactory> = Arc::new(MockFactory { nodes });

        let cluster_store: Arc<dyn ClusterStore> = Arc::new(store);
        let index_dir = tempfile::tempdir().unwrap();
        let index_store: Arc<dyn IndexStore> = Arc::new(FileIndexStore::open(index_dir.path()).unwrap());
        let queue = SynchronizeQueue::new(cluster_store.clone(), index_store, factory.clone());

        (dir, cluster_store, factory, queue)
    }

    #[tokio::test]
    async fn create_snapshot_succeeds_and_queues_sync() {
        let (_d, cluster_store, factory, queue) = harness().await;
        create_snapshot(&*cluster_store, &*factory, &queue, &ClusterId("c1".into())).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let c = cluster_store.get(&ClusterId("c1".into())).unwrap();
        assert!(!c.maintain);
    }

    #[tokio::test]
    async fn snapshot_rejects_cluster_already_under_maintain() {
        let (_d, cluster_store, factory, queue) = harness().await;
        cluster_store.update_maintain(&ClusterId("c1".into()), true, Topic::Move).unwrap();
        let err = create_snapshot(&*cluster_store, &*factory, &queue, &ClusterId("c1".into())).await.unwrap_err();
        assert!(matches!(err, DosError::Maintain(_)));
    }
}
