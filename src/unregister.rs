//! UnRegister (spec.md §4.7): tears down a whole cluster or removes a
//! single node from one, re-electing a master when needed.

use std::sync::Arc;

use crate::datanode::DataNodeClientFactory;
use crate::error::{DosError, Result};
use crate::model::{master_first_key, ClusterId, ClusterState, NodeId};
use crate::store::ClusterStore;
use crate::synchronize::SynchronizeQueue;

/// `UnRegisterCluster`: requires the cluster to already be
/// `Offline ∧ Maintain=true` (the caller transitions it there first, per
/// `ChangeState`), then best-effort `Wipe`s every node before deleting the
/// record.
pub async fn unregister_cluster(cluster_store: &dyn ClusterStore, data_nodes: &dyn DataNodeClientFactory, cluster_id: &ClusterId) -> Result<()> {
    cluster_store.save(cluster_id, &mut |c| {
        if c.maintain && c.state != ClusterState::Offline {
            return Err(DosError::Maintain(cluster_id.to_string()));
        }
        c.state = ClusterState::Offline;
        c.maintain = true;
        Ok(())
    })?;

    let mut wipe_targets = Vec::new();
    cluster_store.unregister_cluster(cluster_id, &mut |cluster| {
        wipe_targets = cluster.nodes.iter().map(|n| n.address.clone()).collect();
        Ok(())
    })?;

    for address in wipe_targets {
        data_nodes.connect(&address).wipe().await;
    }

    Ok(())
}

/// `UnRegisterNode`: fails if the node is the cluster's only member,
/// otherwise re-elects a master (first remaining node in registration
/// order, per the open-question decision in SPEC_FULL.md §12) before
/// removing the node and triggering reconciliation.
pub async fn unregister_node(
    cluster_store: &dyn ClusterStore,
    data_nodes: &dyn DataNodeClientFactory,
    synchronize: &Arc<SynchronizeQueue>,
    lead_duration: chrono::Duration,
    node_id: &NodeId,
) -> Result<()> {
    let cluster = cluster_store.get_by_node_id(node_id)?;
    if cluster.nodes.len() <= 1 {
        return Err(DosError::InvalidArgument(format!("{node_id} is the only node in its cluster")));
    }

    let deleting = cluster
        .nodes
        .iter()
        .find(|n| &n.id == node_id)
        .cloned()
        .ok_or_else(|| DosError::NotFound(node_id.to_string()))?;
    let was_master = deleting.master;

    let mut new_master_address = None;

    cluster_store.save(&cluster.id, &mut |c| {
        c.nodes.retain(|n| &n.id != node_id);

        if was_master {
            c.nodes.sort_by_key(master_first_key);
            if let Some(new_master) = c.nodes.first_mut() {
                new_master.master = true;
                new_master.set_lead_duration(lead_duration);
                new_master_address = Some(new_master.address.clone());
            }
        }
        Ok(())
    })?;

    if let Some(address) = new_master_address {
        let ok = data_nodes.connect(&address).set_mode(true).await?;
        if !ok {
            return Err(DosError::Mode(address));
        }
    }

    let deleting_client = data_nodes.connect(&deleting.address);
    if !deleting_client.leave().await? {
        return Err(DosError::Leave(deleting.address.clone()));
    }
    deleting_client.wipe().await;

    synchronize.cluster(cluster.id.clone(), true, false, false).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datanode::mock::{MockDataNodeClient, MockFactory};
    use crate::model::{Cluster, Node};
    use crate::store::FileClusterStore;
    use std::collections::HashMap;
    use std::sync::Arc as StdArc;

    fn two_node_cluster() -> Cluster {
        let mut c = Cluster::new(ClusterId("c1".into()), 1 << 30);
        let mut master = Node::new(NodeId("n1".into()), "10.0.0.1:1".into());
        master.master = true;
        let slave = Node::new(NodeId("n2".into()), "10.0.0.2:1".into());
        c.nodes.push(master);
        c.nodes.push(slave);
        c
    }

    fn factory() -> MockFactory {
        let mut nodes = HashMap::new();
        nodes.insert("10.0.0.1:1".to_string(), StdArc::new(MockDataNodeClient::new("10.0.0.1:1", 1 << 30, "hw1")));
        nodes.insert("10.0.0.2:1".to_string(), StdArc::new(MockDataNodeClient::new("10.0.0.2:1", 1 << 30, "hw2")));
        MockFactory { nodes }
    }

    #[tokio::test]
    async fn unregister_node_on_master_elects_new_master() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileClusterStore::open(dir.path()).unwrap();
        store.register_cluster(two_node_cluster()).unwrap();

        let data_nodes = factory();
        let index_dir = tempfile::tempdir().unwrap();
        let index_store: Arc<dyn crate::store::IndexStore> = Arc::new(crate::store::FileIndexStore::open(index_dir.path()).unwrap());
        let cluster_store_arc: Arc<dyn ClusterStore> = Arc::new(store);
        let factory_arc: Arc<dyn DataNodeClientFactory> = Arc::new(data_nodes);
        let queue = SynchronizeQueue::new(cluster_store_arc.clone(), index_store, factory_arc.clone());

        unregister_node(&*cluster_store_arc, &*factory_arc, &queue, chrono::Duration::minutes(5), &NodeId("n1".into()))
            .await
            .unwrap();

        let updated = cluster_store_arc.get(&ClusterId("c1".into())).unwrap();
        assert_eq!(updated.nodes.len(), 1);
        assert_eq!(updated.nodes[0].id, NodeId("n2".into()));
        assert!(updated.nodes[0].master);
    }

    #[tokio::test]
    async fn unregister_only_node_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileClusterStore::open(dir.path()).unwrap();
        let mut c = Cluster::new(ClusterId("c1".into()), 1 << 30);
        let mut master = Node::new(NodeId("n1".into()), "10.0.0.1:1".into());
        master.master = true;
        c.nodes.push(master);
        store.register_cluster(c).unwrap();

        let data_nodes = factory();
        let index_dir = tempfile::tempdir().unwrap();
        let index_store: Arc<dyn crate::store::IndexStore> = Arc::new(crate::store::FileIndexStore::open(index_dir.path()).unwrap());
        let cluster_store_arc: Arc<dyn ClusterStore> = Arc::new(store);
        let factory_arc: Arc<dyn DataNodeClientFactory> = Arc::new(data_nodes);
        let queue = SynchronizeQueue::new(cluster_store_arc.clone(), index_store, factory_arc.clone());

        let err = unregister_node(&*cluster_store_arc, &*factory_arc, &queue, chrono::Duration::minutes(5), &NodeId("n1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DosError::InvalidArgument(_)));
    }
}
