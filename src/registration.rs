//! Registration (spec.md §4.6): admits nodes into new or existing
//! clusters. Ported from `cluster.go`'s `Register` / `RegisterNodesTo` /
//! `prepareNodes`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::datanode::DataNodeClientFactory;
use crate::error::{DosError, Result};
use crate::model::{derive_node_id, Cluster, ClusterId, Node, NodeId};
use crate::store::ClusterStore;
use crate::synchronize::SynchronizeQueue;

/// Retry a fallible probe up to `retry_count` times with the same
/// exponential backoff used by `Move`/`Balance`, giving up and returning
/// `None` once exhausted.
async fn retry_probe<T, F, Fut>(retry_count: u32, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let mut attempt = 0;
    loop {
        if let Some(v) = op().await {
            return Some(v);
        }
        if attempt >= retry_count {
            return None;
        }
        attempt += 1;
        tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt))).await;
    }
}

/// Probe each address (Ping, Size, HardwareId), derive its `NodeId`, and
/// reject duplicate addresses or ids already present in the farm.
/// `expected_size` is `0` for a brand-new cluster (the first probed node's
/// Size wins) or the existing cluster's Size when adding to one. Each probe
/// is retried with backoff (spec.md §7) before the address is given up on.
async fn prepare_nodes(
    cluster_store: &dyn ClusterStore,
    data_nodes: &dyn DataNodeClientFactory,
    addresses: &[String],
    mut expected_size: u64,
    retry_count: u32,
) -> Result<(Vec<Node>, u64)> {
    let mut seen_addresses = std::collections::HashSet::new();
    let mut nodes = Vec::with_capacity(addresses.len());

    for address in addresses {
        if !seen_addresses.insert(address.clone()) {
            return Err(DosError::InvalidArgument(format!("node address entered twice: {address}")));
        }

        let client = data_nodes.connect(address);

        let rtt = retry_probe(retry_count, || client.ping()).await;
        if rtt.is_none() {
            return Err(DosError::Ping(address.clone()));
        }

        let size = retry_probe(retry_count, || async { client.size().await.ok() })
            .await
            .ok_or_else(|| DosError::NoAvailableActionNode(address.clone()))?;
        if expected_size > 0 && size != expected_size {
            return Err(DosError::SizeMismatch(format!("{address} reports {size}, expected {expected_size}")));
        }
        expected_size = size;

        let hardware_id = retry_probe(retry_count, || async { client.hardware_id().await.ok() })
            .await
            .ok_or_else(|| DosError::NoAvailableActionNode(address.clone()))?;
        let node_id = derive_node_id(&hardware_id, address, expected_size);

        match cluster_store.get_by_node_id(&node_id) {
            Ok(_) => return Err(DosError::Registered(node_id.to_string())),
            Err(DosError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        nodes.push(Node::new(node_id, address.clone()));
    }

    Ok((nodes, expected_size))
}

/// `Register`: probes every address, makes the first one master, joins
/// every node, then persists the new cluster. Any failure before the
/// persist leaves no side effect on `ClusterStore`; failures after some
/// `Join` calls have gone out leave those nodes joinable — the caller
/// retries or falls back to `UnRegisterNode` (spec.md §4.6).
pub async fn register(
    cluster_store: &dyn ClusterStore,
    data_nodes: &dyn DataNodeClientFactory,
    addresses: &[String],
    retry_count: u32,
) -> Result<Cluster> {
    if addresses.is_empty() {
        return Err(DosError::InvalidArgument("at least one node address is required".into()));
    }

    let (mut nodes, size) = prepare_nodes(cluster_store, data_nodes, addresses, 0, retry_count).await?;

    let cluster_id = ClusterId::new_random();
    let mut master_address = String::new();

    for (i, node) in nodes.iter_mut().enumerate() {
        let this_master_address = master_address.clone();
        if i == 0 {
            node.master = true;
            master_address = node.address.clone();
        }

        let client = data_nodes.connect(&node.address);
        let joined = retry_probe(retry_count, || async { client.join(cluster_id.as_str(), node.id.as_str(), &this_master_address).await.ok() })
            .await
            .unwrap_or(false);
        if !joined {
            return Err(DosError::Mode(node.address.clone()));
        }
    }

    let mut cluster = Cluster::new(cluster_id, size);
    cluster.nodes = nodes;

    cluster_store.register_cluster(cluster.clone())?;
    Ok(cluster)
}

/// `RegisterNodesTo`: adds nodes to an existing cluster, pointed at its
/// current master, then leaves `Maintain=true` for the caller's
/// `Synchronize` job to clear once reconciliation completes.
pub async fn register_nodes_to(
    cluster_store: &dyn ClusterStore,
    data_nodes: &dyn DataNodeClientFactory,
    synchronize: &Arc<SynchronizeQueue>,
    cluster_id: &ClusterId,
    addresses: &[String],
    retry_count: u32,
) -> Result<()> {
    let cluster = cluster_store.get(cluster_id)?;
    if cluster.maintain {
        return Err(DosError::Maintain(cluster_id.to_string()));
    }

    let master = cluster.master().ok_or_else(|| DosError::NoAvailableActionNode(cluster_id.to_string()))?.clone();

    let (new_nodes, _size) = prepare_nodes(cluster_store, data_nodes, addresses, cluster.size, retry_count).await?;

    for node in &new_nodes {
        let client = data_nodes.connect(&node.address);
        let joined = retry_probe(retry_count, || async { client.join(cluster_id.as_str(), node.id.as_str(), &master.address).await.ok() })
            .await
            .unwrap_or(false);
        if !joined {
            return Err(DosError::Join(node.address.clone()));
        }
    }

    cluster_store.save(cluster_id, &mut |c| {
        if c.maintain {
            return Err(DosError::Maintain(c.id.to_string()));
        }
        c.nodes.extend(new_nodes.clone());
        c.maintain = true;
        c.topic = crate::model::Topic::RegisterNodes;
        Ok(())
    })?;

    synchronize.queue_cluster(cluster_id.clone(), true, false).await;
    Ok(())
}

/// `Handshake`: re-`Join` every cluster's nodes against their current
/// master, accumulating per-node failures as warnings rather than
/// aborting the sweep (`cluster.go`'s `Handshake`).
pub async fn handshake(cluster_store: &dyn ClusterStore, data_nodes: &dyn DataNodeClientFactory) -> Result<()> {
    let clusters = cluster_store.get_all()?;
    let mut had_error = false;
    let mut failures: HashMap<NodeId, String> = HashMap::new();

    for cluster in clusters {
        let Some(master) = cluster.master() else { continue };

        let master_client = data_nodes.connect(&master.address);
        match master_client.join(cluster.id.as_str(), master.id.as_str(), "").await {
            Ok(true) => {}
            _ => {
                had_error = true;
                failures.insert(master.id.clone(), "master join failed".to_string());
                continue;
            }
        }

        for slave in cluster.slaves() {
            let client = data_nodes.connect(&slave.address);
            match client.join(cluster.id.as_str(), slave.id.as_str(), &master.address).await {
                Ok(true) => {}
                _ => {
                    had_error = true;
                    failures.insert(slave.id.clone(), "slave join failed".to_string());
                }
            }
        }
    }

    if had_error {
        return Err(DosError::Join(format!("{} node(s) failed to rejoin", failures.len())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datanode::mock::{MockDataNodeClient, MockFactory};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc as StdArc;

    fn factory_with(nodes: Vec<(&str, u64, &str)>) -> MockFactory {
        let mut map = StdHashMap::new();
        for (addr, size, hw) in nodes {
            map.insert(addr.to_string(), StdArc::new(MockDataNodeClient::new(addr, size, hw)));
        }
        MockFactory { nodes: map }
    }

    #[tokio::test]
    async fn register_creates_cluster_with_first_node_as_master() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::FileClusterStore::open(dir.path()).unwrap();
        let factory = factory_with(vec![("10.0.0.1:9430", 1 << 30, "hw1"), ("10.0.0.2:9430", 1 << 30, "hw2")]);

        let cluster = register(&store, &factory, &["10.0.0.1:9430".to_string(), "10.0.0.2:9430".to_string()], 1).await.unwrap();

        assert_eq!(cluster.nodes.len(), 2);
        assert!(cluster.nodes[0].master);
        assert!(!cluster.nodes[1].master);
        assert_eq!(cluster.size, 1 << 30);
    }

    #[tokio::test]
    async fn register_fails_on_size_mismatch_with_no_side_effect() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::FileClusterStore::open(dir.path()).unwrap();
        let factory = factory_with(vec![("10.0.0.1:9430", 1 << 30, "hw1"), ("10.0.0.2:9430", 2 << 30, "hw2")]);

        let err = register(&store, &factory, &["10.0.0.1:9430".to_string(), "10.0.0.2:9430".to_string()], 1).await.unwrap_err();
        assert!(matches!(err, DosError::SizeMismatch(_)));
        assert!(store.get_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_rejects_duplicate_address() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::FileClusterStore::open(dir.path()).unwrap();
        let factory = factory_with(vec![("10.0.0.1:9430", 1 << 30, "hw1")]);

        let err = register(&store, &factory, &["10.0.0.1:9430".to_string(), "10.0.0.1:9430".to_string()], 1).await.unwrap_err();
        assert!(matches!(err, DosError::InvalidArgument(_)));
    }
}
