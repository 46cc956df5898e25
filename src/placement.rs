//! Placement / Find / Map (spec.md §4.5): resolves a chunk hash to a
//! cluster and an ordered list of node addresses.

use crate::error::{DosError, Result};
use crate::model::{ChunkHash, ClusterId, ClusterState, Intent};
use crate::store::{ClusterStore, IndexStore};

/// `Find` outcome: `Skip` is the "Delete on an unknown hash" sentinel from
/// spec.md §4.5 — never surfaced as an error.
pub enum FindOutcome {
    Found { cluster_id: ClusterId, addresses: Vec<String> },
    Skip,
}

pub fn find(cluster_store: &dyn ClusterStore, index_store: &dyn IndexStore, hash: &ChunkHash, intent: Intent) -> Result<FindOutcome> {
    let entry = match index_store.get(hash) {
        Ok(e) => e,
        Err(DosError::NotFound(_)) if intent == Intent::Delete => return Ok(FindOutcome::Skip),
        Err(e) => return Err(e),
    };

    let cluster = cluster_store.get(&entry.cluster_id)?;

    if cluster.state == ClusterState::Offline {
        return Err(DosError::NoAvailableActionNode(format!("cluster {} is offline", cluster.id)));
    }
    if intent.is_mutate() && !cluster.can_schedule() {
        return Err(DosError::NoAvailableActionNode(format!("cluster {} cannot schedule writes", cluster.id)));
    }

    let addresses = match intent {
        Intent::Read => {
            let nodes = cluster.prioritized_high_quality_nodes(&entry.exists_in);
            if nodes.is_empty() {
                return Err(DosError::NoAvailableActionNode(format!("no replica of {hash} is reachable")));
            }
            nodes.into_iter().map(|n| n.address.clone()).collect()
        }
        Intent::Create | Intent::Delete => {
            let master = cluster
                .master()
                .ok_or_else(|| DosError::NoAvailableActionNode(format!("cluster {} has no master", cluster.id)))?;
            vec![master.address.clone()]
        }
    };

    Ok(FindOutcome::Found { cluster_id: cluster.id, addresses })
}

/// Batched `Find`; entries that resolve to `Skip` are omitted from the map
/// rather than surfaced as an error (spec.md §4.5).
pub fn map(
    cluster_store: &dyn ClusterStore,
    index_store: &dyn IndexStore,
    hashes: &[ChunkHash],
    intent: Intent,
) -> Result<Vec<(ChunkHash, Vec<String>)>> {
    let mut out = Vec::with_capacity(hashes.len());
    for hash in hashes {
        match find(cluster_store, index_store, hash, intent)? {
            FindOutcome::Found { addresses, .. } => out.push((hash.clone(), addresses)),
            FindOutcome::Skip => continue,
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cluster, ChunkIndexEntry, Node, NodeId};
    use crate::store::{FileClusterStore, FileIndexStore};
    use std::collections::HashSet;

    fn fixtures() -> (tempfile::TempDir, tempfile::TempDir, FileClusterStore, FileIndexStore) {
        let cdir = tempfile::tempdir().unwrap();
        let idir = tempfile::tempdir().unwrap();
        let cluster_store = FileClusterStore::open(cdir.path()).unwrap();
        let index_store = FileIndexStore::open(idir.path()).unwrap();

        let mut cluster = Cluster::new(ClusterId("c1".into()), 1 << 30);
        let mut master = Node::new(NodeId("n1".into()), "10.0.0.1:9430".into());
        master.master = true;
        master.quality = 5;
        let mut slave = Node::new(NodeId("n2".into()), "10.0.0.2:9430".into());
        slave.quality = 1;
        cluster.nodes.push(master);
        cluster.nodes.push(slave);
        cluster_store.register_cluster(cluster).unwrap();

        let hash = ChunkHash("a".repeat(128));
        let mut exists_in = HashSet::new();
        exists_in.insert(NodeId("n1".into()));
        exists_in.insert(NodeId("n2".into()));
        index_store.upsert(hash, ClusterId("c1".into()), exists_in).unwrap();

        (cdir, idir, cluster_store, index_store)
    }

    #[test]
    fn read_intent_sorts_by_quality_ascending() {
        let (_c, _i, cluster_store, index_store) = fixtures();
        let hash = ChunkHash("a".repeat(128));
        match find(&cluster_store, &index_store, &hash, Intent::Read).unwrap() {
            FindOutcome::Found { addresses, .. } => {
                assert_eq!(addresses, vec!["10.0.0.2:9430".to_string(), "10.0.0.1:9430".to_string()]);
            }
            FindOutcome::Skip => panic!("expected Found"),
        }
    }

    #[test]
    fn mutate_intent_returns_master_address_only() {
        let (_c, _i, cluster_store, index_store) = fixtures();
        let hash = ChunkHash("a".repeat(128));
        match find(&cluster_store, &index_store, &hash, Intent::Create).unwrap() {
            FindOutcome::Found { addresses, .. } => assert_eq!(addresses, vec!["10.0.0.1:9430".to_string()]),
            FindOutcome::Skip => panic!("expected Found"),
        }
    }

    #[test]
    fn delete_on_unknown_hash_skips_not_errors() {
        let (_c, _i, cluster_store, index_store) = fixtures();
        let hash = ChunkHash("b".repeat(128));
        match find(&cluster_store, &index_store, &hash, Intent::Delete).unwrap() {
            FindOutcome::Skip => {}
            FindOutcome::Found { .. } => panic!("expected Skip"),
        }
    }

    #[test]
    fn read_on_unknown_hash_is_an_error() {
        let (_c, _i, cluster_store, index_store) = fixtures();
        let hash = ChunkHash("b".repeat(128));
        assert!(find(&cluster_store, &index_store, &hash, Intent::Read).is_err());
    }

    #[test]
    fn offline_cluster_blocks_even_reads() {
        let (_c, _i, cluster_store, index_store) = fixtures();
        cluster_store
            .save(&ClusterId("c1".into()), &mut |c| {
                c.state = ClusterState::Offline;
                Ok(())
            })
            .unwrap();
        let hash = ChunkHash("a".repeat(128));
        let err = find(&cluster_store, &index_store, &hash, Intent::Read).unwrap_err();
        assert!(matches!(err, DosError::NoAvailableActionNode(_)));
    }

    #[test]
    fn map_skips_missing_deletes_and_keeps_order() {
        let (_c, _i, cluster_store, index_store) = fixtures();
        let present = ChunkHash("a".repeat(128));
        let missing = ChunkHash("b".repeat(128));
        let result = map(&cluster_store, &index_store, &[present.clone(), missing], Intent::Delete).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0, present);
    }
}
