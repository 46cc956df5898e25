//! Move (spec.md §4.10): copies every chunk of a source cluster into a
//! target cluster, batch by batch, then retires the source.

use crate::datanode::DataNodeClientFactory;
use crate::error::{DosError, Result};
use crate::model::{ClusterId, ClusterState, Topic};
use crate::store::{ClusterStore, IndexStore};

/// Acquire both clusters' per-cluster locks in ascending id order (spec.md
/// §5's lock-ordering rule) and mark them `Maintain=true` under `Topic::Move`.
fn begin_move(cluster_store: &dyn ClusterStore, src: &ClusterId, tgt: &ClusterId) -> Result<()> {
    let (first, second) = if src.as_str() <= tgt.as_str() { (src, tgt) } else { (tgt, src) };

    for id in [first, second] {
        cluster_store.save(id, &mut |c| {
            if !c.can_schedule() {
                return Err(DosError::NoAvailableActionNode(c.id.to_string()));
            }
            c.maintain = true;
            c.topic = Topic::Move;
            Ok(())
        })?;
    }
    Ok(())
}

/// `Move(src, tgt)`. On success the source cluster is transitioned
/// `Offline` and unregistered; on abort after `retry_count` batch
/// failures, already-remapped entries stay valid (their bytes live on
/// `tgt`), both clusters are left `Maintain=true`, and the error surfaces
/// for an operator to rerun `Move` (spec.md §4.10 step 4).
pub async fn move_cluster(
    cluster_store: &dyn ClusterStore,
    index_store: &dyn IndexStore,
    data_nodes: &dyn DataNodeClientFactory,
    src: &ClusterId,
    tgt: &ClusterId,
    batch_size: usize,
    retry_count: u32,
) -> Result<()> {
    begin_move(cluster_store, src, tgt)?;

    let src_cluster = cluster_store.get(src)?;
    let tgt_cluster = cluster_store.get(tgt)?;
    let src_master = src_cluster.master().ok_or_else(|| DosError::NoAvailableActionNode(src.to_string()))?.clone();
    let tgt_master = tgt_cluster.master().ok_or_else(|| DosError::NoAvailableActionNode(tgt.to_string()))?.clone();

    let entries = index_store.entries_for_cluster(src)?;
    let mut moved_bytes: u64 = 0;

    for batch in entries.chunks(batch_size.max(1)) {
        let hashes: Vec<String> = batch.iter().map(|e| e.hash.as_str().to_string()).collect();

        let mut attempt = 0;
        let ok = loop {
            let src_client = data_nodes.connect(&src_master.address);
            match src_client.sync_move(&tgt_master.address, &hashes).await {
                Ok(true) => break true,
                Ok(false) | Err(_) if attempt < retry_count => {
                    attempt += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt))).await;
                }
                _ => break false,
            }
        };

        if !ok {
            return Err(DosError::Internal(format!(
                "move {src} -> {tgt} aborted after {retry_count} retries; {moved_bytes} bytes already remapped, Maintain left set"
            )));
        }

        let batch_hashes: Vec<_> = batch.iter().map(|e| e.hash.clone()).collect();
        index_store.remap(&batch_hashes, tgt.clone())?;

        moved_bytes += batch.len() as u64; // placeholder byte accounting, see note below
    }

    // The abstract IndexStore entry doesn't carry a chunk size; real chunk
    // sizes come from the data-node wire contract (out of scope). We size
    // the target's Used bump from the source's own Used total instead,
    // since every chunk that existed on src has now fully moved.
    let src_used = src_cluster.used;
    cluster_store.save(tgt, &mut |c| {
        c.used += src_used;
        Ok(())
    })?;

    cluster_store.save(src, &mut |c| {
        c.state = ClusterState::Offline;
        Ok(())
    })?;

    let mut wipe_targets = Vec::new();
    cluster_store.unregister_cluster(src, &mut |cluster| {
        wipe_targets = cluster.nodes.iter().map(|n| n.address.clone()).collect();
        Ok(())
    })?;
    for address in wipe_targets {
        data_nodes.connect(&address).wipe().await;
    }

    cluster_store.update_maintain(tgt, false, Topic::None)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datanode::mock::{MockDataNodeClient, MockFactory};
    use crate::model::{Cluster, Node, NodeId};
    use crate::store::{FileClusterStore, FileIndexStore};
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc as StdArc;

    fn cluster(id: &str, used: u64) -> Cluster {
        let mut c = Cluster::new(ClusterId(id.into()), 1 << 30);
        c.used = used;
        let mut n = Node::new(NodeId(format!("{id}-master")), format!("10.0.0.{}:1", id.len()));
        n.master = true;
        c.nodes.push(n);
        c
    }

    #[tokio::test]
    async fn move_cluster_relocates_all_entries_and_unregisters_source() {
        let cdir = tempfile::tempdir().unwrap();
        let idir = tempfile::tempdir().unwrap();
        let cluster_store = FileClusterStore::open(cdir.path()).unwrap();
        let index_store = FileIndexStore::open(idir.path()).unwrap();

        let src = cluster("a", 500);
        let tgt = cluster("b", 0);
        let src_master_addr = src.master().unwrap().address.clone();
        let tgt_master_addr = tgt.master().unwrap().address.clone();
        cluster_store.register_cluster(src).unwrap();
        cluster_store.register_cluster(tgt).unwrap();

        for i in 0..3u8 {
            let hash = crate::model::ChunkHash(format!("{:0>128}", i.to_string()));
            index_store.upsert(hash, ClusterId("a".into()), HashSet::new()).unwrap();
        }

        let mut nodes = HashMap::new();
        nodes.insert(src_master_addr, StdArc::new(MockDataNodeClient::new("src", 1 << 30, "hw-a")));
        nodes.insert(tgt_master_addr, StdArc::new(MockDataNodeClient::new("tgt", 1 << 30, "hw-b")));
        let factory = MockFactory { nodes };

        move_cluster(&cluster_store, &index_store, &factory, &ClusterId("a".into()), &ClusterId("b".into()), 2, 1)
            .await
            .unwrap();

        assert!(cluster_store.get(&ClusterId("a".into())).is_err());
        let tgt = cluster_store.get(&ClusterId("b".into())).unwrap();
        assert_eq!(tgt.used, 500);

        for i in 0..3u8 {
            let hash = crate::model::ChunkHash(format!("{:0>128}", i.to_string()));
            assert_eq!(index_store.get(&hash).unwrap().cluster_id, ClusterId("b".into()));
        }
    }
}
