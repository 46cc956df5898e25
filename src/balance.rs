//! Balance (spec.md §4.11): equalizes used-ratio across a cluster group by
//! migrating chunks from the fullest clusters ("donors") to the emptiest
//! ("acceptors") until every member sits within `epsilon` of the group's
//! mean used ratio, or no further transfer would help.

use crate::datanode::DataNodeClientFactory;
use crate::error::{DosError, Result};
use crate::model::ClusterId;
use crate::store::{ClusterStore, IndexStore};

fn used_ratio(size: u64, used: u64) -> f64 {
    if size == 0 {
        0.0
    } else {
        used as f64 / size as f64
    }
}

/// `Balance(cluster_ids, epsilon, batch_size)`: marks every member
/// `Maintain=true` under `Topic::Balance` up front (all-or-nothing, same
/// discipline as `ChangeStateAll`), then repeatedly picks the current
/// largest donor and emptiest acceptor and moves one batch between them,
/// stopping once every member is within `epsilon` of the mean ratio.
/// Interruptible: each batch is a complete `sync_move` + `remap`, so a
/// caller that aborts mid-run (by killing the task) leaves the farm in a
/// valid, if unbalanced, state (spec.md §4.11).
pub async fn balance_clusters(
    cluster_store: &dyn ClusterStore,
    index_store: &dyn IndexStore,
    data_nodes: &dyn DataNodeClientFactory,
    cluster_ids: &[ClusterId],
    epsilon: f64,
    batch_size: usize,
    retry_count: u32,
) -> Result<()> {
    if cluster_ids.len() < 2 {
        return Err(DosError::InvalidArgument("balance requires at least two clusters".into()));
    }

    for id in cluster_ids {
        cluster_store.save(id, &mut |c| {
            if !c.can_schedule() {
                return Err(DosError::NoAvailableActionNode(c.id.to_string()));
            }
            c.maintain = true;
            c.topic = crate::model::Topic::Balance;
            Ok(())
        })?;
    }

    let result = run_balance(cluster_store, index_store, data_nodes, cluster_ids, epsilon, batch_size, retry_count).await;

    // Only clear Maintain on success; a persistent failure leaves every
    // member Maintain=true for an operator to inspect (spec.md §7).
    if result.is_ok() {
        for id in cluster_ids {
            let _ = cluster_store.save(id, &mut |c| {
                c.maintain = false;
                c.topic = crate::model::Topic::None;
                Ok(())
            });
        }
    }

    result
}

async fn run_balance(
    cluster_store: &dyn ClusterStore,
    index_store: &dyn IndexStore,
    data_nodes: &dyn DataNodeClientFactory,
    cluster_ids: &[ClusterId],
    epsilon: f64,
    batch_size: usize,
    retry_count: u32,
) -> Result<()> {
    const MAX_ROUNDS: usize = 1000;

    for _ in 0..MAX_ROUNDS {
        let clusters: Vec<_> = cluster_ids.iter().map(|id| cluster_store.get(id)).collect::<Result<Vec<_>>>()?;

        let mean: f64 = clusters.iter().map(|c| used_ratio(c.size, c.used)).sum::<f64>() / clusters.len() as f64;

        let donor = clusters.iter().max_by(|a, b| {
            used_ratio(a.size, a.used).partial_cmp(&used_ratio(b.size, b.used)).unwrap_or(std::cmp::Ordering::Equal)
        });
        let acceptor = clusters.iter().min_by(|a, b| {
            used_ratio(a.size, a.used).partial_cmp(&used_ratio(b.size, b.used)).unwrap_or(std::cmp::Ordering::Equal)
        });

        let (Some(donor), Some(acceptor)) = (donor, acceptor) else { break };
        if donor.id == acceptor.id {
            break;
        }

        let donor_ratio = used_ratio(donor.size, donor.used);
        let acceptor_ratio = used_ratio(acceptor.size, acceptor.used);

        if (donor_ratio - mean).abs() <= epsilon && (acceptor_ratio - mean).abs() <= epsilon {
            return Ok(());
        }
        if donor_ratio <= acceptor_ratio {
            return Ok(());
        }

        let entries = index_store.entries_for_cluster(&donor.id)?;
        if entries.is_empty() {
            // nothing left to move off this donor; exclude it by treating
            // the round as converged for this pair and stopping.
            return Ok(());
        }

        let batch = &entries[..entries.len().min(batch_size.max(1))];
        let donor_master = donor.master().ok_or_else(|| DosError::NoAvailableActionNode(donor.id.to_string()))?;
        let acceptor_master = acceptor.master().ok_or_else(|| DosError::NoAvailableActionNode(acceptor.id.to_string()))?;

        let hashes: Vec<String> = batch.iter().map(|e| e.hash.as_str().to_string()).collect();
        let client = data_nodes.connect(&donor_master.address);

        let mut attempt = 0;
        let ok = loop {
            match client.sync_move(&acceptor_master.address, &hashes).await {
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
                "balance batch {} -> {} aborted after {retry_count} retries",
                donor.id, acceptor.id
            )));
        }

        let batch_hashes: Vec<_> = batch.iter().map(|e| e.hash.clone()).collect();
        index_store.remap(&batch_hashes, acceptor.id.clone())?;

        let moved: u64 = batch.len() as u64;
        let donor_id = donor.id.clone();
        let acceptor_id = acceptor.id.clone();
        cluster_store.save(&donor_id, &mut |c| {
            c.used = c.used.saturating_sub(moved);
            Ok(())
        })?;
        cluster_store.save(&acceptor_id, &mut |c| {
            c.used += moved;
            Ok(())
        })?;
    }

    Err(DosError::Internal("balance did not converge within the round budget".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datanode::mock::{MockDataNodeClient, MockFactory};
    use crate::model::{Cluster, Node, NodeId};
    use crate::store::{FileClusterStore, FileIndexStore};
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc as StdArc;

    fn cluster(id: &str, size: u64, used: u64) -> Cluster {
        let mut c = Cluster::new(ClusterId(id.into()), size);
        c.used = used;
        let mut n = Node::new(NodeId(format!("{id}-master")), format!("10.0.0.{}:1", id.len() + 1));
        n.master = true;
        c.nodes.push(n);
        c
    }

    #[tokio::test]
    async fn balance_moves_chunks_from_fuller_to_emptier_cluster() {
        let cdir = tempfile::tempdir().unwrap();
        let idir = tempfile::tempdir().unwrap();
        let cluster_store = FileClusterStore::open(cdir.path()).unwrap();
        let index_store = FileIndexStore::open(idir.path()).unwrap();

        let full = cluster("full", 1000, 900);
        let empty = cluster("empty", 1000, 0);
        let full_master = full.master().unwrap().address.clone();
        let empty_master = empty.master().unwrap().address.clone();
        cluster_store.register_cluster(full).unwrap();
        cluster_store.register_cluster(empty).unwrap();

        for i in 0..10u8 {
            let hash = crate::model::ChunkHash(format!("{:0>128}", format!("f{i}")));
            index_store.upsert(hash, ClusterId("full".into()), HashSet::new()).unwrap();
        }

        let mut nodes = HashMap::new();
        nodes.insert(full_master, StdArc::new(MockDataNodeClient::new("full", 1000, "hw-f")));
        nodes.insert(empty_master, StdArc::new(MockDataNodeClient::new("empty", 1000, "hw-e")));
        let factory = MockFactory { nodes };

        balance_clusters(
            &cluster_store,
            &index_store,
            &factory,
            &[ClusterId("full".into()), ClusterId("empty".into())],
            0.05,
            4,
            1,
        )
        .await
        .unwrap();

        let full = cluster_store.get(&ClusterId("full".into())).unwrap();
        let empty = cluster_store.get(&ClusterId("empty".into())).unwrap();
        assert!(!full.maintain);
        assert!(!empty.maintain);
        assert!(used_ratio(full.size, full.used) - used_ratio(empty.size, empty.used) < 0.9);
        assert!(empty.used > 0);
    }

    #[tokio::test]
    async fn balance_rejects_fewer_than_two_clusters() {
        let cdir = tempfile::tempdir().unwrap();
        let idir = tempfile::tempdir().unwrap();
        let cluster_store = FileClusterStore::open(cdir.path()).unwrap();
        let index_store = FileIndexStore::open(idir.path()).unwrap();
        let factory = MockFactory { nodes: HashMap::new() };

        let err = balance_clusters(&cluster_store, &index_store, &factory, &[ClusterId("only".into())], 0.05, 4, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DosError::InvalidArgument(_)));
    }
}
