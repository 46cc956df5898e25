//! Delete (spec.md §4.13): resolves a chunk through `Find(Delete)`, asks
//! the owning cluster's master to remove it, then drops the IndexStore
//! entry on success.

use crate::datanode::{DataNodeClientFactory, DeleteOutcome};
use crate::error::{DosError, Result};
use crate::model::{ChunkHash, DeletionResult, Intent};
use crate::placement::{find, FindOutcome};
use crate::store::{ClusterStore, IndexStore};

/// Outcome of resolving and attempting to delete one hash, shared by
/// `delete` (which turns a non-`Deleted` outcome into a typed error) and
/// `delete_many` (which instead folds it into a `DeletionResult`).
enum SingleDelete {
    Deleted,
    Missing,
    Zombie,
    ZombieAlive,
    Repair,
}

async fn delete_one(
    cluster_store: &dyn ClusterStore,
    index_store: &dyn IndexStore,
    data_nodes: &dyn DataNodeClientFactory,
    hash: &ChunkHash,
    kill_zombies: bool,
) -> Result<SingleDelete> {
    let (_cluster_id, master_address) = match find(cluster_store, index_store, hash, Intent::Delete)? {
        FindOutcome::Found { cluster_id, addresses } => {
            let address = addresses.into_iter().next().ok_or_else(|| DosError::NoAvailableActionNode(cluster_id.to_string()))?;
            (cluster_id, address)
        }
        FindOutcome::Skip => return Ok(SingleDelete::Missing),
    };

    let client = data_nodes.connect(&master_address);
    match client.delete_chunk(hash.as_str(), kill_zombies).await? {
        DeleteOutcome::Deleted | DeleteOutcome::NotFound => {
            index_store.delete(hash)?;
            Ok(SingleDelete::Deleted)
        }
        DeleteOutcome::Zombie if kill_zombies => {
            index_store.delete(hash)?;
            Ok(SingleDelete::Deleted)
        }
        DeleteOutcome::Zombie => Ok(SingleDelete::Zombie),
        DeleteOutcome::ZombieAlive => Ok(SingleDelete::ZombieAlive),
        DeleteOutcome::Repair => Ok(SingleDelete::Repair),
    }
}

/// `Delete(hash, killZombies)`. A hash unknown to the index is a silent
/// no-op (`Find`'s `Skip` sentinel), matching spec.md §4.5/§8's repeated-
/// delete idempotence property.
pub async fn delete(
    cluster_store: &dyn ClusterStore,
    index_store: &dyn IndexStore,
    data_nodes: &dyn DataNodeClientFactory,
    hash: &ChunkHash,
    kill_zombies: bool,
) -> Result<()> {
    match delete_one(cluster_store, index_store, data_nodes, hash, kill_zombies).await? {
        SingleDelete::Deleted | SingleDelete::Missing => Ok(()),
        SingleDelete::Zombie => Err(DosError::Zombie(hash.to_string())),
        SingleDelete::ZombieAlive => Err(DosError::ZombieAlive(hash.to_string())),
        SingleDelete::Repair => Err(DosError::Repair(hash.to_string())),
    }
}

/// `DeleteMany(hashes, killZombies)`: the bulk counterpart to `Delete`
/// (spec.md §11, ported from `basics/common/deletion_result.go`). A single
/// hash's zombie/repair state never aborts the batch — it's classified
/// into `untouched` and the rest still proceed.
pub async fn delete_many(
    cluster_store: &dyn ClusterStore,
    index_store: &dyn IndexStore,
    data_nodes: &dyn DataNodeClientFactory,
    hashes: &[ChunkHash],
    kill_zombies: bool,
) -> Result<DeletionResult> {
    let mut result = DeletionResult::new();

    for hash in hashes {
        match delete_one(cluster_store, index_store, data_nodes, hash, kill_zombies).await? {
            SingleDelete::Deleted => result.deleted.push(hash.clone()),
            SingleDelete::Missing => result.missing.push(hash.clone()),
            SingleDelete::Zombie | SingleDelete::ZombieAlive | SingleDelete::Repair => result.untouched.push(hash.clone()),
        }
    }

    Ok(result)
}
