//! Reservation engine (spec.md §4.4): time-bounded capacity holds and the
//! `ReservationMap` a size request produces.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

use crate::error::{DosError, Result};
use crate::model::{Cluster, ClusterAllocation, ClusterId, Reservation, ReservationMap};
use crate::store::ClusterStore;

/// Greedy-fill a `size`-byte request across writable clusters, most-free
/// capacity first (ties broken lexicographically by id, matching spec.md
/// §8 scenario 3). Fails `NoSpace` with no partial reservation persisted.
pub fn reserve(store: &dyn ClusterStore, size: u64, ttl: Duration) -> Result<ReservationMap> {
    let reservation_id = uuid::Uuid::new_v4().to_string();
    let mut allocations = Vec::new();

    store.save_all(&mut |clusters: &mut Vec<Cluster>| {
        allocations.clear();

        let mut writable: Vec<&mut Cluster> = clusters
            .iter_mut()
            .filter(|c| c.can_schedule() && c.state != crate::model::ClusterState::ReadOnly)
            .collect();

        writable.sort_by(|a, b| b.free().cmp(&a.free()).then_with(|| a.id.as_str().cmp(b.id.as_str())));

        let mut remaining = size;
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::minutes(15));

        for cluster in writable.iter_mut() {
            if remaining == 0 {
                break;
            }
            let contribution = cluster.free().min(remaining);
            if contribution == 0 {
                continue;
            }
            cluster.reservations.push(Reservation {
                id: reservation_id.clone(),
                size: contribution,
                expires_at,
            });
            allocations.push(ClusterAllocation { cluster_id: cluster.id.clone(), size: contribution });
            remaining -= contribution;
        }

        if remaining > 0 {
            return Err(DosError::NoSpace { requested: size });
        }
        Ok(())
    })?;

    Ok(ReservationMap { id: reservation_id, clusters: allocations })
}

/// Subtracts the reservation and adds `actual` bytes to `used`. Clusters
/// missing from `per_cluster_actual` count as 0 (spec.md §4.4); an
/// entirely unknown reservation id is therefore a no-op everywhere, per
/// the binding decision in SPEC_FULL.md §12.
pub fn commit(store: &dyn ClusterStore, reservation_id: &str, per_cluster_actual: &HashMap<ClusterId, u64>) -> Result<()> {
    store.save_all(&mut |clusters: &mut Vec<Cluster>| {
        for cluster in clusters.iter_mut() {
            let actual = per_cluster_actual.get(&cluster.id).copied().unwrap_or(0);
            cluster.commit(reservation_id, actual);
        }
        Ok(())
    })
}

pub fn discard(store: &dyn ClusterStore, reservation_id: &str) -> Result<()> {
    store.save_all(&mut |clusters: &mut Vec<Cluster>| {
        for cluster in clusters.iter_mut() {
            cluster.discard(reservation_id);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterState, Node, NodeId};
    use crate::store::FileClusterStore;

    fn store_with_two_clusters() -> (tempfile::TempDir, FileClusterStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileClusterStore::open(dir.path()).unwrap();
        for id in ["a", "b"] {
            let mut c = Cluster::new(ClusterId(id.into()), 1 << 30);
            let mut n = Node::new(NodeId(format!("{id}-n1")), "addr".into());
            n.master = true;
            c.nodes.push(n);
            store.register_cluster(c).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn reserve_picks_emptier_cluster_first() {
        let (_dir, store) = store_with_two_clusters();
        let map = reserve(&store, 512 * 1024 * 1024, Duration::from_secs(900)).unwrap();
        assert_eq!(map.clusters.len(), 1);
        assert_eq!(map.clusters[0].size, 512 * 1024 * 1024);
    }

    #[test]
    fn reserve_fails_with_no_partial_state_on_insufficient_capacity() {
        let (_dir, store) = store_with_two_clusters();
        let err = reserve(&store, 4u64 << 30, Duration::from_secs(900)).unwrap_err();
        assert!(matches!(err, DosError::NoSpace { .. }));
        for c in store.get_all().unwrap() {
            assert!(c.reservations.is_empty());
        }
    }

    #[test]
    fn commit_clears_reservation_and_increments_used() {
        let (_dir, store) = store_with_two_clusters();
        let map = reserve(&store, 300 * 1024 * 1024, Duration::from_secs(900)).unwrap();
        let cluster_id = map.clusters[0].cluster_id.clone();

        let mut actual = HashMap::new();
        actual.insert(cluster_id.clone(), 300 * 1024 * 1024);
        commit(&store, &map.id, &actual).unwrap();

        let cluster = store.get(&cluster_id).unwrap();
        assert_eq!(cluster.used, 300 * 1024 * 1024);
        assert!(cluster.reservations.is_empty());
    }

    #[test]
    fn commit_on_unknown_reservation_id_is_a_no_op() {
        let (_dir, store) = store_with_two_clusters();
        commit(&store, "does-not-exist", &HashMap::new()).unwrap();
        for c in store.get_all().unwrap() {
            assert_eq!(c.used, 0);
        }
    }

    #[test]
    fn discard_removes_reservation_without_touching_used() {
        let (_dir, store) = store_with_two_clusters();
        let map = reserve(&store, 100 * 1024 * 1024, Duration::from_secs(900)).unwrap();
        discard(&store, &map.id).unwrap();
        for c in store.get_all().unwrap() {
            assert_eq!(c.used, 0);
            assert!(c.reservations.is_empty());
        }
    }

    #[test]
    fn readonly_clusters_are_excluded_from_reservation() {
        let (_dir, store) = store_with_two_clusters();
        store
            .save(&ClusterId("a".into()), &mut |c| {
                c.state = ClusterState::ReadOnly;
                Ok(())
            })
            .unwrap();
        let map = reserve(&store, 1024, Duration::from_secs(900)).unwrap();
        assert_eq!(map.clusters[0].cluster_id, ClusterId("b".into()));
    }
}
