//! ChangeState / ChangeStateAll (spec.md §4.8).

use crate::error::{DosError, Result};
use crate::model::ClusterState;
use crate::store::ClusterStore;
use crate::model::ClusterId;

pub fn change_state(store: &dyn ClusterStore, cluster_id: &ClusterId, state: ClusterState) -> Result<()> {
    store.save(cluster_id, &mut |c| {
        if c.maintain {
            return Err(DosError::Maintain(cluster_id.to_string()));
        }
        c.state = state;
        Ok(())
    })
}

pub fn change_state_all(store: &dyn ClusterStore, state: ClusterState) -> Result<()> {
    store.save_all(&mut |clusters| {
        for cluster in clusters.iter() {
            if cluster.maintain {
                return Err(DosError::Maintain(cluster.id.to_string()));
            }
        }
        for cluster in clusters.iter_mut() {
            cluster.state = state;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cluster, Node, NodeId};
    use crate::store::FileClusterStore;

    fn store_with(ids: &[&str]) -> (tempfile::TempDir, FileClusterStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileClusterStore::open(dir.path()).unwrap();
        for id in ids {
            let mut c = Cluster::new(ClusterId(id.to_string()), 1 << 30);
            let mut n = Node::new(NodeId(format!("{id}-n1")), "addr".into());
            n.master = true;
            c.nodes.push(n);
            store.register_cluster(c).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn change_state_rejects_cluster_under_maintain() {
        let (_d, store) = store_with(&["a"]);
        store.save(&ClusterId("a".into()), &mut |c| { c.maintain = true; Ok(()) }).unwrap();
        let err = change_state(&store, &ClusterId("a".into()), ClusterState::Offline).unwrap_err();
        assert!(matches!(err, DosError::Maintain(_)));
    }

    #[test]
    fn change_state_all_is_all_or_nothing() {
        let (_d, store) = store_with(&["a", "b"]);
        store.save(&ClusterId("a".into()), &mut |c| { c.maintain = true; Ok(()) }).unwrap();
        let err = change_state_all(&store, ClusterState::ReadOnly).unwrap_err();
        assert!(matches!(err, DosError::Maintain(_)));
        let b = store.get(&ClusterId("b".into())).unwrap();
        assert_eq!(b.state, ClusterState::Online);
    }
}
