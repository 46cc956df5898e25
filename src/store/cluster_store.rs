//! ClusterStore: the canonical, persistent mapping `ClusterId -> Cluster`.
//!
//! Lock discipline follows spec.md §5: a per-cluster `parking_lot::Mutex`
//! guards each record, a top-level `parking_lot::RwLock` over the map
//! stands in for the global lock `SaveAll` needs. `Save`/`SaveAll` persist
//! synchronously to one JSON document per cluster under `data_dir`,
//! matching the abstract "two key-value stores, JSON-compatible documents"
//! layout of spec.md §6.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{DosError, Result};
use crate::model::{Cluster, ClusterId, NodeId, Topic};

pub trait ClusterStore: Send + Sync {
    fn register_cluster(&self, cluster: Cluster) -> Result<()>;

    /// Exclusive per-cluster mutator: loads, passes to `mutator`, persists
    /// iff `mutator` returns `Ok`.
    fn save(&self, id: &ClusterId, mutator: &mut dyn FnMut(&mut Cluster) -> Result<()>) -> Result<()>;

    /// Exclusive over every cluster at once, used by Reserve/Commit/Discard
    /// and ChangeStateAll. Clusters are always visited in ascending id
    /// order, per spec.md §5's lock-ordering rule.
    fn save_all(&self, mutator: &mut dyn FnMut(&mut Vec<Cluster>) -> Result<()>) -> Result<()>;

    fn unregister_cluster(&self, id: &ClusterId, on_each: &mut dyn FnMut(&Cluster) -> Result<()>) -> Result<()>;

    fn get(&self, id: &ClusterId) -> Result<Cluster>;
    fn get_by_node_id(&self, id: &NodeId) -> Result<Cluster>;
    fn get_all(&self) -> Result<Vec<Cluster>>;

    fn update_maintain(&self, id: &ClusterId, maintain: bool, topic: Topic) -> Result<()>;
}

pub struct FileClusterStore {
    dir: PathBuf,
    clusters: RwLock<HashMap<ClusterId, Arc<Mutex<Cluster>>>>,
}

impl FileClusterStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut clusters = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read(entry.path())?;
            let cluster: Cluster = serde_json::from_slice(&data)?;
            clusters.insert(cluster.id.clone(), Arc::new(Mutex::new(cluster)));
        }

        Ok(Self { dir, clusters: RwLock::new(clusters) })
    }

    fn path_for(&self, id: &ClusterId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    fn persist(&self, cluster: &Cluster) -> Result<()> {
        let data = serde_json::to_vec_pretty(cluster)?;
        std::fs::write(self.path_for(&cluster.id), data)?;
        Ok(())
    }

    fn remove_file(&self, id: &ClusterId) -> Result<()> {
        let path = self.path_for(id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl ClusterStore for FileClusterStore {
    fn register_cluster(&self, cluster: Cluster) -> Result<()> {
        let mut map = self.clusters.write();
        if map.contains_key(&cluster.id) {
            return Err(DosError::Registered(cluster.id.to_string()));
        }
        for existing in map.values() {
            let existing = existing.lock();
            for node in &existing.nodes {
                if cluster.nodes.iter().any(|n| n.id == node.id) {
                    return Err(DosError::Registered(node.id.to_string()));
                }
            }
        }
        self.persist(&cluster)?;
        map.insert(cluster.id.clone(), Arc::new(Mutex::new(cluster)));
        Ok(())
    }

    fn save(&self, id: &ClusterId, mutator: &mut dyn FnMut(&mut Cluster) -> Result<()>) -> Result<()> {
        let entry = {
            let map = self.clusters.read();
            map.get(id).cloned().ok_or_else(|| DosError::NotFound(id.to_string()))?
        };
        let mut guard = entry.lock();
        guard.reap_expired_reservations();
        mutator(&mut guard)?;
        self.persist(&guard)
    }

    fn save_all(&self, mutator: &mut dyn FnMut(&mut Vec<Cluster>) -> Result<()>) -> Result<()> {
        let map = self.clusters.write();

        let mut ids: Vec<&ClusterId> = map.keys().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        let guards: Vec<_> = ids.iter().map(|id| map.get(*id).unwrap().lock()).collect();
        let mut snapshot: Vec<Cluster> = guards.iter().map(|g| (**g).clone()).collect();
        for cluster in snapshot.iter_mut() {
            cluster.reap_expired_reservations();
        }

        mutator(&mut snapshot)?;

        for (mut guard, updated) in guards.into_iter().zip(snapshot.into_iter()) {
            *guard = updated;
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn unregister_cluster(&self, id: &ClusterId, on_each: &mut dyn FnMut(&Cluster) -> Result<()>) -> Result<()> {
        let mut map = self.clusters.write();
        let entry = map.get(id).cloned().ok_or_else(|| DosError::NotFound(id.to_string()))?;
        let guard = entry.lock();
        if guard.state != crate::model::ClusterState::Offline || !guard.maintain {
            return Err(DosError::Maintain(format!(
                "cluster {id} must be Offline and under Maintain before unregistering"
            )));
        }
        on_each(&guard)?;
        drop(guard);
        map.remove(id);
        self.remove_file(id)
    }

    fn get(&self, id: &ClusterId) -> Result<Cluster> {
        let map = self.clusters.read();
        let entry = map.get(id).ok_or_else(|| DosError::NotFound(id.to_string()))?;
        Ok(entry.lock().clone())
    }

    fn get_by_node_id(&self, id: &NodeId) -> Result<Cluster> {
        let map = self.clusters.read();
        for entry in map.values() {
            let guard = entry.lock();
            if guard.nodes.iter().any(|n| &n.id == id) {
                return Ok(guard.clone());
            }
        }
        Err(DosError::NotFound(id.to_string()))
    }

    fn get_all(&self) -> Result<Vec<Cluster>> {
        let map = self.clusters.read();
        Ok(map.values().map(|e| e.lock().clone()).collect())
    }

    fn update_maintain(&self, id: &ClusterId, maintain: bool, topic: Topic) -> Result<()> {
        self.save(id, &mut |c| {
            c.maintain = maintain;
            c.topic = topic;
            Ok(())
        })
    }
}
