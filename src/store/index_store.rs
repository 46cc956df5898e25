//! IndexStore: the canonical, persistent mapping `ChunkHash -> ChunkIndexEntry`.
//!
//! Backed by a `DashMap` for low-contention per-key access plus a coarse
//! `RwLock` gate used only by `remap` to give the "atomic across the set"
//! guarantee spec.md §4.3 asks for. Persistence is a single JSON snapshot
//! file, reloaded at startup and rewritten on every mutating call — the
//! chunk index is expected to be orders of magnitude smaller than the
//! chunks it describes, so this is adequate for the abstract "bulk-write
//! primitive" spec.md §6 calls for.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{DosError, Result};
use crate::model::{ChunkHash, ChunkIndexEntry, ClusterId, NodeId};

pub trait IndexStore: Send + Sync {
    fn get(&self, hash: &ChunkHash) -> Result<ChunkIndexEntry>;
    fn upsert(&self, hash: ChunkHash, cluster_id: ClusterId, exists_in: HashSet<NodeId>) -> Result<()>;
    fn remap(&self, hashes: &[ChunkHash], new_cluster_id: ClusterId) -> Result<()>;
    fn delete(&self, hash: &ChunkHash) -> Result<()>;
    fn entries_for_cluster(&self, cluster_id: &ClusterId) -> Result<Vec<ChunkIndexEntry>>;
}

pub struct FileIndexStore {
    path: PathBuf,
    entries: DashMap<ChunkHash, ChunkIndexEntry>,
    bulk_gate: RwLock<()>,
}

impl FileIndexStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("index.json");

        let entries = DashMap::new();
        if path.exists() {
            let data = std::fs::read(&path)?;
            if !data.is_empty() {
                let loaded: Vec<ChunkIndexEntry> = serde_json::from_slice(&data)?;
                for e in loaded {
                    entries.insert(e.hash.clone(), e);
                }
            }
        }

        Ok(Self { path, entries, bulk_gate: RwLock::new(()) })
    }

    fn flush(&self) -> Result<()> {
        let snapshot: Vec<ChunkIndexEntry> = self.entries.iter().map(|r| r.value().clone()).collect();
        let data = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}

impl IndexStore for FileIndexStore {
    fn get(&self, hash: &ChunkHash) -> Result<ChunkIndexEntry> {
        self.entries
            .get(hash)
            .map(|r| r.value().clone())
            .ok_or_else(|| DosError::NotFound(hash.to_string()))
    }

    fn upsert(&self, hash: ChunkHash, cluster_id: ClusterId, exists_in: HashSet<NodeId>) -> Result<()> {
        let _guard = self.bulk_gate.read();
        self.entries.insert(hash.clone(), ChunkIndexEntry { hash, cluster_id, exists_in });
        self.flush()
    }

    fn remap(&self, hashes: &[ChunkHash], new_cluster_id: ClusterId) -> Result<()> {
        let _guard = self.bulk_gate.write();
        for hash in hashes {
            if let Some(mut entry) = self.entries.get_mut(hash) {
                entry.cluster_id = new_cluster_id.clone();
            }
        }
        self.flush()
    }

    fn delete(&self, hash: &ChunkHash) -> Result<()> {
        let _guard = self.bulk_gate.read();
        self.entries.remove(hash);
        self.flush()
    }

    fn entries_for_cluster(&self, cluster_id: &ClusterId) -> Result<Vec<ChunkIndexEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|r| &r.value().cluster_id == cluster_id)
            .map(|r| r.value().clone())
            .collect())
    }
}
