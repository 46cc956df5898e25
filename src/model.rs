//! Data model shared by every other module in the core: node/cluster
//! records, the chunk index entry, and the reservation map.
//!
//! Grounded on `examples/original_source/basics/common/cluster_node.go` and
//! `deletion_result.go`, and on spec.md §3. Cyclic references
//! (Cluster <-> Node) are resolved by id, exactly as the Go source does:
//! persisted records store ids, `Cluster.nodes` holds them inline because
//! their lifetime is identical, and cross-store linkage (Cluster <-> chunk
//! index) is always by id, never a live reference.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub String);

impl ClusterId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content address of a chunk: lower-case SHA-512 hex, 128 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkHash(pub String);

impl ChunkHash {
    pub fn new(hex: impl Into<String>) -> crate::error::Result<Self> {
        let hex = hex.into();
        if hex.len() != 128 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(crate::error::DosError::InvalidArgument(format!(
                "{hex} is not a 128-character SHA-512 hex digest"
            )));
        }
        Ok(Self(hex.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic node identity: `NodeId = f(hardwareId, address, clusterSize)`.
/// Stable across restarts, unique farm-wide, per spec.md §3 and §8.
pub fn derive_node_id(hardware_id: &str, address: &str, cluster_size: u64) -> NodeId {
    let mut hasher = Sha256::new();
    hasher.update(hardware_id.as_bytes());
    hasher.update(b"|");
    hasher.update(address.as_bytes());
    hasher.update(b"|");
    hasher.update(cluster_size.to_be_bytes());
    NodeId(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub address: String,
    pub master: bool,
    pub lead_till: DateTime<Utc>,
    pub quality: i64,
}

impl Node {
    pub fn new(id: NodeId, address: String) -> Self {
        Self {
            id,
            address,
            master: false,
            lead_till: Utc::now(),
            quality: 0,
        }
    }

    pub fn leadership_expired(&self) -> bool {
        Utc::now() > self.lead_till
    }

    /// Refresh `lead_till`: `now + lead_duration` while master, `now` once
    /// demoted. Ported from `Node.SetLeadDuration` in cluster_node.go.
    pub fn set_lead_duration(&mut self, lead_duration: chrono::Duration) {
        if !self.master {
            self.lead_till = Utc::now();
            return;
        }
        self.lead_till = Utc::now() + lead_duration;
    }
}

/// Sort key for master-first ordering (registration / join order).
pub fn master_first_key(n: &Node) -> std::cmp::Reverse<bool> {
    std::cmp::Reverse(n.master)
}

/// Sort key for read placement: lower quality sorts first.
pub fn quality_ascending_key(n: &Node) -> i64 {
    n.quality
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterState {
    Online,
    ReadOnly,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topic {
    None,
    RegisterNodes,
    UnregisterCluster,
    Move,
    Balance,
    CreateSnapshot,
    DeleteSnapshot,
    RestoreSnapshot,
    Sync,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDescriptor {
    pub index: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub size: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub size: u64,
    pub used: u64,
    pub reservations: Vec<Reservation>,
    pub state: ClusterState,
    pub maintain: bool,
    pub topic: Topic,
    pub nodes: Vec<Node>,
    pub snapshots: Vec<SnapshotDescriptor>,
}

impl Cluster {
    pub fn new(id: ClusterId, size: u64) -> Self {
        Self {
            id,
            size,
            used: 0,
            reservations: Vec::new(),
            state: ClusterState::Online,
            maintain: false,
            topic: Topic::None,
            nodes: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    pub fn master(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.master)
    }

    pub fn master_mut(&mut self) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.master)
    }

    pub fn slaves(&self) -> Vec<&Node> {
        self.nodes.iter().filter(|n| !n.master).collect()
    }

    /// `CanSchedule ⇔ State=Online ∧ at least one node is Master ∧ Maintain=false`.
    pub fn can_schedule(&self) -> bool {
        self.state == ClusterState::Online && !self.maintain && self.master().is_some()
    }

    pub fn reserved(&self) -> u64 {
        self.reservations.iter().map(|r| r.size).sum()
    }

    pub fn free(&self) -> u64 {
        self.size.saturating_sub(self.used).saturating_sub(self.reserved())
    }

    /// Drop reservations whose TTL has elapsed. Called lazily from every
    /// `SaveAll`, per spec.md §4.4.
    pub fn reap_expired_reservations(&mut self) {
        let now = Utc::now();
        self.reservations.retain(|r| r.expires_at > now);
    }

    pub fn commit(&mut self, reservation_id: &str, actual: u64) {
        self.reservations.retain(|r| r.id != reservation_id);
        self.used += actual;
    }

    pub fn discard(&mut self, reservation_id: &str) {
        self.reservations.retain(|r| r.id != reservation_id);
    }

    /// Nodes that currently hold the chunk, sorted by ascending quality
    /// (ties keep insertion order since `sort_by_key` is stable).
    pub fn prioritized_high_quality_nodes(&self, exists_in: &HashSet<NodeId>) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.iter().filter(|n| exists_in.contains(&n.id)).collect();
        nodes.sort_by_key(|n| quality_ascending_key(n));
        nodes
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkIndexEntry {
    pub hash: ChunkHash,
    pub cluster_id: ClusterId,
    pub exists_in: HashSet<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterAllocation {
    pub cluster_id: ClusterId,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationMap {
    pub id: String,
    pub clusters: Vec<ClusterAllocation>,
}

/// Intent of a Find/Map lookup. `Create` and `Delete` are both "mutate"
/// intents for the purpose of `Cluster::can_schedule` gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Create,
    Delete,
}

impl Intent {
    pub fn is_mutate(self) -> bool {
        matches!(self, Intent::Create | Intent::Delete)
    }
}

/// Bulk delete result, ported from `basics/common/deletion_result.go`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionResult {
    pub untouched: Vec<ChunkHash>,
    pub deleted: Vec<ChunkHash>,
    pub missing: Vec<ChunkHash>,
}

impl DeletionResult {
    pub fn new() -> Self {
        Self::default()
    }
}
