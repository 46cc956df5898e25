//! DataNodeClient: the stateless RPC surface the core speaks to a single
//! data node over (spec.md §4.1). The wire format itself is a length-
//! prefixed JSON request/response frame; the actual chunk-storage RPC
//! server is an external collaborator (out of scope), this module only
//! specifies the contract the core consumes and a thin client for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{DosError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SnapshotOp {
    Create,
    Delete(u64),
    Restore(u64),
}

/// Result of asking a master to remove a chunk (spec.md §4.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeleteOutcome {
    #[default]
    Deleted,
    NotFound,
    Zombie,
    ZombieAlive,
    Repair,
}

/// Capability set exposed to the core by one data node (spec.md §4.1).
/// `Ping` returns round-trip milliseconds or `-1` on failure, mirrored here
/// by `Option<i64>` (`None` == `-1`) so callers aren't tempted to treat a
/// negative duration as data.
#[async_trait]
pub trait DataNodeClient: Send + Sync {
    fn address(&self) -> &str;

    async fn ping(&self) -> Option<i64>;
    async fn size(&self) -> Result<u64>;
    async fn hardware_id(&self) -> Result<String>;

    /// `masterAddress` empty => this node becomes master; otherwise it
    /// joins as a slave of that address.
    async fn join(&self, cluster_id: &str, node_id: &str, master_address: &str) -> Result<bool>;
    async fn leave(&self) -> Result<bool>;
    async fn set_mode(&self, master: bool) -> Result<bool>;
    async fn wipe(&self);

    async fn snapshot(&self, op: SnapshotOp) -> Result<bool>;

    /// Chunk hashes this node currently reports as present.
    async fn chunk_list(&self) -> Result<Vec<String>>;

    /// Stream the listed chunks from this node to `target_address`.
    async fn sync_move(&self, target_address: &str, source_hashes: &[String]) -> Result<bool>;

    /// Remove a chunk by hash; `force` upgrades to `killZombies` semantics.
    async fn delete_chunk(&self, hash: &str, force: bool) -> Result<DeleteOutcome>;
}

/// Creates a `DataNodeClient` for an address on demand; the core never
/// holds a client beyond the lifetime of a single operation, connections
/// are pooled by the factory implementation (spec.md §5).
pub trait DataNodeClientFactory: Send + Sync {
    fn connect(&self, address: &str) -> Arc<dyn DataNodeClient>;
}

#[derive(Debug, Serialize, Deserialize)]
enum Verb {
    Ping,
    Size,
    HardwareId,
    Join { cluster_id: String, node_id: String, master_address: String },
    Leave,
    Mode { master: bool },
    Wipe,
    Snapshot { op: SnapshotOp },
    ChunkList,
    SyncMove { target_address: String, source_hashes: Vec<String> },
    DeleteChunk { hash: String, force: bool },
}

#[derive(Debug, Serialize, Deserialize)]
struct Frame<T> {
    ok: bool,
    payload: T,
}

/// Real client: opens a fresh TCP connection per call and exchanges one
/// length-prefixed JSON frame. This is the wire contract the data-node RPC
/// server (out of scope) is expected to speak.
pub struct TcpDataNodeClient {
    address: String,
    timeout: Duration,
}

impl TcpDataNodeClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self { address: address.into(), timeout }
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, verb: Verb) -> Result<T> {
        let fut = async {
            let mut stream = TcpStream::connect(&self.address)
                .await
                .map_err(|e| DosError::NoAvailableActionNode(format!("{}: {e}", self.address)))?;

            let body = serde_json::to_vec(&verb)?;
            let len = (body.len() as u32).to_be_bytes();
            stream.write_all(&len).await?;
            stream.write_all(&body).await?;

            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await?;
            let resp_len = u32::from_be_bytes(len_buf) as usize;
            let mut resp_buf = vec![0u8; resp_len];
            stream.read_exact(&mut resp_buf).await?;

            let frame: Frame<T> = serde_json::from_slice(&resp_buf)?;
            if !frame.ok {
                return Err(DosError::Internal(format!("data node {} reported failure", self.address)));
            }
            Ok(frame.payload)
        };

        match timeout(self.timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(DosError::NoAvailableActionNode(format!("{} timed out", self.address))),
        }
    }
}

#[async_trait]
impl DataNodeClient for TcpDataNodeClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn ping(&self) -> Option<i64> {
        let start = std::time::Instant::now();
        match self.call::<()>(Verb::Ping).await {
            Ok(()) => Some(start.elapsed().as_millis() as i64),
            Err(_) => None,
        }
    }

    async fn size(&self) -> Result<u64> {
        self.call(Verb::Size).await
    }

    async fn hardware_id(&self) -> Result<String> {
        self.call(Verb::HardwareId).await
    }

    async fn join(&self, cluster_id: &str, node_id: &str, master_address: &str) -> Result<bool> {
        self.call(Verb::Join {
            cluster_id: cluster_id.to_string(),
            node_id: node_id.to_string(),
            master_address: master_address.to_string(),
        })
        .await
    }

    async fn leave(&self) -> Result<bool> {
        self.call(Verb::Leave).await
    }

    async fn set_mode(&self, master: bool) -> Result<bool> {
        self.call(Verb::Mode { master }).await
    }

    async fn wipe(&self) {
        // best-effort per spec.md §4.1
        let _ = self.call::<()>(Verb::Wipe).await;
    }

    async fn snapshot(&self, op: SnapshotOp) -> Result<bool> {
        self.call(Verb::Snapshot { op }).await
    }

    async fn chunk_list(&self) -> Result<Vec<String>> {
        self.call(Verb::ChunkList).await
    }

    async fn sync_move(&self, target_address: &str, source_hashes: &[String]) -> Result<bool> {
        self.call(Verb::SyncMove {
            target_address: target_address.to_string(),
            source_hashes: source_hashes.to_vec(),
        })
        .await
    }

    async fn delete_chunk(&self, hash: &str, force: bool) -> Result<DeleteOutcome> {
        self.call(Verb::DeleteChunk { hash: hash.to_string(), force }).await
    }
}

pub struct TcpDataNodeClientFactory {
    pub timeout: Duration,
}

impl DataNodeClientFactory for TcpDataNodeClientFactory {
    fn connect(&self, address: &str) -> Arc<dyn DataNodeClient> {
        Arc::new(TcpDataNodeClient::new(address, self.timeout))
    }
}

/// In-memory double used by the rest of this crate's test suites; never
/// compiled into the shipped binaries.
#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockNodeState {
        pub ping_ms: Option<i64>,
        pub size: u64,
        pub hardware_id: String,
        pub chunks: Vec<String>,
        pub join_calls: Vec<(String, String, String)>,
        pub fail_join: bool,
        pub fail_sync_move: bool,
        pub delete_outcome: DeleteOutcome,
    }

    pub struct MockDataNodeClient {
        pub address: String,
        pub state: Mutex<MockNodeState>,
    }

    impl MockDataNodeClient {
        pub fn new(address: impl Into<String>, size: u64, hardware_id: impl Into<String>) -> Self {
            Self {
                address: address.into(),
                state: Mutex::new(MockNodeState {
                    ping_ms: Some(1),
                    size,
                    hardware_id: hardware_id.into(),
                    ..Default::default()
                }),
            }
        }
    }

    #[async_trait]
    impl DataNodeClient for MockDataNodeClient {
        fn address(&self) -> &str {
            &self.address
        }

        async fn ping(&self) -> Option<i64> {
            self.state.lock().unwrap().ping_ms
        }

        async fn size(&self) -> Result<u64> {
            Ok(self.state.lock().unwrap().size)
        }

        async fn hardware_id(&self) -> Result<String> {
            Ok(self.state.lock().unwrap().hardware_id.clone())
        }

        async fn join(&self, cluster_id: &str, node_id: &str, master_address: &str) -> Result<bool> {
            let mut st = self.state.lock().unwrap();
            st.join_calls.push((cluster_id.to_string(), node_id.to_string(), master_address.to_string()));
            Ok(!st.fail_join)
        }

        async fn leave(&self) -> Result<bool> {
            Ok(true)
        }

        async fn set_mode(&self, _master: bool) -> Result<bool> {
            Ok(true)
        }

        async fn wipe(&self) {}

        async fn snapshot(&self, _op: SnapshotOp) -> Result<bool> {
            Ok(true)
        }

        async fn chunk_list(&self) -> Result<Vec<String>> {
            Ok(self.state.lock().unwrap().chunks.clone())
        }

        async fn sync_move(&self, _target_address: &str, _source_hashes: &[String]) -> Result<bool> {
            Ok(!self.state.lock().unwrap().fail_sync_move)
        }

        async fn delete_chunk(&self, _hash: &str, _force: bool) -> Result<DeleteOutcome> {
            Ok(self.state.lock().unwrap().delete_outcome)
        }
    }

    pub struct MockFactory {
        pub nodes: HashMap<String, Arc<MockDataNodeClient>>,
    }

    impl DataNodeClientFactory for MockFactory {
        fn connect(&self, address: &str) -> Arc<dyn DataNodeClient> {
            self.nodes
                .get(address)
                .cloned()
                .map(|c| c as Arc<dyn DataNodeClient>)
                .unwrap_or_else(|| Arc::new(MockDataNodeClient::new(address, 0, "")))
        }
    }
}
