//! Stable error kinds for the cluster-administration core.
//!
//! One variant per error kind named in the operation contracts; logical
//! failures reported by data nodes are mapped onto these by the callers in
//! `manager.rs`, never invented ad hoc at the call site.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DosError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("cluster or node already registered: {0}")]
    Registered(String),

    #[error("ping failed: {0}")]
    Ping(String),

    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    #[error("join failed: {0}")]
    Join(String),

    #[error("mode change failed: {0}")]
    Mode(String),

    #[error("leave failed: {0}")]
    Leave(String),

    #[error("cluster under maintenance: {0}")]
    Maintain(String),

    #[error("insufficient space for reservation of {requested} bytes")]
    NoSpace { requested: u64 },

    #[error("no available action node: {0}")]
    NoAvailableActionNode(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("chunk still referenced by zombie record: {0}")]
    Zombie(String),

    #[error("chunk alive but in use: {0}")]
    ZombieAlive(String),

    #[error("chunk under repair: {0}")]
    Repair(String),

    #[error("snapshot operation failed: {0}")]
    Snapshot(String),

    #[error("unknown reservation id: {0}")]
    ReservationUnknown(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DosError>;
