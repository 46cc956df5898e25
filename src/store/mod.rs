pub mod cluster_store;
pub mod index_store;

pub use cluster_store::{ClusterStore, FileClusterStore};
pub use index_store::{FileIndexStore, IndexStore};
