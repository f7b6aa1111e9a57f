pub mod cluster_store;
pub mod memory_cluster_store;

pub use cluster_store::{ClusterDocument, MongoClusterStore, StatusHistoryDocument};
pub use memory_cluster_store::InMemoryClusterStore;
