pub mod database;
pub mod kubernetes;
pub mod repositories;
pub mod sandbox;

pub use kubernetes::KubeClusterApi;
