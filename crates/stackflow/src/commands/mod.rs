pub mod config;
pub mod graph;
pub mod plan;
pub mod snapshot;
