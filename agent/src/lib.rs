//! Graphmesh peer agent
//!
//! Peers hold disjoint fragments of a tensor computation graph and stitch
//! them together through published node ids: a coordination service maps
//! ids to owners, references stand in for foreign nodes, and queries,
//! loads, saves and renderings fan out over a small CBOR-framed RPC
//! protocol.

pub mod config;
pub mod coordination;
pub mod errors;
pub mod graph;
pub mod manager;
pub mod network;
pub mod observability;
pub mod query;
pub mod reference;
pub mod services;
pub mod tensor;
pub mod wire;

pub use config::AgentConfig;
pub use errors::{MeshError, Result};
pub use manager::PeerManager;
