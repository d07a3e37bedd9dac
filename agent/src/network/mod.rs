//! Peer-to-peer transport: outbound clients and the inbound server loop

pub mod client;
pub mod server;

pub use client::{ClientPool, PeerClient};
