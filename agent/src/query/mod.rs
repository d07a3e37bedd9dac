//! Structural queries over tensor graphs

pub mod matcher;
pub mod pattern;

pub use matcher::{Bindings, QueryIndex, QueryMatch};
pub use pattern::{LeafPattern, OpPattern, PatternNode};
