#![deny(missing_docs)]

//! Core types shared by the resim inference engine: node handles, block keys,
//! runtime values, the persistent weight-balanced map, errors and seeded RNG.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod errors;
pub mod numeric;
pub mod rng;
mod value;
pub mod wttree;

pub use errors::{ErrorInfo, InferError};
pub use numeric::{exclude_chosen_log_ratio, log_sum_exp};
pub use rng::{derive_substream_seed, RngHandle};
pub use value::{real_arg, Value};
pub use wttree::{PersistentMap, PersistentSet};

/// Name of the reserved scope holding every unconstrained random choice.
pub const DEFAULT_SCOPE: &str = "default";

/// Opaque handle addressing a node in a trace arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a new identifier from its raw integer representation.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw integer representation of the identifier.
    pub fn as_raw(&self) -> u32 {
        self.0
    }

    /// Index of the node in arena storage.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Key of a block within a scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockId {
    /// Integer key, e.g. a time step.
    Int(i64),
    /// Symbolic key.
    Name(String),
    /// Singleton block of the default scope, keyed by its node.
    Node(NodeId),
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Int(n) => write!(f, "{n}"),
            BlockId::Name(name) => write!(f, "{name}"),
            BlockId::Node(node) => write!(f, "{node}"),
        }
    }
}

impl From<i64> for BlockId {
    fn from(n: i64) -> Self {
        BlockId::Int(n)
    }
}

impl From<&str> for BlockId {
    fn from(name: &str) -> Self {
        BlockId::Name(name.to_string())
    }
}
