#![deny(missing_docs)]

//! Reference execution trace for resim: the node arena, primitive stochastic
//! procedures, scaffolds, local kernels and the detach/regen protocol that
//! every inference operator is written against.

/// Primitive procedures shipped with the trace.
pub mod builtins;
/// Torus/whole consistency checks over a scaffold.
pub mod check;
/// Reverse half of the protocol: unabsorb and extract.
pub mod detach;
/// Local proposal kernels installed on scaffold nodes.
pub mod lkernel;
/// Record of values and gradients removed by a detach.
pub mod omegadb;
/// Copy-on-write overlays over a base trace.
pub mod particle;
/// Primitive stochastic procedure contract.
pub mod psp;
/// Forward half of the protocol: regenerate and attach.
pub mod regen;
/// Scaffold data and construction from principal node sets.
pub mod scaffold;
/// Node arena, scope tables and the trace store abstraction.
pub mod trace;

mod ledger;

pub use check::{assert_torus, assert_whole};
pub use detach::detach_and_extract;
pub use lkernel::LKernel;
pub use omegadb::{Gradients, OmegaDB};
pub use particle::{Overlay, Particle};
pub use psp::{Psp, VariationalKernel};
pub use regen::regen_and_attach;
pub use scaffold::{construct_scaffold, NodeRole, Pick, Scaffold};
pub use trace::{ConcreteTrace, NodeKind, ScopeTable, TraceStore};
