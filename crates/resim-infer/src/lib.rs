#![deny(missing_docs)]

//! Inference layer for resim: scaffold selectors, the mixMH driver, the
//! operator family and YAML-configurable inference schedules.

/// YAML/JSON schedule schema and defaults.
pub mod config;
/// Deterministic seed derivation helpers.
pub mod determinism;
/// Metropolis-Hastings mixing over a selector and an operator.
pub mod mixmh;
/// Proposal operators.
pub mod operators;
/// Schedule runner and run summaries.
pub mod schedule;
/// Scaffold selectors.
pub mod selector;

pub use config::{InferCommand, InferSchedule, SeedPolicy};
pub use mixmh::mix_mh;
pub use operators::{
    EnumerativeGibbsOperator, HmcOperator, MeanfieldOperator, MhOperator, Operator,
    PGibbsOperator, ParticlePGibbsOperator, RejectionOperator, RejectionStats,
};
pub use schedule::{run_schedule, InferSummary};
pub use selector::{BlockSelector, BlockSpec, Selector, SubproblemExpr, SubproblemSelector};
