use resim_core::{BlockId, InferError, RngHandle, DEFAULT_SCOPE};
use resim_trace::{construct_scaffold, ConcreteTrace, Pick, Scaffold};
use serde::{Deserialize, Serialize};

use super::Selector;

/// Which blocks of a scope a [`BlockSelector`] hands to the operator.
///
/// Serialized as a plain block key where `"one"`, `"all"` and `"ordered"`
/// name the modes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BlockId", into = "BlockId")]
pub enum BlockSpec {
    /// One block drawn uniformly.
    #[default]
    One,
    /// Every block as a single set.
    All,
    /// Every block as its own stage, in key order.
    Ordered,
    /// One named block.
    Block(BlockId),
}

impl From<BlockId> for BlockSpec {
    fn from(block: BlockId) -> Self {
        match block {
            BlockId::Name(name) if name == "one" => BlockSpec::One,
            BlockId::Name(name) if name == "all" => BlockSpec::All,
            BlockId::Name(name) if name == "ordered" => BlockSpec::Ordered,
            other => BlockSpec::Block(other),
        }
    }
}

impl From<BlockSpec> for BlockId {
    fn from(spec: BlockSpec) -> Self {
        match spec {
            BlockSpec::One => BlockId::from("one"),
            BlockSpec::All => BlockId::from("all"),
            BlockSpec::Ordered => BlockId::from("ordered"),
            BlockSpec::Block(block) => block,
        }
    }
}

/// Selects scaffolds from the blocks of one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSelector {
    scope: String,
    block: BlockSpec,
}

impl BlockSelector {
    /// Creates a selector; the default scope only admits the three modes.
    pub fn new(scope: impl Into<String>, block: BlockSpec) -> Result<Self, InferError> {
        let scope = scope.into();
        if scope == DEFAULT_SCOPE {
            if let BlockSpec::Block(block) = &block {
                return Err(InferError::config(
                    "default-scope-block",
                    "the default scope admits only one, all or ordered",
                )
                .with_context("block", block));
            }
        }
        Ok(Self { scope, block })
    }

    /// Scope the selector draws from.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Block mode of the selector.
    pub fn block(&self) -> &BlockSpec {
        &self.block
    }
}

impl Selector for BlockSelector {
    fn sample_index(&self, trace: &ConcreteTrace, rng: &mut RngHandle) -> Result<Scaffold, InferError> {
        match &self.block {
            BlockSpec::One => {
                let block = trace.sample_block(&self.scope, rng)?;
                let nodes = trace.nodes_in_block(&self.scope, &block)?;
                let mut scaffold = construct_scaffold(trace, vec![nodes])?;
                scaffold.set_picks(vec![Pick::Block(block)]);
                Ok(scaffold)
            }
            BlockSpec::All => construct_scaffold(trace, vec![trace.all_nodes_in_scope(&self.scope)?]),
            BlockSpec::Ordered => construct_scaffold(trace, trace.ordered_sets_in_scope(&self.scope)?),
            BlockSpec::Block(block) => {
                construct_scaffold(trace, vec![trace.nodes_in_block(&self.scope, block)?])
            }
        }
    }

    fn log_density_of_index(&self, trace: &ConcreteTrace, scaffold: &Scaffold) -> Result<f64, InferError> {
        match &self.block {
            BlockSpec::One => {
                let table = trace.scope_table(&self.scope)?;
                match scaffold.picks().first() {
                    Some(Pick::Block(block)) if !table.contains(block) => Ok(f64::NEG_INFINITY),
                    _ => trace.log_density_of_block(&self.scope),
                }
            }
            _ => Ok(0.0),
        }
    }
}
