use std::collections::{BTreeMap, BTreeSet, VecDeque};

use resim_core::{BlockId, InferError, NodeId, Value};
use serde::{Deserialize, Serialize};

use crate::lkernel::LKernel;
use crate::trace::ConcreteTrace;

static RESIMULATION: LKernel = LKernel::Resimulation;

/// Role a node plays in a scaffold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Value is recomputed or resampled during regeneration.
    Resampling,
    /// Application whose procedure absorbs arbitrary applications of itself.
    Aaa,
    /// Value is kept; only its density under changed operands is reweighed.
    Absorbing,
}

/// A random decision a selector made while producing a scaffold.
///
/// Recorded picks let a selector recompute the probability of the same
/// decisions against a different trace state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pick {
    /// A block chosen from a scope or dictionary.
    Block(BlockId),
    /// A node chosen from a node set.
    Node(NodeId),
}

/// The region of a trace an operator resamples.
#[derive(Debug, Default)]
pub struct Scaffold {
    principal: Vec<NodeId>,
    roles: BTreeMap<NodeId, NodeRole>,
    border: Vec<Vec<NodeId>>,
    regen_totals: BTreeMap<NodeId, usize>,
    lkernels: BTreeMap<NodeId, LKernel>,
    picks: Vec<Pick>,
}

impl Scaffold {
    /// Principal nodes in set order.
    pub fn principal_nodes(&self) -> &[NodeId] {
        &self.principal
    }

    /// Border grouped by stage.
    pub fn border(&self) -> &[Vec<NodeId>] {
        &self.border
    }

    /// Number of border stages.
    pub fn num_stages(&self) -> usize {
        self.border.len()
    }

    /// Border nodes of stage `index`; empty past the last stage.
    pub fn stage(&self, index: usize) -> &[NodeId] {
        self.border.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Role of `node`, if it belongs to the scaffold.
    pub fn role(&self, node: NodeId) -> Option<NodeRole> {
        self.roles.get(&node).copied()
    }

    /// Whether `node` is regenerated (resampling or AAA).
    pub fn is_resampling(&self, node: NodeId) -> bool {
        matches!(self.role(node), Some(NodeRole::Resampling | NodeRole::Aaa))
    }

    /// Whether `node` is an absorbing node.
    pub fn is_absorbing(&self, node: NodeId) -> bool {
        self.role(node) == Some(NodeRole::Absorbing)
    }

    /// Whether `node` is an AAA node.
    pub fn is_aaa(&self, node: NodeId) -> bool {
        self.role(node) == Some(NodeRole::Aaa)
    }

    /// Regenerated nodes in handle order.
    pub fn drg_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roles
            .iter()
            .filter(|(_, role)| matches!(role, NodeRole::Resampling | NodeRole::Aaa))
            .map(|(node, _)| *node)
    }

    /// Regeneration count of `node` in the whole state; zero outside the scaffold.
    pub fn regen_total(&self, node: NodeId) -> usize {
        self.regen_totals.get(&node).copied().unwrap_or(0)
    }

    /// Local kernel used at `node`, resimulation unless one was installed.
    pub fn lkernel(&self, node: NodeId) -> &LKernel {
        self.lkernels.get(&node).unwrap_or(&RESIMULATION)
    }

    /// Whether a kernel was installed at `node`.
    pub fn has_lkernel(&self, node: NodeId) -> bool {
        self.lkernels.contains_key(&node)
    }

    /// Installs `kernel` at `node`, replacing any previous kernel.
    pub fn install_lkernel(&mut self, node: NodeId, kernel: LKernel) {
        self.lkernels.insert(node, kernel);
    }

    /// Installed kernels, mutably.
    pub fn lkernels_mut(&mut self) -> impl Iterator<Item = (NodeId, &mut LKernel)> {
        self.lkernels.iter_mut().map(|(node, kernel)| (*node, kernel))
    }

    /// Installs a deterministic kernel pinning each principal node to its value.
    pub fn pin_principal(&mut self, values: &[Value]) -> Result<(), InferError> {
        if values.len() != self.principal.len() {
            return Err(InferError::invariant(
                "pin-arity",
                "one value is required per principal node",
            )
            .with_context("expected", self.principal.len())
            .with_context("found", values.len()));
        }
        for (node, value) in self.principal.clone().into_iter().zip(values) {
            self.install_lkernel(node, LKernel::Deterministic(value.clone()));
        }
        Ok(())
    }

    /// Selector decisions that produced the scaffold.
    pub fn picks(&self) -> &[Pick] {
        &self.picks
    }

    /// Records the selector decisions that produced the scaffold.
    pub fn set_picks(&mut self, picks: Vec<Pick>) {
        self.picks = picks;
    }
}

/// Builds the scaffold for the ordered principal node `sets`.
///
/// Every principal node must be an unconstrained random choice. Deterministic
/// and lookup descendants are regenerated; the first random descendant on
/// each path absorbs. A node belongs to the stage of the last set whose
/// regenerated region reaches it. With no sets the scaffold has a single
/// empty stage.
pub fn construct_scaffold(
    trace: &ConcreteTrace,
    sets: Vec<BTreeSet<NodeId>>,
) -> Result<Scaffold, InferError> {
    let principal_all: BTreeSet<NodeId> = sets.iter().flatten().copied().collect();
    for node in &principal_all {
        if !trace.is_random_choice(*node) || trace.is_constrained(*node) {
            return Err(InferError::config(
                "bad-principal",
                "principal nodes must be unconstrained random choices",
            )
            .with_context("node", node));
        }
    }

    let mut roles: BTreeMap<NodeId, NodeRole> = BTreeMap::new();
    let mut stage_of: BTreeMap<NodeId, usize> = BTreeMap::new();
    let mut principal = Vec::new();

    for (index, set) in sets.iter().enumerate() {
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        for node in set {
            if roles.insert(*node, NodeRole::Resampling).is_none() {
                stage_of.insert(*node, index);
                principal.push(*node);
                queue.push_back(*node);
            }
        }
        while let Some(node) = queue.pop_front() {
            for child in trace.children(node)? {
                if principal_all.contains(child) {
                    continue;
                }
                let raised = stage_of.get(child).map_or(true, |stage| *stage < index);
                if trace.is_random_choice(*child) {
                    roles.insert(*child, NodeRole::Absorbing);
                    if raised {
                        stage_of.insert(*child, index);
                    }
                } else if raised {
                    roles.insert(*child, NodeRole::Resampling);
                    stage_of.insert(*child, index);
                    queue.push_back(*child);
                }
            }
        }
    }

    let num_stages = sets.len().max(1);
    let mut border: Vec<Vec<NodeId>> = vec![Vec::new(); num_stages];
    for (node, role) in &roles {
        let on_border = match role {
            NodeRole::Absorbing | NodeRole::Aaa => true,
            NodeRole::Resampling => trace.children(*node)?.is_empty(),
        };
        if on_border {
            border[stage_of[node]].push(*node);
        }
    }

    let mut regen_totals = BTreeMap::new();
    for (node, role) in &roles {
        if *role == NodeRole::Absorbing {
            continue;
        }
        let mut total = usize::from(border[stage_of[node]].contains(node));
        for child in trace.children(*node)? {
            if roles.contains_key(child) {
                total += trace.parents(*child)?.iter().filter(|p| *p == node).count();
            }
        }
        regen_totals.insert(*node, total);
    }

    Ok(Scaffold {
        principal,
        roles,
        border,
        regen_totals,
        lkernels: BTreeMap::new(),
        picks: Vec::new(),
    })
}
