use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use resim_core::{
    BlockId, InferError, NodeId, PersistentMap, PersistentSet, RngHandle, Value, DEFAULT_SCOPE,
};

use crate::psp::Psp;
use crate::scaffold::Scaffold;

/// Blocks of one scope, each holding the random choices tagged into it.
pub type ScopeTable = PersistentMap<BlockId, PersistentSet<NodeId>>;

/// Structural kind of a trace node.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Literal value with no parents.
    Constant(Value),
    /// Reference mirroring the value of another node.
    Lookup(NodeId),
    /// Application of a procedure to operand nodes.
    Application {
        /// Procedure applied at the node.
        psp: Arc<dyn Psp>,
        /// Operand nodes in argument order.
        operands: Vec<NodeId>,
    },
}

#[derive(Debug, Clone)]
struct NodeRecord {
    kind: NodeKind,
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
    observed: Option<Value>,
    constrained: bool,
}

/// Value and bookkeeping access shared by the base trace and particles.
///
/// Regeneration and detach are written once against this trait. Structure
/// (kinds, parents, scopes) always comes from the base trace returned by
/// [`TraceStore::structure`]; values and regen counts may be overlaid.
pub trait TraceStore {
    /// Base trace supplying node structure.
    fn structure(&self) -> &ConcreteTrace;

    /// Current value of `node`, if active.
    fn value(&self, node: NodeId) -> Option<Value>;

    /// Stores the value of `node`.
    fn set_value(&mut self, node: NodeId, value: Value);

    /// Marks `node` inactive.
    fn clear_value(&mut self, node: NodeId);

    /// Regeneration count of `node` relative to `scaffold`.
    fn regen_count(&self, scaffold: &Scaffold, node: NodeId) -> usize;

    /// Sets the regeneration count of `node` relative to `scaffold`.
    fn set_regen_count(&mut self, scaffold: &Scaffold, node: NodeId, count: usize);

    /// Operand values of an application node.
    fn args(&self, node: NodeId) -> Result<Vec<Value>, InferError> {
        self.structure()
            .operands(node)?
            .iter()
            .map(|operand| {
                self.value(*operand).ok_or_else(|| {
                    InferError::invariant("inactive-operand", "operand has no value")
                        .with_context("node", node)
                        .with_context("operand", operand)
                })
            })
            .collect()
    }

    /// Operand values of an application node, `None` where the operand is inactive.
    fn partial_args(&self, node: NodeId) -> Result<Vec<Option<Value>>, InferError> {
        Ok(self
            .structure()
            .operands(node)?
            .iter()
            .map(|operand| self.value(*operand))
            .collect())
    }
}

/// Arena-backed execution trace of a fixed model structure.
#[derive(Debug, Clone)]
pub struct ConcreteTrace {
    nodes: Vec<NodeRecord>,
    values: Vec<Option<Value>>,
    regen_overrides: BTreeMap<NodeId, usize>,
    scopes: PersistentMap<String, ScopeTable>,
}

impl Default for ConcreteTrace {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_node(node: NodeId) -> InferError {
    InferError::trace("unknown-node", "node is not part of this trace").with_context("node", node)
}

fn unknown_scope(scope: &str) -> InferError {
    InferError::config("unknown-scope", "scope has not been declared").with_context("scope", scope)
}

impl ConcreteTrace {
    /// Creates an empty trace with an empty default scope.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            values: Vec::new(),
            regen_overrides: BTreeMap::new(),
            scopes: PersistentMap::new().insert(DEFAULT_SCOPE.to_string(), ScopeTable::new()),
        }
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node handle, in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(|idx| NodeId::from_raw(idx as u32))
    }

    /// Adds a constant node.
    pub fn constant(&mut self, value: impl Into<Value>) -> NodeId {
        let value = value.into();
        self.push(NodeKind::Constant(value.clone()), Vec::new(), value)
    }

    /// Adds a reference to `source`.
    pub fn lookup(&mut self, source: NodeId) -> Result<NodeId, InferError> {
        let value = self.active_value(source)?;
        Ok(self.push(NodeKind::Lookup(source), vec![source], value))
    }

    /// Adds an application of `psp`, simulating its value from the operands.
    pub fn apply(
        &mut self,
        psp: Arc<dyn Psp>,
        operands: &[NodeId],
        rng: &mut RngHandle,
    ) -> Result<NodeId, InferError> {
        let args = self.operand_values(operands)?;
        let value = psp.simulate(&args, rng)?;
        self.push_application(psp, operands, value)
    }

    /// Adds an application of `psp` holding `value`.
    ///
    /// Fails when `value` lies outside the support of a random procedure.
    pub fn apply_with_value(
        &mut self,
        psp: Arc<dyn Psp>,
        operands: &[NodeId],
        value: impl Into<Value>,
    ) -> Result<NodeId, InferError> {
        let value = value.into();
        let args = self.operand_values(operands)?;
        if psp.is_random() && psp.log_density(&value, &args)? == f64::NEG_INFINITY {
            return Err(InferError::trace("value-outside-support", "value has zero density")
                .with_context("psp", psp.name())
                .with_context("value", &value));
        }
        self.push_application(psp, operands, value)
    }

    fn push_application(
        &mut self,
        psp: Arc<dyn Psp>,
        operands: &[NodeId],
        value: Value,
    ) -> Result<NodeId, InferError> {
        let random = psp.is_random();
        let id = self.push(
            NodeKind::Application {
                psp,
                operands: operands.to_vec(),
            },
            operands.to_vec(),
            value,
        );
        if random {
            let block = BlockId::Node(id);
            self.scopes = self.scopes.adjust(&DEFAULT_SCOPE.to_string(), |table| {
                table.insert(block, PersistentSet::new().insert(id))
            });
        }
        Ok(id)
    }

    fn push(&mut self, kind: NodeKind, parents: Vec<NodeId>, value: Value) -> NodeId {
        let id = NodeId::from_raw(self.nodes.len() as u32);
        let distinct: BTreeSet<NodeId> = parents.iter().copied().collect();
        for parent in distinct {
            self.nodes[parent.index()].children.push(id);
        }
        self.nodes.push(NodeRecord {
            kind,
            parents,
            children: Vec::new(),
            observed: None,
            constrained: false,
        });
        self.values.push(Some(value));
        id
    }

    fn operand_values(&self, operands: &[NodeId]) -> Result<Vec<Value>, InferError> {
        operands.iter().map(|op| self.active_value(*op)).collect()
    }

    fn active_value(&self, node: NodeId) -> Result<Value, InferError> {
        self.record(node)?;
        self.values[node.index()].clone().ok_or_else(|| {
            InferError::invariant("inactive-node", "node has no value").with_context("node", node)
        })
    }

    fn record(&self, node: NodeId) -> Result<&NodeRecord, InferError> {
        self.nodes.get(node.index()).ok_or_else(|| unknown_node(node))
    }

    /// Structural kind of `node`.
    pub fn kind(&self, node: NodeId) -> Result<&NodeKind, InferError> {
        Ok(&self.record(node)?.kind)
    }

    /// Parents of `node`: operands of an application or the source of a lookup.
    pub fn parents(&self, node: NodeId) -> Result<&[NodeId], InferError> {
        Ok(&self.record(node)?.parents)
    }

    /// Distinct children of `node`, in creation order.
    pub fn children(&self, node: NodeId) -> Result<&[NodeId], InferError> {
        Ok(&self.record(node)?.children)
    }

    /// Operands of an application; empty for other kinds.
    pub fn operands(&self, node: NodeId) -> Result<&[NodeId], InferError> {
        match &self.record(node)?.kind {
            NodeKind::Application { operands, .. } => Ok(operands),
            _ => Ok(&[]),
        }
    }

    /// Procedure applied at `node`.
    pub fn psp(&self, node: NodeId) -> Result<&Arc<dyn Psp>, InferError> {
        match &self.record(node)?.kind {
            NodeKind::Application { psp, .. } => Ok(psp),
            _ => Err(InferError::trace("not-application", "node is not an application")
                .with_context("node", node)),
        }
    }

    /// Value stored at `node` in the base trace.
    pub fn value_at(&self, node: NodeId) -> Option<&Value> {
        self.values.get(node.index()).and_then(Option::as_ref)
    }

    /// Whether `node` applies a random procedure.
    pub fn is_random_choice(&self, node: NodeId) -> bool {
        matches!(
            self.record(node).map(|rec| &rec.kind),
            Ok(NodeKind::Application { psp, .. }) if psp.is_random()
        )
    }

    /// Whether an observation pins the value of `node`.
    pub fn is_constrained(&self, node: NodeId) -> bool {
        self.record(node).map(|rec| rec.constrained).unwrap_or(false)
    }

    /// Whether `node` was the target of [`ConcreteTrace::observe`].
    pub fn is_observation(&self, node: NodeId) -> bool {
        self.observed_value(node).is_some()
    }

    /// Value `node` was observed at.
    pub fn observed_value(&self, node: NodeId) -> Option<&Value> {
        self.record(node).ok().and_then(|rec| rec.observed.as_ref())
    }

    /// Follows lookups from `node` to the application they resolve to.
    pub fn outermost_non_reference_application(&self, node: NodeId) -> Result<NodeId, InferError> {
        let mut current = node;
        loop {
            match &self.record(current)?.kind {
                NodeKind::Application { .. } => return Ok(current),
                NodeKind::Lookup(source) => current = *source,
                NodeKind::Constant(_) => {
                    return Err(InferError::trace(
                        "unresolved-reference",
                        "node does not resolve to an application",
                    )
                    .with_context("node", node))
                }
            }
        }
    }

    /// Constrains the random choice behind `node` to `value`.
    ///
    /// Deterministic descendants are recomputed and the constrained choice
    /// leaves every scope.
    pub fn observe(&mut self, node: NodeId, value: impl Into<Value>) -> Result<(), InferError> {
        let value = value.into();
        let target = self.outermost_non_reference_application(node)?;
        let psp = Arc::clone(self.psp(target)?);
        if !psp.is_random() {
            return Err(InferError::trace(
                "observe-deterministic",
                "only random choices can be observed",
            )
            .with_context("node", node)
            .with_context("psp", psp.name()));
        }
        let args = self.operand_values(self.operands(target)?)?;
        if psp.log_density(&value, &args)? == f64::NEG_INFINITY {
            return Err(InferError::trace("impossible-observation", "observed value has zero density")
                .with_context("node", node)
                .with_context("value", &value));
        }
        self.values[target.index()] = Some(value.clone());
        self.nodes[node.index()].observed = Some(value);
        self.nodes[target.index()].constrained = true;
        self.unregister(target);
        self.propagate(target)
    }

    fn unregister(&mut self, node: NodeId) {
        let mut scopes = self.scopes.clone();
        for (name, table) in self.scopes.iter() {
            let mut pruned = table.clone();
            for (block, members) in table.iter() {
                if members.contains(&node) {
                    let remaining = members.remove(&node);
                    pruned = if remaining.is_empty() {
                        pruned.delete(block)
                    } else {
                        pruned.insert(block.clone(), remaining)
                    };
                }
            }
            scopes = scopes.insert(name.clone(), pruned);
        }
        self.scopes = scopes;
    }

    fn propagate(&mut self, from: NodeId) -> Result<(), InferError> {
        // Only deterministic applications are simulated here; they never draw.
        let mut rng = RngHandle::from_seed(0);
        let mut frontier: BTreeSet<NodeId> = self.children(from)?.iter().copied().collect();
        while let Some(node) = frontier.pop_first() {
            let value = match &self.nodes[node.index()].kind {
                NodeKind::Lookup(source) => self.active_value(*source)?,
                NodeKind::Application { psp, operands } if !psp.is_random() => {
                    let args = self.operand_values(operands)?;
                    psp.simulate(&args, &mut rng)?
                }
                _ => continue,
            };
            self.values[node.index()] = Some(value);
            frontier.extend(self.nodes[node.index()].children.iter().copied());
        }
        Ok(())
    }

    /// Tags `node` into `block` of `scope`, declaring the scope if needed.
    pub fn tag(
        &mut self,
        scope: &str,
        block: impl Into<BlockId>,
        node: NodeId,
    ) -> Result<(), InferError> {
        if scope == DEFAULT_SCOPE {
            return Err(InferError::config(
                "default-scope-reserved",
                "the default scope is maintained by the trace",
            ));
        }
        self.record(node)?;
        if !self.is_random_choice(node) || self.is_constrained(node) {
            return Err(InferError::trace(
                "tag-non-choice",
                "only unconstrained random choices can be tagged",
            )
            .with_context("node", node));
        }
        let block = block.into();
        let table = self.scopes.lookup(&scope.to_string()).cloned().unwrap_or_default();
        let members = table.lookup(&block).cloned().unwrap_or_default().insert(node);
        self.scopes = self.scopes.insert(scope.to_string(), table.insert(block, members));
        Ok(())
    }

    /// Block table of `scope`.
    pub fn scope_table(&self, scope: &str) -> Result<&ScopeTable, InferError> {
        self.scopes.lookup(&scope.to_string()).ok_or_else(|| unknown_scope(scope))
    }

    /// Whether `scope` has been declared.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(&scope.to_string())
    }

    /// Number of blocks in `scope`; zero for undeclared scopes.
    pub fn num_blocks_in_scope(&self, scope: &str) -> usize {
        self.scope_table(scope).map(|table| table.len()).unwrap_or(0)
    }

    /// Draws a block of `scope` uniformly.
    pub fn sample_block(&self, scope: &str, rng: &mut RngHandle) -> Result<BlockId, InferError> {
        let table = self.scope_table(scope)?;
        if table.is_empty() {
            return Err(InferError::config("empty-scope", "scope has no blocks")
                .with_context("scope", scope));
        }
        table
            .nth(rng.index(table.len()))
            .map(|(block, _)| block.clone())
            .ok_or_else(|| InferError::invariant("block-rank", "block rank out of range"))
    }

    /// Log probability of drawing any one block of `scope` uniformly.
    pub fn log_density_of_block(&self, scope: &str) -> Result<f64, InferError> {
        Ok(-(self.scope_table(scope)?.len() as f64).ln())
    }

    /// Unconstrained random choices of `block` in `scope`.
    pub fn nodes_in_block(&self, scope: &str, block: &BlockId) -> Result<BTreeSet<NodeId>, InferError> {
        let members = self.scope_table(scope)?.lookup(block).ok_or_else(|| {
            InferError::config("unknown-block", "block does not exist in scope")
                .with_context("scope", scope)
                .with_context("block", block)
        })?;
        Ok(members.iter().copied().collect())
    }

    /// Union of every block of `scope`.
    pub fn all_nodes_in_scope(&self, scope: &str) -> Result<BTreeSet<NodeId>, InferError> {
        Ok(self
            .scope_table(scope)?
            .values()
            .flat_map(|members| members.iter().copied())
            .collect())
    }

    /// Blocks of `scope` in key order.
    pub fn ordered_sets_in_scope(&self, scope: &str) -> Result<Vec<BTreeSet<NodeId>>, InferError> {
        Ok(self
            .scope_table(scope)?
            .values()
            .map(|members| members.iter().copied().collect())
            .collect())
    }

    /// Every unconstrained random choice of the trace.
    pub fn unconstrained_choices(&self) -> BTreeSet<NodeId> {
        self.all_nodes_in_scope(DEFAULT_SCOPE).unwrap_or_default()
    }

    /// Unconstrained random choices among `roots` and their descendants.
    pub fn random_choices_in_extent<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a NodeId>,
    ) -> Result<BTreeSet<NodeId>, InferError> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeId> = roots.into_iter().copied().collect();
        let mut choices = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            if self.is_random_choice(node) && !self.is_constrained(node) {
                choices.insert(node);
            }
            stack.extend(self.children(node)?.iter().copied());
        }
        Ok(choices)
    }

    /// Sum of the log densities of every random choice, observations included.
    pub fn log_joint(&self) -> Result<f64, InferError> {
        let mut total = 0.0;
        for node in self.node_ids() {
            if let NodeKind::Application { psp, operands } = &self.nodes[node.index()].kind {
                if psp.is_random() {
                    let value = self.active_value(node)?;
                    total += psp.log_density(&value, &self.operand_values(operands)?)?;
                }
            }
        }
        Ok(total)
    }

    /// Whether every node is active and no regeneration is in flight.
    pub fn is_whole(&self) -> bool {
        self.regen_overrides.is_empty() && self.values.iter().all(Option::is_some)
    }
}

impl TraceStore for ConcreteTrace {
    fn structure(&self) -> &ConcreteTrace {
        self
    }

    fn value(&self, node: NodeId) -> Option<Value> {
        self.value_at(node).cloned()
    }

    fn set_value(&mut self, node: NodeId, value: Value) {
        if let Some(slot) = self.values.get_mut(node.index()) {
            *slot = Some(value);
        }
    }

    fn clear_value(&mut self, node: NodeId) {
        if let Some(slot) = self.values.get_mut(node.index()) {
            *slot = None;
        }
    }

    fn regen_count(&self, scaffold: &Scaffold, node: NodeId) -> usize {
        self.regen_overrides
            .get(&node)
            .copied()
            .unwrap_or_else(|| scaffold.regen_total(node))
    }

    fn set_regen_count(&mut self, scaffold: &Scaffold, node: NodeId, count: usize) {
        // Counts equal to the scaffold total are the whole state and need no entry.
        if count == scaffold.regen_total(node) {
            self.regen_overrides.remove(&node);
        } else {
            self.regen_overrides.insert(node, count);
        }
    }
}
