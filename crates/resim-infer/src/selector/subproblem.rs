//! Interpreter for the subproblem selection language.
//!
//! A program names the principal nodes of a proposal by composing scope
//! tables, uniform draws and causal extents. Sampling records each draw as a
//! [`Pick`] on the scaffold; the selection density is recomputed later by
//! replaying those picks against another trace state.

use std::collections::BTreeSet;
use std::slice;

use resim_core::{BlockId, InferError, NodeId, PersistentMap, PersistentSet, RngHandle};
use resim_trace::{construct_scaffold, ConcreteTrace, Pick, Scaffold};
use serde::{Deserialize, Serialize};

use super::Selector;

/// Term of the subproblem selection language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum SubproblemExpr {
    /// Entry `key` of a dictionary.
    Lookup {
        /// Expression producing the dictionary.
        dictionary: Box<SubproblemExpr>,
        /// Key to read.
        key: BlockId,
    },
    /// One element of a dictionary or node set, drawn uniformly.
    Random1 {
        /// Expression producing the collection.
        source: Box<SubproblemExpr>,
    },
    /// Random choices causally downstream of a node, set or the whole trace.
    Extent {
        /// Expression producing the roots.
        source: Box<SubproblemExpr>,
    },
    /// Block table of a named scope.
    FetchTag {
        /// Scope name.
        name: String,
    },
    /// The whole trace.
    Top,
    /// Scaffold over a resolved node or node set.
    MinimalSubproblem {
        /// Expression producing the principal nodes.
        source: Box<SubproblemExpr>,
    },
}

impl SubproblemExpr {
    /// `Lookup(dictionary, key)`.
    pub fn lookup(dictionary: SubproblemExpr, key: impl Into<BlockId>) -> Self {
        SubproblemExpr::Lookup {
            dictionary: Box::new(dictionary),
            key: key.into(),
        }
    }

    /// `Random1(source)`.
    pub fn random1(source: SubproblemExpr) -> Self {
        SubproblemExpr::Random1 {
            source: Box::new(source),
        }
    }

    /// `Extent(source)`.
    pub fn extent(source: SubproblemExpr) -> Self {
        SubproblemExpr::Extent {
            source: Box::new(source),
        }
    }

    /// `FetchTag(name)`.
    pub fn fetch_tag(name: impl Into<String>) -> Self {
        SubproblemExpr::FetchTag { name: name.into() }
    }

    /// `MinimalSubproblem(source)`.
    pub fn minimal_subproblem(source: SubproblemExpr) -> Self {
        SubproblemExpr::MinimalSubproblem {
            source: Box::new(source),
        }
    }
}

/// Selector driven by a [`SubproblemExpr`] program.
#[derive(Debug, Clone, PartialEq)]
pub struct SubproblemSelector {
    program: SubproblemExpr,
}

impl SubproblemSelector {
    /// Wraps a program.
    pub fn new(program: SubproblemExpr) -> Self {
        Self { program }
    }
}

impl Selector for SubproblemSelector {
    fn sample_index(&self, trace: &ConcreteTrace, rng: &mut RngHandle) -> Result<Scaffold, InferError> {
        let mut interpreter = Interpreter {
            trace,
            mode: Mode::Sample {
                rng,
                picks: Vec::new(),
            },
            log_weight: 0.0,
        };
        let selection = interpreter.eval(&self.program)?;
        match (selection, interpreter.mode) {
            (Selection::Subproblem(Some(mut scaffold)), Mode::Sample { picks, .. }) => {
                scaffold.set_picks(picks);
                Ok(scaffold)
            }
            (other, _) => Err(not_a_subproblem(&other)),
        }
    }

    fn log_density_of_index(&self, trace: &ConcreteTrace, scaffold: &Scaffold) -> Result<f64, InferError> {
        let mut interpreter = Interpreter {
            trace,
            mode: Mode::Replay(scaffold.picks().iter()),
            log_weight: 0.0,
        };
        match interpreter.eval(&self.program)? {
            Selection::Subproblem(_) => Ok(interpreter.log_weight),
            other => Err(not_a_subproblem(&other)),
        }
    }
}

type Dictionary = PersistentMap<BlockId, PersistentSet<NodeId>>;

enum Selection {
    Top,
    Node(NodeId),
    Set(PersistentSet<NodeId>),
    Dict(Dictionary),
    /// Built only while sampling; replay skips scaffold construction.
    Subproblem(Option<Scaffold>),
}

impl Selection {
    fn kind(&self) -> &'static str {
        match self {
            Selection::Top => "top",
            Selection::Node(_) => "node",
            Selection::Set(_) => "set",
            Selection::Dict(_) => "dictionary",
            Selection::Subproblem(_) => "subproblem",
        }
    }
}

fn not_a_subproblem(selection: &Selection) -> InferError {
    InferError::config("program-not-subproblem", "selector program must produce a subproblem")
        .with_context("found", selection.kind())
}

fn wrong_operand(op: &str, selection: &Selection) -> InferError {
    InferError::config("bad-operand", "operand has the wrong kind for this term")
        .with_context("op", op)
        .with_context("found", selection.kind())
}

enum Mode<'p> {
    Sample {
        rng: &'p mut RngHandle,
        picks: Vec<Pick>,
    },
    Replay(slice::Iter<'p, Pick>),
}

struct Interpreter<'a, 'p> {
    trace: &'a ConcreteTrace,
    mode: Mode<'p>,
    log_weight: f64,
}

impl Interpreter<'_, '_> {
    fn eval(&mut self, expr: &SubproblemExpr) -> Result<Selection, InferError> {
        match expr {
            SubproblemExpr::Top => Ok(Selection::Top),
            SubproblemExpr::FetchTag { name } => {
                Ok(Selection::Dict(self.trace.scope_table(name)?.clone()))
            }
            SubproblemExpr::Lookup { dictionary, key } => match self.eval(dictionary)? {
                Selection::Dict(dict) => dict.lookup(key).cloned().map(Selection::Set).ok_or_else(|| {
                    InferError::config("unknown-key", "dictionary has no such key")
                        .with_context("key", key)
                }),
                other => Err(wrong_operand("lookup", &other)),
            },
            SubproblemExpr::Random1 { source } => {
                let collection = self.eval(source)?;
                self.random1(collection)
            }
            SubproblemExpr::Extent { source } => match self.eval(source)? {
                Selection::Top => Ok(Selection::Set(self.trace.unconstrained_choices().into_iter().collect())),
                Selection::Node(node) => Ok(Selection::Set(self.extent(&[node])?)),
                Selection::Set(nodes) => Ok(Selection::Set(self.extent(nodes.iter())?)),
                Selection::Dict(dict) => {
                    let mut expanded = Dictionary::new();
                    for (key, nodes) in dict.iter() {
                        expanded = expanded.insert(key.clone(), self.extent(nodes.iter())?);
                    }
                    Ok(Selection::Dict(expanded))
                }
                other => Err(wrong_operand("extent", &other)),
            },
            SubproblemExpr::MinimalSubproblem { source } => {
                let nodes: BTreeSet<NodeId> = match self.eval(source)? {
                    Selection::Node(node) => [node].into_iter().collect(),
                    Selection::Set(nodes) => nodes.iter().copied().collect(),
                    Selection::Top => self.trace.unconstrained_choices(),
                    other => return Err(wrong_operand("minimal-subproblem", &other)),
                };
                match self.mode {
                    Mode::Sample { .. } => Ok(Selection::Subproblem(Some(construct_scaffold(
                        self.trace,
                        vec![nodes],
                    )?))),
                    Mode::Replay(_) => Ok(Selection::Subproblem(None)),
                }
            }
        }
    }

    fn extent<'n>(
        &self,
        roots: impl IntoIterator<Item = &'n NodeId>,
    ) -> Result<PersistentSet<NodeId>, InferError> {
        Ok(self.trace.random_choices_in_extent(roots)?.into_iter().collect())
    }

    fn random1(&mut self, collection: Selection) -> Result<Selection, InferError> {
        let len = match &collection {
            Selection::Dict(dict) => dict.len(),
            Selection::Set(nodes) => nodes.len(),
            other => return Err(wrong_operand("random1", other)),
        };
        match &mut self.mode {
            Mode::Sample { rng, picks } => {
                if len == 0 {
                    return Err(InferError::config(
                        "empty-collection",
                        "cannot draw from an empty collection",
                    ));
                }
                let rank = rng.index(len);
                self.log_weight -= (len as f64).ln();
                match collection {
                    Selection::Dict(dict) => {
                        let (key, nodes) = dict
                            .nth(rank)
                            .ok_or_else(|| InferError::invariant("rank", "rank out of range"))?;
                        picks.push(Pick::Block(key.clone()));
                        Ok(Selection::Set(nodes.clone()))
                    }
                    Selection::Set(nodes) => {
                        let node = *nodes
                            .nth(rank)
                            .ok_or_else(|| InferError::invariant("rank", "rank out of range"))?;
                        picks.push(Pick::Node(node));
                        Ok(Selection::Node(node))
                    }
                    other => Err(wrong_operand("random1", &other)),
                }
            }
            Mode::Replay(trail) => {
                let pick = trail.next().ok_or_else(|| {
                    InferError::config("trail-mismatch", "recorded selection is shorter than the program")
                })?;
                let found = match (&collection, pick) {
                    (Selection::Dict(dict), Pick::Block(key)) => {
                        dict.lookup(key).cloned().map(Selection::Set)
                    }
                    (Selection::Set(nodes), Pick::Node(node)) => {
                        nodes.contains(node).then_some(Selection::Node(*node))
                    }
                    _ => {
                        return Err(InferError::config(
                            "trail-mismatch",
                            "recorded selection does not match the program",
                        ))
                    }
                };
                match found {
                    Some(selection) => {
                        self.log_weight -= (len as f64).ln();
                        Ok(selection)
                    }
                    None => {
                        self.log_weight = f64::NEG_INFINITY;
                        Ok(Selection::Set(PersistentSet::new()))
                    }
                }
            }
        }
    }
}
