use std::path::Path;

use resim_core::{ErrorInfo, InferError, DEFAULT_SCOPE};
use serde::{Deserialize, Serialize};

use crate::operators::{
    EnumerativeGibbsOperator, HmcOperator, MeanfieldOperator, MhOperator, Operator,
    PGibbsOperator, ParticlePGibbsOperator, RejectionOperator,
};
use crate::selector::{BlockSelector, BlockSpec, Selector, SubproblemExpr, SubproblemSelector};

/// A sequence of inference commands applied for a number of sweeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferSchedule {
    /// Passes over the command list.
    #[serde(default = "InferSchedule::default_sweeps")]
    pub sweeps: usize,
    /// Seeding of the command streams.
    #[serde(default)]
    pub seed_policy: SeedPolicy,
    /// Commands in application order.
    pub commands: Vec<InferCommand>,
}

impl InferSchedule {
    const fn default_sweeps() -> usize {
        1
    }

    /// Schedule running `commands` for one sweep under the default seed policy.
    pub fn new(commands: Vec<InferCommand>) -> Self {
        Self {
            sweeps: Self::default_sweeps(),
            seed_policy: SeedPolicy::default(),
            commands,
        }
    }

    /// Parses a schedule from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, InferError> {
        serde_yaml::from_str(yaml)
            .map_err(|err| InferError::Serde(ErrorInfo::new("schedule-yaml-parse", err.to_string())))
    }

    /// Parses a schedule from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, InferError> {
        serde_json::from_str(json)
            .map_err(|err| InferError::Serde(ErrorInfo::new("schedule-json-parse", err.to_string())))
    }

    /// Reads and parses a YAML schedule file.
    pub fn from_yaml_path(path: &Path) -> Result<Self, InferError> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            InferError::Serde(
                ErrorInfo::new("schedule-read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&text)
    }

    /// Serialises the schedule as YAML.
    pub fn to_yaml_string(&self) -> Result<String, InferError> {
        serde_yaml::to_string(self)
            .map_err(|err| InferError::Serde(ErrorInfo::new("schedule-yaml-serialize", err.to_string())))
    }

    /// Serialises the schedule as indented JSON.
    pub fn to_json_string(&self) -> Result<String, InferError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| InferError::Serde(ErrorInfo::new("schedule-json-serialize", err.to_string())))
    }
}

/// Seeding of the per-command random streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPolicy {
    /// Root of every derived stream seed.
    #[serde(default = "SeedPolicy::default_master_seed")]
    pub master_seed: u64,
    /// Free-form run label.
    #[serde(default)]
    pub label: Option<String>,
}

impl SeedPolicy {
    const fn default_master_seed() -> u64 {
        0x05EE_D5EE_DD15_5EED
    }
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self {
            master_seed: Self::default_master_seed(),
            label: None,
        }
    }
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

const fn default_transitions() -> usize {
    1
}

const fn default_particles() -> usize {
    4
}

const fn default_iterations() -> usize {
    20
}

const fn default_step_size() -> f64 {
    0.01
}

const fn default_epsilon() -> f64 {
    0.01
}

const fn default_steps() -> usize {
    20
}

fn default_ordered() -> BlockSpec {
    BlockSpec::Ordered
}

/// One inference command: an operator applied through mixMH to a selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InferCommand {
    /// Resimulation Metropolis-Hastings.
    Mh {
        /// Scope to select from.
        #[serde(default = "default_scope")]
        scope: String,
        /// Block mode within the scope.
        #[serde(default)]
        block: BlockSpec,
        /// mixMH transitions per sweep.
        #[serde(default = "default_transitions")]
        transitions: usize,
    },
    /// Exact rejection sampling.
    Rejection {
        /// Scope to select from.
        #[serde(default = "default_scope")]
        scope: String,
        /// Block mode within the scope.
        #[serde(default)]
        block: BlockSpec,
        /// mixMH transitions per sweep.
        #[serde(default = "default_transitions")]
        transitions: usize,
    },
    /// Mean-field variational proposal.
    Meanfield {
        /// Scope to select from.
        #[serde(default = "default_scope")]
        scope: String,
        /// Block mode within the scope.
        #[serde(default)]
        block: BlockSpec,
        /// mixMH transitions per sweep.
        #[serde(default = "default_transitions")]
        transitions: usize,
        /// Optimisation rounds per proposal.
        #[serde(default = "default_iterations")]
        iterations: usize,
        /// Gradient step size.
        #[serde(default = "default_step_size")]
        step_size: f64,
    },
    /// Enumerative Gibbs.
    Gibbs {
        /// Scope to select from.
        #[serde(default = "default_scope")]
        scope: String,
        /// Block mode within the scope.
        #[serde(default)]
        block: BlockSpec,
        /// mixMH transitions per sweep.
        #[serde(default = "default_transitions")]
        transitions: usize,
    },
    /// Index-based particle Gibbs.
    Pgibbs {
        /// Scope to select from.
        #[serde(default = "default_scope")]
        scope: String,
        /// Block mode within the scope.
        #[serde(default = "default_ordered")]
        block: BlockSpec,
        /// mixMH transitions per sweep.
        #[serde(default = "default_transitions")]
        transitions: usize,
        /// Proposal particles.
        #[serde(default = "default_particles")]
        particles: usize,
    },
    /// Particle Gibbs over copy-on-write particles.
    FuncPgibbs {
        /// Scope to select from.
        #[serde(default = "default_scope")]
        scope: String,
        /// Block mode within the scope.
        #[serde(default = "default_ordered")]
        block: BlockSpec,
        /// mixMH transitions per sweep.
        #[serde(default = "default_transitions")]
        transitions: usize,
        /// Proposal particles.
        #[serde(default = "default_particles")]
        particles: usize,
    },
    /// Hamiltonian Monte Carlo.
    Hmc {
        /// Scope to select from.
        #[serde(default = "default_scope")]
        scope: String,
        /// Block mode within the scope.
        #[serde(default)]
        block: BlockSpec,
        /// mixMH transitions per sweep.
        #[serde(default = "default_transitions")]
        transitions: usize,
        /// Leapfrog step size.
        #[serde(default = "default_epsilon")]
        epsilon: f64,
        /// Leapfrog steps.
        #[serde(default = "default_steps")]
        steps: usize,
    },
    /// Resimulation MH over a scaffold chosen by a subproblem program.
    SubproblemMh {
        /// Program producing the scaffold.
        program: SubproblemExpr,
        /// mixMH transitions per sweep.
        #[serde(default = "default_transitions")]
        transitions: usize,
    },
}

impl InferCommand {
    /// Resimulation MH over `scope` with one block drawn per transition.
    pub fn mh(scope: impl Into<String>) -> Self {
        InferCommand::Mh {
            scope: scope.into(),
            block: BlockSpec::One,
            transitions: default_transitions(),
        }
    }

    /// Name of the command kind.
    pub fn label(&self) -> &'static str {
        match self {
            InferCommand::Mh { .. } => "mh",
            InferCommand::Rejection { .. } => "rejection",
            InferCommand::Meanfield { .. } => "meanfield",
            InferCommand::Gibbs { .. } => "gibbs",
            InferCommand::Pgibbs { .. } => "pgibbs",
            InferCommand::FuncPgibbs { .. } => "func-pgibbs",
            InferCommand::Hmc { .. } => "hmc",
            InferCommand::SubproblemMh { .. } => "subproblem-mh",
        }
    }

    /// Number of mixMH transitions per sweep.
    pub fn transitions(&self) -> usize {
        match self {
            InferCommand::Mh { transitions, .. }
            | InferCommand::Rejection { transitions, .. }
            | InferCommand::Meanfield { transitions, .. }
            | InferCommand::Gibbs { transitions, .. }
            | InferCommand::Pgibbs { transitions, .. }
            | InferCommand::FuncPgibbs { transitions, .. }
            | InferCommand::Hmc { transitions, .. }
            | InferCommand::SubproblemMh { transitions, .. } => *transitions,
        }
    }

    /// Scope the command selects from; `None` for subproblem programs.
    pub fn scope(&self) -> Option<&str> {
        self.target().map(|(scope, _)| scope)
    }

    fn target(&self) -> Option<(&str, &BlockSpec)> {
        match self {
            InferCommand::Mh { scope, block, .. }
            | InferCommand::Rejection { scope, block, .. }
            | InferCommand::Meanfield { scope, block, .. }
            | InferCommand::Gibbs { scope, block, .. }
            | InferCommand::Pgibbs { scope, block, .. }
            | InferCommand::FuncPgibbs { scope, block, .. }
            | InferCommand::Hmc { scope, block, .. } => Some((scope.as_str(), block)),
            InferCommand::SubproblemMh { .. } => None,
        }
    }

    /// Builds the selector the command draws scaffolds from.
    pub fn selector(&self) -> Result<Box<dyn Selector>, InferError> {
        let selector: Box<dyn Selector> = match (self, self.target()) {
            (InferCommand::SubproblemMh { program, .. }, _) => {
                Box::new(SubproblemSelector::new(program.clone()))
            }
            (_, Some((scope, block))) => Box::new(BlockSelector::new(scope, block.clone())?),
            (_, None) => {
                return Err(InferError::invariant("command-target", "command has no selection"))
            }
        };
        Ok(selector)
    }

    /// Builds a fresh operator, validating its parameters.
    pub fn operator(&self) -> Result<Box<dyn Operator>, InferError> {
        let operator: Box<dyn Operator> = match self {
            InferCommand::Mh { .. } | InferCommand::SubproblemMh { .. } => Box::new(MhOperator::new()),
            InferCommand::Rejection { .. } => Box::new(RejectionOperator::new()),
            InferCommand::Meanfield {
                iterations,
                step_size,
                ..
            } => {
                if !(step_size.is_finite() && *step_size > 0.0) {
                    return Err(InferError::config(
                        "meanfield-step-size",
                        "step size must be positive and finite",
                    )
                    .with_context("step_size", step_size));
                }
                Box::new(MeanfieldOperator::new(*iterations, *step_size))
            }
            InferCommand::Gibbs { .. } => Box::new(EnumerativeGibbsOperator::new()),
            InferCommand::Pgibbs { particles, .. } => Box::new(PGibbsOperator::new(*particles)?),
            InferCommand::FuncPgibbs { particles, .. } => {
                Box::new(ParticlePGibbsOperator::new(*particles)?)
            }
            InferCommand::Hmc { epsilon, steps, .. } => {
                if !(epsilon.is_finite() && *epsilon >= 0.0) {
                    return Err(InferError::config(
                        "hmc-epsilon",
                        "leapfrog step must be non-negative and finite",
                    )
                    .with_context("epsilon", epsilon));
                }
                Box::new(HmcOperator::new(*epsilon, *steps))
            }
        };
        Ok(operator)
    }
}
