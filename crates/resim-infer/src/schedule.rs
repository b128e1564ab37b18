use std::collections::BTreeMap;

use resim_core::{InferError, RngHandle};
use resim_trace::ConcreteTrace;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use crate::config::InferSchedule;
use crate::determinism::command_seed;
use crate::mixmh::mix_mh;
use crate::operators::Operator;
use crate::selector::Selector;

/// Counts gathered while running a schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferSummary {
    /// Sweeps completed.
    pub sweeps: usize,
    /// mixMH transitions attempted.
    pub proposals: usize,
    /// Transitions accepted.
    pub accepted: usize,
    /// Acceptance rate per command, keyed `"<slot>:<kind>"`.
    pub acceptance_rates: BTreeMap<String, f64>,
    /// Command applications skipped because their scope was empty.
    pub skipped: usize,
}

impl InferSummary {
    /// Overall fraction of accepted transitions; zero before any proposal.
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposals == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposals as f64
        }
    }
}

struct Slot {
    key: String,
    scope: Option<String>,
    transitions: usize,
    selector: Box<dyn Selector>,
    operator: Box<dyn Operator>,
    proposals: usize,
    accepted: usize,
}

fn scope_is_empty(trace: &ConcreteTrace, scope: &str) -> bool {
    !trace.has_scope(scope) || trace.num_blocks_in_scope(scope) == 0
}

/// Runs every command of `schedule` for the configured number of sweeps.
///
/// Each command application draws from its own stream seeded from the
/// master seed, the sweep and the command's position, so runs are
/// reproducible. Commands whose scope holds no block are skipped.
pub fn run_schedule(trace: &mut ConcreteTrace, schedule: &InferSchedule) -> Result<InferSummary, InferError> {
    let mut slots = schedule
        .commands
        .iter()
        .enumerate()
        .map(|(index, command)| {
            Ok(Slot {
                key: format!("{index}:{}", command.label()),
                scope: command.scope().map(str::to_string),
                transitions: command.transitions(),
                selector: command.selector()?,
                operator: command.operator()?,
                proposals: 0,
                accepted: 0,
            })
        })
        .collect::<Result<Vec<_>, InferError>>()?;

    let mut summary = InferSummary::default();
    let master_seed = schedule.seed_policy.master_seed;
    for sweep in 0..schedule.sweeps {
        let span = debug_span!("sweep", sweep);
        let _guard = span.enter();
        for (index, slot) in slots.iter_mut().enumerate() {
            if let Some(scope) = slot.scope.as_deref() {
                if scope_is_empty(trace, scope) {
                    debug!(command = %slot.key, scope, "scope is empty, skipping");
                    summary.skipped += 1;
                    continue;
                }
            }
            let mut rng = RngHandle::from_seed(command_seed(master_seed, sweep, index));
            for _ in 0..slot.transitions {
                let accepted = mix_mh(trace, slot.selector.as_ref(), slot.operator.as_mut(), &mut rng)?;
                slot.proposals += 1;
                slot.accepted += usize::from(accepted);
            }
        }
        summary.sweeps += 1;
    }

    for slot in &slots {
        summary.proposals += slot.proposals;
        summary.accepted += slot.accepted;
        if slot.proposals > 0 {
            summary
                .acceptance_rates
                .insert(slot.key.clone(), slot.accepted as f64 / slot.proposals as f64);
        }
    }
    debug!(
        sweeps = summary.sweeps,
        proposals = summary.proposals,
        accepted = summary.accepted,
        "schedule finished"
    );
    Ok(summary)
}
