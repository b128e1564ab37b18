use resim_core::{InferError, RngHandle};
use resim_trace::ConcreteTrace;
use tracing::{debug, debug_span};

use crate::operators::Operator;
use crate::selector::Selector;

/// Applies one Metropolis-Hastings transition mixing over `selector`.
///
/// The selection densities of the sampled scaffold before and after the
/// proposal enter the acceptance ratio. Either outcome leaves the trace
/// whole. Returns whether the proposal was accepted.
pub fn mix_mh(
    trace: &mut ConcreteTrace,
    selector: &dyn Selector,
    operator: &mut dyn Operator,
    rng: &mut RngHandle,
) -> Result<bool, InferError> {
    let span = debug_span!("mix_mh", operator = operator.name());
    let _guard = span.enter();

    let mut scaffold = selector.sample_index(trace, rng)?;
    let rho_mix = selector.log_density_of_index(trace, &scaffold)?;
    let log_alpha = operator.propose(trace, &mut scaffold, rng)?;
    let xi_mix = selector.log_density_of_index(trace, &scaffold)?;
    let ratio = xi_mix + log_alpha - rho_mix;
    let accepted = rng.uniform().ln() < ratio;
    debug!(
        principal = scaffold.principal_nodes().len(),
        rho_mix, xi_mix, log_alpha, accepted, "proposal evaluated"
    );
    if accepted {
        operator.accept(trace, &mut scaffold)?;
    } else {
        operator.reject(trace, &mut scaffold, rng)?;
    }
    Ok(accepted)
}
