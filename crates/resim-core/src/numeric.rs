//! Log-space arithmetic helpers.

/// Computes `log(sum(exp(xs)))` without overflow.
///
/// Returns negative infinity for an empty slice or when every entry is
/// negative infinity.
pub fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = xs.iter().map(|x| (x - max).exp()).sum();
    max + sum.ln()
}

/// Log-ratio of the Gibbs-style exclude-the-chosen acceptance rule.
///
/// `candidates` are the log weights the new state was drawn from, `chosen`
/// indexes the drawn candidate and `reference` is the log weight of the
/// current state. Returns the log of
/// `sum(candidates) / (sum(candidates) - candidates[chosen] + reference)`,
/// with the denominator rebuilt from its terms rather than by subtraction so
/// a dominant chosen weight does not cancel catastrophically.
pub fn exclude_chosen_log_ratio(candidates: &[f64], chosen: usize, reference: Option<f64>) -> f64 {
    let mut others: Vec<f64> = candidates
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != chosen)
        .map(|(_, w)| *w)
        .collect();
    if let Some(reference) = reference {
        others.push(reference);
    }
    log_sum_exp(candidates) - log_sum_exp(&others)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sum_exp_handles_extremes() {
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
        let big = log_sum_exp(&[1000.0, 1000.0]);
        assert!((big - (1000.0 + 2f64.ln())).abs() < 1e-9);
    }

    #[test]
    fn exclude_chosen_matches_direct_formula() {
        let candidates: [f64; 3] = [-1.0, -2.0, -0.5];
        let reference: f64 = -3.0;
        let direct = {
            let num: f64 = candidates.iter().map(|w| w.exp()).sum();
            let den = num - candidates[1].exp() + reference.exp();
            (num / den).ln()
        };
        let ratio = exclude_chosen_log_ratio(&candidates, 1, Some(reference));
        assert!((ratio - direct).abs() < 1e-12);
    }
}
