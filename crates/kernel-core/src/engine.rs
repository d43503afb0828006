//! DeGroot opinion update: one weighted-averaging round over the trust
//! matrix, plus a tight-loop convergence probe for a fixed matrix.

use crate::matrix::TrustMatrix;

/// Result of repeatedly advancing a fixed matrix with no interventions.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub opinions: Vec<f64>,
    pub steps: u32,
    pub converged: bool,
}

/// Advance the opinion vector by one round: `x'[i] = Σ_j W[i][j] * x[j]`.
///
/// Each output entry is a convex combination of the inputs, so the result
/// is bounded by `[min(x), max(x)]` and numeric drift cannot overshoot.
pub fn advance(matrix: &TrustMatrix, opinions: &[f64]) -> Vec<f64> {
    debug_assert_eq!(matrix.len(), opinions.len());
    matrix
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .zip(opinions)
                .map(|(weight, opinion)| weight * opinion)
                .sum()
        })
        .collect()
}

/// Run `advance` in a loop until successive vectors agree within
/// `tolerance` on every entry, or `max_steps` is exhausted.
pub fn probe_convergence(
    matrix: &TrustMatrix,
    opinions: &[f64],
    max_steps: u32,
    tolerance: f64,
) -> ProbeResult {
    let mut current = opinions.to_vec();
    for step in 0..max_steps {
        let next = advance(matrix, &current);
        let settled = current
            .iter()
            .zip(&next)
            .all(|(a, b)| (a - b).abs() <= tolerance);
        current = next;
        if settled {
            return ProbeResult {
                opinions: current,
                steps: step + 1,
                converged: true,
            };
        }
    }
    ProbeResult {
        opinions: current,
        steps: max_steps,
        converged: false,
    }
}
