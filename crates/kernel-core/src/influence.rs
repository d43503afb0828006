//! Influence analysis: rank stakeholders by latent influence over the
//! eventual consensus value. Read-only over the trust matrix; advisory.

use std::collections::{BTreeSet, VecDeque};

use contracts::{InfluenceMethod, InfluenceReport, InfluenceScore, RunConfig, SCHEMA_VERSION_V1};

use crate::matrix::TrustMatrix;

/// Analyze the current matrix and produce a ranking plus a "whom to lobby
/// first" recommendation.
///
/// A connected network is ranked by its stationary distribution (the left
/// eigenvector of the matrix for eigenvalue 1): stakeholders with higher
/// stationary weight keep their opinion circulating longest. A fragmented
/// network has no unique stationary distribution, so the cliques are
/// reported and ranking falls back to total incoming weight.
pub fn analyze(matrix: &TrustMatrix, config: &RunConfig) -> InfluenceReport {
    let cliques = reachability_components(matrix);
    let fragmented = cliques.len() > 1;

    let (method, scores) = if fragmented {
        (InfluenceMethod::IncomingWeight, incoming_weight_scores(matrix))
    } else {
        (
            InfluenceMethod::Stationary,
            stationary_scores(matrix, config.probe_max_steps, config.probe_tolerance),
        )
    };

    let ranking = ranked(matrix, scores);
    let lobby_first = ranking
        .first()
        .map(|entry| entry.stakeholder_id.clone());

    InfluenceReport {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        method,
        fragmented,
        cliques,
        ranking,
        lobby_first,
    }
}

/// Connected components of the positive-weight graph, edges treated as
/// undirected: two stakeholders share a clique when attention flows between
/// them in either direction, directly or transitively. Cliques that do not
/// share a component cannot influence one another.
pub fn reachability_components(matrix: &TrustMatrix) -> Vec<Vec<String>> {
    let n = matrix.len();
    let mut assigned = vec![false; n];
    let mut components = Vec::new();

    for start in 0..n {
        if assigned[start] {
            continue;
        }
        let mut member_set = BTreeSet::new();
        let mut queue = VecDeque::new();
        assigned[start] = true;
        member_set.insert(matrix.id_at(start).to_string());
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            for other in 0..n {
                if assigned[other] {
                    continue;
                }
                let linked =
                    matrix.weight(current, other) > 0.0 || matrix.weight(other, current) > 0.0;
                if linked {
                    assigned[other] = true;
                    member_set.insert(matrix.id_at(other).to_string());
                    queue.push_back(other);
                }
            }
        }
        components.push(member_set.into_iter().collect::<Vec<_>>());
    }

    components
}

/// Stationary distribution by power iteration of `v' = v * W` from the
/// uniform vector. Each step averages with the previous iterate so that
/// periodic chains cannot oscillate forever; the averaged chain shares the
/// same fixed point.
fn stationary_scores(matrix: &TrustMatrix, max_steps: u32, tolerance: f64) -> Vec<f64> {
    let n = matrix.len();
    if n == 0 {
        return Vec::new();
    }
    let mut current = vec![1.0 / n as f64; n];

    for _ in 0..max_steps {
        let mut next = vec![0.0; n];
        for (i, row) in matrix.rows().iter().enumerate() {
            for (j, weight) in row.iter().enumerate() {
                next[j] += current[i] * weight;
            }
        }
        for (entry, previous) in next.iter_mut().zip(&current) {
            *entry = 0.5 * (*entry + previous);
        }
        normalize(&mut next);

        let settled = current
            .iter()
            .zip(&next)
            .all(|(a, b)| (a - b).abs() <= tolerance);
        current = next;
        if settled {
            break;
        }
    }
    current
}

fn incoming_weight_scores(matrix: &TrustMatrix) -> Vec<f64> {
    let mut scores = matrix.incoming_weights();
    normalize(&mut scores);
    scores
}

fn normalize(scores: &mut [f64]) {
    let total: f64 = scores.iter().sum();
    if total > 0.0 {
        for entry in scores.iter_mut() {
            *entry /= total;
        }
    }
}

/// Sort descending by score; ties break on stakeholder id so the ranking
/// is stable across runs.
fn ranked(matrix: &TrustMatrix, scores: Vec<f64>) -> Vec<InfluenceScore> {
    let mut ranking: Vec<InfluenceScore> = scores
        .into_iter()
        .enumerate()
        .map(|(index, score)| InfluenceScore {
            stakeholder_id: matrix.id_at(index).to_string(),
            score,
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.stakeholder_id.cmp(&b.stakeholder_id))
    });
    ranking
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(ids: &[&str], rows: Vec<Vec<f64>>) -> TrustMatrix {
        TrustMatrix::from_rows(ids.iter().map(|id| id.to_string()).collect(), rows)
            .expect("valid matrix")
    }

    #[test]
    fn stubborn_listener_magnet_ranks_first() {
        // "fin" barely listens to anyone while "sal" leans on "fin"; the
        // stationary weight concentrates on "fin".
        let matrix = matrix(
            &["fin", "sal"],
            vec![vec![0.9, 0.1], vec![0.5, 0.5]],
        );
        let report = analyze(&matrix, &RunConfig::default());
        assert!(!report.fragmented);
        assert_eq!(report.method, InfluenceMethod::Stationary);
        assert_eq!(report.ranking[0].stakeholder_id, "fin");
        assert_eq!(report.lobby_first.as_deref(), Some("fin"));
        let total: f64 = report.ranking.iter().map(|entry| entry.score).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn symmetric_network_ranks_evenly() {
        let matrix = matrix(
            &["a", "b", "c"],
            vec![
                vec![0.4, 0.3, 0.3],
                vec![0.3, 0.4, 0.3],
                vec![0.3, 0.3, 0.4],
            ],
        );
        let report = analyze(&matrix, &RunConfig::default());
        for entry in &report.ranking {
            assert!((entry.score - 1.0 / 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn disconnected_cliques_report_fragmentation() {
        let matrix = matrix(
            &["a", "b", "c", "d"],
            vec![
                vec![0.5, 0.5, 0.0, 0.0],
                vec![0.5, 0.5, 0.0, 0.0],
                vec![0.0, 0.0, 0.5, 0.5],
                vec![0.0, 0.0, 0.5, 0.5],
            ],
        );
        let report = analyze(&matrix, &RunConfig::default());
        assert!(report.fragmented);
        assert_eq!(report.method, InfluenceMethod::IncomingWeight);
        assert_eq!(report.cliques.len(), 2);
        assert_eq!(report.cliques[0], vec!["a".to_string(), "b".to_string()]);
        assert_eq!(report.cliques[1], vec!["c".to_string(), "d".to_string()]);
        assert_eq!(report.ranking.len(), 4);
    }

    #[test]
    fn one_way_attention_still_joins_a_component() {
        // "c" listens to "b" but nobody listens to "c"; reachability treats
        // the edge as undirected, so all three share one component.
        let matrix = matrix(
            &["a", "b", "c"],
            vec![
                vec![0.5, 0.5, 0.0],
                vec![0.5, 0.5, 0.0],
                vec![0.0, 0.5, 0.5],
            ],
        );
        let report = analyze(&matrix, &RunConfig::default());
        assert!(!report.fragmented);
        assert_eq!(report.cliques.len(), 1);
    }

    #[test]
    fn periodic_chain_still_settles_via_averaged_iteration() {
        let matrix = matrix(&["a", "b"], vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
        let report = analyze(&matrix, &RunConfig::default());
        assert_eq!(report.method, InfluenceMethod::Stationary);
        for entry in &report.ranking {
            assert!((entry.score - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn analyze_never_mutates_the_matrix() {
        let original = matrix(
            &["a", "b"],
            vec![vec![0.9, 0.1], vec![0.5, 0.5]],
        );
        let copy = original.clone();
        let _ = analyze(&original, &RunConfig::default());
        assert_eq!(original, copy);
    }
}
