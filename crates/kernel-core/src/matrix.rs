//! Row-stochastic trust matrix with invariant-enforcing construction and
//! normalization. Every mutation path re-certifies the touched rows.

use std::collections::BTreeMap;
use std::fmt;

use contracts::TrustTopology;

/// Tolerance for row-sum checks in assertions and convergence comparisons.
pub const ROW_SUM_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum MatrixError {
    NotSquare {
        expected: usize,
        found: usize,
    },
    NegativeWeight {
        row: usize,
        col: usize,
        weight: f64,
    },
    NonFiniteWeight {
        row: usize,
        col: usize,
    },
    ZeroSumRow {
        row: usize,
    },
    UnknownHub {
        hub_id: String,
    },
}

impl fmt::Display for MatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSquare { expected, found } => write!(
                f,
                "matrix is not square: expected {expected} entries, found {found}"
            ),
            Self::NegativeWeight { row, col, weight } => {
                write!(f, "negative weight {weight} at ({row}, {col})")
            }
            Self::NonFiniteWeight { row, col } => {
                write!(f, "non-finite weight at ({row}, {col})")
            }
            Self::ZeroSumRow { row } => {
                write!(f, "row {row} sums to zero; no renormalization target")
            }
            Self::UnknownHub { hub_id } => {
                write!(f, "hub stakeholder {hub_id} is not in the roster")
            }
        }
    }
}

impl std::error::Error for MatrixError {}

/// Square mapping from (source id, target id) to a non-negative weight, one
/// row per stakeholder, every row summing to 1. Row order follows the
/// roster order fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustMatrix {
    ids: Vec<String>,
    index_by_id: BTreeMap<String, usize>,
    rows: Vec<Vec<f64>>,
}

impl TrustMatrix {
    /// Build from explicit row-major weights and normalize.
    pub fn from_rows(ids: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self, MatrixError> {
        let index_by_id = ids
            .iter()
            .enumerate()
            .map(|(index, id)| (id.clone(), index))
            .collect();
        let mut matrix = Self {
            ids,
            index_by_id,
            rows,
        };
        matrix.validate_and_normalize()?;
        Ok(matrix)
    }

    /// Build from a named topology and normalize.
    pub fn from_topology(ids: Vec<String>, topology: &TrustTopology) -> Result<Self, MatrixError> {
        let n = ids.len();
        let rows = match topology {
            TrustTopology::Explicit { rows } => rows.clone(),
            TrustTopology::Uniform => {
                let share = if n == 0 { 0.0 } else { 1.0 / n as f64 };
                vec![vec![share; n]; n]
            }
            TrustTopology::SelfAnchored { self_weight } => {
                let anchored = self_weight.clamp(0.0, 1.0);
                let spread = if n > 1 {
                    (1.0 - anchored) / (n - 1) as f64
                } else {
                    0.0
                };
                (0..n)
                    .map(|i| {
                        (0..n)
                            .map(|j| if i == j { anchored } else { spread })
                            .collect()
                    })
                    .collect()
            }
            TrustTopology::Hub { hub_id, hub_weight } => {
                let hub = ids
                    .iter()
                    .position(|id| id == hub_id)
                    .ok_or_else(|| MatrixError::UnknownHub {
                        hub_id: hub_id.clone(),
                    })?;
                let leaned = hub_weight.clamp(0.0, 1.0);
                let base = if n == 0 { 0.0 } else { (1.0 - leaned) / n as f64 };
                (0..n)
                    .map(|_| {
                        let mut row = vec![base; n];
                        row[hub] += leaned;
                        row
                    })
                    .collect()
            }
        };
        Self::from_rows(ids, rows)
    }

    /// Certify structural invariants and rescale every row to sum to 1.
    ///
    /// Fails on a non-square shape, a negative or non-finite weight, or a
    /// row summing to zero. No partial rescale is observable on failure
    /// because errors are detected before any row is touched.
    pub fn validate_and_normalize(&mut self) -> Result<(), MatrixError> {
        let n = self.ids.len();
        if self.rows.len() != n {
            return Err(MatrixError::NotSquare {
                expected: n,
                found: self.rows.len(),
            });
        }
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != n {
                return Err(MatrixError::NotSquare {
                    expected: n,
                    found: row.len(),
                });
            }
            check_row(i, row)?;
        }
        for row in &mut self.rows {
            rescale(row);
        }
        Ok(())
    }

    /// Re-certify and rescale a single row after a targeted mutation.
    pub fn normalize_row(&mut self, row: usize) -> Result<(), MatrixError> {
        let entries = &mut self.rows[row];
        check_row(row, entries)?;
        rescale(entries);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn index_of(&self, stakeholder_id: &str) -> Option<usize> {
        self.index_by_id.get(stakeholder_id).copied()
    }

    pub fn id_at(&self, index: usize) -> &str {
        &self.ids[index]
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.rows[index]
    }

    pub fn weight(&self, source: usize, target: usize) -> f64 {
        self.rows[source][target]
    }

    pub(crate) fn set_weight(&mut self, source: usize, target: usize, weight: f64) {
        self.rows[source][target] = weight;
    }

    /// Sum of each column: how much attention flows into each stakeholder.
    pub fn incoming_weights(&self) -> Vec<f64> {
        let n = self.len();
        let mut totals = vec![0.0; n];
        for row in &self.rows {
            for (j, weight) in row.iter().enumerate() {
                totals[j] += weight;
            }
        }
        totals
    }
}

fn check_row(index: usize, row: &[f64]) -> Result<(), MatrixError> {
    let mut sum = 0.0;
    for (col, weight) in row.iter().enumerate() {
        if !weight.is_finite() {
            return Err(MatrixError::NonFiniteWeight { row: index, col });
        }
        if *weight < 0.0 {
            return Err(MatrixError::NegativeWeight {
                row: index,
                col,
                weight: *weight,
            });
        }
        sum += weight;
    }
    if sum <= 0.0 {
        return Err(MatrixError::ZeroSumRow { row: index });
    }
    Ok(())
}

fn rescale(row: &mut [f64]) {
    let sum: f64 = row.iter().sum();
    for weight in row.iter_mut() {
        *weight /= sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn from_rows_normalizes_each_row() {
        let matrix = TrustMatrix::from_rows(
            ids(&["a", "b"]),
            vec![vec![2.0, 2.0], vec![1.0, 3.0]],
        )
        .expect("valid matrix");
        assert_eq!(matrix.row(0), &[0.5, 0.5]);
        assert_eq!(matrix.row(1), &[0.25, 0.75]);
    }

    #[test]
    fn rejects_non_square() {
        let err = TrustMatrix::from_rows(ids(&["a", "b"]), vec![vec![1.0], vec![0.5, 0.5]])
            .expect_err("shape mismatch");
        assert!(matches!(
            err,
            MatrixError::NotSquare {
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn rejects_negative_and_non_finite_weights() {
        let err = TrustMatrix::from_rows(ids(&["a", "b"]), vec![vec![1.0, -0.1], vec![0.5, 0.5]])
            .expect_err("negative weight");
        assert!(matches!(err, MatrixError::NegativeWeight { row: 0, col: 1, .. }));

        let err = TrustMatrix::from_rows(
            ids(&["a", "b"]),
            vec![vec![1.0, f64::NAN], vec![0.5, 0.5]],
        )
        .expect_err("nan weight");
        assert!(matches!(err, MatrixError::NonFiniteWeight { row: 0, col: 1 }));
    }

    #[test]
    fn rejects_zero_sum_row() {
        let err = TrustMatrix::from_rows(ids(&["a", "b"]), vec![vec![0.0, 0.0], vec![0.5, 0.5]])
            .expect_err("zero row");
        assert!(matches!(err, MatrixError::ZeroSumRow { row: 0 }));
    }

    #[test]
    fn uniform_topology_spreads_evenly() {
        let matrix =
            TrustMatrix::from_topology(ids(&["a", "b", "c", "d"]), &TrustTopology::Uniform)
                .expect("uniform");
        for i in 0..4 {
            for j in 0..4 {
                assert!((matrix.weight(i, j) - 0.25).abs() < ROW_SUM_EPSILON);
            }
        }
    }

    #[test]
    fn self_anchored_topology_fixes_diagonal() {
        let matrix = TrustMatrix::from_topology(
            ids(&["a", "b", "c"]),
            &TrustTopology::SelfAnchored { self_weight: 0.6 },
        )
        .expect("self anchored");
        for i in 0..3 {
            assert!((matrix.weight(i, i) - 0.6).abs() < 1e-12);
        }
        assert!((matrix.weight(0, 1) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn hub_topology_requires_known_hub() {
        let err = TrustMatrix::from_topology(
            ids(&["a", "b"]),
            &TrustTopology::Hub {
                hub_id: "z".to_string(),
                hub_weight: 0.5,
            },
        )
        .expect_err("unknown hub");
        assert!(matches!(err, MatrixError::UnknownHub { .. }));
    }

    #[test]
    fn hub_topology_leans_every_row_on_the_hub() {
        let matrix = TrustMatrix::from_topology(
            ids(&["a", "b", "c"]),
            &TrustTopology::Hub {
                hub_id: "b".to_string(),
                hub_weight: 0.6,
            },
        )
        .expect("hub");
        for i in 0..3 {
            let sum: f64 = matrix.row(i).iter().sum();
            assert!((sum - 1.0).abs() < ROW_SUM_EPSILON);
            assert!(matrix.weight(i, 1) > matrix.weight(i, 0));
        }
    }

    #[test]
    fn normalize_row_touches_only_that_row() {
        let mut matrix = TrustMatrix::from_rows(
            ids(&["a", "b"]),
            vec![vec![0.5, 0.5], vec![0.25, 0.75]],
        )
        .expect("valid");
        let untouched = matrix.row(1).to_vec();
        matrix.set_weight(0, 1, 1.5);
        matrix.normalize_row(0).expect("renormalize");
        assert!((matrix.row(0).iter().sum::<f64>() - 1.0).abs() < ROW_SUM_EPSILON);
        assert_eq!(matrix.row(1), untouched.as_slice());
    }
}
