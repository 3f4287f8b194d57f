//! Dense kernels for the small systems the models solve
//!
//! Feature dimensions stay below a few dozen, so plain row-major
//! `Vec<Vec<f64>>` with Gauss-Jordan elimination is enough.

use crate::error::{MeridianError, Result};

pub type Matrix = Vec<Vec<f64>>;

pub fn identity(n: usize) -> Matrix {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect()
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn mat_vec(m: &Matrix, v: &[f64]) -> Vec<f64> {
    m.iter().map(|row| dot(row, v)).collect()
}

/// `x^T M x`
pub fn quadratic_form(m: &Matrix, x: &[f64]) -> f64 {
    dot(x, &mat_vec(m, x))
}

/// Invert a square matrix with partial pivoting.
pub fn invert(m: &Matrix) -> Result<Matrix> {
    let n = m.len();
    let mut a: Matrix = m.clone();
    let mut inv = identity(n);

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(MeridianError::DataQuality(
                "singular matrix in model fit".into(),
            ));
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);

        let p = a[col][col];
        for j in 0..n {
            a[col][j] /= p;
            inv[col][j] /= p;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[row][j] -= factor * a[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }
    Ok(inv)
}

/// Solve `m x = b`.
pub fn solve(m: &Matrix, b: &[f64]) -> Result<Vec<f64>> {
    Ok(mat_vec(&invert(m)?, b))
}
