//! Dense linear algebra for small regression problems
//!
//! ## Overview
//!
//! Every fit in this crate is a least-squares problem with a handful of
//! columns (3-4 for the power model, up to ~20 for the ANCOVA design with
//! scenario dummies) over at most a few thousand rows. At that size the
//! closed-form normal equations are the right tool:
//!
//! ```text
//! beta = (X'X + alpha*I)^-1 X'y
//! ```
//!
//! assembled in O(n*p^2) and solved in O(p^3) by Cholesky decomposition.
//! With `alpha > 0` the system is symmetric positive definite by
//! construction; for the `alpha = 0` path a partial-pivot Gaussian
//! elimination backstop handles the semi-definite corner and reports
//! [`FitError::Singular`] instead of returning garbage.
//!
//! ## Numerical notes
//!
//! - Rows containing non-finite entries must be masked *before* assembly;
//!   [`DesignMatrix::push_row`] debug-asserts finiteness.
//! - Cholesky fails (non-positive pivot) exactly when the regularized system
//!   is not PD - numerically singular input with `alpha = 0`. The Gaussian
//!   fallback then decides between a usable solution and `Singular`.

use crate::{FitError, FitResult};

/// Row-major dense design matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl DesignMatrix {
    /// Empty matrix with a fixed column count.
    pub fn new(cols: usize) -> Self {
        Self {
            rows: 0,
            cols,
            data: Vec::new(),
        }
    }

    /// Build from parallel columns of equal length.
    pub fn from_columns(columns: &[Vec<f64>]) -> FitResult<Self> {
        let cols = columns.len();
        if cols == 0 {
            return Err(FitError::NotEnoughRows { needed: 1, got: 0 });
        }
        let rows = columns[0].len();
        for c in columns {
            if c.len() != rows {
                return Err(FitError::DimensionMismatch {
                    left: rows,
                    right: c.len(),
                });
            }
        }
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in columns {
                data.push(c[r]);
            }
        }
        Ok(Self { rows, cols, data })
    }

    /// Append one row.
    pub fn push_row(&mut self, row: &[f64]) {
        debug_assert_eq!(row.len(), self.cols);
        debug_assert!(row.iter().all(|v| v.is_finite()), "non-finite design row");
        self.data.extend_from_slice(row);
        self.rows += 1;
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.cols
    }

    /// Element access.
    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.data[r * self.cols + c]
    }

    /// Predictions `X * beta`.
    pub fn matvec(&self, beta: &[f64]) -> FitResult<Vec<f64>> {
        if beta.len() != self.cols {
            return Err(FitError::DimensionMismatch {
                left: self.cols,
                right: beta.len(),
            });
        }
        let mut out = Vec::with_capacity(self.rows);
        for r in 0..self.rows {
            let mut acc = 0.0;
            for c in 0..self.cols {
                acc += self.get(r, c) * beta[c];
            }
            out.push(acc);
        }
        Ok(out)
    }

    /// Copy with each row scaled by a per-row weight.
    pub fn scale_rows(&self, weights: &[f64]) -> FitResult<Self> {
        if weights.len() != self.rows {
            return Err(FitError::DimensionMismatch {
                left: self.rows,
                right: weights.len(),
            });
        }
        let mut data = self.data.clone();
        for r in 0..self.rows {
            for c in 0..self.cols {
                data[r * self.cols + c] *= weights[r];
            }
        }
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }
}

/// Closed-form ridge regression `(X'X + alpha*I)^-1 X'y`.
///
/// `alpha = 0` gives ordinary least squares (with the singularity backstop).
pub fn ridge(x: &DesignMatrix, y: &[f64], alpha: f64) -> FitResult<Vec<f64>> {
    if y.len() != x.nrows() {
        return Err(FitError::DimensionMismatch {
            left: x.nrows(),
            right: y.len(),
        });
    }
    let p = x.ncols();
    if x.nrows() == 0 {
        return Err(FitError::NotEnoughRows { needed: 1, got: 0 });
    }
    if !alpha.is_finite() || alpha < 0.0 {
        return Err(FitError::NonFinite("alpha"));
    }

    // A = X'X + alpha*I (symmetric), b = X'y
    let mut a = vec![0.0; p * p];
    let mut b = vec![0.0; p];
    for r in 0..x.nrows() {
        for i in 0..p {
            let xi = x.get(r, i);
            b[i] += xi * y[r];
            for j in i..p {
                a[i * p + j] += xi * x.get(r, j);
            }
        }
    }
    for i in 0..p {
        a[i * p + i] += alpha;
        for j in 0..i {
            a[i * p + j] = a[j * p + i];
        }
    }

    match cholesky_solve(&a, &b, p) {
        Some(beta) => Ok(beta),
        None => gauss_solve(a, b, p),
    }
}

/// Least squares with a vanishing ridge, used to seed IRLS.
pub fn lstsq(x: &DesignMatrix, y: &[f64]) -> FitResult<Vec<f64>> {
    ridge(x, y, 1e-10)
}

/// Cholesky solve of a symmetric system; `None` when not positive definite.
fn cholesky_solve(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    // Factor A = L L'
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[i * n + i] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }

    // Forward substitution L z = b
    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[i * n + k] * z[k];
        }
        z[i] = sum / l[i * n + i];
    }

    // Back substitution L' beta = z
    let mut beta = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in i + 1..n {
            sum -= l[k * n + i] * beta[k];
        }
        beta[i] = sum / l[i * n + i];
    }
    Some(beta)
}

/// Partial-pivot Gaussian elimination backstop.
fn gauss_solve(mut a: Vec<f64>, mut b: Vec<f64>, n: usize) -> FitResult<Vec<f64>> {
    for col in 0..n {
        // Pivot selection
        let mut pivot = col;
        for r in col + 1..n {
            if a[r * n + col].abs() > a[pivot * n + col].abs() {
                pivot = r;
            }
        }
        if a[pivot * n + col].abs() < 1e-12 {
            return Err(FitError::Singular);
        }
        if pivot != col {
            for c in 0..n {
                a.swap(col * n + c, pivot * n + c);
            }
            b.swap(col, pivot);
        }

        let diag = a[col * n + col];
        for r in col + 1..n {
            let factor = a[r * n + col] / diag;
            if factor == 0.0 {
                continue;
            }
            for c in col..n {
                a[r * n + c] -= factor * a[col * n + c];
            }
            b[r] -= factor * b[col];
        }
    }

    let mut beta = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for k in i + 1..n {
            sum -= a[i * n + k] * beta[k];
        }
        beta[i] = sum / a[i * n + i];
    }
    if beta.iter().all(|v| v.is_finite()) {
        Ok(beta)
    } else {
        Err(FitError::Singular)
    }
}
