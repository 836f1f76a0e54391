//! Small dense least-squares kernel used by SARIMA fitting and the forecast
//! combiner's ridge regression. Problems here have at most a few dozen
//! columns, so normal equations with a Cholesky solve are adequate.

/// Result of an ordinary least-squares fit.
#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquares {
    pub coefficients: Vec<f64>,
    /// Residual sum of squares.
    pub rss: f64,
}

/// Solve `a * x = b` for symmetric positive-definite `a` (row-major, n×n).
///
/// Returns `None` when `a` is not numerically positive definite.
pub fn cholesky_solve(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return None;
    }

    let scale = (0..n).map(|i| a[i][i].abs()).fold(0.0_f64, f64::max).max(1.0);
    let tolerance = scale * 1e-12;

    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= tolerance || !sum.is_finite() {
                    return None;
                }
                l[i][i] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    // Forward substitution: L y = b
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[i][k] * y[k];
        }
        y[i] = sum / l[i][i];
    }

    // Back substitution: L^T x = y
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[k][i] * x[k];
        }
        x[i] = sum / l[i][i];
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Least squares `min ||X b - y||^2 + penalty * ||b||^2` over rows of `x`.
///
/// `penalty` of zero gives plain OLS. Penalised columns can be restricted by
/// passing `unpenalized` indices (e.g. an intercept column).
pub fn least_squares(
    x: &[Vec<f64>],
    y: &[f64],
    penalty: f64,
    unpenalized: &[usize],
) -> Option<LeastSquares> {
    let rows = x.len();
    if rows == 0 || rows != y.len() {
        return None;
    }
    let cols = x[0].len();
    if cols == 0 || x.iter().any(|r| r.len() != cols) {
        return None;
    }

    let mut xtx = vec![vec![0.0; cols]; cols];
    let mut xty = vec![0.0; cols];
    for (row, &target) in x.iter().zip(y) {
        for i in 0..cols {
            xty[i] += row[i] * target;
            for j in 0..=i {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..cols {
        for j in 0..i {
            xtx[j][i] = xtx[i][j];
        }
        if penalty > 0.0 && !unpenalized.contains(&i) {
            xtx[i][i] += penalty;
        }
    }

    let coefficients = cholesky_solve(&xtx, &xty)?;
    let rss = x
        .iter()
        .zip(y)
        .map(|(row, &target)| {
            let fitted: f64 = row.iter().zip(&coefficients).map(|(a, b)| a * b).sum();
            (target - fitted).powi(2)
        })
        .sum();

    Some(LeastSquares { coefficients, rss })
}

/// Arithmetic mean; `NaN` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance; `NaN` for an empty slice.
pub fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}
