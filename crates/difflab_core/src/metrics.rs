//! Residual-based solution-quality diagnostics.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::traits::OdeSystem;

/// Residual statistics: pointwise Euclidean norm across state
/// components, summarized over the sample grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualStats {
    pub max: f64,
    pub mean: f64,
    pub rms: f64,
}

/// Measures how well a sampled solution satisfies `dy/dx = f(x, y)`.
///
/// The solution is differentiated numerically on its actual (possibly
/// non-uniform) sample spacing (second-order interior weights, one-sided
/// edges) and compared pointwise against the right-hand side. Large
/// residuals flag coarse tolerances or an under-resolved problem; this is
/// a diagnostic only and never gates a solve.
pub fn compute_residual<F: OdeSystem + ?Sized>(
    f: &F,
    x: &[f64],
    y: &[Vec<f64>],
) -> Result<ResidualStats, EngineError> {
    let n_vars = y.len();
    let n_points = x.len();
    if n_points < 2 {
        return Ok(ResidualStats {
            max: 0.0,
            mean: 0.0,
            rms: 0.0,
        });
    }

    // numerical derivative per variable
    let mut dydx = vec![vec![0.0; n_points]; n_vars];
    for (row, drow) in y.iter().zip(dydx.iter_mut()) {
        drow[0] = (row[1] - row[0]) / (x[1] - x[0]);
        drow[n_points - 1] =
            (row[n_points - 1] - row[n_points - 2]) / (x[n_points - 1] - x[n_points - 2]);
        for i in 1..n_points - 1 {
            let hs = x[i] - x[i - 1];
            let hd = x[i + 1] - x[i];
            drow[i] = (hs * hs * row[i + 1] + (hd * hd - hs * hs) * row[i]
                - hd * hd * row[i - 1])
                / (hs * hd * (hs + hd));
        }
    }

    let mut state = vec![0.0; n_vars];
    let mut rhs = vec![0.0; n_vars];
    let mut residuals = Vec::with_capacity(n_points);
    for i in 0..n_points {
        for (k, row) in y.iter().enumerate() {
            state[k] = row[i];
        }
        f.eval(x[i], &state, &mut rhs)
            .map_err(EngineError::rhs_failed)?;
        let norm: f64 = (0..n_vars)
            .map(|k| {
                let d = rhs[k] - dydx[k][i];
                d * d
            })
            .sum::<f64>()
            .sqrt();
        residuals.push(norm);
    }

    let max = residuals.iter().cloned().fold(0.0, f64::max);
    let mean = residuals.iter().sum::<f64>() / n_points as f64;
    let rms = (residuals.iter().map(|r| r * r).sum::<f64>() / n_points as f64).sqrt();
    Ok(ResidualStats { max, mean, rms })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;

    struct Constant;

    impl OdeSystem for Constant {
        fn dimension(&self) -> usize {
            1
        }
        fn eval(&self, _x: f64, _y: &[f64], dydx: &mut [f64]) -> Result<(), EvalError> {
            dydx[0] = 2.0;
            Ok(())
        }
    }

    #[test]
    fn exact_linear_solution_has_zero_residual() {
        // y = 2x sampled non-uniformly satisfies y' = 2 exactly
        let x = vec![0.0, 0.1, 0.35, 0.9, 1.0];
        let y = vec![x.iter().map(|v| 2.0 * v).collect::<Vec<f64>>()];
        let stats = compute_residual(&Constant, &x, &y).unwrap();
        assert!(stats.max < 1e-12);
        assert!(stats.mean < 1e-12);
        assert!(stats.rms < 1e-12);
    }

    #[test]
    fn mismatched_solution_reports_positive_residual() {
        // y = x^2 does not satisfy y' = 2 away from x = 1
        let x: Vec<f64> = (0..11).map(|i| i as f64 * 0.1).collect();
        let y = vec![x.iter().map(|v| v * v).collect::<Vec<f64>>()];
        let stats = compute_residual(&Constant, &x, &y).unwrap();
        assert!(stats.max > 1.0);
        assert!(stats.rms > 0.5);
        assert!(stats.mean <= stats.max);
        assert!(stats.rms >= stats.mean * 0.5);
    }

    #[test]
    fn single_point_solution_is_trivially_consistent() {
        let stats = compute_residual(&Constant, &[0.0], &[vec![1.0]]).unwrap();
        assert_eq!(stats.max, 0.0);
    }
}
