//! Adaptive integrators behind [`crate::ode`].
//!
//! One module per method, all sharing the option set, the weighted RMS
//! error norm, and the accepted-step [`Trajectory`] with cubic-Hermite
//! sampling. Every integrator appends to a caller-owned trajectory and
//! reports completion or a stall (step budget exhausted, step size
//! underflow); stalls become [`crate::error::EngineError::SolverFailed`]
//! at the dispatch layer, except inside LSODA where an explicit-phase
//! stall triggers the hand-off to BDF.

pub(crate) mod bdf;
pub(crate) mod dop853;
pub(crate) mod lsoda;
pub(crate) mod radau;
pub(crate) mod rk23;
pub(crate) mod rk45;

use nalgebra::DMatrix;

use crate::error::EngineError;
use crate::ode::Method;
use crate::traits::OdeSystem;

/// Hard ceiling on accepted-plus-rejected steps per integration.
pub(crate) const MAX_STEPS: usize = 100_000;

/// Simplified-Newton iteration budget and scaled-update tolerance used by
/// the implicit methods.
pub(crate) const NEWTON_MAX_ITER: usize = 10;
pub(crate) const NEWTON_TOL: f64 = 1e-2;

#[derive(Debug, Clone, Copy)]
pub(crate) struct IntegratorOptions {
    pub rtol: f64,
    pub atol: f64,
    pub h_max: f64,
    pub max_steps: usize,
}

/// How an integrator call ended: the full interval was covered, or the
/// method ran out of budget at the trajectory's last point.
pub(crate) enum Outcome {
    Complete,
    Stalled(String),
}

/// Work counters surfaced on the solution for quality reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrationReport {
    pub nfev: usize,
    pub njev: usize,
    pub naccept: usize,
    pub nreject: usize,
}

/// Accepted integration steps: abscissae, states, and derivatives.
///
/// Derivatives make each segment a cubic Hermite interpolant, which is
/// what both output-grid sampling and shooting-condition interpolation
/// evaluate.
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    t: Vec<f64>,
    y: Vec<Vec<f64>>,
    dy: Vec<Vec<f64>>,
}

impl Trajectory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub(crate) fn push(&mut self, t: f64, y: &[f64], dy: &[f64]) {
        self.t.push(t);
        self.y.push(y.to_vec());
        self.dy.push(dy.to_vec());
    }

    pub(crate) fn last_t(&self) -> f64 {
        *self.t.last().expect("trajectory holds at least one point")
    }

    pub(crate) fn last_y(&self) -> &[f64] {
        self.y.last().expect("trajectory holds at least one point")
    }

    /// Cubic-Hermite interpolation at `x`, clamped to the covered range.
    pub fn sample_into(&self, x: f64, out: &mut [f64]) {
        let n = self.t.len();
        if n == 1 {
            out.copy_from_slice(&self.y[0]);
            return;
        }
        let j = self.t.partition_point(|ti| *ti <= x);
        let i = j.saturating_sub(1).min(n - 2);
        let h = self.t[i + 1] - self.t[i];
        let theta = ((x - self.t[i]) / h).clamp(0.0, 1.0);
        let t2 = theta * theta;
        let t3 = t2 * theta;
        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + theta;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;
        for k in 0..out.len() {
            out[k] = h00 * self.y[i][k]
                + h10 * h * self.dy[i][k]
                + h01 * self.y[i + 1][k]
                + h11 * h * self.dy[i + 1][k];
        }
    }

    /// Samples every grid point; rows are state components.
    pub fn sample_grid(&self, xs: &[f64]) -> Vec<Vec<f64>> {
        let dim = self.y.first().map_or(0, Vec::len);
        let mut rows = vec![vec![0.0; xs.len()]; dim];
        let mut buf = vec![0.0; dim];
        for (j, &x) in xs.iter().enumerate() {
            self.sample_into(x, &mut buf);
            for (k, row) in rows.iter_mut().enumerate() {
                row[j] = buf[k];
            }
        }
        rows
    }
}

/// Weighted RMS norm of a local error estimate, per Hairer: each
/// component is scaled by `atol + rtol·max(|y_old|, |y_new|)`; a step is
/// acceptable when the norm is at most one.
pub(crate) fn error_norm(
    err: &[f64],
    y_old: &[f64],
    y_new: &[f64],
    rtol: f64,
    atol: f64,
) -> f64 {
    let n = err.len();
    let mut acc = 0.0;
    for i in 0..n {
        let scale = atol + rtol * y_old[i].abs().max(y_new[i].abs());
        let r = err[i] / scale;
        acc += r * r;
    }
    (acc / n as f64).sqrt()
}

pub(crate) fn initial_step(span: f64, h_max: f64) -> f64 {
    (span.abs() * 1e-3).min(h_max)
}

pub(crate) fn step_underflow(h: f64, span: f64) -> bool {
    h.abs() < 1e-14 * span.abs().max(1.0)
}

/// Forward-difference Jacobian `∂f/∂y`, used by the implicit methods.
pub(crate) fn numeric_jacobian<F: OdeSystem + ?Sized>(
    f: &F,
    x: f64,
    y: &[f64],
    f0: &[f64],
    report: &mut IntegrationReport,
) -> Result<DMatrix<f64>, EngineError> {
    let n = y.len();
    let mut jac = DMatrix::zeros(n, n);
    let mut yp = y.to_vec();
    let mut fp = vec![0.0; n];
    let eps = f64::EPSILON.sqrt();
    for j in 0..n {
        let orig = yp[j];
        let step = eps * (1.0 + orig.abs());
        yp[j] = orig + step;
        f.eval(x, &yp, &mut fp).map_err(EngineError::rhs_failed)?;
        report.nfev += 1;
        yp[j] = orig;
        for i in 0..n {
            jac[(i, j)] = (fp[i] - f0[i]) / step;
        }
    }
    report.njev += 1;
    Ok(jac)
}

/// Runs `method` over `[x0, xend]` and returns the dense trajectory plus
/// work counters, mapping a stall to `SolverFailed`.
pub(crate) fn run<F: OdeSystem + ?Sized>(
    method: Method,
    f: &F,
    x0: f64,
    xend: f64,
    y0: &[f64],
    opts: &IntegratorOptions,
) -> Result<(Trajectory, IntegrationReport), EngineError> {
    let mut traj = Trajectory::new();
    let mut report = IntegrationReport::default();
    let outcome = match method {
        Method::Rk45 => rk45::integrate_into(f, x0, xend, y0, opts, &mut traj, &mut report)?,
        Method::Rk23 => rk23::integrate_into(f, x0, xend, y0, opts, &mut traj, &mut report)?,
        Method::Dop853 => dop853::integrate_into(f, x0, xend, y0, opts, &mut traj, &mut report)?,
        Method::Radau => radau::integrate_into(f, x0, xend, y0, opts, &mut traj, &mut report)?,
        Method::Bdf => bdf::integrate_into(f, x0, xend, y0, opts, &mut traj, &mut report)?,
        Method::Lsoda => lsoda::integrate_into(f, x0, xend, y0, opts, &mut traj, &mut report)?,
    };
    match outcome {
        Outcome::Complete => Ok((traj, report)),
        Outcome::Stalled(reason) => Err(EngineError::SolverFailed(format!(
            "{} did not reach the end of the interval: {reason}",
            method.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trajectory_samples_linear_data_exactly() {
        let mut traj = Trajectory::new();
        // y = 2t with derivative 2 everywhere
        traj.push(0.0, &[0.0], &[2.0]);
        traj.push(1.0, &[2.0], &[2.0]);
        traj.push(3.0, &[6.0], &[2.0]);
        let mut out = [0.0];
        for (x, want) in [(0.0, 0.0), (0.5, 1.0), (1.0, 2.0), (2.0, 4.0), (3.0, 6.0)] {
            traj.sample_into(x, &mut out);
            assert!((out[0] - want).abs() < 1e-12, "x={x}");
        }
        // clamped outside the range
        traj.sample_into(5.0, &mut out);
        assert!((out[0] - 6.0).abs() < 1e-12);
    }

    #[test]
    fn trajectory_hermite_matches_cubic() {
        // y = t^3: derivatives 3t^2; one segment [1, 2] reproduces the
        // cubic exactly
        let mut traj = Trajectory::new();
        traj.push(1.0, &[1.0], &[3.0]);
        traj.push(2.0, &[8.0], &[12.0]);
        let mut out = [0.0];
        traj.sample_into(1.5, &mut out);
        assert!((out[0] - 1.5f64.powi(3)).abs() < 1e-12);
    }

    #[test]
    fn error_norm_scales_with_tolerance() {
        let err = [1e-6, 0.0];
        let y = [1.0, 1.0];
        let tight = error_norm(&err, &y, &y, 1e-8, 1e-10);
        let loose = error_norm(&err, &y, &y, 1e-3, 1e-6);
        assert!(tight > 1.0);
        assert!(loose < 1.0);
    }
}
