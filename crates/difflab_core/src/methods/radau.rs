//! Radau IIA implicit Runge–Kutta method for stiff problems.
//!
//! Two stages (order 3), stiffly accurate, L-stable. Both stage
//! derivatives are solved together by a simplified Newton iteration on
//! the stacked 2n system; the iteration matrix `I − h(A⊗J)` is built and
//! factored once per attempted step and reused across the iterations.
//! The embedded trapezoidal result supplies the error estimate.

use nalgebra::{DMatrix, DVector};

use crate::error::EngineError;
use crate::traits::OdeSystem;

use super::{
    error_norm, initial_step, numeric_jacobian, step_underflow, IntegrationReport,
    IntegratorOptions, Outcome, Trajectory, NEWTON_MAX_ITER, NEWTON_TOL,
};

const C: [f64; 2] = [1.0 / 3.0, 1.0];
const A: [[f64; 2]; 2] = [[5.0 / 12.0, -1.0 / 12.0], [3.0 / 4.0, 1.0 / 4.0]];
// stiffly accurate: b equals the last row of A; the embedded weights are
// the trapezoidal rule (order 2)
const B: [f64; 2] = [3.0 / 4.0, 1.0 / 4.0];
const BH: [f64; 2] = [1.0 / 2.0, 1.0 / 2.0];

pub(crate) fn integrate_into<F: OdeSystem + ?Sized>(
    f: &F,
    x0: f64,
    xend: f64,
    y0: &[f64],
    opts: &IntegratorOptions,
    traj: &mut Trajectory,
    report: &mut IntegrationReport,
) -> Result<Outcome, EngineError> {
    let n = y0.len();
    let span = xend - x0;
    let mut t = x0;
    let mut y = y0.to_vec();

    let mut f0 = vec![0.0; n];
    let mut stage = vec![0.0; n];
    let mut f1 = vec![0.0; n];
    let mut f2 = vec![0.0; n];
    let mut y_new = vec![0.0; n];
    let mut err = vec![0.0; n];

    f.eval(t, &y, &mut f0).map_err(EngineError::rhs_failed)?;
    report.nfev += 1;
    if traj.is_empty() {
        traj.push(t, &y, &f0);
    }

    let mut h = initial_step(span, opts.h_max);
    let mut nstep = 0;

    loop {
        if nstep >= opts.max_steps {
            return Ok(Outcome::Stalled("maximum number of steps reached".into()));
        }
        if step_underflow(h, span) {
            return Ok(Outcome::Stalled("step size underflow".into()));
        }
        nstep += 1;
        h = h.min(xend - t);

        let jac = numeric_jacobian(f, t, &y, &f0, report)?;
        let mut m = DMatrix::<f64>::identity(2 * n, 2 * n);
        for bi in 0..2 {
            for bj in 0..2 {
                let w = h * A[bi][bj];
                for i in 0..n {
                    for j in 0..n {
                        m[(bi * n + i, bj * n + j)] -= w * jac[(i, j)];
                    }
                }
            }
        }
        let lu = m.lu();

        // Newton on the stacked stage derivatives, seeded with f(t, y)
        let mut k1 = f0.clone();
        let mut k2 = f0.clone();
        let mut converged = false;
        for _ in 0..NEWTON_MAX_ITER {
            for i in 0..n {
                stage[i] = y[i] + h * (A[0][0] * k1[i] + A[0][1] * k2[i]);
            }
            f.eval(t + C[0] * h, &stage, &mut f1)
                .map_err(EngineError::rhs_failed)?;
            for i in 0..n {
                stage[i] = y[i] + h * (A[1][0] * k1[i] + A[1][1] * k2[i]);
            }
            f.eval(t + C[1] * h, &stage, &mut f2)
                .map_err(EngineError::rhs_failed)?;
            report.nfev += 2;

            let mut rhs = DVector::<f64>::zeros(2 * n);
            for i in 0..n {
                rhs[i] = f1[i] - k1[i];
                rhs[n + i] = f2[i] - k2[i];
            }
            let delta = match lu.solve(&rhs) {
                Some(d) => d,
                None => break,
            };
            let mut cnorm = 0.0;
            for i in 0..n {
                let scale = opts.atol + opts.rtol * y[i].abs();
                k1[i] += delta[i];
                k2[i] += delta[n + i];
                let r1 = delta[i] / scale;
                let r2 = delta[n + i] / scale;
                cnorm += r1 * r1 + r2 * r2;
            }
            cnorm = (cnorm / (2.0 * n as f64)).sqrt();
            if cnorm < NEWTON_TOL {
                converged = true;
                break;
            }
        }

        if !converged {
            report.nreject += 1;
            h *= 0.5;
            continue;
        }

        for i in 0..n {
            y_new[i] = y[i] + h * (B[0] * k1[i] + B[1] * k2[i]);
            err[i] = h * ((B[0] - BH[0]) * k1[i] + (B[1] - BH[1]) * k2[i]);
        }
        let err_norm = error_norm(&err, &y, &y_new, opts.rtol, opts.atol);

        if err_norm <= 1.0 {
            t += h;
            y.copy_from_slice(&y_new);
            f.eval(t, &y, &mut f0).map_err(EngineError::rhs_failed)?;
            report.nfev += 1;
            traj.push(t, &y, &f0);
            report.naccept += 1;
            if (xend - t).abs() <= 1e-14 * span.abs().max(1.0) {
                return Ok(Outcome::Complete);
            }
        } else {
            report.nreject += 1;
        }

        let factor = if err_norm == 0.0 {
            5.0
        } else {
            (0.9 * err_norm.powf(-1.0 / 3.0)).clamp(0.2, 5.0)
        };
        h = (h * factor).min(opts.h_max);
    }
}
