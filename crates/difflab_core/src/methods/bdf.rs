//! Variable-step BDF for stiff problems.
//!
//! Backward Euler starts the history, then the two-step BDF2 formula with
//! step-ratio-dependent coefficients takes over. Each step solves its
//! implicit equation by Newton iteration against a freshly factored
//! `I − βhJ`, seeded with the extrapolation predictor; the
//! predictor-corrector difference doubles as the error estimate.

use nalgebra::{DMatrix, DVector};

use crate::error::EngineError;
use crate::traits::OdeSystem;

use super::{
    error_norm, initial_step, numeric_jacobian, step_underflow, IntegrationReport,
    IntegratorOptions, Outcome, Trajectory, NEWTON_MAX_ITER, NEWTON_TOL,
};

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
    let mut f_new = vec![0.0; n];
    let mut y_pred = vec![0.0; n];
    let mut y_new = vec![0.0; n];
    let mut rhs_const = vec![0.0; n];
    let mut err = vec![0.0; n];

    f.eval(t, &y, &mut f0).map_err(EngineError::rhs_failed)?;
    report.nfev += 1;
    if traj.is_empty() {
        traj.push(t, &y, &f0);
    }

    // previous accepted point: step size that led to `y` and the state before it
    let mut prev: Option<(f64, Vec<f64>)> = None;
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

        // coefficients of y_new = rhs_const + beta*h*f(t+h, y_new)
        let (beta, err_weight, order_exp) = match &prev {
            None => {
                rhs_const.copy_from_slice(&y);
                for i in 0..n {
                    y_pred[i] = y[i] + h * f0[i];
                }
                (1.0, 0.5, -0.5)
            }
            Some((h_last, y_prev)) => {
                let rho = h / h_last;
                let a1 = (1.0 + rho) * (1.0 + rho) / (1.0 + 2.0 * rho);
                let a2 = -rho * rho / (1.0 + 2.0 * rho);
                let beta = (1.0 + rho) / (1.0 + 2.0 * rho);
                for i in 0..n {
                    rhs_const[i] = a1 * y[i] + a2 * y_prev[i];
                    y_pred[i] = y[i] + rho * (y[i] - y_prev[i]);
                }
                (beta, 1.0 / 3.0, -1.0 / 3.0)
            }
        };

        let jac = numeric_jacobian(f, t, &y, &f0, report)?;
        let mut m = DMatrix::<f64>::identity(n, n);
        for i in 0..n {
            for j in 0..n {
                m[(i, j)] -= beta * h * jac[(i, j)];
            }
        }
        let lu = m.lu();

        y_new.copy_from_slice(&y_pred);
        let mut converged = false;
        for _ in 0..NEWTON_MAX_ITER {
            f.eval(t + h, &y_new, &mut f_new)
                .map_err(EngineError::rhs_failed)?;
            report.nfev += 1;
            let mut residual = DVector::<f64>::zeros(n);
            for i in 0..n {
                residual[i] = rhs_const[i] + beta * h * f_new[i] - y_new[i];
            }
            let delta = match lu.solve(&residual) {
                Some(d) => d,
                None => break,
            };
            let mut cnorm = 0.0;
            for i in 0..n {
                y_new[i] += delta[i];
                let scale = opts.atol + opts.rtol * y[i].abs();
                let r = delta[i] / scale;
                cnorm += r * r;
            }
            cnorm = (cnorm / n as f64).sqrt();
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
            err[i] = err_weight * (y_new[i] - y_pred[i]);
        }
        let err_norm = error_norm(&err, &y, &y_new, opts.rtol, opts.atol);

        if err_norm <= 1.0 {
            prev = Some((h, y.clone()));
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
            (0.9 * err_norm.powf(order_exp)).clamp(0.2, 5.0)
        };
        h = (h * factor).min(opts.h_max);
    }
}
