//! Dormand–Prince 5(4) embedded pair with FSAL.
//!
//! The 5th-order solution advances the integration (local extrapolation);
//! the embedded 4th-order result feeds the error estimate. The last stage
//! is the first of the next step, so an accepted step costs six fresh
//! evaluations.

use crate::error::EngineError;
use crate::traits::OdeSystem;

use super::{
    error_norm, initial_step, step_underflow, IntegrationReport, IntegratorOptions, Outcome,
    Trajectory,
};

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

// 5th-order weights (the advancing solution)
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// 4th-order embedded weights
const BE1: f64 = 5179.0 / 57600.0;
const BE3: f64 = 7571.0 / 16695.0;
const BE4: f64 = 393.0 / 640.0;
const BE5: f64 = -92097.0 / 339200.0;
const BE6: f64 = 187.0 / 2100.0;
const BE7: f64 = 1.0 / 40.0;

const E1: f64 = B1 - BE1;
const E3: f64 = B3 - BE3;
const E4: f64 = B4 - BE4;
const E5: f64 = B5 - BE5;
const E6: f64 = B6 - BE6;
const E7: f64 = -BE7;

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

    let mut k1 = vec![0.0; n];
    let mut k2 = vec![0.0; n];
    let mut k3 = vec![0.0; n];
    let mut k4 = vec![0.0; n];
    let mut k5 = vec![0.0; n];
    let mut k6 = vec![0.0; n];
    let mut k7 = vec![0.0; n];
    let mut y_tmp = vec![0.0; n];
    let mut y_new = vec![0.0; n];
    let mut err = vec![0.0; n];

    f.eval(t, &y, &mut k1).map_err(EngineError::rhs_failed)?;
    report.nfev += 1;
    if traj.is_empty() {
        traj.push(t, &y, &k1);
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

        for i in 0..n {
            y_tmp[i] = y[i] + h * A21 * k1[i];
        }
        f.eval(t + C2 * h, &y_tmp, &mut k2)
            .map_err(EngineError::rhs_failed)?;

        for i in 0..n {
            y_tmp[i] = y[i] + h * (A31 * k1[i] + A32 * k2[i]);
        }
        f.eval(t + C3 * h, &y_tmp, &mut k3)
            .map_err(EngineError::rhs_failed)?;

        for i in 0..n {
            y_tmp[i] = y[i] + h * (A41 * k1[i] + A42 * k2[i] + A43 * k3[i]);
        }
        f.eval(t + C4 * h, &y_tmp, &mut k4)
            .map_err(EngineError::rhs_failed)?;

        for i in 0..n {
            y_tmp[i] = y[i] + h * (A51 * k1[i] + A52 * k2[i] + A53 * k3[i] + A54 * k4[i]);
        }
        f.eval(t + C5 * h, &y_tmp, &mut k5)
            .map_err(EngineError::rhs_failed)?;

        for i in 0..n {
            y_tmp[i] =
                y[i] + h * (A61 * k1[i] + A62 * k2[i] + A63 * k3[i] + A64 * k4[i] + A65 * k5[i]);
        }
        f.eval(t + h, &y_tmp, &mut k6)
            .map_err(EngineError::rhs_failed)?;

        for i in 0..n {
            y_new[i] =
                y[i] + h * (B1 * k1[i] + B3 * k3[i] + B4 * k4[i] + B5 * k5[i] + B6 * k6[i]);
        }

        // FSAL stage
        f.eval(t + h, &y_new, &mut k7)
            .map_err(EngineError::rhs_failed)?;
        report.nfev += 6;

        for i in 0..n {
            err[i] = h
                * (E1 * k1[i] + E3 * k3[i] + E4 * k4[i] + E5 * k5[i] + E6 * k6[i] + E7 * k7[i]);
        }
        let err_norm = error_norm(&err, &y, &y_new, opts.rtol, opts.atol);

        if err_norm <= 1.0 {
            t += h;
            y.copy_from_slice(&y_new);
            k1.copy_from_slice(&k7);
            traj.push(t, &y, &k1);
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
            (0.9 * err_norm.powf(-0.2)).clamp(0.2, 5.0)
        };
        h = (h * factor).min(opts.h_max);
    }
}
