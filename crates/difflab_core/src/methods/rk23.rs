//! Bogacki–Shampine 3(2) embedded pair.
//!
//! Low order, cheap per step; the embedded 2nd-order result drives the
//! error estimate and the FSAL stage carries over on acceptance.

use crate::error::EngineError;
use crate::traits::OdeSystem;

use super::{
    error_norm, initial_step, step_underflow, IntegrationReport, IntegratorOptions, Outcome,
    Trajectory,
};

const C2: f64 = 0.5;
const C3: f64 = 0.75;
const A21: f64 = 0.5;
const A32: f64 = 0.75;

// 3rd-order weights
const B1: f64 = 2.0 / 9.0;
const B2: f64 = 1.0 / 3.0;
const B3: f64 = 4.0 / 9.0;

// difference to the embedded 2nd-order weights [7/24, 1/4, 1/3, 1/8]
const E1: f64 = B1 - 7.0 / 24.0;
const E2: f64 = B2 - 1.0 / 4.0;
const E3: f64 = B3 - 1.0 / 3.0;
const E4: f64 = -1.0 / 8.0;

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
            y_tmp[i] = y[i] + h * A32 * k2[i];
        }
        f.eval(t + C3 * h, &y_tmp, &mut k3)
            .map_err(EngineError::rhs_failed)?;

        for i in 0..n {
            y_new[i] = y[i] + h * (B1 * k1[i] + B2 * k2[i] + B3 * k3[i]);
        }

        // FSAL stage
        f.eval(t + h, &y_new, &mut k4)
            .map_err(EngineError::rhs_failed)?;
        report.nfev += 3;

        for i in 0..n {
            err[i] = h * (E1 * k1[i] + E2 * k2[i] + E3 * k3[i] + E4 * k4[i]);
        }
        let err_norm = error_norm(&err, &y, &y_new, opts.rtol, opts.atol);

        if err_norm <= 1.0 {
            t += h;
            y.copy_from_slice(&y_new);
            k1.copy_from_slice(&k4);
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
            (0.9 * err_norm.powf(-1.0 / 3.0)).clamp(0.2, 5.0)
        };
        h = (h * factor).min(opts.h_max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use crate::methods::MAX_STEPS;

    struct Cosine;

    impl OdeSystem for Cosine {
        fn dimension(&self) -> usize {
            1
        }
        fn eval(&self, x: f64, _y: &[f64], dydx: &mut [f64]) -> Result<(), EvalError> {
            dydx[0] = x.cos();
            Ok(())
        }
    }

    #[test]
    fn integrates_quadrature_problem() {
        let opts = IntegratorOptions {
            rtol: 1e-6,
            atol: 1e-9,
            h_max: 10.0,
            max_steps: MAX_STEPS,
        };
        let mut traj = Trajectory::new();
        let mut report = IntegrationReport::default();
        let outcome =
            integrate_into(&Cosine, 0.0, 10.0, &[0.0], &opts, &mut traj, &mut report).unwrap();
        assert!(matches!(outcome, Outcome::Complete));
        let mut out = [0.0];
        traj.sample_into(10.0, &mut out);
        assert!((out[0] - 10.0f64.sin()).abs() < 1e-3);
    }
}
