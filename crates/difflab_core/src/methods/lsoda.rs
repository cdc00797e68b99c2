//! Automatic stiffness-switching driver.
//!
//! Starts on the explicit Dormand–Prince 5(4) core with a bounded step
//! budget. A stall there (the step controller grinding the explicit
//! method down before the interval is covered) is read as stiffness, and
//! integration resumes from the stall point with the BDF core on the
//! same trajectory. A second stall is a genuine failure.

use crate::error::EngineError;
use crate::traits::OdeSystem;

use super::{bdf, rk45, IntegrationReport, IntegratorOptions, Outcome, Trajectory};

/// Explicit-phase step budget before stiffness is assumed.
const EXPLICIT_BUDGET: usize = 5_000;

pub(crate) fn integrate_into<F: OdeSystem + ?Sized>(
    f: &F,
    x0: f64,
    xend: f64,
    y0: &[f64],
    opts: &IntegratorOptions,
    traj: &mut Trajectory,
    report: &mut IntegrationReport,
) -> Result<Outcome, EngineError> {
    let explicit_opts = IntegratorOptions {
        max_steps: opts.max_steps.min(EXPLICIT_BUDGET),
        ..*opts
    };
    match rk45::integrate_into(f, x0, xend, y0, &explicit_opts, traj, report)? {
        Outcome::Complete => Ok(Outcome::Complete),
        Outcome::Stalled(reason) => {
            let t = traj.last_t();
            log::debug!("explicit phase stalled at x = {t} ({reason}); switching to BDF");
            let y = traj.last_y().to_vec();
            bdf::integrate_into(f, t, xend, &y, opts, traj, report)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use crate::methods::MAX_STEPS;

    struct VeryStiff;

    impl OdeSystem for VeryStiff {
        fn dimension(&self) -> usize {
            1
        }
        fn eval(&self, _x: f64, y: &[f64], dydx: &mut [f64]) -> Result<(), EvalError> {
            dydx[0] = -2000.0 * y[0];
            Ok(())
        }
    }

    struct Gentle;

    impl OdeSystem for Gentle {
        fn dimension(&self) -> usize {
            1
        }
        fn eval(&self, _x: f64, y: &[f64], dydx: &mut [f64]) -> Result<(), EvalError> {
            dydx[0] = -y[0];
            Ok(())
        }
    }

    fn opts() -> IntegratorOptions {
        IntegratorOptions {
            rtol: 1e-6,
            atol: 1e-9,
            h_max: 10.0,
            max_steps: MAX_STEPS,
        }
    }

    #[test]
    fn nonstiff_problem_stays_explicit() {
        let mut traj = Trajectory::new();
        let mut report = IntegrationReport::default();
        let outcome =
            integrate_into(&Gentle, 0.0, 5.0, &[1.0], &opts(), &mut traj, &mut report).unwrap();
        assert!(matches!(outcome, Outcome::Complete));
        assert_eq!(report.njev, 0);
        let mut out = [0.0];
        traj.sample_into(5.0, &mut out);
        assert!((out[0] - (-5.0f64).exp()).abs() < 1e-5);
    }

    #[test]
    fn stiff_problem_completes_after_switch() {
        let mut traj = Trajectory::new();
        let mut report = IntegrationReport::default();
        let outcome =
            integrate_into(&VeryStiff, 0.0, 50.0, &[1.0], &opts(), &mut traj, &mut report)
                .unwrap();
        assert!(matches!(outcome, Outcome::Complete));
        let mut out = [0.0];
        traj.sample_into(50.0, &mut out);
        // the exact solution is numerically zero by mid-interval
        assert!(out[0].abs() < 1e-6);
    }
}
