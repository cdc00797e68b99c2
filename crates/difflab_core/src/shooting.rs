//! Shooting method for conditions anchored at multiple points of the
//! independent variable.
//!
//! The unknown entries of `y(x_min)` are driven by a damped Newton
//! iteration on a residual that integrates the system once per trial and
//! measures the mismatch at every condition location. Residual and
//! root-finder are separate pieces: the residual closes over a fixed
//! integrator configuration, the Newton loop sees only a function from
//! trial vectors to mismatch vectors.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::config::SolverDefaults;
use crate::error::EngineError;
use crate::methods::{self, IntegratorOptions, MAX_STEPS};
use crate::ode::{solve_ode, OdeSolution, SolveOptions};
use crate::traits::OdeSystem;

/// One condition: state `component` must equal `target` at `x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub component: usize,
    pub x: f64,
    pub target: f64,
}

/// Knobs of the damped Newton iteration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            damping: 1.0,
            tolerance: 1e-9,
        }
    }
}

fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Drives `residual` to zero from `guess` by damped Newton with a
/// forward-difference Jacobian. Returns the root and the iteration count.
pub(crate) fn newton_root<R>(
    mut residual: R,
    guess: &[f64],
    settings: &NewtonSettings,
) -> Result<(Vec<f64>, usize), EngineError>
where
    R: FnMut(&[f64]) -> Result<Vec<f64>, EngineError>,
{
    let dim = guess.len();
    let mut state = guess.to_vec();
    let mut r = residual(&state)?;
    if r.len() != dim {
        return Err(EngineError::Config(format!(
            "residual returned {} values for {dim} unknowns",
            r.len()
        )));
    }
    let mut norm = l2_norm(&r);
    let mut iterations = 0;

    loop {
        if norm <= settings.tolerance {
            break;
        }
        if iterations >= settings.max_steps {
            return Err(EngineError::SolverFailed(format!(
                "shooting did not converge in {} iterations (residual norm {norm:.3e})",
                settings.max_steps
            )));
        }

        let mut jac = DMatrix::<f64>::zeros(dim, dim);
        let eps = f64::EPSILON.sqrt();
        for j in 0..dim {
            let step = eps * (1.0 + state[j].abs());
            let mut perturbed = state.clone();
            perturbed[j] += step;
            let rp = residual(&perturbed)?;
            for i in 0..dim {
                jac[(i, j)] = (rp[i] - r[i]) / step;
            }
        }

        let delta = jac
            .lu()
            .solve(&DVector::from_column_slice(&r))
            .ok_or_else(|| {
                EngineError::SolverFailed("shooting Jacobian is singular".into())
            })?;
        for i in 0..dim {
            state[i] -= settings.damping * delta[i];
        }

        iterations += 1;
        r = residual(&state)?;
        norm = l2_norm(&r);
    }

    Ok((state, iterations))
}

/// Solves a problem whose conditions may be anchored anywhere on (or
/// beyond) the domain.
///
/// When every condition sits at `x_min` the initial state is assembled
/// directly and this reduces to [`solve_ode`] with no root-finding.
/// Otherwise each Newton trial integrates over the union of the domain
/// and the farthest condition location, interpolating the dense
/// trajectory at each condition point; the converged initial state is
/// then integrated once more at the requested output resolution.
pub fn solve_multipoint<F: OdeSystem + ?Sized>(
    f: &F,
    conditions: &[Condition],
    domain: (f64, f64),
    options: &SolveOptions,
    defaults: &SolverDefaults,
) -> Result<OdeSolution, EngineError> {
    let order = f.dimension();
    let (x_min, x_max) = domain;

    if conditions.len() != order {
        return Err(EngineError::Config(format!(
            "a system of order {order} needs exactly {order} conditions, got {}",
            conditions.len()
        )));
    }
    if let Some(c) = conditions.iter().find(|c| c.component >= order) {
        return Err(EngineError::Config(format!(
            "condition component {} out of range for order {order}",
            c.component
        )));
    }

    let span = x_max - x_min;
    let anchor_tol = 1e-12 * span.abs().max(1.0);

    if conditions
        .iter()
        .all(|c| (c.x - x_min).abs() <= anchor_tol)
    {
        log::debug!("all conditions anchored at x_min; assembling the initial state directly");
        let mut y0 = vec![0.0; order];
        for c in conditions {
            y0[c.component] = c.target;
        }
        return solve_ode(f, domain, &y0, options, defaults);
    }

    let x_reach = conditions.iter().map(|c| c.x).fold(x_max, f64::max);
    let method = options.method.unwrap_or(defaults.method);
    let rtol = options.rtol.unwrap_or(defaults.rtol);
    let atol = options.atol.unwrap_or(defaults.atol);
    let max_step = options.max_step.unwrap_or(defaults.max_step);
    let reach_span = x_reach - x_min;
    let int_opts = IntegratorOptions {
        rtol,
        atol,
        h_max: if max_step <= 0.0 {
            reach_span
        } else {
            max_step.min(reach_span)
        },
        max_steps: MAX_STEPS,
    };

    let mut nfev = 0usize;
    let mut njev = 0usize;
    let mut buf = vec![0.0; order];
    let residual = |trial: &[f64]| -> Result<Vec<f64>, EngineError> {
        let (traj, report) = methods::run(method, f, x_min, x_reach, trial, &int_opts)?;
        nfev += report.nfev;
        njev += report.njev;
        let mut mismatch = Vec::with_capacity(conditions.len());
        for c in conditions {
            traj.sample_into(c.x, &mut buf);
            mismatch.push(buf[c.component] - c.target);
        }
        Ok(mismatch)
    };

    // seed unknowns with whatever conditions already pin down at x_min
    let mut guess = vec![0.0; order];
    for c in conditions {
        if (c.x - x_min).abs() <= anchor_tol {
            guess[c.component] = c.target;
        }
    }

    let (y0, iterations) = newton_root(residual, &guess, &NewtonSettings::default())?;
    log::info!("shooting converged in {iterations} iterations");

    let mut solution = solve_ode(f, domain, &y0, options, defaults)?;
    solution.nfev += nfev;
    solution.njev += njev;
    solution.message = format!(
        "shooting converged in {iterations} iterations; {}",
        solution.message
    );
    Ok(solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EquationRegistry;
    use crate::resolver::{resolve_ode, EquationSource};
    use std::collections::HashMap;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

    fn oscillator() -> crate::resolver::ResolvedOde {
        resolve_ode(
            &EquationSource::Expression("-y[0]".into()),
            2,
            &HashMap::new(),
            &EquationRegistry::new(),
        )
        .unwrap()
    }

    #[test]
    fn newton_root_solves_quadratic_system() {
        // x^2 - 4 = 0, y - 1 = 0
        let residual = |v: &[f64]| Ok(vec![v[0] * v[0] - 4.0, v[1] - 1.0]);
        let (root, iterations) =
            newton_root(residual, &[3.0, 0.0], &NewtonSettings::default()).unwrap();
        assert!((root[0] - 2.0).abs() < 1e-8);
        assert!((root[1] - 1.0).abs() < 1e-8);
        assert!(iterations > 0);
    }

    #[test]
    fn newton_root_reports_nonconvergence() {
        // no real root, Newton oscillates
        let residual = |v: &[f64]| Ok(vec![v[0] * v[0] + 1.0]);
        let err = newton_root(residual, &[1.0], &NewtonSettings::default()).unwrap_err();
        assert!(matches!(err, EngineError::SolverFailed(_)));
    }

    #[test]
    fn boundary_conditions_recover_cosine() {
        let f = oscillator();
        let conditions = [
            Condition {
                component: 0,
                x: 0.0,
                target: 1.0,
            },
            Condition {
                component: 0,
                x: FRAC_PI_2,
                target: 0.0,
            },
        ];
        let options = SolveOptions {
            num_points: Some(101),
            ..Default::default()
        };
        let sol = solve_multipoint(
            &f,
            &conditions,
            (0.0, FRAC_PI_2),
            &options,
            &SolverDefaults::default(),
        )
        .unwrap();

        assert!((sol.component(0)[0] - 1.0).abs() < 1e-6);
        let end = *sol.component(0).last().unwrap();
        assert!(end.abs() < 0.02, "y(pi/2) = {end}");
        let mid = sol.component(0)[50];
        assert!((mid - FRAC_PI_4.cos()).abs() < 1e-3);
        assert!(sol.message.contains("shooting converged"));
    }

    #[test]
    fn boundary_conditions_recover_sine() {
        // y(0) = 0, y(pi/2) = 1 forces y'(0) = 1, which the zero guess
        // does not provide, so Newton has to find it
        let f = oscillator();
        let conditions = [
            Condition {
                component: 0,
                x: 0.0,
                target: 0.0,
            },
            Condition {
                component: 0,
                x: FRAC_PI_2,
                target: 1.0,
            },
        ];
        let options = SolveOptions {
            num_points: Some(101),
            ..Default::default()
        };
        let sol = solve_multipoint(
            &f,
            &conditions,
            (0.0, FRAC_PI_2),
            &options,
            &SolverDefaults::default(),
        )
        .unwrap();
        // slope recovered at x_min: y[1](0) = 1
        assert!((sol.component(1)[0] - 1.0).abs() < 1e-6);
        let mid = sol.component(0)[50];
        assert!((mid - FRAC_PI_4.sin()).abs() < 1e-3);
    }

    #[test]
    fn initial_conditions_skip_root_finding() {
        let f = oscillator();
        let conditions = [
            Condition {
                component: 0,
                x: 0.0,
                target: 1.0,
            },
            Condition {
                component: 1,
                x: 0.0,
                target: 0.0,
            },
        ];
        let sol = solve_multipoint(
            &f,
            &conditions,
            (0.0, 1.0),
            &SolveOptions::default(),
            &SolverDefaults::default(),
        )
        .unwrap();
        assert!(!sol.message.contains("shooting"));
        assert!((sol.component(0)[0] - 1.0).abs() < 1e-12);
        let end = *sol.component(0).last().unwrap();
        assert!((end - 1.0f64.cos()).abs() < 1e-6);
    }

    #[test]
    fn condition_beyond_domain_extends_the_working_interval() {
        let f = resolve_ode(
            &EquationSource::Expression("y[0]".into()),
            1,
            &HashMap::new(),
            &EquationRegistry::new(),
        )
        .unwrap();
        // y' = y with y(2) = e^2 pins y(0) = 1 even though output stops at 1
        let conditions = [Condition {
            component: 0,
            x: 2.0,
            target: 2.0f64.exp(),
        }];
        let sol = solve_multipoint(
            &f,
            &conditions,
            (0.0, 1.0),
            &SolveOptions::default(),
            &SolverDefaults::default(),
        )
        .unwrap();
        let end = *sol.component(0).last().unwrap();
        assert!((end - 1.0f64.exp()).abs() < 1e-5);
        assert!((sol.x.last().unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn condition_count_mismatch_is_config_error() {
        let f = oscillator();
        let conditions = [Condition {
            component: 0,
            x: 0.0,
            target: 1.0,
        }];
        let err = solve_multipoint(
            &f,
            &conditions,
            (0.0, 1.0),
            &SolveOptions::default(),
            &SolverDefaults::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
