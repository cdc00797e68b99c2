//! Initial-value ODE solving over the adaptive integrator family.

use serde::{Deserialize, Serialize};

use crate::config::SolverDefaults;
use crate::error::EngineError;
use crate::methods::{self, IntegratorOptions, MAX_STEPS};
use crate::traits::OdeSystem;

/// The selectable integration methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// Dormand–Prince 5(4), general-purpose explicit pair.
    #[serde(rename = "RK45")]
    Rk45,
    /// Bogacki–Shampine 3(2), low order and cheaper per step.
    #[serde(rename = "RK23")]
    Rk23,
    /// Dormand–Prince 8(5,3), high-order explicit method.
    #[serde(rename = "DOP853")]
    Dop853,
    /// Implicit Radau IIA, for stiff problems.
    #[serde(rename = "Radau")]
    Radau,
    /// Backward differentiation formula, for stiff problems.
    #[serde(rename = "BDF")]
    Bdf,
    /// Explicit/BDF auto-switching on stiffness detection.
    #[serde(rename = "LSODA")]
    Lsoda,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::Rk45,
        Method::Rk23,
        Method::Dop853,
        Method::Radau,
        Method::Bdf,
        Method::Lsoda,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Method::Rk45 => "RK45",
            Method::Rk23 => "RK23",
            Method::Dop853 => "DOP853",
            Method::Radau => "Radau",
            Method::Bdf => "BDF",
            Method::Lsoda => "LSODA",
        }
    }

    pub fn from_name(name: &str) -> Option<Method> {
        Method::ALL.iter().copied().find(|m| m.name() == name)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-request overrides; unset fields fall back to [`SolverDefaults`].
#[derive(Debug, Clone, Default)]
pub struct SolveOptions {
    pub method: Option<Method>,
    pub num_points: Option<usize>,
    pub max_step: Option<f64>,
    pub rtol: Option<f64>,
    pub atol: Option<f64>,
}

/// Sampled ODE solution.
///
/// `y` is shaped `(n_vars, n_points)`: one row per state component, in
/// the order-reduced layout the resolver produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdeSolution {
    pub x: Vec<f64>,
    pub y: Vec<Vec<f64>>,
    pub success: bool,
    pub message: String,
    pub method: Method,
    pub nfev: usize,
    pub njev: usize,
}

impl OdeSolution {
    pub fn n_points(&self) -> usize {
        self.x.len()
    }

    pub fn n_vars(&self) -> usize {
        self.y.len()
    }

    /// One state component across all sample points.
    pub fn component(&self, index: usize) -> &[f64] {
        &self.y[index]
    }
}

pub(crate) fn linspace(a: f64, b: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![a];
    }
    let step = (b - a) / (n - 1) as f64;
    (0..n).map(|i| a + step * i as f64).collect()
}

/// Solves the initial-value problem `dy/dx = f(x, y)`, `y(x_min) = y0`
/// over `domain`, sampling the solution on a uniform grid.
///
/// Fails with [`EngineError::SolverFailed`] when the selected integrator
/// does not cover the interval within its own adaptive logic.
pub fn solve_ode<F: OdeSystem + ?Sized>(
    f: &F,
    domain: (f64, f64),
    y0: &[f64],
    options: &SolveOptions,
    defaults: &SolverDefaults,
) -> Result<OdeSolution, EngineError> {
    let (x_min, x_max) = domain;
    if y0.len() != f.dimension() {
        return Err(EngineError::Config(format!(
            "initial state has {} entries, system dimension is {}",
            y0.len(),
            f.dimension()
        )));
    }

    let method = options.method.unwrap_or(defaults.method);
    let rtol = options.rtol.unwrap_or(defaults.rtol);
    let atol = options.atol.unwrap_or(defaults.atol);
    let max_step = options.max_step.unwrap_or(defaults.max_step);
    let num_points = options.num_points.unwrap_or(defaults.num_points);

    let span = x_max - x_min;
    let h_max = if max_step <= 0.0 {
        span
    } else {
        max_step.min(span)
    };

    log::info!(
        "solving IVP: method={method}, span=[{x_min}, {x_max}], dim={}, rtol={rtol}, atol={atol}",
        f.dimension()
    );

    let opts = IntegratorOptions {
        rtol,
        atol,
        h_max,
        max_steps: MAX_STEPS,
    };
    let (traj, report) = methods::run(method, f, x_min, x_max, y0, &opts).map_err(|e| {
        log::error!("solver failed: {e}");
        e
    })?;

    let x = linspace(x_min, x_max, num_points);
    let y = traj.sample_grid(&x);

    log::info!(
        "solver succeeded: {} points, {} evaluations",
        x.len(),
        report.nfev
    );

    Ok(OdeSolution {
        x,
        y,
        success: true,
        message: format!(
            "{method} completed: {} accepted steps, {} rejected",
            report.naccept, report.nreject
        ),
        method,
        nfev: report.nfev,
        njev: report.njev,
    })
}
