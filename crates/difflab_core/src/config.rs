use serde::{Deserialize, Serialize};

use crate::ode::Method;

/// Numeric defaults the embedding application supplies to the engine.
///
/// The engine never reads configuration itself; the caller constructs one
/// of these (from its own settings store) and passes it to the solve entry
/// points, which fall back to its fields wherever a request leaves an
/// option unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverDefaults {
    /// Default integration method.
    pub method: Method,
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
    /// Maximum step size; `<= 0` means uncapped.
    pub max_step: f64,
    /// Number of output sample points.
    pub num_points: usize,
}

impl Default for SolverDefaults {
    fn default() -> Self {
        Self {
            method: Method::Rk45,
            rtol: 1e-8,
            atol: 1e-10,
            max_step: 0.0,
            num_points: 1000,
        }
    }
}
