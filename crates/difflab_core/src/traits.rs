use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

use crate::error::EvalError;

/// A trait for types the expression evaluator can compute with.
/// Must support float arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Right-hand side of a first-order ODE system `dy/dx = f(x, y)`.
///
/// `y` holds the reduced state vector (value and successive derivatives,
/// block per component for vector equations). Implementations fill `dydx`
/// with the derivative values; evaluation may fail when the underlying
/// expression does (for example an index that leaves the state range).
pub trait OdeSystem {
    /// Length of the state vector.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field at `(x, y)` into `dydx`.
    fn eval(&self, x: f64, y: &[f64], dydx: &mut [f64]) -> Result<(), EvalError>;
}

/// A k-th order recurrence `y_{n+k} = f(n, [y_n, …, y_{n+k-1}])`.
pub trait Recurrence {
    /// Order of the recurrence (length of the sliding window).
    fn order(&self) -> usize;

    /// Computes the next value from the current index and window.
    fn next(&self, n: i64, window: &[f64]) -> Result<f64, EvalError>;
}

/// Scalar source term `f(x, y)` of the 2D elliptic equation.
pub trait PdeSource {
    fn eval(&self, x: f64, y: f64) -> Result<f64, EvalError>;
}
