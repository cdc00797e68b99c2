/// The `difflab_core` crate is the numerical equation-solving engine of
/// DifferentialLab: it turns user-written formula text into executable
/// right-hand sides and solves the resulting ordinary differential
/// equation, recurrence, or 2D elliptic PDE over a requested domain.
///
/// Key components:
/// - **Sandbox**: a closed expression grammar with a tree-walking
///   evaluator; disallowed constructs are unrepresentable, not filtered.
/// - **Resolver**: expression or registry source → normalized RHS
///   callable (order-reduced ODE, vector ODE, recurrence, PDE source).
/// - **Validate**: accumulated pre-flight checks, reported as a batch.
/// - **ODE**: adaptive integrator family (RK45, RK23, DOP853, Radau,
///   BDF, LSODA) plus a shooting extension for multipoint conditions.
/// - **Difference**: sliding-window recurrence iteration with partial
///   results on failure.
/// - **PDE**: sparse 5-point-stencil Poisson solver with Dirichlet data.
/// - **Metrics**: residual statistics for solution quality reporting.
pub mod traits;

pub mod config;
pub mod difference;
pub mod error;
pub mod metrics;
pub mod ode;
pub mod pde;
pub mod registry;
pub mod resolver;
pub mod sandbox;
pub mod shooting;
pub mod validate;

mod methods;

pub use config::SolverDefaults;
pub use difference::{solve_difference, DifferenceSolution};
pub use error::{EngineError, EvalError, ParseError};
pub use metrics::{compute_residual, ResidualStats};
pub use ode::{solve_ode, Method, OdeSolution, SolveOptions};
pub use pde::{solve_poisson, PdeSolution};
pub use registry::{EquationKind, EquationRecord, EquationRegistry};
pub use resolver::{
    resolve_ode, resolve_pde_source, resolve_recurrence, EquationSource, ResolvedOde,
    ResolvedPdeSource, ResolvedRecurrence,
};
pub use shooting::{solve_multipoint, Condition, NewtonSettings};
pub use traits::{OdeSystem, PdeSource, Recurrence, Scalar};
pub use validate::{validate_conditions, validate_inputs, validate_pde_inputs};
