//! Resolution of a solve request's equation source into a normalized
//! right-hand-side callable.
//!
//! A request names its equation exactly one way: raw expression text, or
//! the key of a predefined registry record. Resolution happens once, up
//! front (compiling and probing expressions, looking up native functions)
//! and yields a value the solver loops call without re-inspecting which
//! source was supplied.

use std::collections::HashMap;

use crate::error::{EngineError, EvalError};
use crate::registry::{EquationKind, EquationRegistry, NativeOde, NativeRecurrence};
use crate::sandbox::{CompiledExpression, EvalContext};
use crate::traits::{OdeSystem, PdeSource, Recurrence};

/// Where the right-hand side comes from. Exactly one form per request.
#[derive(Debug, Clone, PartialEq)]
pub enum EquationSource {
    /// Expression text for the highest derivative (or next recurrence
    /// value, or PDE source term).
    Expression(String),
    /// Key of a predefined equation in the registry.
    Registered(String),
}

impl EquationSource {
    /// Builds the source from a request's optional fields, enforcing the
    /// exactly-one rule.
    pub fn from_request(
        expression: Option<&str>,
        equation_key: Option<&str>,
    ) -> Result<Self, EngineError> {
        match (expression, equation_key) {
            (Some(expr), None) => Ok(EquationSource::Expression(expr.to_string())),
            (None, Some(key)) => Ok(EquationSource::Registered(key.to_string())),
            (Some(_), Some(_)) => Err(EngineError::Config(
                "supply either an expression or a predefined equation, not both".into(),
            )),
            (None, None) => Err(EngineError::Config(
                "supply an expression or a predefined equation".into(),
            )),
        }
    }
}

#[derive(Debug)]
enum OdeRhs {
    /// Scalar equation of order k, reduced to first order.
    Scalar {
        expr: CompiledExpression,
        order: usize,
    },
    /// m components, each of order k; state is laid out block per
    /// component, `[c·k, (c+1)·k)` holding component c's derivatives.
    Vector {
        exprs: Vec<CompiledExpression>,
        components: usize,
        order: usize,
    },
    Native {
        f: NativeOde,
        dim: usize,
    },
}

/// A resolved ODE right-hand side, ready for the integrator family.
#[derive(Debug)]
pub struct ResolvedOde {
    rhs: OdeRhs,
    params: HashMap<String, f64>,
}

impl OdeSystem for ResolvedOde {
    fn dimension(&self) -> usize {
        match &self.rhs {
            OdeRhs::Scalar { order, .. } => *order,
            OdeRhs::Vector {
                components, order, ..
            } => components * order,
            OdeRhs::Native { dim, .. } => *dim,
        }
    }

    fn eval(&self, x: f64, y: &[f64], dydx: &mut [f64]) -> Result<(), EvalError> {
        let scalars = [("x", x)];
        match &self.rhs {
            OdeRhs::Scalar { expr, order } => {
                let ctx = EvalContext::new(&scalars, Some(y), &self.params);
                for i in 0..order - 1 {
                    dydx[i] = y[i + 1];
                }
                dydx[order - 1] = expr.eval(&ctx)?;
            }
            OdeRhs::Vector {
                exprs,
                components,
                order,
            } => {
                let ctx = EvalContext::new(&scalars, Some(y), &self.params);
                for c in 0..*components {
                    let base = c * order;
                    for i in 0..order - 1 {
                        dydx[base + i] = y[base + i + 1];
                    }
                    dydx[base + order - 1] = exprs[c].eval(&ctx)?;
                }
            }
            OdeRhs::Native { f, dim } => {
                let values = f(x, y, &self.params);
                if values.len() != *dim {
                    return Err(EvalError(format!(
                        "native function returned {} values, expected {dim}",
                        values.len()
                    )));
                }
                dydx.copy_from_slice(&values);
            }
        }
        Ok(())
    }
}

/// Resolves an ODE (scalar or vector) right-hand side.
///
/// `order` applies to `Expression` sources; registry records carry their
/// own order and component count. `params` overrides any parameter
/// defaults a record declares.
pub fn resolve_ode(
    source: &EquationSource,
    order: usize,
    params: &HashMap<String, f64>,
    registry: &EquationRegistry,
) -> Result<ResolvedOde, EngineError> {
    match source {
        EquationSource::Expression(text) => {
            if order == 0 {
                return Err(EngineError::Config("order must be at least 1".into()));
            }
            let expr = CompiledExpression::compile(text)?;
            expr.probe(&["x"], Some(order), params)?;
            Ok(ResolvedOde {
                rhs: OdeRhs::Scalar { expr, order },
                params: params.clone(),
            })
        }
        EquationSource::Registered(key) => {
            let rec = lookup(registry, key)?;
            let merged = merge_params(rec.default_parameters(), params);
            let rhs = match rec.kind {
                EquationKind::Ode => match (&rec.expression, &rec.function_name) {
                    (Some(text), _) => {
                        let expr = CompiledExpression::compile(text)?;
                        expr.probe(&["x"], Some(rec.order), &merged)?;
                        OdeRhs::Scalar {
                            expr,
                            order: rec.order,
                        }
                    }
                    (None, Some(name)) => OdeRhs::Native {
                        f: lookup_native_ode(registry, key, name)?,
                        dim: rec.state_len(),
                    },
                    (None, None) => {
                        return Err(EngineError::Config(format!(
                            "equation '{key}' needs an expression or function_name"
                        )))
                    }
                },
                EquationKind::VectorOde => match (&rec.vector_expressions, &rec.function_name) {
                    (Some(texts), _) => {
                        let state_len = rec.state_len();
                        let mut exprs = Vec::with_capacity(texts.len());
                        for text in texts {
                            let expr = CompiledExpression::compile(text)?;
                            expr.probe(&["x"], Some(state_len), &merged)?;
                            exprs.push(expr);
                        }
                        if exprs.len() != rec.vector_components {
                            return Err(EngineError::Config(format!(
                                "equation '{key}' declares {} components but {} expressions",
                                rec.vector_components,
                                exprs.len()
                            )));
                        }
                        OdeRhs::Vector {
                            exprs,
                            components: rec.vector_components,
                            order: rec.order,
                        }
                    }
                    (None, Some(name)) => OdeRhs::Native {
                        f: lookup_native_ode(registry, key, name)?,
                        dim: rec.state_len(),
                    },
                    (None, None) => {
                        return Err(EngineError::Config(format!(
                            "equation '{key}' needs vector_expressions or function_name"
                        )))
                    }
                },
                other => {
                    return Err(EngineError::Config(format!(
                        "equation '{key}' has kind {other:?}, not an ODE"
                    )))
                }
            };
            Ok(ResolvedOde {
                rhs,
                params: merged,
            })
        }
    }
}

#[derive(Debug)]
enum RecurrenceRhs {
    Expr(CompiledExpression),
    Native(NativeRecurrence),
}

/// A resolved recurrence `y_{n+k} = f(n, window)`.
#[derive(Debug)]
pub struct ResolvedRecurrence {
    rhs: RecurrenceRhs,
    order: usize,
    params: HashMap<String, f64>,
}

impl Recurrence for ResolvedRecurrence {
    fn order(&self) -> usize {
        self.order
    }

    fn next(&self, n: i64, window: &[f64]) -> Result<f64, EvalError> {
        match &self.rhs {
            RecurrenceRhs::Expr(expr) => {
                let scalars = [("n", n as f64)];
                let ctx = EvalContext::new(&scalars, Some(window), &self.params);
                expr.eval(&ctx)
            }
            RecurrenceRhs::Native(f) => Ok(f(n, window, &self.params)),
        }
    }
}

/// Resolves a recurrence right-hand side. The window is bound to `y` and
/// the step index to `n`.
pub fn resolve_recurrence(
    source: &EquationSource,
    order: usize,
    params: &HashMap<String, f64>,
    registry: &EquationRegistry,
) -> Result<ResolvedRecurrence, EngineError> {
    match source {
        EquationSource::Expression(text) => {
            if order == 0 {
                return Err(EngineError::Config("order must be at least 1".into()));
            }
            let expr = CompiledExpression::compile(text)?;
            expr.probe(&["n"], Some(order), params)?;
            Ok(ResolvedRecurrence {
                rhs: RecurrenceRhs::Expr(expr),
                order,
                params: params.clone(),
            })
        }
        EquationSource::Registered(key) => {
            let rec = lookup(registry, key)?;
            if rec.kind != EquationKind::Difference {
                return Err(EngineError::Config(format!(
                    "equation '{key}' has kind {:?}, not a difference equation",
                    rec.kind
                )));
            }
            let merged = merge_params(rec.default_parameters(), params);
            let rhs = match (&rec.expression, &rec.function_name) {
                (Some(text), _) => {
                    let expr = CompiledExpression::compile(text)?;
                    expr.probe(&["n"], Some(rec.order), &merged)?;
                    RecurrenceRhs::Expr(expr)
                }
                (None, Some(name)) => RecurrenceRhs::Native(
                    registry.native_recurrence(name).ok_or_else(|| {
                        EngineError::Config(format!(
                            "equation '{key}' references unknown function '{name}'"
                        ))
                    })?,
                ),
                (None, None) => {
                    return Err(EngineError::Config(format!(
                        "equation '{key}' needs an expression or function_name"
                    )))
                }
            };
            Ok(ResolvedRecurrence {
                rhs,
                order: rec.order,
                params: merged,
            })
        }
    }
}

/// A resolved PDE source term `f(x, y)` over named coordinates.
#[derive(Debug)]
pub struct ResolvedPdeSource {
    expr: CompiledExpression,
    vars: [String; 2],
    params: HashMap<String, f64>,
}

impl PdeSource for ResolvedPdeSource {
    fn eval(&self, x: f64, y: f64) -> Result<f64, EvalError> {
        let scalars = [(self.vars[0].as_str(), x), (self.vars[1].as_str(), y)];
        let ctx = EvalContext::new(&scalars, None, &self.params);
        self.expr.eval(&ctx)
    }
}

/// Resolves the source term of the 2D elliptic equation. `variables`
/// names the two coordinates for `Expression` sources; registry records
/// declare their own.
pub fn resolve_pde_source(
    source: &EquationSource,
    variables: &[String],
    params: &HashMap<String, f64>,
    registry: &EquationRegistry,
) -> Result<ResolvedPdeSource, EngineError> {
    let (text, vars, merged) = match source {
        EquationSource::Expression(text) => {
            (text.clone(), variables.to_vec(), params.clone())
        }
        EquationSource::Registered(key) => {
            let rec = lookup(registry, key)?;
            if rec.kind != EquationKind::Pde {
                return Err(EngineError::Config(format!(
                    "equation '{key}' has kind {:?}, not a PDE",
                    rec.kind
                )));
            }
            let expression = rec.expression.clone().ok_or_else(|| {
                EngineError::Config(format!("equation '{key}' has no source expression"))
            })?;
            let merged = merge_params(rec.default_parameters(), params);
            (expression, rec.variables.clone(), merged)
        }
    };
    if vars.len() != 2 {
        return Err(EngineError::Config(format!(
            "a 2D PDE needs exactly two independent variables, got {}",
            vars.len()
        )));
    }
    let expr = CompiledExpression::compile(&text)?;
    expr.probe(&[vars[0].as_str(), vars[1].as_str()], None, &merged)?;
    Ok(ResolvedPdeSource {
        expr,
        vars: [vars[0].clone(), vars[1].clone()],
        params: merged,
    })
}

fn lookup<'r>(
    registry: &'r EquationRegistry,
    key: &str,
) -> Result<&'r crate::registry::EquationRecord, EngineError> {
    registry
        .get(key)
        .ok_or_else(|| EngineError::Config(format!("unknown predefined equation '{key}'")))
}

fn lookup_native_ode(
    registry: &EquationRegistry,
    key: &str,
    name: &str,
) -> Result<NativeOde, EngineError> {
    registry.native_ode(name).ok_or_else(|| {
        EngineError::Config(format!(
            "equation '{key}' references unknown function '{name}'"
        ))
    })
}

fn merge_params(
    mut defaults: HashMap<String, f64>,
    overrides: &HashMap<String, f64>,
) -> HashMap<String, f64> {
    for (k, v) in overrides {
        defaults.insert(k.clone(), *v);
    }
    defaults
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn no_params() -> HashMap<String, f64> {
        HashMap::new()
    }

    #[test]
    fn exactly_one_source_is_enforced() {
        assert!(EquationSource::from_request(Some("y[0]"), None).is_ok());
        assert!(EquationSource::from_request(None, Some("logistic_equation")).is_ok());
        assert!(matches!(
            EquationSource::from_request(Some("y[0]"), Some("logistic_equation")),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            EquationSource::from_request(None, None),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn zero_expression_reduces_to_pure_shift() {
        let registry = EquationRegistry::new();
        for order in 1..=4 {
            let f = resolve_ode(
                &EquationSource::Expression("0".into()),
                order,
                &no_params(),
                &registry,
            )
            .unwrap();
            let y: Vec<f64> = (0..order).map(|i| (i + 1) as f64).collect();
            let mut dydx = vec![f64::NAN; order];
            f.eval(2.0, &y, &mut dydx).unwrap();
            for i in 0..order - 1 {
                assert_eq!(dydx[i], y[i + 1]);
            }
            assert_eq!(dydx[order - 1], 0.0);
        }
    }

    #[test]
    fn scalar_expression_uses_parameters() {
        let registry = EquationRegistry::new();
        let mut params = HashMap::new();
        params.insert("k".to_string(), 0.5);
        let f = resolve_ode(
            &EquationSource::Expression("k*y[0]".into()),
            1,
            &params,
            &registry,
        )
        .unwrap();
        let mut dydx = [0.0];
        f.eval(0.0, &[4.0], &mut dydx).unwrap();
        assert_eq!(dydx[0], 2.0);
    }

    #[test]
    fn undefined_name_fails_at_resolution() {
        let registry = EquationRegistry::new();
        let err = resolve_ode(
            &EquationSource::Expression("k*y[0]".into()),
            1,
            &no_params(),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn vector_layout_is_block_per_component() {
        // two components, order 2 each: state [u, u', v, v']
        let rec = crate::registry::EquationRecord {
            key: "coupled".into(),
            name: "Coupled".into(),
            formula: "u'' = -u, v'' = -v + u".into(),
            description: String::new(),
            order: 2,
            parameters: Default::default(),
            expression: None,
            function_name: None,
            vector_expressions: Some(vec!["-y[0]".into(), "-y[2] + y[0]".into()]),
            vector_components: 2,
            default_initial_conditions: vec![1.0, 0.0, 0.0, 0.0],
            default_domain: vec![0.0, 10.0],
            kind: EquationKind::VectorOde,
            variables: vec!["x".into()],
        };
        let registry = EquationRegistry::from_records(vec![rec]);

        let f = resolve_ode(
            &EquationSource::Registered("coupled".into()),
            0,
            &no_params(),
            &registry,
        )
        .unwrap();
        assert_eq!(f.dimension(), 4);
        let y = [1.0, 2.0, 3.0, 4.0];
        let mut dydx = [0.0; 4];
        f.eval(0.0, &y, &mut dydx).unwrap();
        assert_eq!(dydx, [2.0, -1.0, 4.0, -3.0 + 1.0]);
    }

    #[test]
    fn registered_native_resolves() {
        let registry = EquationRegistry::builtin();
        let f = resolve_ode(
            &EquationSource::Registered("harmonic_oscillator".into()),
            0,
            &no_params(),
            &registry,
        )
        .unwrap();
        assert_eq!(f.dimension(), 2);
        let mut dydx = [0.0; 2];
        f.eval(0.0, &[1.0, 0.0], &mut dydx).unwrap();
        assert_eq!(dydx, [0.0, -1.0]);
    }

    #[test]
    fn registered_parameters_can_be_overridden() {
        let registry = EquationRegistry::builtin();
        let mut params = HashMap::new();
        params.insert("k".to_string(), 2.0);
        let f = resolve_ode(
            &EquationSource::Registered("exponential_growth".into()),
            0,
            &params,
            &registry,
        )
        .unwrap();
        let mut dydx = [0.0];
        f.eval(0.0, &[3.0], &mut dydx).unwrap();
        assert_eq!(dydx[0], 6.0);
    }

    #[test]
    fn recurrence_resolution() {
        let registry = EquationRegistry::new();
        let mut params = HashMap::new();
        params.insert("r".to_string(), 1.5);
        let f = resolve_recurrence(
            &EquationSource::Expression("r*y[0]".into()),
            1,
            &params,
            &registry,
        )
        .unwrap();
        assert_eq!(f.order(), 1);
        assert_eq!(f.next(0, &[2.0]).unwrap(), 3.0);
    }

    #[test]
    fn recurrence_kind_mismatch_is_config_error() {
        let registry = EquationRegistry::builtin();
        let err = resolve_recurrence(
            &EquationSource::Registered("harmonic_oscillator".into()),
            0,
            &no_params(),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn pde_source_binds_declared_variables() {
        let registry = EquationRegistry::builtin();
        let f = resolve_pde_source(
            &EquationSource::Registered("poisson_sin".into()),
            &[],
            &no_params(),
            &registry,
        )
        .unwrap();
        let expected = 2.0 * std::f64::consts::PI.powi(2);
        assert!((f.eval(0.5, 0.5).unwrap() - expected).abs() < 1e-12);
        assert!(f.eval(0.0, 0.0).unwrap().abs() < 1e-12);
    }

    #[test]
    fn pde_requires_two_variables() {
        let registry = EquationRegistry::new();
        let err = resolve_pde_source(
            &EquationSource::Expression("x".into()),
            &["x".to_string()],
            &no_params(),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
