//! Pre-flight validation of solve parameters.
//!
//! Pure functions returning an accumulated list of error strings: every
//! check runs, nothing raises, and an empty list means the request
//! satisfies every invariant the engine relies on. Callers turn a
//! non-empty list into [`crate::error::EngineError::Validation`].

use std::collections::HashMap;

use crate::ode::Method;
use crate::sandbox::{is_reserved_name, CompiledExpression};
use crate::shooting::Condition;

fn method_choices() -> String {
    Method::ALL
        .iter()
        .map(|m| m.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn check_domain(errors: &mut Vec<String>, x_min: f64, x_max: f64) {
    if x_min >= x_max {
        errors.push(format!("x_min ({x_min}) must be less than x_max ({x_max})"));
    }
    if !x_min.is_finite() || !x_max.is_finite() {
        errors.push("domain bounds must be finite numbers".into());
    }
}

fn check_parameters(errors: &mut Vec<String>, params: &HashMap<String, f64>) {
    let mut names: Vec<&String> = params.keys().collect();
    names.sort();
    for name in names {
        let value = &params[name];
        if !value.is_finite() {
            errors.push(format!("parameter '{name}' = {value} is not a finite number"));
        }
        if is_reserved_name(name) {
            errors.push(format!(
                "parameter name '{name}' shadows a reserved identifier"
            ));
        }
    }
}

/// Validates an ODE or difference-equation request. Returns every
/// violation found; identical inputs always yield the identical list.
pub fn validate_inputs(
    expression: &str,
    order: usize,
    x_min: f64,
    x_max: f64,
    y0: &[f64],
    num_points: usize,
    method: &str,
    params: &HashMap<String, f64>,
) -> Vec<String> {
    let mut errors = Vec::new();

    if expression.trim().is_empty() {
        errors.push("expression is empty".into());
    } else if let Err(e) = CompiledExpression::compile(expression) {
        errors.push(e.to_string());
    }

    if order < 1 {
        errors.push("order must be at least 1".into());
    }

    check_domain(&mut errors, x_min, x_max);

    if y0.len() != order {
        errors.push(format!(
            "expected {order} initial condition(s) for an order-{order} equation, got {}",
            y0.len()
        ));
    }
    for (i, value) in y0.iter().enumerate() {
        if !value.is_finite() {
            errors.push(format!(
                "initial condition y0[{i}] = {value} is not a finite number"
            ));
        }
    }

    if num_points < 10 {
        errors.push("number of points must be at least 10".into());
    }
    if num_points > 1_000_000 {
        errors.push("number of points must not exceed 1,000,000".into());
    }

    if Method::from_name(method).is_none() {
        errors.push(format!(
            "unknown method '{method}'; choose from: {}",
            method_choices()
        ));
    }

    check_parameters(&mut errors, params);

    if !errors.is_empty() {
        log::warn!("validation errors: {errors:?}");
    }
    errors
}

/// Validates a multipoint condition list against the system order and
/// the requested domain.
pub fn validate_conditions(
    conditions: &[Condition],
    order: usize,
    x_min: f64,
    x_max: f64,
) -> Vec<String> {
    let mut errors = Vec::new();

    if conditions.len() != order {
        errors.push(format!(
            "a system of order {order} needs exactly {order} condition(s), got {}",
            conditions.len()
        ));
    }
    for c in conditions {
        if !c.x.is_finite() || !c.target.is_finite() {
            errors.push(format!(
                "condition ({}, {}, {}) must use finite numbers",
                c.component, c.x, c.target
            ));
        } else if c.x < x_min || c.x > x_max {
            errors.push(format!(
                "condition location x = {} lies outside the domain [{x_min}, {x_max}]",
                c.x
            ));
        }
        if c.component >= order {
            errors.push(format!(
                "condition component {} out of range for order {order}",
                c.component
            ));
        }
    }

    if !errors.is_empty() {
        log::warn!("condition validation errors: {errors:?}");
    }
    errors
}

/// Validates a 2D PDE request: both axis ranges, grid sizes, parameters.
pub fn validate_pde_inputs(
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
    nx: usize,
    ny: usize,
    params: &HashMap<String, f64>,
) -> Vec<String> {
    let mut errors = Vec::new();

    check_domain(&mut errors, x_min, x_max);
    if y_min >= y_max {
        errors.push(format!("y_min ({y_min}) must be less than y_max ({y_max})"));
    }
    if !y_min.is_finite() || !y_max.is_finite() {
        errors.push("domain bounds must be finite numbers".into());
    }

    if nx < 3 || ny < 3 {
        errors.push("grid must have at least 3 points per axis".into());
    }
    if nx.saturating_mul(ny) > 1_000_000 {
        errors.push("grid must not exceed 1,000,000 points".into());
    }

    check_parameters(&mut errors, params);

    if !errors.is_empty() {
        log::warn!("PDE validation errors: {errors:?}");
    }
    errors
}
