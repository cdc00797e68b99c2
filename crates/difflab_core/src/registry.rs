//! Predefined-equation registry.
//!
//! Records are declarative: key, display strings, the execution source
//! (expression text, a registered native function, or per-component vector
//! expressions), order, parameter defaults, and default domain/initial
//! conditions. The registry is an explicit caller-constructed value (the
//! engine holds no module-level cache) and is read-only after
//! construction apart from the explicit [`EquationRegistry::reload`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Which solver family a record targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EquationKind {
    #[default]
    Ode,
    VectorOde,
    Difference,
    Pde,
}

/// Default value and human description of one named parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub default: f64,
    #[serde(default)]
    pub description: String,
}

fn one() -> usize {
    1
}

fn default_domain() -> Vec<f64> {
    vec![0.0, 10.0]
}

fn default_variables() -> Vec<String> {
    vec!["x".to_string()]
}

/// One predefined equation, as loaded from the external declarative source.
///
/// `formula` is required for display. Exactly one of `expression`,
/// `function_name`, or `vector_expressions` must be present for execution.
/// For vector ODEs, `order` is the per-component order and
/// `vector_components` the number of components, so the state length is
/// `order * vector_components`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquationRecord {
    pub key: String,
    pub name: String,
    pub formula: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "one")]
    pub order: usize,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub vector_expressions: Option<Vec<String>>,
    #[serde(default = "one")]
    pub vector_components: usize,
    #[serde(default)]
    pub default_initial_conditions: Vec<f64>,
    #[serde(default = "default_domain")]
    pub default_domain: Vec<f64>,
    #[serde(default)]
    pub kind: EquationKind,
    #[serde(default = "default_variables")]
    pub variables: Vec<String>,
}

impl EquationRecord {
    /// Total state length: order, or order per component for vector ODEs.
    pub fn state_len(&self) -> usize {
        match self.kind {
            EquationKind::VectorOde => self.order * self.vector_components.max(1),
            _ => self.order,
        }
    }

    /// Parameter name → default value, the map solve requests start from.
    pub fn default_parameters(&self) -> HashMap<String, f64> {
        self.parameters
            .iter()
            .map(|(k, spec)| (k.clone(), spec.default))
            .collect()
    }

    fn execution_sources(&self) -> usize {
        let has_vector = self
            .vector_expressions
            .as_ref()
            .is_some_and(|v| !v.is_empty());
        usize::from(self.expression.is_some())
            + usize::from(self.function_name.is_some())
            + usize::from(has_vector)
    }
}

/// Native right-hand side `f(x, y, params) -> dy/dx` registered in code
/// for equations too awkward to express as a single formula string.
pub type NativeOde = fn(f64, &[f64], &HashMap<String, f64>) -> Vec<f64>;

/// Native recurrence `f(n, window, params) -> next`.
pub type NativeRecurrence = fn(i64, &[f64], &HashMap<String, f64>) -> f64;

/// Read-only catalogue of predefined equations plus the native function
/// table records may reference by `function_name`.
pub struct EquationRegistry {
    records: BTreeMap<String, EquationRecord>,
    native_odes: HashMap<&'static str, NativeOde>,
    native_recurrences: HashMap<&'static str, NativeRecurrence>,
}

impl Default for EquationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EquationRegistry {
    /// Empty registry with the native function table available.
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            native_odes: native_ode_table(),
            native_recurrences: native_recurrence_table(),
        }
    }

    /// Builds a registry from records, skipping invalid ones with a
    /// warning: a record must carry a formula and exactly one execution
    /// source to be usable.
    pub fn from_records(records: Vec<EquationRecord>) -> Self {
        let mut registry = Self::new();
        registry.reload(records);
        registry
    }

    /// Loads records from an external declarative JSON document
    /// (an array of records).
    pub fn from_json_str(text: &str) -> Result<Self, EngineError> {
        let records: Vec<EquationRecord> = serde_json::from_str(text)
            .map_err(|e| EngineError::Config(format!("cannot parse equation records: {e}")))?;
        Ok(Self::from_records(records))
    }

    /// Replaces the registry contents with a fresh record set.
    pub fn reload(&mut self, records: Vec<EquationRecord>) {
        self.records.clear();
        for record in records {
            if record.formula.is_empty() {
                log::warn!(
                    "equation '{}' has no formula (required for display); skipping",
                    record.key
                );
                continue;
            }
            if record.execution_sources() != 1 {
                log::warn!(
                    "equation '{}' must have exactly one of expression, function_name, \
                     vector_expressions; skipping",
                    record.key
                );
                continue;
            }
            if record.order == 0 {
                log::warn!("equation '{}' has order 0; skipping", record.key);
                continue;
            }
            log::debug!("loaded predefined equation: {}", record.key);
            self.records.insert(record.key.clone(), record);
        }
        log::info!("registry holds {} predefined equations", self.records.len());
    }

    pub fn get(&self, key: &str) -> Option<&EquationRecord> {
        self.records.get(key)
    }

    pub fn native_ode(&self, name: &str) -> Option<NativeOde> {
        self.native_odes.get(name).copied()
    }

    pub fn native_recurrence(&self, name: &str) -> Option<NativeRecurrence> {
        self.native_recurrences.get(name).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The stock catalogue shipped with the engine.
    pub fn builtin() -> Self {
        Self::from_records(builtin_records())
    }
}

fn param(p: &HashMap<String, f64>, name: &str, default: f64) -> f64 {
    p.get(name).copied().unwrap_or(default)
}

// --- Native ODE right-hand sides ---

/// y'' + ω²y = 0: simple harmonic oscillator.
fn harmonic_oscillator(_x: f64, y: &[f64], p: &HashMap<String, f64>) -> Vec<f64> {
    let omega = param(p, "omega", 1.0);
    vec![y[1], -omega * omega * y[0]]
}

/// y'' + 2γy' + ω²y = 0: damped oscillator.
fn damped_oscillator(_x: f64, y: &[f64], p: &HashMap<String, f64>) -> Vec<f64> {
    let omega = param(p, "omega", 1.0);
    let gamma = param(p, "gamma", 0.1);
    vec![y[1], -2.0 * gamma * y[1] - omega * omega * y[0]]
}

/// y' = ky: exponential growth or decay.
fn exponential_growth(_x: f64, y: &[f64], p: &HashMap<String, f64>) -> Vec<f64> {
    vec![param(p, "k", 0.5) * y[0]]
}

/// y' = ry(1 - y/K): logistic population growth.
fn logistic_equation(_x: f64, y: &[f64], p: &HashMap<String, f64>) -> Vec<f64> {
    let r = param(p, "r", 1.0);
    let cap = param(p, "K", 10.0);
    vec![r * y[0] * (1.0 - y[0] / cap)]
}

/// y'' - μ(1 - y²)y' + y = 0: Van der Pol oscillator.
fn van_der_pol(_x: f64, y: &[f64], p: &HashMap<String, f64>) -> Vec<f64> {
    let mu = param(p, "mu", 1.0);
    vec![y[1], mu * (1.0 - y[0] * y[0]) * y[1] - y[0]]
}

/// y'' + (g/L)sin(y) = 0: nonlinear pendulum.
fn simple_pendulum(_x: f64, y: &[f64], p: &HashMap<String, f64>) -> Vec<f64> {
    let g = param(p, "g", -9.81);
    let l = param(p, "L", 1.0);
    vec![y[1], -(g / l) * y[0].sin()]
}

/// Lorenz system: chaotic attractor.
fn lorenz_system(_x: f64, y: &[f64], p: &HashMap<String, f64>) -> Vec<f64> {
    let sigma = param(p, "sigma", 10.0);
    let rho = param(p, "rho", 28.0);
    let beta = param(p, "beta", 8.0 / 3.0);
    vec![
        sigma * (y[1] - y[0]),
        y[0] * (rho - y[2]) - y[1],
        y[0] * y[1] - beta * y[2],
    ]
}

/// Duffing oscillator: y'' + δy' + αy + βy³ = γcos(ωx).
fn duffing_oscillator(x: f64, y: &[f64], p: &HashMap<String, f64>) -> Vec<f64> {
    let delta = param(p, "delta", 0.5);
    let alpha = param(p, "alpha", -1.0);
    let beta = param(p, "beta", 1.0);
    let gamma = param(p, "gamma", 0.3);
    let omega = param(p, "omega", 1.2);
    vec![
        y[1],
        -delta * y[1] - alpha * y[0] - beta * y[0].powi(3) + gamma * (omega * x).cos(),
    ]
}

/// Lotka–Volterra predator-prey system.
fn lotka_volterra(_x: f64, y: &[f64], p: &HashMap<String, f64>) -> Vec<f64> {
    let alpha = param(p, "alpha", 1.0);
    let beta = param(p, "beta", 0.1);
    let gamma = param(p, "gamma", 1.5);
    let delta = param(p, "delta", 0.075);
    vec![
        alpha * y[0] - beta * y[0] * y[1],
        delta * y[0] * y[1] - gamma * y[1],
    ]
}

// --- Native recurrences ---

/// y_{n+1} = r·y_n: geometric growth.
fn geometric_growth(_n: i64, y: &[f64], p: &HashMap<String, f64>) -> f64 {
    param(p, "r", 1.5) * y[0]
}

/// y_{n+1} = r·y_n·(1 - y_n): logistic map.
fn logistic_map(_n: i64, y: &[f64], p: &HashMap<String, f64>) -> f64 {
    param(p, "r", 3.5) * y[0] * (1.0 - y[0])
}

/// y_{n+2} = y_{n+1} + y_n: Fibonacci recurrence.
fn fibonacci(_n: i64, y: &[f64], _p: &HashMap<String, f64>) -> f64 {
    y[1] + y[0]
}

fn native_ode_table() -> HashMap<&'static str, NativeOde> {
    let mut table: HashMap<&'static str, NativeOde> = HashMap::new();
    table.insert("harmonic_oscillator", harmonic_oscillator);
    table.insert("damped_oscillator", damped_oscillator);
    table.insert("exponential_growth", exponential_growth);
    table.insert("logistic_equation", logistic_equation);
    table.insert("van_der_pol", van_der_pol);
    table.insert("simple_pendulum", simple_pendulum);
    table.insert("lorenz_system", lorenz_system);
    table.insert("duffing_oscillator", duffing_oscillator);
    table.insert("lotka_volterra", lotka_volterra);
    table
}

fn native_recurrence_table() -> HashMap<&'static str, NativeRecurrence> {
    let mut table: HashMap<&'static str, NativeRecurrence> = HashMap::new();
    table.insert("geometric_growth", geometric_growth);
    table.insert("logistic_map", logistic_map);
    table.insert("fibonacci", fibonacci);
    table
}

fn record(
    key: &str,
    name: &str,
    formula: &str,
    order: usize,
    kind: EquationKind,
) -> EquationRecord {
    EquationRecord {
        key: key.to_string(),
        name: name.to_string(),
        formula: formula.to_string(),
        description: String::new(),
        order,
        parameters: BTreeMap::new(),
        expression: None,
        function_name: None,
        vector_expressions: None,
        vector_components: 1,
        default_initial_conditions: Vec::new(),
        default_domain: default_domain(),
        kind,
        variables: default_variables(),
    }
}

fn with_params(
    mut rec: EquationRecord,
    params: &[(&str, f64, &str)],
) -> EquationRecord {
    for (name, default, description) in params {
        rec.parameters.insert(
            name.to_string(),
            ParameterSpec {
                default: *default,
                description: description.to_string(),
            },
        );
    }
    rec
}

fn builtin_records() -> Vec<EquationRecord> {
    let mut records = Vec::new();

    let mut rec = record(
        "harmonic_oscillator",
        "Harmonic oscillator",
        "y'' + ω²y = 0",
        2,
        EquationKind::Ode,
    );
    rec.function_name = Some("harmonic_oscillator".into());
    rec.default_initial_conditions = vec![1.0, 0.0];
    records.push(with_params(rec, &[("omega", 1.0, "Angular frequency")]));

    let mut rec = record(
        "damped_oscillator",
        "Damped oscillator",
        "y'' + 2γy' + ω²y = 0",
        2,
        EquationKind::Ode,
    );
    rec.function_name = Some("damped_oscillator".into());
    rec.default_initial_conditions = vec![1.0, 0.0];
    records.push(with_params(
        rec,
        &[
            ("omega", 1.0, "Angular frequency"),
            ("gamma", 0.1, "Damping coefficient"),
        ],
    ));

    let mut rec = record(
        "exponential_growth",
        "Exponential growth",
        "y' = ky",
        1,
        EquationKind::Ode,
    );
    rec.expression = Some("k*y[0]".into());
    rec.default_initial_conditions = vec![1.0];
    records.push(with_params(rec, &[("k", 0.5, "Growth rate")]));

    let mut rec = record(
        "logistic_equation",
        "Logistic growth",
        "y' = ry(1 - y/K)",
        1,
        EquationKind::Ode,
    );
    rec.expression = Some("r*y[0]*(1 - y[0]/K)".into());
    rec.default_initial_conditions = vec![0.5];
    records.push(with_params(
        rec,
        &[("r", 1.0, "Growth rate"), ("K", 10.0, "Carrying capacity")],
    ));

    let mut rec = record(
        "van_der_pol",
        "Van der Pol oscillator",
        "y'' - μ(1 - y²)y' + y = 0",
        2,
        EquationKind::Ode,
    );
    rec.function_name = Some("van_der_pol".into());
    rec.default_initial_conditions = vec![2.0, 0.0];
    rec.default_domain = vec![0.0, 20.0];
    records.push(with_params(rec, &[("mu", 1.0, "Nonlinearity strength")]));

    let mut rec = record(
        "simple_pendulum",
        "Nonlinear pendulum",
        "y'' + (g/L)sin(y) = 0",
        2,
        EquationKind::Ode,
    );
    rec.function_name = Some("simple_pendulum".into());
    rec.default_initial_conditions = vec![0.5, 0.0];
    records.push(with_params(
        rec,
        &[
            ("g", -9.81, "Gravitational acceleration"),
            ("L", 1.0, "Pendulum length"),
        ],
    ));

    let mut rec = record(
        "lorenz_system",
        "Lorenz system",
        "x' = σ(y−x), y' = x(ρ−z) − y, z' = xy − βz",
        1,
        EquationKind::VectorOde,
    );
    rec.function_name = Some("lorenz_system".into());
    rec.vector_components = 3;
    rec.default_initial_conditions = vec![1.0, 1.0, 1.0];
    rec.default_domain = vec![0.0, 40.0];
    records.push(with_params(
        rec,
        &[
            ("sigma", 10.0, "Prandtl number"),
            ("rho", 28.0, "Rayleigh number"),
            ("beta", 8.0 / 3.0, "Geometric factor"),
        ],
    ));

    let mut rec = record(
        "lotka_volterra",
        "Lotka–Volterra predator-prey",
        "x' = αx − βxy, y' = δxy − γy",
        1,
        EquationKind::VectorOde,
    );
    rec.vector_expressions = Some(vec![
        "alpha*y[0] - beta*y[0]*y[1]".into(),
        "delta*y[0]*y[1] - gamma*y[1]".into(),
    ]);
    rec.vector_components = 2;
    rec.default_initial_conditions = vec![10.0, 5.0];
    rec.default_domain = vec![0.0, 15.0];
    records.push(with_params(
        rec,
        &[
            ("alpha", 1.0, "Prey growth rate"),
            ("beta", 0.1, "Predation rate"),
            ("gamma", 1.5, "Predator death rate"),
            ("delta", 0.075, "Predator growth rate"),
        ],
    ));

    let mut rec = record(
        "duffing_oscillator",
        "Duffing oscillator",
        "y'' + δy' + αy + βy³ = γcos(ωx)",
        2,
        EquationKind::Ode,
    );
    rec.function_name = Some("duffing_oscillator".into());
    rec.default_initial_conditions = vec![1.0, 0.0];
    rec.default_domain = vec![0.0, 50.0];
    records.push(with_params(
        rec,
        &[
            ("delta", 0.5, "Damping"),
            ("alpha", -1.0, "Linear stiffness"),
            ("beta", 1.0, "Cubic stiffness"),
            ("gamma", 0.3, "Forcing amplitude"),
            ("omega", 1.2, "Forcing frequency"),
        ],
    ));

    let mut rec = record(
        "geometric_growth",
        "Geometric growth",
        "yₙ₊₁ = r·yₙ",
        1,
        EquationKind::Difference,
    );
    rec.expression = Some("r*y[0]".into());
    rec.default_initial_conditions = vec![1.0];
    rec.default_domain = vec![0.0, 20.0];
    rec.variables = vec!["n".to_string()];
    records.push(with_params(rec, &[("r", 1.5, "Common ratio")]));

    let mut rec = record(
        "logistic_map",
        "Logistic map",
        "yₙ₊₁ = r·yₙ(1 − yₙ)",
        1,
        EquationKind::Difference,
    );
    rec.expression = Some("r*y[0]*(1 - y[0])".into());
    rec.default_initial_conditions = vec![0.5];
    rec.default_domain = vec![0.0, 50.0];
    rec.variables = vec!["n".to_string()];
    records.push(with_params(rec, &[("r", 3.5, "Growth parameter")]));

    let mut rec = record(
        "fibonacci",
        "Fibonacci recurrence",
        "yₙ₊₂ = yₙ₊₁ + yₙ",
        2,
        EquationKind::Difference,
    );
    rec.function_name = Some("fibonacci".into());
    rec.default_initial_conditions = vec![0.0, 1.0];
    rec.default_domain = vec![0.0, 20.0];
    rec.variables = vec!["n".to_string()];
    records.push(rec);

    let mut rec = record(
        "poisson_sin",
        "Poisson equation, sinusoidal source",
        "−∇²u = 2π²·sin(πx)·sin(πy)",
        1,
        EquationKind::Pde,
    );
    rec.expression = Some("2*pi**2*sin(pi*x)*sin(pi*y)".into());
    rec.default_domain = vec![0.0, 1.0, 0.0, 1.0];
    rec.variables = vec!["x".to_string(), "y".to_string()];
    records.push(rec);

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalogue_loads() {
        let registry = EquationRegistry::builtin();
        assert!(registry.len() >= 10);
        let rec = registry.get("harmonic_oscillator").unwrap();
        assert_eq!(rec.order, 2);
        assert_eq!(rec.kind, EquationKind::Ode);
        assert!(registry.native_ode("harmonic_oscillator").is_some());
        assert!(registry.native_recurrence("fibonacci").is_some());
    }

    #[test]
    fn vector_records_report_full_state_length() {
        let registry = EquationRegistry::builtin();
        let lorenz = registry.get("lorenz_system").unwrap();
        assert_eq!(lorenz.state_len(), 3);
        let lv = registry.get("lotka_volterra").unwrap();
        assert_eq!(lv.state_len(), 2);
    }

    #[test]
    fn invalid_records_are_skipped() {
        let mut both = record("both", "Both", "y' = ?", 1, EquationKind::Ode);
        both.expression = Some("y[0]".into());
        both.function_name = Some("harmonic_oscillator".into());
        let mut neither = record("neither", "Neither", "y' = ?", 1, EquationKind::Ode);
        neither.expression = None;
        let mut no_formula = record("blank", "Blank", "", 1, EquationKind::Ode);
        no_formula.expression = Some("y[0]".into());
        let mut good = record("good", "Good", "y' = y", 1, EquationKind::Ode);
        good.expression = Some("y[0]".into());

        let registry = EquationRegistry::from_records(vec![both, neither, no_formula, good]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("good").is_some());
    }

    #[test]
    fn json_records_round_trip() {
        let text = r#"[
            {
                "key": "decay",
                "name": "Decay",
                "formula": "y' = -ky",
                "order": 1,
                "expression": "-k*y[0]",
                "parameters": {"k": {"default": 0.3}},
                "default_initial_conditions": [1.0]
            }
        ]"#;
        let registry = EquationRegistry::from_json_str(text).unwrap();
        let rec = registry.get("decay").unwrap();
        assert_eq!(rec.expression.as_deref(), Some("-k*y[0]"));
        assert_eq!(rec.default_parameters()["k"], 0.3);
        assert_eq!(rec.default_domain, vec![0.0, 10.0]);
        assert_eq!(rec.kind, EquationKind::Ode);
    }

    #[test]
    fn reload_replaces_contents() {
        let mut registry = EquationRegistry::builtin();
        let mut rec = record("only", "Only", "y' = y", 1, EquationKind::Ode);
        rec.expression = Some("y[0]".into());
        registry.reload(vec![rec]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("harmonic_oscillator").is_none());
    }
}
