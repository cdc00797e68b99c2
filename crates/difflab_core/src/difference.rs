//! Difference-equation (recurrence) iteration.

use serde::{Deserialize, Serialize};

use crate::traits::Recurrence;

/// Sampled recurrence solution.
///
/// `y` is shaped `(order, n_points)`: the full sliding window is
/// recorded at every step, keeping the layout interchangeable with
/// [`crate::ode::OdeSolution`] for downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferenceSolution {
    pub n: Vec<f64>,
    pub y: Vec<Vec<f64>>,
    pub success: bool,
    pub message: String,
}

impl DifferenceSolution {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            n: Vec::new(),
            y: Vec::new(),
            success: false,
            message: message.into(),
        }
    }

    pub fn n_points(&self) -> usize {
        self.n.len()
    }

    /// One window slot across all recorded steps.
    pub fn component(&self, index: usize) -> &[f64] {
        &self.y[index]
    }
}

/// Iterates `y_{n+order} = f(n, window)` from `n_min` to `n_max`
/// inclusive.
///
/// Never raises: a degenerate domain or a short initial window yields an
/// explicit failed solution, and a mid-iteration evaluation failure
/// returns the history computed so far with `success = false`; work
/// already done is not discarded.
pub fn solve_difference<R: Recurrence + ?Sized>(
    f: &R,
    n_min: i64,
    n_max: i64,
    y0: &[f64],
) -> DifferenceSolution {
    let order = f.order();
    if n_min >= n_max {
        return DifferenceSolution::failed(format!(
            "n_min ({n_min}) must be less than n_max ({n_max})"
        ));
    }
    if y0.len() < order {
        return DifferenceSolution::failed(format!(
            "need {order} initial value(s) for an order-{order} recurrence, got {}",
            y0.len()
        ));
    }

    let n_points = (n_max - n_min + 1) as usize;
    let n: Vec<f64> = (0..n_points).map(|i| (n_min + i as i64) as f64).collect();
    let mut y = vec![vec![0.0; n_points]; order];
    let mut window = y0[..order].to_vec();
    for (k, row) in y.iter_mut().enumerate() {
        row[0] = window[k];
    }

    for i in 1..n_points {
        let n_curr = n_min + i as i64 - 1;
        match f.next(n_curr, &window) {
            Ok(next) => {
                window.rotate_left(1);
                window[order - 1] = next;
                for (k, row) in y.iter_mut().enumerate() {
                    row[i] = window[k];
                }
            }
            Err(err) => {
                log::error!("recurrence failed at n = {n_curr}: {err}");
                let n = n[..i].to_vec();
                let y = y.into_iter().map(|row| row[..i].to_vec()).collect();
                return DifferenceSolution {
                    n,
                    y,
                    success: false,
                    message: err.0,
                };
            }
        }
    }

    log::info!("difference equation solved: {n_points} points from n={n_min} to n={n_max}");
    DifferenceSolution {
        n,
        y,
        success: true,
        message: "solved successfully".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EquationRegistry;
    use crate::resolver::{resolve_recurrence, EquationSource};
    use std::collections::HashMap;

    fn geometric(r: f64) -> crate::resolver::ResolvedRecurrence {
        let mut params = HashMap::new();
        params.insert("r".to_string(), r);
        resolve_recurrence(
            &EquationSource::Expression("r*y[0]".into()),
            1,
            &params,
            &EquationRegistry::new(),
        )
        .unwrap()
    }

    #[test]
    fn geometric_growth_matches_closed_form() {
        let f = geometric(1.5);
        let sol = solve_difference(&f, 0, 20, &[1.0]);
        assert!(sol.success);
        assert_eq!(sol.n_points(), 21);
        let last = *sol.component(0).last().unwrap();
        let exact = 1.5f64.powi(20);
        assert!((last - exact).abs() < 1e-9 * exact);
    }

    #[test]
    fn fibonacci_window_is_recorded_fully() {
        let registry = EquationRegistry::builtin();
        let f = resolve_recurrence(
            &EquationSource::Registered("fibonacci".into()),
            0,
            &HashMap::new(),
            &registry,
        )
        .unwrap();
        let sol = solve_difference(&f, 0, 10, &[0.0, 1.0]);
        assert!(sol.success);
        // window rows: [y_n, y_{n+1}] per step
        assert_eq!(sol.component(0)[..8], [0.0, 1.0, 1.0, 2.0, 3.0, 5.0, 8.0, 13.0]);
        assert_eq!(sol.component(1)[..8], [1.0, 1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0]);
    }

    #[test]
    fn degenerate_domain_fails_without_iterating() {
        let f = geometric(2.0);
        let sol = solve_difference(&f, 5, 5, &[1.0]);
        assert!(!sol.success);
        assert!(sol.n.is_empty());
        assert!(sol.message.contains("n_min"));
    }

    #[test]
    fn short_initial_window_fails_explicitly() {
        let registry = EquationRegistry::builtin();
        let f = resolve_recurrence(
            &EquationSource::Registered("fibonacci".into()),
            0,
            &HashMap::new(),
            &registry,
        )
        .unwrap();
        let sol = solve_difference(&f, 0, 10, &[1.0]);
        assert!(!sol.success);
    }

    #[test]
    fn partial_history_survives_evaluation_failure() {
        // y[n] leaves the window once n reaches the order
        let f = resolve_recurrence(
            &EquationSource::Expression("y[n]".into()),
            1,
            &HashMap::new(),
            &EquationRegistry::new(),
        )
        .unwrap();
        let sol = solve_difference(&f, 0, 10, &[3.0]);
        assert!(!sol.success);
        // n = 0 works (y[0]); n = 1 indexes out of the window
        assert_eq!(sol.n_points(), 2);
        assert_eq!(sol.component(0), [3.0, 3.0]);
        assert!(sol.message.contains("out of range"));
    }
}
