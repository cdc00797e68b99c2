use thiserror::Error;

/// Errors raised while turning expression text into a compiled form.
///
/// Every variant is produced before any numeric work happens: either the
/// text fails to parse, it contains a construct the sandbox grammar cannot
/// represent, or the post-compile probe evaluation fails.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("syntax error in expression: {0}")]
    Syntax(String),
    #[error("disallowed construct in expression: {0}")]
    Disallowed(String),
    #[error("expression evaluation failed: {0}")]
    Evaluation(String),
}

/// Runtime failure while evaluating a compiled expression.
///
/// Surfaces from the interior of a solver loop (for example a state
/// subscript that leaves the valid range mid-integration) and is wrapped
/// into [`EngineError::SolverFailed`] by the engine that hit it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct EvalError(pub String);

/// Error taxonomy of the solving engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad expression text, detected before any evaluation.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Accumulated pre-flight violations, always reported as a batch.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    /// The integrator, shooting root-finder, or sparse solve did not
    /// converge. Carries the underlying diagnostic message.
    #[error("solver failed: {0}")]
    SolverFailed(String),
    /// Registry records or request fields used inconsistently.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Lift an expression runtime failure into a solver failure.
    pub(crate) fn rhs_failed(err: EvalError) -> Self {
        EngineError::SolverFailed(format!("right-hand side evaluation failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_joins_messages() {
        let err = EngineError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(format!("{err}"), "validation failed: a; b");
    }

    #[test]
    fn parse_error_is_transparent() {
        let err = EngineError::from(ParseError::Syntax("unexpected ')'".into()));
        assert!(format!("{err}").contains("unexpected ')'"));
    }
}
