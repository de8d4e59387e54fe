use thiserror::Error;

/// Failures raised while assigning global variable addresses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressingError {
    #[error("addresses already assigned for model `{model}`")]
    Duplicate { model: String },

    #[error("model `{model}` cannot change after addressing has been finalized")]
    LateMutation { model: String },

    #[error("model `{model}` already has an element with id {id}")]
    DuplicateElement { model: String, id: i64 },
}

/// Failures reported by a sparse LU backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactorError {
    #[error("symbolic analysis failed: {0}")]
    Symbolic(&'static str),

    #[error("numeric factorization failed: {0}")]
    Numeric(&'static str),

    #[error("matrix pattern differs from the analysed one")]
    PatternMismatch,

    #[error("solve requested before factorization")]
    NotFactored,

    #[error("solution contains non-finite values")]
    NonFinite,
}

#[derive(Error, Debug)]
pub enum SolveError {
    #[error(transparent)]
    Addressing(#[from] AddressingError),

    #[error("singular matrix in {what}: {source}")]
    SingularMatrix {
        what: &'static str,
        #[source]
        source: FactorError,
    },

    #[error("{routine} did not converge after {iterations} iterations at t = {t} (mismatch {mismatch:e})")]
    Convergence {
        routine: &'static str,
        iterations: usize,
        t: f64,
        mismatch: f64,
    },

    #[error("topology error: {what}")]
    Topology { what: String },

    #[error("invalid data for {model}: {what}")]
    InvalidData { model: &'static str, what: String },

    #[error("invalid settings: {what}")]
    Config { what: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SolveResult<T> = Result<T, SolveError>;

impl SolveError {
    /// True for errors a time-domain step may recover from by shrinking `h`.
    pub fn is_step_recoverable(&self) -> bool {
        matches!(
            self,
            SolveError::SingularMatrix { .. } | SolveError::Convergence { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressing_errors_convert() {
        let e: SolveError = AddressingError::LateMutation {
            model: "PQ".into(),
        }
        .into();
        assert!(matches!(e, SolveError::Addressing(_)));
        assert!(e.to_string().contains("PQ"));
        assert!(!e.is_step_recoverable());
    }

    #[test]
    fn singular_is_recoverable_in_steps() {
        let e = SolveError::SingularMatrix {
            what: "Gy",
            source: FactorError::Numeric("zero pivot"),
        };
        assert!(e.is_step_recoverable());
        assert!(e.to_string().contains("Gy"));
    }
}
