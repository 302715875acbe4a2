use thiserror::Error;

/// Result alias for the simulation core.
pub type SimResult<T> = std::result::Result<T, SimulationError>;

/// Failures raised by the statistics and simulation core.
///
/// The core never recovers from these itself (apart from the zero-sum weight
/// fallback inside `portfolio::sample_weights`); callers decide how to surface them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// Too few rows or columns to estimate statistics.
    #[error("Insufficient data: need at least 2 rows and 1 asset column, got {rows} rows x {columns} columns")]
    InsufficientData { rows: usize, columns: usize },

    /// A caller-supplied argument is out of range or inconsistent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A weight draw summed to exactly zero.
    #[error("Degenerate weight sample: drawn values sum to zero")]
    DegenerateSample,

    /// The portfolio variance came out meaningfully negative (non-PSD covariance).
    #[error("Invalid result: portfolio variance {radicand:e} is negative")]
    InvalidResult { radicand: f64 },
}

impl SimulationError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Short remediation hint for presentation layers.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => {
                "Widen the date range or select at least one ticker with two or more price observations."
            }
            Self::InvalidArgument(_) => "Check the trial count, periods per year and ticker list.",
            Self::DegenerateSample => "Retry the simulation with a different seed.",
            Self::InvalidResult { .. } => {
                "The return data looks corrupted; verify the input prices contain no bad values."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_shape() {
        let err = SimulationError::InsufficientData { rows: 1, columns: 3 };
        assert!(err.to_string().contains("1 rows x 3 columns"));
        assert!(!err.hint().is_empty());
    }

    #[test]
    fn test_invalid_argument_helper() {
        let err = SimulationError::invalid_argument("trial_count must be >= 1");
        assert_eq!(
            err,
            SimulationError::InvalidArgument("trial_count must be >= 1".to_string())
        );
    }
}
