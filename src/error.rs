//! Engine-level errors

use thiserror::Error;

use crate::solution::Solution;

/// Fatal integration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrationError {
    #[error("Step at t = {t} rejected {rejections} times in a row (last cause: {cause})")]
    ConvergenceFailure {
        t: f64,
        rejections: usize,
        cause: String,
    },

    #[error("Maximum number of steps ({0}) exceeded")]
    MaxStepsExceeded(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Analytic Jacobian requested but the system provides none")]
    MissingJacobian,

    #[error("Selector returned algorithm index {index} of {available}")]
    InvalidSelection { index: usize, available: usize },
}

/// Fatal error together with everything integrated up to it
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct SolveFailure {
    #[source]
    pub error: IntegrationError,
    /// Saved points, dense output and events up to the last accepted step
    pub partial: Solution,
}

impl SolveFailure {
    pub fn new(error: IntegrationError, partial: Solution) -> Self {
        Self { error, partial }
    }
}
