//! Typed failures for the projection core.
//!
//! Pure stages (primes, triads, phase math, projection) fail fast with these.
//! The ensemble and validator degrade instead of returning them.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    /// Caller supplied parameters outside the model's domain.
    #[error("domain error: {0}")]
    Domain(DomainError),

    /// External price data was missing or unusable after filtering.
    #[error("data error: {0}")]
    Data(String),

    /// Internal numeric guard tripped (zero total weight and similar).
    #[error("computation error: {0}")]
    Computation(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("depth prime {0} is not prime")]
    NotPrime(u32),

    #[error("depth prime {0} is not in the prime table")]
    NotInTable(u32),

    #[error("historical price input is empty")]
    EmptyHistory,

    #[error("steps must be positive")]
    ZeroSteps,

    #[error("projection count must be positive")]
    ZeroProjectionCount,

    #[error("decimal precision {0} exceeds 12")]
    Precision(u32),

    #[error("frequency {0} Hz must be positive and finite")]
    Frequency(f64),

    #[error("lambda schedule is empty")]
    EmptyLambdaSchedule,

    #[error("last price {0} must be positive and finite")]
    LastPrice(f64),
}

impl From<DomainError> for ProjectionError {
    fn from(err: DomainError) -> Self {
        ProjectionError::Domain(err)
    }
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
