use thiserror::Error;

use crate::store::StoreError;

/// Canonical error type exposed by the commission engine.
///
/// Domain rule violations (below minimum, cap reached, already paid) are not
/// errors: they surface as [`SkipReason`] values inside operation outcomes.
#[derive(Debug, Error)]
pub enum CommissionError {
    /// Missing or malformed input; rejected before any effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced entity is absent; batch passes skip the unit and continue.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Backing store failed to read or write.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl CommissionError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CommissionError::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CommissionError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Why a unit of work produced no credit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    BelowMinimum,
    DurationExceeded,
    CapReached,
    AlreadyPaid,
    Inactive,
    Blocked,
    Excluded,
    NotQualified,
    MonthlyLimit,
    NothingToPay,
}

pub type Result<T, E = CommissionError> = std::result::Result<T, E>;
