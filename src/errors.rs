use thiserror::Error;

/// error taxonomy for the lending core
///
/// state-conflict reasons are a stable contract: callers and tests match on
/// the exact string (e.g. "Liquidation already initiated"), so the Display
/// impl for that variant is the bare reason.
#[derive(Error, Debug)]
pub enum LendingError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("not authorized: {message}")]
    Authorization { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{reason}")]
    StateConflict { reason: String },

    #[error("{service} failure: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },
}

impl LendingError {
    pub fn validation(message: impl Into<String>) -> Self {
        LendingError::Validation {
            message: message.into(),
        }
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        LendingError::Authorization {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LendingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn state_conflict(reason: impl Into<String>) -> Self {
        LendingError::StateConflict {
            reason: reason.into(),
        }
    }

    pub fn external(service: &'static str, message: impl Into<String>) -> Self {
        LendingError::ExternalService {
            service,
            message: message.into(),
        }
    }

    /// fixed reason string for state-conflict errors, if this is one
    pub fn conflict_reason(&self) -> Option<&str> {
        match self {
            LendingError::StateConflict { reason } => Some(reason),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LendingError>;
