//! Errors surfaced by the training engine to the transport.

use thiserror::Error;

use crate::domain::foundation::{ErrorCode, ValidationError};
use crate::domain::training::{PhaseConflict, SessionPhase};
use crate::ports::{AIError, RetrievalError, StoreError};

/// Failure of a single user event.
///
/// Every variant leaves the user's phase and transcript as they were before
/// the event, so the transport may deliver the reason and move on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Malformed input or unknown scenario key.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Event not allowed in the current phase.
    #[error("state conflict: {0}")]
    StateConflict(#[from] PhaseConflict),

    /// Generative client or retriever still failing after retries.
    #[error("external service failed: {0}")]
    ExternalService(String),

    /// Generative client refused the call for a reason a resubmit will not
    /// clear: spent budget, bad credentials, rejected request.
    #[error("external service refused: {0}")]
    ServiceRefused(String),

    /// Session store failed; the operation was not applied.
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl EngineError {
    /// Maps to the shared error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Validation(ValidationError::InvalidFormat { field, .. })
                if field == "scenario_key" =>
            {
                ErrorCode::UnknownScenario
            }
            EngineError::Validation(_) => ErrorCode::ValidationFailed,
            EngineError::StateConflict(conflict) if conflict.phase == SessionPhase::Finished => {
                ErrorCode::SessionFinished
            }
            EngineError::StateConflict(_) => ErrorCode::InvalidStateTransition,
            EngineError::ExternalService(_) | EngineError::ServiceRefused(_) => {
                ErrorCode::AIProviderError
            }
            EngineError::Persistence(StoreError::NotFound { .. }) => ErrorCode::SessionNotFound,
            EngineError::Persistence(_) => ErrorCode::DatabaseError,
        }
    }

    /// Text suitable for sending back to the trainee.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Validation(_) if self.code() == ErrorCode::UnknownScenario => {
                "There is no such scenario. Please pick one from the menu.".to_string()
            }
            EngineError::Validation(err) => err.to_string(),
            EngineError::StateConflict(conflict) => conflict.reason().to_string(),
            EngineError::ExternalService(_) => {
                "The client is not responding right now. Please send your message again.".to_string()
            }
            EngineError::ServiceRefused(_) => {
                "Training is unavailable right now. Please try again later.".to_string()
            }
            EngineError::Persistence(_) => {
                "Something went wrong on our side. Please try again later.".to_string()
            }
        }
    }

    /// Only external service failures may succeed on a plain resubmit.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ExternalService(_))
    }
}

impl From<AIError> for EngineError {
    fn from(err: AIError) -> Self {
        if err.is_retryable() {
            EngineError::ExternalService(err.to_string())
        } else {
            EngineError::ServiceRefused(err.to_string())
        }
    }
}

impl From<RetrievalError> for EngineError {
    fn from(err: RetrievalError) -> Self {
        EngineError::ExternalService(err.to_string())
    }
}
