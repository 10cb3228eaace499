use ulid::Ulid;

use crate::model::ResourceStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    NotFound(Ulid),
    RequestNotFound(String),
    InvalidTimeRange,
    ResourceUnavailable {
        id: Ulid,
        status: ResourceStatus,
    },
    BookingConflict {
        id: Ulid,
        reference: String,
    },
    UnavailabilityConflict {
        id: Ulid,
        reason: Option<String>,
    },
    Validation(&'static str),
    LimitExceeded(&'static str),
    /// Durability layer failed after the internal retry; the operation was
    /// not applied and may be safely re-submitted.
    Retryable(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::RequestNotFound(reference) => {
                write!(f, "request not found: {reference}")
            }
            EngineError::InvalidTimeRange => {
                write!(f, "end time must be strictly after start time")
            }
            EngineError::ResourceUnavailable { id, status } => {
                write!(f, "resource {id} is not bookable: {status}")
            }
            EngineError::BookingConflict { reference, .. } => {
                write!(f, "overlaps existing booking {reference}")
            }
            EngineError::UnavailabilityConflict { id, reason } => match reason {
                Some(r) => write!(f, "resource unavailable ({r}) during period {id}"),
                None => write!(f, "resource unavailable during period {id}"),
            },
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Retryable(e) => write!(f, "transient persistence failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
