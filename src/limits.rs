//! Hard caps. These are operational guardrails, not business rules:
//! hitting one returns `EngineError::LimitExceeded` and changes nothing.

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_REQUESTS: usize = 100_000;
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 50_000;
pub const MAX_UNAVAILABILITY_PER_RESOURCE: usize = 10_000;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_REASON_LEN: usize = 1_024;
pub const MAX_REMARKS_LEN: usize = 4_096;
