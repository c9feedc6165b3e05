use ulid::Ulid;

use crate::model::{Ms, SessionStatus};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input, rejected before any side effect.
    Validation(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The student already has an overlapping active session (seen at read time).
    StudentConflict(Ulid),
    /// The tutor already has an overlapping active session (seen at read time).
    TutorConflict(Ulid),
    /// The same overlap discovered at commit time, after an optimistic check
    /// passed — a competing booking won the race.
    SlotTaken,
    /// No tutor passes the eligibility filter for the requested slot.
    NotEligible,
    /// Proposed time falls outside the tutor's declared availability.
    NotAvailable,
    NoProposal,
    /// Operation forbidden by the session's current status.
    WrongStatus(SessionStatus),
    /// Completion attempted before the session's end time.
    TooEarly(Ms),
    /// The acting user is not a party to the session.
    NotParticipant(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::StudentConflict(id) => {
                write!(f, "student has a conflicting session: {id}")
            }
            EngineError::TutorConflict(id) => {
                write!(f, "tutor has a conflicting session: {id}")
            }
            EngineError::SlotTaken => write!(f, "slot was just taken by a competing booking"),
            EngineError::NotEligible => write!(f, "no eligible tutor for the requested slot"),
            EngineError::NotAvailable => {
                write!(f, "time is outside the tutor's declared availability")
            }
            EngineError::NoProposal => write!(f, "session has no pending proposal"),
            EngineError::WrongStatus(status) => {
                write!(f, "operation not allowed in status {}", status.as_str())
            }
            EngineError::TooEarly(ends_at) => {
                write!(f, "session cannot be completed before its end time ({ends_at})")
            }
            EngineError::NotParticipant(user_id) => {
                write!(f, "user {user_id} is not a party to this session")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
