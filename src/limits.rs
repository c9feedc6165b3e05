use crate::model::Ms;

// ── Time sanity bounds ───────────────────────────────────────────

/// Earliest timestamp the engine accepts (1970-01-01).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// Latest timestamp the engine accepts (~year 2100).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

// ── Session bounds ───────────────────────────────────────────────

/// Shortest bookable session.
pub const MIN_DURATION_MIN: i64 = 15;
/// Longest bookable session.
pub const MAX_DURATION_MIN: i64 = 180;
/// A booking must start at least this far in the future.
pub const BOOKING_LEAD_MS: Ms = 5 * MINUTE_MS;
/// Active sessions within this horizon count toward a tutor's load.
pub const LOAD_HORIZON_MS: Ms = 7 * DAY_MS;

// ── Slot enumeration bounds ──────────────────────────────────────

pub const MIN_WINDOW_DAYS: i64 = 1;
pub const MAX_WINDOW_DAYS: i64 = 14;
pub const MIN_STEP_MIN: i64 = 5;
pub const MAX_STEP_MIN: i64 = 60;
/// Cap on the number of slot rows returned by one query.
pub const MAX_SLOT_RESULTS: usize = 120;

// ── String and record limits ─────────────────────────────────────

pub const MAX_SUBJECT_NAME_LEN: usize = 256;
pub const MAX_NOTE_LEN: usize = 1024;
pub const MAX_REASON_LEN: usize = 1024;
/// Raw declared-availability JSON blobs above this size are treated as unparseable.
pub const MAX_AVAILABILITY_JSON_LEN: usize = 16 * 1024;

pub const MAX_USERS_PER_TENANT: usize = 100_000;
pub const MAX_SUBJECTS_PER_TENANT: usize = 10_000;
pub const MAX_SESSIONS_PER_USER: usize = 10_000;

// ── Tenancy ──────────────────────────────────────────────────────

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;
