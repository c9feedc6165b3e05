use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Milliseconds in the single operating timezone — the only time type.
/// Day boundaries fall on multiples of 86_400_000.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn duration_min(&self) -> i64 {
        self.duration_ms() / crate::limits::MINUTE_MS
    }

    /// Half-open overlap: back-to-back spans do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Both endpoints fall on the same calendar day of the operating timezone.
    pub fn same_day(&self) -> bool {
        let day = self.start.div_euclid(crate::limits::DAY_MS);
        // end is exclusive, so a span ending exactly at midnight still counts
        (self.end - 1).div_euclid(crate::limits::DAY_MS) == day
    }
}

// ── Users & subjects ─────────────────────────────────────────────

/// Identity-adjacent record. Owned by the identity collaborator; the engine
/// consumes the role flags read-only when matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Ulid,
    pub tutor_approved: bool,
    pub verified: bool,
    pub deactivated: bool,
}

impl UserRecord {
    /// A tutor that may appear in slot matching at all.
    pub fn is_eligible_tutor(&self) -> bool {
        self.tutor_approved && self.verified && !self.deactivated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Ulid,
    pub name: String,
}

// ── Sessions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Pending,
    Accepted,
    Completed,
    Cancelled,
}

impl SessionStatus {
    /// Active sessions still consume scheduling capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Pending | SessionStatus::Accepted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Accepted => "accepted",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

/// A pending request to move a session, awaiting counterpart confirmation.
/// Accepting or rejecting removes it, so a stored proposal is always open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub span: Span,
    pub note: Option<String>,
    pub proposed_by: Ulid,
}

/// The booking entity. Never physically deleted — terminal rows stay for
/// history and downstream analytics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Ulid,
    pub student_id: Ulid,
    pub tutor_id: Ulid,
    pub subject_id: Ulid,
    pub span: Span,
    pub duration_min: i64,
    pub status: SessionStatus,
    pub cancel_reason: Option<String>,
    pub proposal: Option<Proposal>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_party(&self, user_id: Ulid) -> bool {
        self.student_id == user_id || self.tutor_id == user_id
    }

    /// The other side of the table, if `user_id` is a party at all.
    pub fn counterpart(&self, user_id: Ulid) -> Option<Ulid> {
        if user_id == self.student_id {
            Some(self.tutor_id)
        } else if user_id == self.tutor_id {
            Some(self.student_id)
        } else {
            None
        }
    }
}

// ── Per-user schedule ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub session_id: Ulid,
    pub span: Span,
}

/// A user's active bookings plus (for tutors) the declared weekly schedule.
/// Entries are kept sorted by `span.start`; every session mutation goes
/// through both parties' write locks, so this vector always mirrors the set
/// of active sessions for the user.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    pub user_id: Ulid,
    /// Declared-availability JSON exactly as persisted; round-trips byte for
    /// byte.
    pub availability_raw: Option<String>,
    /// Parsed form of `availability_raw`; `None` when absent or malformed.
    pub availability: Option<crate::availability::WeeklyAvailability>,
    pub entries: Vec<ScheduleEntry>,
}

impl ScheduleState {
    pub fn new(user_id: Ulid) -> Self {
        Self {
            user_id,
            availability_raw: None,
            availability: None,
            entries: Vec::new(),
        }
    }

    /// Insert an active-session entry maintaining sort order by span.start.
    pub fn insert_entry(&mut self, entry: ScheduleEntry) {
        let pos = self
            .entries
            .binary_search_by_key(&entry.span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    pub fn remove_entry(&mut self, session_id: Ulid) -> Option<ScheduleEntry> {
        if let Some(pos) = self.entries.iter().position(|e| e.session_id == session_id) {
            Some(self.entries.remove(pos))
        } else {
            None
        }
    }

    /// Entries whose span overlaps the query window. Binary search skips
    /// entries starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &ScheduleEntry> {
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }

    /// Count active sessions starting inside `[from, from + horizon)`.
    pub fn load_within(&self, from: Ms, horizon: Ms) -> usize {
        self.entries
            .iter()
            .filter(|e| e.span.start >= from && e.span.start < from + horizon)
            .count()
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserUpserted {
        id: Ulid,
        tutor_approved: bool,
        verified: bool,
        deactivated: bool,
    },
    SubjectCreated {
        id: Ulid,
        name: String,
    },
    TutorSubjectLinked {
        tutor_id: Ulid,
        subject_id: Ulid,
    },
    TutorSubjectUnlinked {
        tutor_id: Ulid,
        subject_id: Ulid,
    },
    /// Raw JSON is persisted verbatim so the on-disk format round-trips.
    AvailabilityDeclared {
        tutor_id: Ulid,
        weekly_json: String,
    },
    SessionBooked {
        id: Ulid,
        student_id: Ulid,
        tutor_id: Ulid,
        subject_id: Ulid,
        span: Span,
        duration_min: i64,
    },
    SessionAccepted {
        id: Ulid,
    },
    RescheduleProposed {
        id: Ulid,
        by_user_id: Ulid,
        span: Span,
        note: Option<String>,
    },
    ProposalAccepted {
        id: Ulid,
    },
    ProposalRejected {
        id: Ulid,
    },
    SessionCancelled {
        id: Ulid,
        by_user_id: Ulid,
        reason: Option<String>,
    },
    SessionCompleted {
        id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// One bookable slot, merged across tutors by exact `(start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub span: Span,
    pub tutor_ids: Vec<Ulid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{DAY_MS, MINUTE_MS};

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        let hour = Span::new(0, 60 * MINUTE_MS);
        assert_eq!(hour.duration_min(), 60);
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn span_same_day() {
        let morning = Span::new(9 * 3_600_000, 10 * 3_600_000);
        assert!(morning.same_day());

        let to_midnight = Span::new(23 * 3_600_000, DAY_MS);
        assert!(to_midnight.same_day()); // exclusive end at midnight is fine

        let overnight = Span::new(23 * 3_600_000, DAY_MS + 3_600_000);
        assert!(!overnight.same_day());
    }

    #[test]
    fn eligible_tutor_flags() {
        let mut u = UserRecord {
            id: Ulid::new(),
            tutor_approved: true,
            verified: true,
            deactivated: false,
        };
        assert!(u.is_eligible_tutor());
        u.deactivated = true;
        assert!(!u.is_eligible_tutor());
        u.deactivated = false;
        u.verified = false;
        assert!(!u.is_eligible_tutor());
    }

    #[test]
    fn status_activity() {
        assert!(SessionStatus::Pending.is_active());
        assert!(SessionStatus::Accepted.is_active());
        assert!(!SessionStatus::Completed.is_active());
        assert!(!SessionStatus::Cancelled.is_active());
    }

    #[test]
    fn session_counterpart() {
        let s = Session {
            id: Ulid::new(),
            student_id: Ulid::new(),
            tutor_id: Ulid::new(),
            subject_id: Ulid::new(),
            span: Span::new(0, MINUTE_MS * 60),
            duration_min: 60,
            status: SessionStatus::Pending,
            cancel_reason: None,
            proposal: None,
        };
        assert_eq!(s.counterpart(s.student_id), Some(s.tutor_id));
        assert_eq!(s.counterpart(s.tutor_id), Some(s.student_id));
        assert_eq!(s.counterpart(Ulid::new()), None);
    }

    #[test]
    fn schedule_entry_ordering() {
        let mut sched = ScheduleState::new(Ulid::new());
        sched.insert_entry(ScheduleEntry {
            session_id: Ulid::new(),
            span: Span::new(300, 400),
        });
        sched.insert_entry(ScheduleEntry {
            session_id: Ulid::new(),
            span: Span::new(100, 200),
        });
        sched.insert_entry(ScheduleEntry {
            session_id: Ulid::new(),
            span: Span::new(200, 300),
        });
        assert_eq!(sched.entries[0].span.start, 100);
        assert_eq!(sched.entries[1].span.start, 200);
        assert_eq!(sched.entries[2].span.start, 300);
    }

    #[test]
    fn schedule_remove() {
        let mut sched = ScheduleState::new(Ulid::new());
        let id = Ulid::new();
        sched.insert_entry(ScheduleEntry {
            session_id: id,
            span: Span::new(100, 200),
        });
        assert!(sched.remove_entry(id).is_some());
        assert!(sched.entries.is_empty());
        assert!(sched.remove_entry(id).is_none());
    }

    #[test]
    fn schedule_overlapping_prunes() {
        let mut sched = ScheduleState::new(Ulid::new());
        for (start, end) in [(100, 200), (450, 600), (1000, 1100)] {
            sched.insert_entry(ScheduleEntry {
                session_id: Ulid::new(),
                span: Span::new(start, end),
            });
        }
        let hits: Vec<_> = sched.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));

        // entry ending exactly at query.start is not a hit (half-open)
        let hits: Vec<_> = sched.overlapping(&Span::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn schedule_load_counts_window_starts_only() {
        let mut sched = ScheduleState::new(Ulid::new());
        for day in [0, 2, 9] {
            sched.insert_entry(ScheduleEntry {
                session_id: Ulid::new(),
                span: Span::new(day * DAY_MS + 3_600_000, day * DAY_MS + 2 * 3_600_000),
            });
        }
        // horizon of 7 days from t=0 catches days 0 and 2, not day 9
        assert_eq!(sched.load_within(0, 7 * DAY_MS), 2);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::SessionBooked {
            id: Ulid::new(),
            student_id: Ulid::new(),
            tutor_id: Ulid::new(),
            subject_id: Ulid::new(),
            span: Span::new(1000, 4_600_000),
            duration_min: 60,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
