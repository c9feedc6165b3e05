use ulid::Ulid;

use crate::limits::*;
use crate::model::{Ms, ScheduleState, Span};

use super::EngineError;

pub(super) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::Validation("timestamp out of range"));
    }
    if span.start >= span.end {
        return Err(EngineError::Validation("start must be before end"));
    }
    if span.start % MINUTE_MS != 0 || span.end % MINUTE_MS != 0 {
        return Err(EngineError::Validation("times must be whole minutes"));
    }
    Ok(())
}

/// Duration must land in the bookable range and match the span exactly.
pub(super) fn validate_duration(span: &Span) -> Result<i64, EngineError> {
    let duration_min = span.duration_min();
    if !(MIN_DURATION_MIN..=MAX_DURATION_MIN).contains(&duration_min) {
        return Err(EngineError::Validation("duration out of range"));
    }
    if duration_min * MINUTE_MS != span.duration_ms() {
        return Err(EngineError::Validation("duration must be whole minutes"));
    }
    if !span.same_day() {
        return Err(EngineError::Validation("session may not cross midnight"));
    }
    Ok(duration_min)
}

pub(super) fn validate_lead_time(span: &Span, now: Ms) -> Result<(), EngineError> {
    if span.start < now + BOOKING_LEAD_MS {
        return Err(EngineError::Validation("start time is too soon"));
    }
    Ok(())
}

/// First active session of `sched` overlapping `span`, ignoring `exclude`
/// (the session being moved, when re-validating a reschedule).
pub(super) fn find_conflict(
    sched: &ScheduleState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    sched
        .overlapping(span)
        .find(|e| Some(e.session_id) != exclude)
        .map(|e| e.session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScheduleEntry;

    const H: Ms = 3_600_000;

    fn sched_with(spans: &[(Ms, Ms)]) -> (ScheduleState, Vec<Ulid>) {
        let mut sched = ScheduleState::new(Ulid::new());
        let mut ids = Vec::new();
        for &(start, end) in spans {
            let id = Ulid::new();
            sched.insert_entry(ScheduleEntry {
                session_id: id,
                span: Span::new(start, end),
            });
            ids.push(id);
        }
        (sched, ids)
    }

    #[test]
    fn detects_overlap() {
        let (sched, ids) = sched_with(&[(10 * H, 11 * H)]);
        // 10:30–11:30 clashes
        let hit = find_conflict(&sched, &Span::new(10 * H + H / 2, 11 * H + H / 2), None);
        assert_eq!(hit, Some(ids[0]));
    }

    #[test]
    fn back_to_back_is_free() {
        let (sched, _) = sched_with(&[(10 * H, 11 * H)]);
        assert!(find_conflict(&sched, &Span::new(11 * H, 12 * H), None).is_none());
        assert!(find_conflict(&sched, &Span::new(9 * H, 10 * H), None).is_none());
    }

    #[test]
    fn exclusion_skips_the_moved_session() {
        let (sched, ids) = sched_with(&[(10 * H, 11 * H)]);
        // moving the same session onto an overlapping time is not a self-conflict
        assert!(find_conflict(&sched, &Span::new(10 * H, 12 * H), Some(ids[0])).is_none());
    }

    #[test]
    fn duration_bounds() {
        // 10 minutes — too short
        assert!(validate_duration(&Span::new(0, 10 * MINUTE_MS)).is_err());
        // 181 minutes — too long
        assert!(validate_duration(&Span::new(0, 181 * MINUTE_MS)).is_err());
        assert_eq!(validate_duration(&Span::new(0, 60 * MINUTE_MS)).unwrap(), 60);
    }

    #[test]
    fn overnight_span_rejected() {
        let span = Span::new(DAY_MS - 30 * MINUTE_MS, DAY_MS + 30 * MINUTE_MS);
        assert!(validate_duration(&span).is_err());
    }

    #[test]
    fn lead_time_enforced() {
        let now = 100 * MINUTE_MS;
        let too_soon = Span::new(now + MINUTE_MS, now + 61 * MINUTE_MS);
        assert!(validate_lead_time(&too_soon, now).is_err());
        let fine = Span::new(now + BOOKING_LEAD_MS, now + BOOKING_LEAD_MS + 60 * MINUTE_MS);
        assert!(validate_lead_time(&fine, now).is_ok());
    }
}
