use std::collections::BTreeMap;

use ulid::Ulid;

use crate::availability::{day_start, weekday_of_day};
use crate::limits::*;
use crate::model::{Ms, Slot, Span};

use super::conflict::find_conflict;
use super::{Engine, EngineError};

impl Engine {
    /// Enumerate bookable slots for a subject: every step-aligned start time
    /// inside some eligible tutor's declared window that fits the duration,
    /// stays on one calendar day, lies in the future, and clears the tutor's
    /// active sessions. Slots are merged across tutors by exact `(start,
    /// end)` so the caller can show an aggregate count before a specific
    /// tutor is committed.
    ///
    /// `window_start` defaults to now; out-of-range arguments are clamped,
    /// not rejected. The result is sorted by start time and capped.
    pub async fn compute_available_slots(
        &self,
        subject_id: Ulid,
        duration_min: i64,
        window_start: Option<Ms>,
        window_days: i64,
        step_min: i64,
    ) -> Result<Vec<Slot>, EngineError> {
        let now = self.now_ms();
        let duration_min = duration_min.clamp(MIN_DURATION_MIN, MAX_DURATION_MIN);
        let window_days = window_days.clamp(MIN_WINDOW_DAYS, MAX_WINDOW_DAYS);
        let step_min = step_min.clamp(MIN_STEP_MIN, MAX_STEP_MIN);

        let from = window_start.unwrap_or(now).max(now);
        if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&from) {
            return Err(EngineError::Validation("window start out of range"));
        }

        let tutors: Vec<Ulid> = self
            .subject_tutors
            .get(&subject_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let duration_ms = duration_min * MINUTE_MS;
        let step_ms = step_min * MINUTE_MS;
        let first_day = day_start(from);

        // (start, end) → tutors free at that exact slot
        let mut merged: BTreeMap<(Ms, Ms), Vec<Ulid>> = BTreeMap::new();

        for tutor_id in tutors {
            let eligible = self
                .users
                .get(&tutor_id)
                .map(|u| u.is_eligible_tutor())
                .unwrap_or(false);
            if !eligible {
                continue;
            }
            let Some(sched) = self.get_schedule(&tutor_id) else {
                continue;
            };
            let guard = sched.read().await;
            let Some(availability) = guard.availability.as_ref() else {
                continue;
            };

            for day_offset in 0..window_days {
                let base = first_day + day_offset * DAY_MS;
                let weekday = weekday_of_day(base / DAY_MS);
                for window in availability.windows(weekday) {
                    let window_open = base + window.start_min as Ms * MINUTE_MS;
                    let window_close = base + window.end_min as Ms * MINUTE_MS;
                    let mut start = window_open;
                    // candidate must fit entirely within this one window,
                    // which also keeps it on a single calendar day
                    while start + duration_ms <= window_close {
                        if start >= from {
                            let candidate = Span::new(start, start + duration_ms);
                            if find_conflict(&guard, &candidate, None).is_none() {
                                merged
                                    .entry((candidate.start, candidate.end))
                                    .or_default()
                                    .push(tutor_id);
                            }
                        }
                        start += step_ms;
                    }
                }
            }
        }

        Ok(merged
            .into_iter()
            .take(MAX_SLOT_RESULTS)
            .map(|((start, end), tutor_ids)| Slot {
                span: Span::new(start, end),
                tutor_ids,
            })
            .collect())
    }
}
