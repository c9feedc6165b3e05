use rand::seq::SliceRandom;
use ulid::Ulid;

use crate::limits::LOAD_HORIZON_MS;
use crate::model::{Ms, Span};

use super::conflict::find_conflict;
use super::{Engine, EngineError};

impl Engine {
    /// Side-effect-free plan phase of the booking transaction: pick a tutor
    /// for `span` among those teaching `subject_id`. Safe to run concurrently;
    /// the winner is re-validated under locks before commit.
    ///
    /// Load = active sessions starting within 7 days of now. The minimal-load
    /// subset is tie-broken uniformly at random so equally loaded tutors
    /// share new bookings instead of the first-listed one absorbing them.
    pub(super) async fn select_tutor(
        &self,
        student_id: Ulid,
        subject_id: Ulid,
        span: &Span,
        now: Ms,
        preferred: Option<Ulid>,
    ) -> Result<Ulid, EngineError> {
        let tutors: Vec<Ulid> = self
            .subject_tutors
            .get(&subject_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        if let Some(tutor_id) = preferred {
            // nobody tutors themselves
            if tutor_id == student_id || !tutors.contains(&tutor_id) {
                return Err(EngineError::NotEligible);
            }
            return match self.tutor_fit(tutor_id, span).await? {
                TutorFit::Free => Ok(tutor_id),
                TutorFit::Busy(session_id) => Err(EngineError::TutorConflict(session_id)),
                TutorFit::Ineligible => Err(EngineError::NotEligible),
            };
        }

        let mut candidates: Vec<(Ulid, usize)> = Vec::new();
        for tutor_id in tutors {
            if tutor_id == student_id {
                continue;
            }
            if let TutorFit::Free = self.tutor_fit(tutor_id, span).await? {
                let load = self.tutor_load(tutor_id, now).await;
                candidates.push((tutor_id, load));
            }
        }
        if candidates.is_empty() {
            return Err(EngineError::NotEligible);
        }

        let min_load = candidates.iter().map(|(_, load)| *load).min().unwrap_or(0);
        let least_loaded: Vec<Ulid> = candidates
            .into_iter()
            .filter(|(_, load)| *load == min_load)
            .map(|(id, _)| id)
            .collect();

        least_loaded
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or(EngineError::NotEligible)
    }

    /// Eligibility + availability + conflict snapshot for one tutor.
    pub(super) async fn tutor_fit(
        &self,
        tutor_id: Ulid,
        span: &Span,
    ) -> Result<TutorFit, EngineError> {
        let eligible = self
            .users
            .get(&tutor_id)
            .map(|u| u.is_eligible_tutor())
            .unwrap_or(false);
        if !eligible {
            return Ok(TutorFit::Ineligible);
        }
        let Some(sched) = self.get_schedule(&tutor_id) else {
            return Ok(TutorFit::Ineligible);
        };
        let guard = sched.read().await;
        let covered = guard
            .availability
            .as_ref()
            .is_some_and(|a| a.covers(span));
        if !covered {
            return Ok(TutorFit::Ineligible);
        }
        match find_conflict(&guard, span, None) {
            Some(session_id) => Ok(TutorFit::Busy(session_id)),
            None => Ok(TutorFit::Free),
        }
    }

    pub(super) async fn tutor_load(&self, tutor_id: Ulid, now: Ms) -> usize {
        match self.get_schedule(&tutor_id) {
            Some(sched) => sched.read().await.load_within(now, LOAD_HORIZON_MS),
            None => 0,
        }
    }
}

#[derive(Debug)]
pub(super) enum TutorFit {
    Free,
    Busy(Ulid),
    Ineligible,
}
