use std::io;

use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflict, validate_duration, validate_lead_time, validate_span};
use super::{Engine, EngineError, WalCommand, apply_session_event};

impl Engine {
    // ── Directory writes (identity collaborator seam) ────────

    /// Insert or update a user record. Flags come from the identity
    /// collaborator; the engine never derives them itself.
    pub async fn upsert_user(
        &self,
        id: Ulid,
        tutor_approved: bool,
        verified: bool,
        deactivated: bool,
    ) -> Result<(), EngineError> {
        if !self.users.contains_key(&id) && self.users.len() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        let event = Event::UserUpserted {
            id,
            tutor_approved,
            verified,
            deactivated,
        };
        self.wal_append(&event).await?;
        self.users.insert(
            id,
            UserRecord {
                id,
                tutor_approved,
                verified,
                deactivated,
            },
        );
        self.ensure_schedule(id);
        if deactivated {
            self.notify.remove(&id);
        }
        Ok(())
    }

    pub async fn create_subject(&self, id: Ulid, name: &str) -> Result<(), EngineError> {
        if name.is_empty() {
            return Err(EngineError::Validation("subject name must not be empty"));
        }
        if name.len() > MAX_SUBJECT_NAME_LEN {
            return Err(EngineError::LimitExceeded("subject name too long"));
        }
        if self.subjects.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.subjects.len() >= MAX_SUBJECTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many subjects"));
        }
        let event = Event::SubjectCreated {
            id,
            name: name.to_string(),
        };
        self.wal_append(&event).await?;
        self.subjects.insert(
            id,
            Subject {
                id,
                name: name.to_string(),
            },
        );
        Ok(())
    }

    pub async fn link_tutor_subject(
        &self,
        tutor_id: Ulid,
        subject_id: Ulid,
    ) -> Result<(), EngineError> {
        if !self.users.contains_key(&tutor_id) {
            return Err(EngineError::NotFound(tutor_id));
        }
        if !self.subjects.contains_key(&subject_id) {
            return Err(EngineError::NotFound(subject_id));
        }
        if self
            .subject_tutors
            .get(&subject_id)
            .is_some_and(|t| t.contains(&tutor_id))
        {
            return Ok(()); // idempotent
        }
        let event = Event::TutorSubjectLinked {
            tutor_id,
            subject_id,
        };
        self.wal_append(&event).await?;
        let mut tutors = self.subject_tutors.entry(subject_id).or_default();
        if !tutors.contains(&tutor_id) {
            tutors.push(tutor_id);
        }
        Ok(())
    }

    pub async fn unlink_tutor_subject(
        &self,
        tutor_id: Ulid,
        subject_id: Ulid,
    ) -> Result<(), EngineError> {
        let linked = self
            .subject_tutors
            .get(&subject_id)
            .is_some_and(|t| t.contains(&tutor_id));
        if !linked {
            return Ok(());
        }
        let event = Event::TutorSubjectUnlinked {
            tutor_id,
            subject_id,
        };
        self.wal_append(&event).await?;
        if let Some(mut tutors) = self.subject_tutors.get_mut(&subject_id) {
            tutors.retain(|t| t != &tutor_id);
        }
        Ok(())
    }

    /// Persist a tutor's weekly availability as the raw JSON given. Parsing
    /// never rejects: malformed input is stored and treated as "no declared
    /// availability", so a bad client payload clears the tutor from matching
    /// instead of failing the write.
    pub async fn declare_availability(
        &self,
        tutor_id: Ulid,
        weekly_json: &str,
    ) -> Result<(), EngineError> {
        if !self.users.contains_key(&tutor_id) {
            return Err(EngineError::NotFound(tutor_id));
        }
        if weekly_json.len() > MAX_AVAILABILITY_JSON_LEN {
            return Err(EngineError::LimitExceeded("availability JSON too large"));
        }
        let event = Event::AvailabilityDeclared {
            tutor_id,
            weekly_json: weekly_json.to_string(),
        };
        self.wal_append(&event).await?;
        let sched = self.ensure_schedule(tutor_id);
        let mut guard = sched.write().await;
        guard.availability = crate::availability::WeeklyAvailability::parse(weekly_json);
        guard.availability_raw = Some(weekly_json.to_string());
        Ok(())
    }

    // ── Booking transaction ──────────────────────────────────

    /// Book a session for `student_id` in `subject_id` at `span`.
    ///
    /// Two phases. Plan: validate inputs, check the student's own calendar,
    /// run the selector — all without write locks, so concurrent bookings can
    /// plan against the same slot. Commit: take both parties' write locks and
    /// re-check both calendars against current state; a conflict that appears
    /// only now means a competing booking won the race and surfaces as
    /// `SlotTaken`. WAL append precedes the in-memory apply; notification
    /// follows both.
    pub async fn book_session(
        &self,
        student_id: Ulid,
        subject_id: Ulid,
        span: Span,
        preferred_tutor: Option<Ulid>,
    ) -> Result<Session, EngineError> {
        let now = self.now_ms();
        validate_span(&span)?;
        let duration_min = validate_duration(&span)?;
        validate_lead_time(&span, now)?;

        let student = self
            .users
            .get(&student_id)
            .ok_or(EngineError::NotFound(student_id))?;
        if student.deactivated {
            return Err(EngineError::Validation("student account is deactivated"));
        }
        drop(student);
        if !self.subjects.contains_key(&subject_id) {
            return Err(EngineError::NotFound(subject_id));
        }

        // Plan: student-side conflict check on a read guard only.
        {
            let sched = self.ensure_schedule(student_id);
            let guard = sched.read().await;
            if guard.entries.len() >= MAX_SESSIONS_PER_USER {
                return Err(EngineError::LimitExceeded("too many active sessions"));
            }
            if let Some(clash) = find_conflict(&guard, &span, None) {
                return Err(EngineError::StudentConflict(clash));
            }
        }
        let tutor_id = self
            .select_tutor(student_id, subject_id, &span, now, preferred_tutor)
            .await?;

        // Commit: both write locks, sorted order, full re-check.
        let (mut student_g, mut tutor_g) = self.lock_pair(student_id, tutor_id).await?;
        if find_conflict(&student_g, &span, None).is_some()
            || find_conflict(&tutor_g, &span, None).is_some()
        {
            return Err(EngineError::SlotTaken);
        }
        if tutor_g.entries.len() >= MAX_SESSIONS_PER_USER {
            return Err(EngineError::LimitExceeded("too many active sessions"));
        }

        let id = Ulid::new();
        let event = Event::SessionBooked {
            id,
            student_id,
            tutor_id,
            subject_id,
            span,
            duration_min,
        };
        self.wal_append(&event).await?;

        let session = Session {
            id,
            student_id,
            tutor_id,
            subject_id,
            span,
            duration_min,
            status: SessionStatus::Pending,
            cancel_reason: None,
            proposal: None,
        };
        for guard in [&mut student_g, &mut tutor_g] {
            guard.insert_entry(ScheduleEntry {
                session_id: id,
                span,
            });
        }
        self.sessions.insert(id, session.clone());
        info!(session = %id, student = %student_id, tutor = %tutor_id, "session booked");
        self.notify_parties(&session, &event);
        Ok(session)
    }

    // ── Lifecycle transitions ────────────────────────────────

    /// Tutor confirms a pending request.
    pub async fn accept_session(
        &self,
        session_id: Ulid,
        tutor_id: Ulid,
    ) -> Result<Session, EngineError> {
        let snap = self.session_snapshot(session_id)?;
        if snap.tutor_id != tutor_id {
            return Err(EngineError::NotParticipant(tutor_id));
        }
        let (mut student_g, mut tutor_g) = self.lock_pair(snap.student_id, snap.tutor_id).await?;
        let current = self.session_snapshot(session_id)?;
        if current.status != SessionStatus::Pending {
            return Err(EngineError::WrongStatus(current.status));
        }
        if let Some(clash) = find_conflict(&tutor_g, &current.span, Some(session_id)) {
            return Err(EngineError::TutorConflict(clash));
        }
        let event = Event::SessionAccepted { id: session_id };
        self.wal_append(&event).await?;
        self.apply_and_notify(session_id, &mut student_g, &mut tutor_g, &event)
    }

    /// Either party proposes a new time. Replaces any pending proposal;
    /// the negotiation simply restarts from the latest offer.
    pub async fn propose_reschedule(
        &self,
        session_id: Ulid,
        by_user_id: Ulid,
        span: Span,
        note: Option<String>,
    ) -> Result<Session, EngineError> {
        let now = self.now_ms();
        validate_span(&span)?;
        validate_duration(&span)?;
        validate_lead_time(&span, now)?;
        if note.as_ref().is_some_and(|n| n.len() > MAX_NOTE_LEN) {
            return Err(EngineError::LimitExceeded("proposal note too long"));
        }

        let snap = self.session_snapshot(session_id)?;
        if !snap.is_party(by_user_id) {
            return Err(EngineError::NotParticipant(by_user_id));
        }
        let (mut student_g, mut tutor_g) = self.lock_pair(snap.student_id, snap.tutor_id).await?;
        let current = self.session_snapshot(session_id)?;
        if !current.is_active() {
            return Err(EngineError::WrongStatus(current.status));
        }
        self.check_proposal_fit(&current, &span, &student_g, &tutor_g)?;

        let event = Event::RescheduleProposed {
            id: session_id,
            by_user_id,
            span,
            note,
        };
        self.wal_append(&event).await?;
        self.apply_and_notify(session_id, &mut student_g, &mut tutor_g, &event)
    }

    /// Counterpart accepts the pending proposal. The new time is validated
    /// against *current* state before anything mutates; on success the
    /// session moves and drops back to Pending for a fresh confirmation.
    pub async fn accept_proposal(
        &self,
        session_id: Ulid,
        by_user_id: Ulid,
    ) -> Result<Session, EngineError> {
        let snap = self.session_snapshot(session_id)?;
        if !snap.is_party(by_user_id) {
            return Err(EngineError::NotParticipant(by_user_id));
        }
        let (mut student_g, mut tutor_g) = self.lock_pair(snap.student_id, snap.tutor_id).await?;
        let current = self.session_snapshot(session_id)?;
        if !current.is_active() {
            return Err(EngineError::WrongStatus(current.status));
        }
        let proposal = current.proposal.as_ref().ok_or(EngineError::NoProposal)?;
        if proposal.proposed_by == by_user_id {
            // only the other side may take the offer
            return Err(EngineError::NotParticipant(by_user_id));
        }
        let span = proposal.span;
        validate_lead_time(&span, self.now_ms())?;
        self.check_proposal_fit(&current, &span, &student_g, &tutor_g)?;

        let event = Event::ProposalAccepted { id: session_id };
        self.wal_append(&event).await?;
        self.apply_and_notify(session_id, &mut student_g, &mut tutor_g, &event)
    }

    pub async fn reject_proposal(
        &self,
        session_id: Ulid,
        by_user_id: Ulid,
    ) -> Result<Session, EngineError> {
        let snap = self.session_snapshot(session_id)?;
        if !snap.is_party(by_user_id) {
            return Err(EngineError::NotParticipant(by_user_id));
        }
        let (mut student_g, mut tutor_g) = self.lock_pair(snap.student_id, snap.tutor_id).await?;
        let current = self.session_snapshot(session_id)?;
        let proposal = current.proposal.as_ref().ok_or(EngineError::NoProposal)?;
        if proposal.proposed_by == by_user_id {
            return Err(EngineError::NotParticipant(by_user_id));
        }
        let event = Event::ProposalRejected { id: session_id };
        self.wal_append(&event).await?;
        self.apply_and_notify(session_id, &mut student_g, &mut tutor_g, &event)
    }

    /// Either party may cancel while the session is still active. Terminal
    /// states keep their scheduling fields forever; cancellation records the
    /// reason and frees both calendars.
    pub async fn cancel_session(
        &self,
        session_id: Ulid,
        by_user_id: Ulid,
        reason: Option<String>,
    ) -> Result<Session, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("cancel reason too long"));
        }
        let snap = self.session_snapshot(session_id)?;
        if !snap.is_party(by_user_id) {
            return Err(EngineError::NotParticipant(by_user_id));
        }
        let (mut student_g, mut tutor_g) = self.lock_pair(snap.student_id, snap.tutor_id).await?;
        let current = self.session_snapshot(session_id)?;
        if !current.is_active() {
            return Err(EngineError::WrongStatus(current.status));
        }
        let event = Event::SessionCancelled {
            id: session_id,
            by_user_id,
            reason,
        };
        self.wal_append(&event).await?;
        info!(session = %session_id, by = %by_user_id, "session cancelled");
        self.apply_and_notify(session_id, &mut student_g, &mut tutor_g, &event)
    }

    /// Mark an accepted session as held. The tutor's call alone, and only
    /// allowed once the scheduled end has passed on the engine clock.
    pub async fn complete_session(
        &self,
        session_id: Ulid,
        by_user_id: Ulid,
    ) -> Result<Session, EngineError> {
        let snap = self.session_snapshot(session_id)?;
        if by_user_id != snap.tutor_id {
            return Err(EngineError::NotParticipant(by_user_id));
        }
        let (mut student_g, mut tutor_g) = self.lock_pair(snap.student_id, snap.tutor_id).await?;
        let current = self.session_snapshot(session_id)?;
        if current.status != SessionStatus::Accepted {
            return Err(EngineError::WrongStatus(current.status));
        }
        if self.now_ms() < current.span.end {
            return Err(EngineError::TooEarly(current.span.end));
        }
        let event = Event::SessionCompleted { id: session_id };
        self.wal_append(&event).await?;
        self.apply_and_notify(session_id, &mut student_g, &mut tutor_g, &event)
    }

    // ── Reaper support ───────────────────────────────────────

    /// Pending sessions whose start time has passed without acceptance.
    pub fn collect_expired_requests(&self, now: Ms) -> Vec<Ulid> {
        self.sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Pending && s.span.start <= now)
            .map(|s| s.id)
            .collect()
    }

    /// Reaper-driven cancellation of a request that was never accepted.
    /// Re-checks under locks; the tutor who let it lapse is recorded as the
    /// cancelling party. Returns false when an accept or cancel won the race.
    pub async fn expire_request(&self, session_id: Ulid) -> Result<bool, EngineError> {
        let snap = self.session_snapshot(session_id)?;
        let (mut student_g, mut tutor_g) = self.lock_pair(snap.student_id, snap.tutor_id).await?;
        let current = self.session_snapshot(session_id)?;
        if current.status != SessionStatus::Pending || current.span.start > self.now_ms() {
            return Ok(false);
        }
        let event = Event::SessionCancelled {
            id: session_id,
            by_user_id: current.tutor_id,
            reason: Some("not accepted in time".to_string()),
        };
        self.wal_append(&event).await?;
        info!(session = %session_id, "pending request expired");
        self.apply_and_notify(session_id, &mut student_g, &mut tutor_g, &event)?;
        Ok(true)
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL from current state: directory records first, then one
    /// booking per session followed by the events that reproduce its status
    /// and any open proposal.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events: Vec<Event> = Vec::new();
        for user in self.users.iter() {
            events.push(Event::UserUpserted {
                id: user.id,
                tutor_approved: user.tutor_approved,
                verified: user.verified,
                deactivated: user.deactivated,
            });
        }
        for subject in self.subjects.iter() {
            events.push(Event::SubjectCreated {
                id: subject.id,
                name: subject.name.clone(),
            });
        }
        for entry in self.subject_tutors.iter() {
            for tutor_id in entry.value() {
                events.push(Event::TutorSubjectLinked {
                    tutor_id: *tutor_id,
                    subject_id: *entry.key(),
                });
            }
        }
        for entry in self.schedules.iter() {
            let guard = entry.value().read().await;
            if let Some(raw) = &guard.availability_raw {
                events.push(Event::AvailabilityDeclared {
                    tutor_id: guard.user_id,
                    weekly_json: raw.clone(),
                });
            }
        }
        let mut sessions: Vec<Session> = self.sessions.iter().map(|s| s.clone()).collect();
        sessions.sort_by_key(|s| s.id);
        for s in sessions {
            events.push(Event::SessionBooked {
                id: s.id,
                student_id: s.student_id,
                tutor_id: s.tutor_id,
                subject_id: s.subject_id,
                span: s.span,
                duration_min: s.duration_min,
            });
            match s.status {
                SessionStatus::Pending => {}
                SessionStatus::Accepted => events.push(Event::SessionAccepted { id: s.id }),
                SessionStatus::Completed => events.push(Event::SessionCompleted { id: s.id }),
                SessionStatus::Cancelled => events.push(Event::SessionCancelled {
                    id: s.id,
                    by_user_id: s.tutor_id,
                    reason: s.cancel_reason.clone(),
                }),
            }
            if let Some(p) = &s.proposal {
                events.push(Event::RescheduleProposed {
                    id: s.id,
                    by_user_id: p.proposed_by,
                    span: p.span,
                    note: p.note.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e: io::Error| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }

    // ── Helpers ──────────────────────────────────────────────

    fn session_snapshot(&self, session_id: Ulid) -> Result<Session, EngineError> {
        self.sessions
            .get(&session_id)
            .map(|s| s.clone())
            .ok_or(EngineError::NotFound(session_id))
    }

    /// Both-calendar conflict check (excluding the session being moved) plus
    /// tutor availability fit, for proposals at propose and at accept time.
    fn check_proposal_fit(
        &self,
        session: &Session,
        span: &Span,
        student: &ScheduleState,
        tutor: &ScheduleState,
    ) -> Result<(), EngineError> {
        if let Some(clash) = find_conflict(student, span, Some(session.id)) {
            return Err(EngineError::StudentConflict(clash));
        }
        if let Some(clash) = find_conflict(tutor, span, Some(session.id)) {
            return Err(EngineError::TutorConflict(clash));
        }
        let covered = tutor.availability.as_ref().is_some_and(|a| a.covers(span));
        if !covered {
            return Err(EngineError::NotAvailable);
        }
        Ok(())
    }

    /// WAL is already written; mutate the session and both schedules, then
    /// fan the event out. Caller holds both write guards.
    fn apply_and_notify(
        &self,
        session_id: Ulid,
        student: &mut ScheduleState,
        tutor: &mut ScheduleState,
        event: &Event,
    ) -> Result<Session, EngineError> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        apply_session_event(&mut entry, student, tutor, event);
        let updated = entry.clone();
        drop(entry);
        self.notify_parties(&updated, event);
        Ok(updated)
    }
}
