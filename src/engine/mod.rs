mod conflict;
mod error;
mod mutations;
mod queries;
mod selector;
mod slots;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::availability::WeeklyAvailability;
use crate::clock::Clock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSchedule = Arc<RwLock<ScheduleState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub users: DashMap<Ulid, UserRecord>,
    pub subjects: DashMap<Ulid, Subject>,
    /// subject id → tutors declaring they teach it.
    pub(super) subject_tutors: DashMap<Ulid, Vec<Ulid>>,
    /// One schedule per known user, tutor or student.
    pub(super) schedules: DashMap<Ulid, SharedSchedule>,
    pub(super) sessions: DashMap<Ulid, Session>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
    ) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            users: DashMap::new(),
            subjects: DashMap::new(),
            subject_tutors: DashMap::new(),
            schedules: DashMap::new(),
            sessions: DashMap::new(),
            wal_tx,
            notify,
            clock,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never block here because this
        // may run inside an async context (lazy tenant creation).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::UserUpserted {
                id,
                tutor_approved,
                verified,
                deactivated,
            } => {
                self.users.insert(
                    *id,
                    UserRecord {
                        id: *id,
                        tutor_approved: *tutor_approved,
                        verified: *verified,
                        deactivated: *deactivated,
                    },
                );
                self.ensure_schedule(*id);
            }
            Event::SubjectCreated { id, name } => {
                self.subjects.insert(
                    *id,
                    Subject {
                        id: *id,
                        name: name.clone(),
                    },
                );
            }
            Event::TutorSubjectLinked {
                tutor_id,
                subject_id,
            } => {
                let mut tutors = self.subject_tutors.entry(*subject_id).or_default();
                if !tutors.contains(tutor_id) {
                    tutors.push(*tutor_id);
                }
            }
            Event::TutorSubjectUnlinked {
                tutor_id,
                subject_id,
            } => {
                if let Some(mut tutors) = self.subject_tutors.get_mut(subject_id) {
                    tutors.retain(|t| t != tutor_id);
                }
            }
            Event::AvailabilityDeclared {
                tutor_id,
                weekly_json,
            } => {
                let sched = self.ensure_schedule(*tutor_id);
                let mut guard = sched.try_write().expect("replay: uncontended write");
                guard.availability = WeeklyAvailability::parse(weekly_json);
                guard.availability_raw = Some(weekly_json.clone());
            }
            Event::SessionBooked {
                id,
                student_id,
                tutor_id,
                subject_id,
                span,
                duration_min,
            } => {
                let session = Session {
                    id: *id,
                    student_id: *student_id,
                    tutor_id: *tutor_id,
                    subject_id: *subject_id,
                    span: *span,
                    duration_min: *duration_min,
                    status: SessionStatus::Pending,
                    cancel_reason: None,
                    proposal: None,
                };
                for party in [student_id, tutor_id] {
                    let sched = self.ensure_schedule(*party);
                    let mut guard = sched.try_write().expect("replay: uncontended write");
                    guard.insert_entry(ScheduleEntry {
                        session_id: *id,
                        span: *span,
                    });
                }
                self.sessions.insert(*id, session);
            }
            other => {
                let Some(id) = session_event_id(other) else {
                    return;
                };
                let Some(mut session) = self.sessions.get_mut(&id) else {
                    return;
                };
                let (student_id, tutor_id) = (session.student_id, session.tutor_id);
                let student = self.ensure_schedule(student_id);
                let tutor = self.ensure_schedule(tutor_id);
                let mut student_guard = student.try_write().expect("replay: uncontended write");
                let mut tutor_guard = tutor.try_write().expect("replay: uncontended write");
                apply_session_event(&mut session, &mut student_guard, &mut tutor_guard, other);
            }
        }
    }

    /// Get or lazily create the schedule for a user.
    pub(super) fn ensure_schedule(&self, user_id: Ulid) -> SharedSchedule {
        self.schedules
            .entry(user_id)
            .or_insert_with(|| Arc::new(RwLock::new(ScheduleState::new(user_id))))
            .value()
            .clone()
    }

    pub fn get_schedule(&self, user_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(user_id).map(|e| e.value().clone())
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Acquire both parties' schedule write locks in sorted-id order to
    /// prevent deadlocks, returning guards in (student, tutor) order.
    pub(super) async fn lock_pair(
        &self,
        student_id: Ulid,
        tutor_id: Ulid,
    ) -> Result<
        (
            tokio::sync::OwnedRwLockWriteGuard<ScheduleState>,
            tokio::sync::OwnedRwLockWriteGuard<ScheduleState>,
        ),
        EngineError,
    > {
        let student = self
            .get_schedule(&student_id)
            .ok_or(EngineError::NotFound(student_id))?;
        let tutor = self
            .get_schedule(&tutor_id)
            .ok_or(EngineError::NotFound(tutor_id))?;
        if student_id <= tutor_id {
            let s = student.write_owned().await;
            let t = tutor.write_owned().await;
            Ok((s, t))
        } else {
            let t = tutor.write_owned().await;
            let s = student.write_owned().await;
            Ok((s, t))
        }
    }

    /// Notify both parties of a committed transition. Fire-and-forget:
    /// delivery failure never affects the committed state change.
    pub(super) fn notify_parties(&self, session: &Session, event: &Event) {
        self.notify.send(session.student_id, event);
        self.notify.send(session.tutor_id, event);
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }
}

/// Apply a post-booking lifecycle event to a session and both schedules.
/// Caller holds both schedule locks (or sole ownership during replay).
pub(super) fn apply_session_event(
    session: &mut Session,
    student: &mut ScheduleState,
    tutor: &mut ScheduleState,
    event: &Event,
) {
    match event {
        Event::SessionAccepted { .. } => {
            session.status = SessionStatus::Accepted;
        }
        Event::RescheduleProposed {
            by_user_id,
            span,
            note,
            ..
        } => {
            session.proposal = Some(Proposal {
                span: *span,
                note: note.clone(),
                proposed_by: *by_user_id,
            });
        }
        Event::ProposalAccepted { .. } => {
            let Some(proposal) = session.proposal.take() else {
                return;
            };
            for sched in [&mut *student, &mut *tutor] {
                sched.remove_entry(session.id);
                sched.insert_entry(ScheduleEntry {
                    session_id: session.id,
                    span: proposal.span,
                });
            }
            session.span = proposal.span;
            session.duration_min = proposal.span.duration_min();
            // the moved session needs a fresh tutor acceptance
            session.status = SessionStatus::Pending;
        }
        Event::ProposalRejected { .. } => {
            session.proposal = None;
        }
        Event::SessionCancelled { reason, .. } => {
            student.remove_entry(session.id);
            tutor.remove_entry(session.id);
            session.status = SessionStatus::Cancelled;
            session.cancel_reason = reason.clone();
            session.proposal = None;
        }
        Event::SessionCompleted { .. } => {
            student.remove_entry(session.id);
            tutor.remove_entry(session.id);
            session.status = SessionStatus::Completed;
            session.proposal = None;
        }
        _ => {}
    }
}

/// Session id carried by a post-booking lifecycle event.
fn session_event_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SessionAccepted { id }
        | Event::RescheduleProposed { id, .. }
        | Event::ProposalAccepted { id }
        | Event::ProposalRejected { id }
        | Event::SessionCancelled { id, .. }
        | Event::SessionCompleted { id } => Some(*id),
        _ => None,
    }
}
