use ulid::Ulid;

use crate::model::Session;

use super::{Engine, EngineError};

impl Engine {
    pub fn get_session(&self, session_id: Ulid) -> Result<Session, EngineError> {
        self.sessions
            .get(&session_id)
            .map(|s| s.clone())
            .ok_or(EngineError::NotFound(session_id))
    }

    /// All sessions the user is a party to, terminal ones included, sorted by
    /// start time.
    pub fn sessions_for_user(&self, user_id: Ulid) -> Vec<Session> {
        let mut out: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.is_party(user_id))
            .map(|s| s.clone())
            .collect();
        out.sort_by_key(|s| (s.span.start, s.id));
        out
    }

    /// The availability JSON exactly as last declared, if any.
    pub async fn availability_json(&self, tutor_id: Ulid) -> Result<Option<String>, EngineError> {
        if !self.users.contains_key(&tutor_id) {
            return Err(EngineError::NotFound(tutor_id));
        }
        let Some(sched) = self.get_schedule(&tutor_id) else {
            return Ok(None);
        };
        let raw = sched.read().await.availability_raw.clone();
        Ok(raw)
    }
}
