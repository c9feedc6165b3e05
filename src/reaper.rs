use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that auto-cancels pending requests whose start time has
/// passed without tutor acceptance.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = engine.now_ms();
        for session_id in engine.collect_expired_requests(now) {
            match engine.expire_request(session_id).await {
                Ok(true) => {
                    metrics::counter!(crate::observability::REQUESTS_EXPIRED_TOTAL).increment(1);
                    info!("reaped unaccepted request {session_id}");
                }
                // accepted or cancelled in the meantime
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!("reaper skip {session_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = match engine.wal_appends_since_compact().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("compactor: {e}");
                continue;
            }
        };
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::limits::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tutord_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_collects_unaccepted_requests() {
        let path = test_wal_path("reaper_collect.wal");
        let clock = Arc::new(ManualClock::new(0));
        let engine =
            Arc::new(Engine::new(path, Arc::new(NotifyHub::new()), clock.clone()).unwrap());

        let (stu, tut, subj) = (Ulid::new(), Ulid::new(), Ulid::new());
        engine.upsert_user(stu, false, true, false).await.unwrap();
        engine.upsert_user(tut, true, true, false).await.unwrap();
        engine.create_subject(subj, "piano").await.unwrap();
        engine.link_tutor_subject(tut, subj).await.unwrap();
        let weekly =
            r#"[{"day":"FRI","off":false,"slots":[{"start":"00:00","end":"24:00"}]}]"#;
        engine.declare_availability(tut, weekly).await.unwrap();

        // day 1 is a Friday
        let span = Span::new(DAY_MS + 10 * 60 * MINUTE_MS, DAY_MS + 11 * 60 * MINUTE_MS);
        let session = engine.book_session(stu, subj, span, None).await.unwrap();

        assert!(engine.collect_expired_requests(clock.now_ms()).is_empty());

        clock.set(span.start + MINUTE_MS);
        let expired = engine.collect_expired_requests(clock.now_ms());
        assert_eq!(expired, vec![session.id]);

        assert!(engine.expire_request(session.id).await.unwrap());
        assert!(engine.collect_expired_requests(clock.now_ms()).is_empty());
        // already expired: a second pass is a no-op
        assert!(!engine.expire_request(session.id).await.unwrap());
    }
}
