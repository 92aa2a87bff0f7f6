use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::database::connection::Database;
use crate::models::session::SessionRecord;

/// Anything that can store a completed session.
pub trait SessionStore: Send + Sync + 'static {
    fn save(&self, record: &SessionRecord) -> impl Future<Output = anyhow::Result<i32>> + Send;
}

impl SessionStore for Database {
    async fn save(&self, record: &SessionRecord) -> anyhow::Result<i32> {
        self.insert_session(record).await
    }
}

/// Spawns the task that drains completed sessions into `store`. Failures are
/// logged and the record dropped; the tracker never waits on this task.
pub fn spawn_writer<S: SessionStore>(store: S) -> (UnboundedSender<SessionRecord>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(drain(store, rx));
    (tx, handle)
}

async fn drain<S: SessionStore>(store: S, mut rx: UnboundedReceiver<SessionRecord>) {
    while let Some(record) = rx.recv().await {
        match store.save(&record).await {
            Ok(id) => log::info!(
                "Saved session {} ({} -> {}, score={})",
                id,
                record.start_time.format("%Y-%m-%d %H:%M:%S"),
                record.stop_time.format("%Y-%m-%d %H:%M:%S"),
                record.procrastination_score
            ),
            Err(e) => log::error!("Failed to save session: {}", e),
        }
    }
    log::debug!("Session writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MemoryStore {
        saved: Arc<Mutex<Vec<SessionRecord>>>,
        fail_first: Arc<Mutex<bool>>,
    }

    impl SessionStore for MemoryStore {
        async fn save(&self, record: &SessionRecord) -> anyhow::Result<i32> {
            let mut fail_first = self.fail_first.lock().unwrap();
            if *fail_first {
                *fail_first = false;
                anyhow::bail!("connection refused");
            }
            let mut saved = self.saved.lock().unwrap();
            saved.push(record.clone());
            Ok(saved.len() as i32)
        }
    }

    fn record(score: i32) -> SessionRecord {
        SessionRecord {
            id: None,
            start_time: Local.timestamp_opt(1_700_000_000, 0).unwrap(),
            stop_time: Local.timestamp_opt(1_700_000_600, 0).unwrap(),
            procrastination_score: score,
            total_idle_time: score as f64 * 6.0,
            idle_events: 1,
        }
    }

    #[tokio::test]
    async fn test_writer_saves_in_order() {
        let store = MemoryStore::default();
        let (tx, handle) = spawn_writer(store.clone());
        tx.send(record(10)).unwrap();
        tx.send(record(20)).unwrap();
        drop(tx);
        handle.await.unwrap();

        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.iter().map(|r| r.procrastination_score).collect::<Vec<_>>(), vec![10, 20]);
    }

    #[tokio::test]
    async fn test_writer_survives_failed_insert() {
        let store = MemoryStore::default();
        *store.fail_first.lock().unwrap() = true;
        let (tx, handle) = spawn_writer(store.clone());
        tx.send(record(10)).unwrap();
        tx.send(record(30)).unwrap();
        drop(tx);
        handle.await.unwrap();

        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].procrastination_score, 30);
    }
}
