//! Shared gateway state

use citewise_common::{
    config::AppConfig,
    errors::{AppError, Result},
    AnswerOutcome, RagPipeline, Session,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<RagPipeline>,
    pub sessions: SessionStore,
}

/// In-memory sessions keyed by id
///
/// Handlers copy what they need out of the store; the lock is never held
/// while a question is being answered. At most `capacity` sessions live at
/// once; creating one more evicts the oldest.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<Sessions>>,
    capacity: usize,
}

#[derive(Default)]
struct Sessions {
    by_id: HashMap<Uuid, Session>,
    /// Creation order, oldest first
    order: VecDeque<Uuid>,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Sessions::default())),
            capacity: capacity.max(1),
        }
    }

    pub async fn create(&self) -> Session {
        let session = Session::new();
        let mut sessions = self.inner.write().await;

        while sessions.by_id.len() >= self.capacity {
            let Some(oldest) = sessions.order.pop_front() else { break };
            sessions.by_id.remove(&oldest);
            tracing::info!(session_id = %oldest, capacity = self.capacity, "Session evicted");
        }

        sessions.order.push_back(session.id);
        sessions.by_id.insert(session.id, session.clone());
        session
    }

    pub async fn get(&self, id: Uuid) -> Result<Session> {
        self.inner
            .read()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.inner.read().await.by_id.contains_key(&id)
    }

    pub async fn record(&self, id: Uuid, question: &str, outcome: &AnswerOutcome) -> Result<()> {
        let mut sessions = self.inner.write().await;
        let session = sessions.by_id.get_mut(&id).ok_or_else(|| not_found(id))?;
        session.record(question, outcome);
        Ok(())
    }

    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let mut sessions = self.inner.write().await;
        sessions.by_id.remove(&id).ok_or_else(|| not_found(id))?;
        sessions.order.retain(|s| *s != id);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }
}

fn not_found(id: Uuid) -> AppError {
    AppError::SessionNotFound { id: id.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citewise_common::composer::ComposedAnswer;

    #[tokio::test]
    async fn test_record_and_remove() {
        let store = SessionStore::new(8);
        let session = store.create().await;
        let outcome = AnswerOutcome::Answered(ComposedAnswer {
            text: "a".into(),
            reply: "a".into(),
            citations: vec![],
        });

        store.record(session.id, "q", &outcome).await.unwrap();
        assert_eq!(store.get(session.id).await.unwrap().len(), 1);

        store.remove(session.id).await.unwrap();
        assert!(matches!(
            store.get(session.id).await,
            Err(AppError::SessionNotFound { .. })
        ));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_oldest_session_evicted_at_capacity() {
        let store = SessionStore::new(2);
        let first = store.create().await;
        let second = store.create().await;
        let third = store.create().await;

        assert_eq!(store.len().await, 2);
        assert!(!store.contains(first.id).await);
        assert!(store.contains(second.id).await);
        assert!(store.contains(third.id).await);
        assert!(matches!(
            store.get(first.id).await,
            Err(AppError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_removed_session_frees_capacity() {
        let store = SessionStore::new(2);
        let first = store.create().await;
        let second = store.create().await;

        store.remove(first.id).await.unwrap();
        let third = store.create().await;

        assert!(store.contains(second.id).await);
        assert!(store.contains(third.id).await);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let store = SessionStore::new(8);
        let id = Uuid::new_v4();

        assert!(!store.contains(id).await);
        assert!(matches!(store.get(id).await, Err(AppError::SessionNotFound { .. })));
        assert!(store.remove(id).await.is_err());
    }
}
