//! Session persistence contract and its local stand-ins.
//!
//! The durable backend is an external collaborator. [`FallbackSessionStore`]
//! wraps it so that every failure degrades to a locally synthesized record
//! instead of interrupting the live pipeline.

use crate::error::PersistenceError;
use crate::pose::{AnalysisResult, GaitMetrics};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// Averages of every gait metric over a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub samples: u64,
    pub avg_speed: f64,
    pub avg_stride_length: f64,
    pub avg_cadence: f64,
    pub avg_symmetry: f64,
    pub avg_smoothness: f64,
}

impl MetricsSummary {
    /// Fold one more metrics record into the running averages
    pub fn record(&mut self, metrics: &GaitMetrics) {
        self.samples += 1;
        let n = self.samples as f64;
        let update = |avg: f64, value: f64| avg + (value - avg) / n;
        self.avg_speed = update(self.avg_speed, metrics.speed);
        self.avg_stride_length = update(self.avg_stride_length, metrics.stride_length);
        self.avg_cadence = update(self.avg_cadence, metrics.cadence);
        self.avg_symmetry = update(self.avg_symmetry, metrics.symmetry);
        self.avg_smoothness = update(self.avg_smoothness, metrics.smoothness);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub dog_id: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    #[serde(default)]
    pub metrics_summary: Option<MetricsSummary>,
    /// Synthesized locally because the backend was unavailable
    #[serde(default)]
    pub local: bool,
}

impl Session {
    pub fn new(dog_id: &str, notes: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            dog_id: dog_id.to_string(),
            notes,
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Active,
            metrics_summary: None,
            local: false,
        }
    }

    fn finish(&mut self, summary: MetricsSummary) {
        self.ended_at = Some(Utc::now());
        self.status = SessionStatus::Completed;
        self.metrics_summary = Some(summary);
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, dog_id: &str, notes: Option<String>) -> Result<Session, PersistenceError>;

    async fn end_session(&self, id: &str, summary: MetricsSummary) -> Result<Session, PersistenceError>;

    async fn list_sessions(&self, dog_id: &str) -> Result<Vec<Session>, PersistenceError>;

    async fn get_results(&self, session_id: &str) -> Result<Vec<AnalysisResult>, PersistenceError>;

    async fn delete_session(&self, id: &str) -> Result<(), PersistenceError>;

    async fn save_result(&self, session_id: &str, result: &AnalysisResult) -> Result<(), PersistenceError>;
}

#[derive(Default)]
struct StoredSession {
    session: Option<Session>,
    results: Vec<AnalysisResult>,
}

/// Process-local session store
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, StoredSession>>,
    local: bool,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose sessions are flagged as local substitutes
    fn local() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            local: true,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    /// Track a session that was created elsewhere
    fn adopt(&self, session: Session) {
        let id = session.id.clone();
        self.sessions.lock().entry(id).or_default().session = Some(session);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, dog_id: &str, notes: Option<String>) -> Result<Session, PersistenceError> {
        let mut session = Session::new(dog_id, notes);
        session.local = self.local;
        self.adopt(session.clone());
        debug!("Created session {} for dog {}", session.id, dog_id);
        Ok(session)
    }

    async fn end_session(&self, id: &str, summary: MetricsSummary) -> Result<Session, PersistenceError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id)
            .and_then(|stored| stored.session.as_mut())
            .ok_or_else(|| PersistenceError::SessionNotFound { id: id.to_string() })?;
        session.finish(summary);
        Ok(session.clone())
    }

    async fn list_sessions(&self, dog_id: &str) -> Result<Vec<Session>, PersistenceError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .values()
            .filter_map(|stored| stored.session.clone())
            .filter(|session| session.dog_id == dog_id)
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }

    async fn get_results(&self, session_id: &str) -> Result<Vec<AnalysisResult>, PersistenceError> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|stored| stored.results.clone())
            .ok_or_else(|| PersistenceError::SessionNotFound {
                id: session_id.to_string(),
            })
    }

    async fn delete_session(&self, id: &str) -> Result<(), PersistenceError> {
        self.sessions
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PersistenceError::SessionNotFound { id: id.to_string() })
    }

    async fn save_result(&self, session_id: &str, result: &AnalysisResult) -> Result<(), PersistenceError> {
        let mut sessions = self.sessions.lock();
        let stored = sessions
            .get_mut(session_id)
            .ok_or_else(|| PersistenceError::SessionNotFound {
                id: session_id.to_string(),
            })?;
        stored.results.push(result.clone());
        Ok(())
    }
}

/// Backend that is never reachable. Useful when running without one.
#[derive(Default)]
pub struct UnavailableSessionStore;

impl UnavailableSessionStore {
    fn error() -> PersistenceError {
        PersistenceError::Unavailable {
            details: "no session backend configured".to_string(),
        }
    }
}

#[async_trait]
impl SessionStore for UnavailableSessionStore {
    async fn create_session(&self, _dog_id: &str, _notes: Option<String>) -> Result<Session, PersistenceError> {
        Err(Self::error())
    }

    async fn end_session(&self, _id: &str, _summary: MetricsSummary) -> Result<Session, PersistenceError> {
        Err(Self::error())
    }

    async fn list_sessions(&self, _dog_id: &str) -> Result<Vec<Session>, PersistenceError> {
        Err(Self::error())
    }

    async fn get_results(&self, _session_id: &str) -> Result<Vec<AnalysisResult>, PersistenceError> {
        Err(Self::error())
    }

    async fn delete_session(&self, _id: &str) -> Result<(), PersistenceError> {
        Err(Self::error())
    }

    async fn save_result(&self, _session_id: &str, _result: &AnalysisResult) -> Result<(), PersistenceError> {
        Err(Self::error())
    }
}

/// Wraps a backend and substitutes local records whenever it fails.
/// Sessions that started locally stay local for their whole life; backend
/// sessions stay on the backend, with results that failed to save held back
/// and retried in order.
pub struct FallbackSessionStore {
    primary: Arc<dyn SessionStore>,
    local: InMemorySessionStore,
    /// Unsaved results of backend sessions, oldest first
    pending: Mutex<HashMap<String, Vec<AnalysisResult>>>,
    fallbacks: AtomicU64,
}

impl FallbackSessionStore {
    pub fn new(primary: Arc<dyn SessionStore>) -> Self {
        Self {
            primary,
            local: InMemorySessionStore::local(),
            pending: Mutex::new(HashMap::new()),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Number of calls served locally after a backend failure
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    fn note_failure(&self, operation: &str, e: &PersistenceError) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        error!("Session backend {} failed, using local record: {}", operation, e);
    }

    /// Results of a backend session still waiting to be saved
    pub fn pending_results(&self, session_id: &str) -> usize {
        self.pending.lock().get(session_id).map_or(0, Vec::len)
    }

    /// Push held-back results to the backend in order, stopping at the
    /// first failure
    async fn flush(&self, session_id: &str) {
        let queued = self.pending.lock().remove(session_id).unwrap_or_default();
        let mut queued = queued.into_iter();
        while let Some(result) = queued.next() {
            if let Err(e) = self.primary.save_result(session_id, &result).await {
                self.note_failure("save_result", &e);
                let mut held = vec![result];
                held.extend(queued);
                warn!("Holding {} results for session {}", held.len(), session_id);
                let mut pending = self.pending.lock();
                let slot = pending.entry(session_id.to_string()).or_default();
                held.append(slot);
                *slot = held;
                return;
            }
        }
    }
}

#[async_trait]
impl SessionStore for FallbackSessionStore {
    async fn create_session(&self, dog_id: &str, notes: Option<String>) -> Result<Session, PersistenceError> {
        match self.primary.create_session(dog_id, notes.clone()).await {
            Ok(session) => {
                info!("Session {} started for dog {}", session.id, dog_id);
                Ok(session)
            }
            Err(e) => {
                self.note_failure("create_session", &e);
                self.local.create_session(dog_id, notes).await
            }
        }
    }

    async fn end_session(&self, id: &str, summary: MetricsSummary) -> Result<Session, PersistenceError> {
        if self.local.contains(id) {
            return self.local.end_session(id, summary).await;
        }

        self.flush(id).await;
        match self.primary.end_session(id, summary).await {
            Ok(session) => Ok(session),
            Err(e) => {
                self.note_failure("end_session", &e);
                let mut session = Session::new("", None);
                session.id = id.to_string();
                session.local = true;
                session.finish(summary);
                Ok(session)
            }
        }
    }

    async fn list_sessions(&self, dog_id: &str) -> Result<Vec<Session>, PersistenceError> {
        let mut sessions = match self.primary.list_sessions(dog_id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                self.note_failure("list_sessions", &e);
                Vec::new()
            }
        };
        sessions.extend(self.local.list_sessions(dog_id).await?);
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }

    async fn get_results(&self, session_id: &str) -> Result<Vec<AnalysisResult>, PersistenceError> {
        if self.local.contains(session_id) {
            return self.local.get_results(session_id).await;
        }
        let mut results = match self.primary.get_results(session_id).await {
            Ok(results) => results,
            Err(e) => {
                self.note_failure("get_results", &e);
                Vec::new()
            }
        };
        if let Some(held) = self.pending.lock().get(session_id) {
            results.extend(held.iter().cloned());
        }
        Ok(results)
    }

    async fn delete_session(&self, id: &str) -> Result<(), PersistenceError> {
        if self.local.contains(id) {
            return self.local.delete_session(id).await;
        }
        self.pending.lock().remove(id);
        if let Err(e) = self.primary.delete_session(id).await {
            self.note_failure("delete_session", &e);
        }
        Ok(())
    }

    async fn save_result(&self, session_id: &str, result: &AnalysisResult) -> Result<(), PersistenceError> {
        if self.local.contains(session_id) {
            return self.local.save_result(session_id, result).await;
        }
        self.pending.lock().entry(session_id.to_string()).or_default().push(result.clone());
        self.flush(session_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(timestamp: i64) -> AnalysisResult {
        AnalysisResult {
            timestamp,
            keypoints: None,
            joint_angles: None,
            gait_metrics: None,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_summary_running_average() {
        let mut summary = MetricsSummary::default();
        summary.record(&GaitMetrics {
            speed: 10.0,
            stride_length: 40.0,
            cadence: 100.0,
            symmetry: 1.0,
            smoothness: 0.5,
        });
        summary.record(&GaitMetrics {
            speed: 20.0,
            stride_length: 60.0,
            cadence: 120.0,
            symmetry: 0.8,
            smoothness: 0.7,
        });

        assert_eq!(summary.samples, 2);
        assert!((summary.avg_speed - 15.0).abs() < 1e-9);
        assert!((summary.avg_stride_length - 50.0).abs() < 1e-9);
        assert!((summary.avg_cadence - 110.0).abs() < 1e-9);
        assert!((summary.avg_symmetry - 0.9).abs() < 1e-9);
        assert!((summary.avg_smoothness - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_in_memory_lifecycle() {
        let store = InMemorySessionStore::new();
        let session = store.create_session("rex", Some("left fore limp".to_string())).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(!session.local);

        store.save_result(&session.id, &result(1)).await.unwrap();
        store.save_result(&session.id, &result(2)).await.unwrap();
        assert_eq!(store.get_results(&session.id).await.unwrap().len(), 2);

        let ended = store.end_session(&session.id, MetricsSummary::default()).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert!(ended.ended_at.is_some());

        assert_eq!(store.list_sessions("rex").await.unwrap().len(), 1);
        assert!(store.list_sessions("fido").await.unwrap().is_empty());

        store.delete_session(&session.id).await.unwrap();
        assert!(matches!(
            store.get_results(&session.id).await,
            Err(PersistenceError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_fallback_synthesizes_local_sessions() {
        let store = FallbackSessionStore::new(Arc::new(UnavailableSessionStore));

        let session = store.create_session("rex", None).await.unwrap();
        assert!(session.local);

        store.save_result(&session.id, &result(1)).await.unwrap();
        assert_eq!(store.get_results(&session.id).await.unwrap().len(), 1);

        let ended = store.end_session(&session.id, MetricsSummary::default()).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);

        let listed = store.list_sessions("rex").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session.id);

        assert!(store.delete_session("unknown").await.is_ok());
        assert!(store.fallback_count() >= 3);
    }

    #[tokio::test]
    async fn test_fallback_prefers_backend() {
        let backend = Arc::new(InMemorySessionStore::new());
        let store = FallbackSessionStore::new(backend.clone());

        let session = store.create_session("rex", None).await.unwrap();
        assert!(!session.local);
        assert!(backend.contains(&session.id));

        store.save_result(&session.id, &result(5)).await.unwrap();
        assert_eq!(backend.get_results(&session.id).await.unwrap().len(), 1);
        assert_eq!(store.fallback_count(), 0);
    }

    /// Backend whose first `failures` result saves are rejected
    struct FlakyStore {
        inner: InMemorySessionStore,
        failures: std::sync::atomic::AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: InMemorySessionStore::new(),
                failures: std::sync::atomic::AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn create_session(&self, dog_id: &str, notes: Option<String>) -> Result<Session, PersistenceError> {
            self.inner.create_session(dog_id, notes).await
        }

        async fn end_session(&self, id: &str, summary: MetricsSummary) -> Result<Session, PersistenceError> {
            self.inner.end_session(id, summary).await
        }

        async fn list_sessions(&self, dog_id: &str) -> Result<Vec<Session>, PersistenceError> {
            self.inner.list_sessions(dog_id).await
        }

        async fn get_results(&self, session_id: &str) -> Result<Vec<AnalysisResult>, PersistenceError> {
            self.inner.get_results(session_id).await
        }

        async fn delete_session(&self, id: &str) -> Result<(), PersistenceError> {
            self.inner.delete_session(id).await
        }

        async fn save_result(&self, session_id: &str, result: &AnalysisResult) -> Result<(), PersistenceError> {
            let failing = self
                .failures
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(PersistenceError::Request {
                    details: "timeout".to_string(),
                });
            }
            self.inner.save_result(session_id, result).await
        }
    }

    #[tokio::test]
    async fn test_transient_save_failure_keeps_backend_session() {
        let backend = Arc::new(FlakyStore::new(1));
        let store = FallbackSessionStore::new(backend.clone());

        let session = store.create_session("rex", None).await.unwrap();
        store.save_result(&session.id, &result(1)).await.unwrap();
        assert_eq!(store.pending_results(&session.id), 1);
        assert_eq!(store.get_results(&session.id).await.unwrap().len(), 1);

        store.save_result(&session.id, &result(2)).await.unwrap();
        assert_eq!(store.pending_results(&session.id), 0);

        let ended = store
            .end_session(&session.id, MetricsSummary::default())
            .await
            .unwrap();
        assert_eq!(ended.dog_id, "rex");
        assert!(!ended.local);

        let stored = backend.list_sessions("rex").await.unwrap();
        assert_eq!(stored[0].status, SessionStatus::Completed);
        let timestamps: Vec<i64> = backend
            .get_results(&session.id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(timestamps, vec![1, 2]);
        assert_eq!(store.fallback_count(), 1);
    }

    #[tokio::test]
    async fn test_end_of_unknown_backend_session_is_synthesized() {
        let store = FallbackSessionStore::new(Arc::new(UnavailableSessionStore));
        let summary = MetricsSummary {
            samples: 3,
            ..Default::default()
        };

        let ended = store.end_session("remote-42", summary).await.unwrap();
        assert_eq!(ended.id, "remote-42");
        assert!(ended.local);
        assert_eq!(ended.metrics_summary, Some(summary));
    }
}
