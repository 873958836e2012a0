use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use engine::Session;
use shared::domain::SessionId;
use tokio::time::Instant;
use tracing::{debug, warn};

pub type SharedSession = Arc<Mutex<Session>>;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub struct OpenedSession {
    pub id: SessionId,
    pub session: SharedSession,
    /// Whether the client has to be sent a new cookie.
    pub created: bool,
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// The session for `id`, or a fresh one when the id is absent,
    /// unknown or expired.
    async fn open(&self, id: Option<SessionId>) -> OpenedSession;

    async fn invalidate(&self, id: SessionId) -> bool;

    async fn count(&self) -> usize;
}

/// Locks a session for one request. A request that panicked while holding
/// the lock leaves it poisoned; the session is still usable afterwards.
pub fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned| {
        warn!("session lock poisoned by an earlier request, recovering");
        session.clear_poison();
        poisoned.into_inner()
    })
}

struct Entry {
    session: SharedSession,
    last_access: Instant,
}

/// Process-local sessions. Idle ones are evicted whenever a session is
/// opened.
pub struct InMemorySessions {
    sessions: tokio::sync::Mutex<HashMap<SessionId, Entry>>,
    idle_timeout: Duration,
}

impl Default for InMemorySessions {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl InMemorySessions {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }
}

#[async_trait]
impl SessionBackend for InMemorySessions {
    async fn open(&self, id: Option<SessionId>) -> OpenedSession {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;

        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_access) < self.idle_timeout);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "idle sessions evicted");
        }

        if let Some(id) = id {
            if let Some(entry) = sessions.get_mut(&id) {
                entry.last_access = now;
                return OpenedSession {
                    id,
                    session: entry.session.clone(),
                    created: false,
                };
            }
        }

        let id = SessionId::generate();
        let session = Arc::new(Mutex::new(Session::new(id)));
        sessions.insert(
            id,
            Entry {
                session: session.clone(),
                last_access: now,
            },
        );
        debug!(session = %id, "session created");
        OpenedSession {
            id,
            session,
            created: true,
        }
    }

    async fn invalidate(&self, id: SessionId) -> bool {
        self.sessions.lock().await.remove(&id).is_some()
    }

    async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// Session id carried in the `cookie` header under `name`. Malformed ids
/// are ignored.
pub fn session_id_from_cookies(headers: &HeaderMap, name: &str) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| value.trim().parse().ok())
}

pub fn session_cookie(name: &str, id: SessionId, context_path: &str) -> String {
    let path = if context_path.is_empty() { "/" } else { context_path };
    format!("{name}={id}; Path={path}; HttpOnly; SameSite=Lax")
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn reads_session_id_among_other_cookies() {
        let id = SessionId::generate();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; SESSION={id}")).expect("header"),
        );

        assert_eq!(session_id_from_cookies(&headers, "SESSION"), Some(id));
        assert_eq!(session_id_from_cookies(&headers, "OTHER"), None);
    }

    #[test]
    fn malformed_id_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("SESSION=not-a-uuid"));
        assert_eq!(session_id_from_cookies(&headers, "SESSION"), None);
    }

    #[tokio::test]
    async fn unknown_id_opens_a_new_session() {
        let sessions = InMemorySessions::default();
        let first = sessions.open(None).await;
        assert!(first.created);

        let again = sessions.open(Some(first.id)).await;
        assert!(!again.created);
        assert!(Arc::ptr_eq(&first.session, &again.session));

        let stranger = sessions.open(Some(SessionId::generate())).await;
        assert!(stranger.created);
        assert_eq!(sessions.count().await, 2);
        assert!(sessions.invalidate(first.id).await);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn idle_sessions_are_evicted_on_open() {
        let sessions = InMemorySessions::new(Duration::from_secs(60));
        let idle = sessions.open(None).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        let active = sessions.open(None).await;

        tokio::time::advance(Duration::from_secs(31)).await;
        let again = sessions.open(Some(active.id)).await;
        assert!(!again.created);
        assert_eq!(sessions.count().await, 1);

        let expired = sessions.open(Some(idle.id)).await;
        assert!(expired.created);
        assert_ne!(expired.id, idle.id);
        assert_eq!(sessions.count().await, 2);
    }

    #[test]
    fn poisoned_session_is_recovered() {
        let session: SharedSession = Arc::new(Mutex::new(Session::new(SessionId::generate())));
        let held = session.clone();
        let result = std::thread::spawn(move || {
            let _guard = held.lock().expect("lock");
            panic!("page failed mid-request");
        })
        .join();
        assert!(result.is_err());
        assert!(session.is_poisoned());

        let mut guard = lock_session(&session);
        guard.set_attribute("name", serde_json::json!("Ada"));
        drop(guard);

        assert!(!session.is_poisoned());
        assert_eq!(
            lock_session(&session).attribute("name"),
            Some(&serde_json::json!("Ada"))
        );
    }
}
