//! Server-side sessions keyed by a cookie
//!
//! The OAuth state, PKCE verifier and return URL must survive the redirect
//! to the platform and back, so each browser gets an opaque session id in an
//! HTTP-only cookie and the [`Session`] itself stays in memory.

use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use libsharecast::session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const SESSION_COOKIE: &str = "sharecast_session";

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    secure: bool,
}

impl SessionStore {
    pub fn new(secure: bool) -> Self {
        Self {
            sessions: Arc::default(),
            secure,
        }
    }

    /// Session of the request, starting a new one when the cookie is unknown
    ///
    /// Returns the jar to send back, which carries the cookie of a new session.
    pub async fn open(&self, jar: CookieJar) -> (CookieJar, String, Session) {
        if let Some(id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
            if let Some(session) = self.sessions.read().await.get(&id) {
                return (jar, id, session.clone());
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let cookie = Cookie::build((SESSION_COOKIE, id.clone()))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .build();
        (jar.add(cookie), id, Session::new())
    }

    pub async fn save(&self, id: String, session: Session) {
        self.sessions.write().await.insert(id, session);
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsharecast::session::STATE_KEY;

    #[tokio::test]
    async fn test_session_survives_between_requests() {
        let store = SessionStore::new(false);

        let (jar, id, mut session) = store.open(CookieJar::new()).await;
        assert_eq!(jar.get(SESSION_COOKIE).map(|c| c.value()), Some(id.as_str()));
        session.set(STATE_KEY, "xyz");
        store.save(id.clone(), session).await;

        let (_, same_id, session) = store.open(jar).await;
        assert_eq!(same_id, id);
        assert_eq!(session.get(STATE_KEY), Some("xyz"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_cookie_starts_fresh_session() {
        let store = SessionStore::new(false);
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, "forged"));

        let (jar, id, session) = store.open(jar).await;
        assert_ne!(id, "forged");
        assert_eq!(jar.get(SESSION_COOKIE).map(|c| c.value()), Some(id.as_str()));
        assert!(session.get(STATE_KEY).is_none());
    }
}
