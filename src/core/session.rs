// src/core/session.rs

//! Cookie-bound sessions for end users and the dashboard.
//!
//! Each HTTP client gets one session keyed by an opaque cookie value. The
//! core only interprets two attributes: the SAML authentication state and
//! the dashboard's XSRF token. An eviction sweep removes sessions idle past
//! the configured age.

use crate::core::acl::AuthnIdentity;
use crate::core::time::TimeSource;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

pub const SESSION_COOKIE_NAME: &str = "sessid";

/// Lifecycle of a SAML authentication attempt bound to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthnState {
    /// The user was redirected to the IdP; we are waiting for the artifact.
    StartAttempt {
        saml_request_id: String,
        original_uri: String,
    },
    /// The artifact was resolved and verified.
    Authenticated {
        identity: AuthnIdentity,
        expires_millis: u64,
    },
    Expired,
}

/// Per-client state. Opaque to the core outside the typed attributes.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub last_access_millis: u64,
    pub authn_state: Option<AuthnState>,
    pub xsrf_token: Option<String>,
}

impl Session {
    fn new(id: String, now: u64) -> Self {
        Self {
            id,
            last_access_millis: now,
            authn_state: None,
            xsrf_token: None,
        }
    }

    /// The authenticated identity, when present and not yet expired.
    pub fn authenticated_identity(&self, now_millis: u64) -> Option<&AuthnIdentity> {
        match &self.authn_state {
            Some(AuthnState::Authenticated {
                identity,
                expires_millis,
            }) if *expires_millis > now_millis => Some(identity),
            _ => None,
        }
    }
}

/// Registry of live sessions, keyed by cookie value.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
    time: Arc<dyn TimeSource>,
    max_age: Duration,
}

impl SessionManager {
    pub fn new(time: Arc<dyn TimeSource>, max_age: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            time,
            max_age,
        }
    }

    /// Looks up the session for a cookie value, touching its access time.
    pub fn get(&self, cookie_value: &str) -> Option<Arc<Mutex<Session>>> {
        let session = self.sessions.get(cookie_value)?.clone();
        session.lock().last_access_millis = self.time.now_millis();
        Some(session)
    }

    /// Creates a fresh session and returns (cookie value, session).
    pub fn create(&self) -> (String, Arc<Mutex<Session>>) {
        let id = Uuid::new_v4().simple().to_string();
        let session = Arc::new(Mutex::new(Session::new(
            id.clone(),
            self.time.now_millis(),
        )));
        self.sessions.insert(id.clone(), session.clone());
        debug!("Created session {id}.");
        (id, session)
    }

    /// The session for the request's cookie, or a new one.
    pub fn get_or_create(
        &self,
        cookie_value: Option<&str>,
    ) -> (String, Arc<Mutex<Session>>, bool) {
        if let Some(value) = cookie_value {
            if let Some(session) = self.get(value) {
                return (value.to_string(), session, false);
            }
        }
        let (id, session) = self.create();
        (id, session, true)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Removes sessions idle past the maximum age. Returns how many were
    /// evicted.
    pub fn evict_expired(&self) -> usize {
        let now = self.time.now_millis();
        let max_age_millis = self.max_age.as_millis() as u64;
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            now.saturating_sub(session.lock().last_access_millis) < max_age_millis
        });
        before - self.sessions.len()
    }

    /// Periodic sweep loop, stopped through the shutdown channel.
    pub async fn run_evictor(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Session evictor started.");
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = self.evict_expired();
                    if evicted > 0 {
                        debug!("Evicted {evicted} expired session(s).");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Session evictor shutting down.");
                    return;
                }
            }
        }
    }
}
