//! Auth boundary.  The server issues opaque bearer tokens; everything the
//! bridge needs is "give me the current session, if any".

use std::sync::RwLock;

use chrono::Utc;
use recdash_proto::api::Session;

/// Supplies credentials for the WebSocket and REST calls.  Returning
/// `None` means unauthenticated access (a server in open mode).
pub trait SessionSource: Send + Sync + 'static {
    fn current(&self) -> Option<Session>;
}

/// A fixed token, or none at all.  Suitable for CLI use and servers
/// without auth.
pub struct StaticToken {
    session: Option<Session>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            session: Some(Session {
                token: token.into(),
                expires_at: None,
            }),
        }
    }

    pub fn anonymous() -> Self {
        Self { session: None }
    }
}

impl SessionSource for StaticToken {
    fn current(&self) -> Option<Session> {
        self.session.clone()
    }
}

/// Holds the most recent session from the auth endpoints and drops it
/// once expired.  Refreshing is the API client's job; this type only
/// stores the result.
#[derive(Default)]
pub struct SessionCell {
    inner: RwLock<Option<Session>>,
}

impl SessionCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, session: Option<Session>) {
        *self.inner.write().expect("session lock poisoned") = session;
    }
}

impl SessionSource for SessionCell {
    fn current(&self) -> Option<Session> {
        let guard = self.inner.read().expect("session lock poisoned");
        match guard.as_ref() {
            Some(s) if !s.is_expired(Utc::now()) => Some(s.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_token() {
        let source = StaticToken::new("tok");
        assert_eq!(source.current().unwrap().token, "tok");
        assert!(StaticToken::anonymous().current().is_none());
    }

    #[test]
    fn test_session_cell_drops_expired() {
        let cell = SessionCell::new();
        cell.store(Some(Session {
            token: "tok".into(),
            expires_at: Some(Utc::now() - chrono::Duration::minutes(1)),
        }));
        assert!(cell.current().is_none());

        cell.store(Some(Session {
            token: "tok".into(),
            expires_at: Some(Utc::now() + chrono::Duration::minutes(10)),
        }));
        assert!(cell.current().is_some());
    }
}
