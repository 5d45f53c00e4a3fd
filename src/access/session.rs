//! Per-connection authorization state.
//!
//! A WebSocket connection carries one `SessionContext` for its whole life;
//! the identity resolved at connect (or by a later identify/login call)
//! governs every subsequent frame until logout or disconnect. HTTP requests
//! build a context, use it once and drop it. The context is owned by the
//! connection's serialized message stream, so no locking is involved.

use super::identity::Identity;
use super::unix_now_secs;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated { identity: Identity, authenticated_at: f64 },
    /// Terminal. A closed connection never transitions again.
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    state: SessionState,
}

impl Default for SessionContext {
    fn default() -> Self { Self::new() }
}

impl SessionContext {
    pub fn new() -> Self {
        Self { state: SessionState::Unauthenticated }
    }

    /// Install a resolved identity. Anonymous identities leave the session
    /// unauthenticated; a closed session rejects the transition.
    pub fn authenticate(&mut self, identity: Identity) -> bool {
        if matches!(self.state, SessionState::Closed) {
            return false;
        }
        if !identity.is_authenticated() {
            return false;
        }
        self.state = SessionState::Authenticated { identity, authenticated_at: unix_now_secs() };
        true
    }

    /// Clear the identity. Returns the identity that was active, if any.
    pub fn logout(&mut self) -> Option<Identity> {
        match std::mem::replace(&mut self.state, SessionState::Unauthenticated) {
            SessionState::Authenticated { identity, .. } => Some(identity),
            SessionState::Closed => {
                self.state = SessionState::Closed;
                None
            }
            SessionState::Unauthenticated => None,
        }
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    /// The identity governing this connection's requests right now.
    pub fn identity(&self) -> Identity {
        match &self.state {
            SessionState::Authenticated { identity, .. } => identity.clone(),
            _ => Identity::Anonymous,
        }
    }

    pub fn authenticated_at(&self) -> Option<f64> {
        match &self.state {
            SessionState::Authenticated { authenticated_at, .. } => Some(*authenticated_at),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::identity::AuthSource;

    fn alice() -> Identity {
        Identity::User { username: "alice".into(), source: AuthSource::Local }
    }

    #[test]
    fn lifecycle() {
        let mut ctx = SessionContext::new();
        assert_eq!(ctx.identity(), Identity::Anonymous);
        assert!(ctx.authenticate(alice()));
        assert_eq!(ctx.identity(), alice());
        assert!(ctx.authenticated_at().is_some());
        assert_eq!(ctx.logout(), Some(alice()));
        assert_eq!(ctx.identity(), Identity::Anonymous);
    }

    #[test]
    fn anonymous_cannot_authenticate() {
        let mut ctx = SessionContext::new();
        assert!(!ctx.authenticate(Identity::Anonymous));
        assert_eq!(ctx.identity(), Identity::Anonymous);
    }

    #[test]
    fn closed_is_terminal() {
        let mut ctx = SessionContext::new();
        ctx.authenticate(alice());
        ctx.close();
        assert!(ctx.is_closed());
        assert!(!ctx.authenticate(alice()));
        assert_eq!(ctx.logout(), None);
        assert!(ctx.is_closed());
        assert_eq!(ctx.identity(), Identity::Anonymous);
    }
}
