//! Auth context: the current session behind a single-writer watch channel.
//!
//! Every reader subscribes; only `SessionStore` methods write. Sign-out
//! always clears local state even when the provider call fails.

use tokio::sync::watch;

use crate::gateway::{GatewayError, IdentityProvider};
use crate::models::Session;

pub struct SessionStore {
    tx: watch::Sender<Option<Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Restore whatever session the provider still holds.
    pub fn init<P: IdentityProvider + ?Sized>(&self, provider: &P) -> Option<Session> {
        let restored = match provider.current_session() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "session restore failed");
                None
            }
        };
        self.publish(restored.clone());
        restored
    }

    /// Returns the provider's message on failure.
    pub fn sign_in<P: IdentityProvider + ?Sized>(
        &self,
        provider: &P,
        email: &str,
        password: &str,
    ) -> Result<Session, String> {
        match provider.sign_in(email.trim(), password) {
            Ok(session) => {
                tracing::info!(user_id = %session.user.id, "session started");
                self.publish(Some(session.clone()));
                Ok(session)
            }
            Err(e) => {
                tracing::info!(error = %e, "sign-in failed");
                Err(e.user_message())
            }
        }
    }

    pub fn sign_out<P: IdentityProvider + ?Sized>(&self, provider: &P) {
        if let Err(e) = provider.sign_out() {
            tracing::warn!(error = %e, "provider sign-out failed");
        }
        self.publish(None);
        tracing::info!("session cleared");
    }

    /// Drop the local session after the provider reported it invalid.
    /// Returns whether there was one to drop.
    pub fn expire(&self, reason: &GatewayError) -> bool {
        if !self.is_signed_in() {
            return false;
        }
        tracing::info!(%reason, "session expired");
        self.publish(None);
        true
    }

    fn publish(&self, session: Option<Session>) {
        self.tx.send_replace(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::local::testing::{brt, PASSWORD};
    use crate::gateway::LocalGateway;

    fn provider() -> LocalGateway {
        let gw = LocalGateway::open_in_memory(brt()).unwrap();
        gw.register_user("maria@clinic.com", PASSWORD).unwrap();
        gw
    }

    #[test]
    fn sign_in_publishes_to_subscribers() {
        let gw = provider();
        let store = SessionStore::new();
        let rx = store.subscribe();
        assert!(rx.borrow().is_none());

        let session = store.sign_in(&gw, " maria@clinic.com ", PASSWORD).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow().as_ref().map(|s| s.user.id), Some(session.user.id));
        assert!(store.is_signed_in());
    }

    #[test]
    fn failed_sign_in_returns_provider_message() {
        let gw = provider();
        let store = SessionStore::new();
        let err = store.sign_in(&gw, "maria@clinic.com", "wrong").unwrap_err();
        assert_eq!(err, "Invalid login credentials");
        assert!(store.current().is_none());
    }

    #[test]
    fn init_restores_provider_session() {
        let gw = provider();
        gw.sign_in("maria@clinic.com", PASSWORD).unwrap();
        let store = SessionStore::new();
        assert!(store.init(&gw).is_some());
        assert_eq!(store.current().and_then(|s| s.user.email), Some("maria@clinic.com".into()));
    }

    #[test]
    fn sign_out_clears_state() {
        let gw = provider();
        let store = SessionStore::new();
        store.sign_in(&gw, "maria@clinic.com", PASSWORD).unwrap();
        store.sign_out(&gw);
        assert!(store.current().is_none());
        assert!(gw.current_session().unwrap().is_none());
    }

    #[test]
    fn expire_is_a_no_op_when_signed_out() {
        let store = SessionStore::new();
        let rx = store.subscribe();
        assert!(!store.expire(&GatewayError::NotAuthenticated));
        assert!(!rx.has_changed().unwrap());
    }
}
