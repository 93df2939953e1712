//! Shared types for the HTTP layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::watch;

use crate::api::error::ApiError;
use crate::core_state::CoreState;
use crate::error::ServiceError;
use crate::gateway::GatewayError;
use crate::models::Session;
use crate::view::ListState;

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    pub login_limiter: Arc<Mutex<RateLimiter>>,
    session: watch::Receiver<Option<Session>>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        let session = core.session().subscribe();
        Self {
            core,
            login_limiter: Arc::new(Mutex::new(RateLimiter::new(10, 100))),
            session,
        }
    }

    /// Latest session published by the store.
    pub fn current_session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    /// Run a core operation on the blocking pool. Gateway calls and the
    /// preference store are synchronous.
    pub async fn blocking<T, E, F>(&self, op: F) -> Result<T, ApiError>
    where
        F: FnOnce(&CoreState) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<ApiError>,
    {
        let core = self.core.clone();
        let result = tokio::task::spawn_blocking(move || op(&core).map_err(Into::into)).await?;
        if matches!(result, Err(ApiError::Unauthorized)) {
            self.core.expire_session();
        }
        result
    }

    /// Run a list load. Failures become the list's error state instead of
    /// an error response.
    pub async fn list<T, F>(&self, op: F) -> ListState<T>
    where
        F: FnOnce(&CoreState) -> Result<Vec<T>, ServiceError> + Send + 'static,
        T: Send + 'static,
    {
        let core = self.core.clone();
        match tokio::task::spawn_blocking(move || op(&core)).await {
            Ok(result) => {
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "list load failed");
                    if matches!(e, ServiceError::Gateway(GatewayError::NotAuthenticated)) {
                        self.core.expire_session();
                    }
                }
                ListState::from(result)
            }
            Err(e) => {
                tracing::error!("list load task failed: {e}");
                ListState::Error("An internal error occurred".to_string())
            }
        }
    }
}

/// `?confirm=true` on destructive endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Confirm {
    #[serde(default)]
    pub confirm: bool,
}

const WINDOW: Duration = Duration::from_secs(3600);

/// Sliding-window limiter keyed by caller (sign-in attempts).
pub struct RateLimiter {
    windows: HashMap<String, Vec<Instant>>,
    per_minute: u32,
    per_hour: u32,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_hour: u32) -> Self {
        Self {
            windows: HashMap::new(),
            per_minute,
            per_hour,
        }
    }

    /// `Ok(())` when within limits, otherwise `Err(retry_after_secs)`.
    pub fn check(&mut self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        // keys with nothing in the last hour are dropped
        self.windows.retain(|_, entries| {
            entries.retain(|ts| now.duration_since(*ts) < WINDOW);
            !entries.is_empty()
        });
        let entries = self.windows.entry(key.to_string()).or_default();

        let last_minute = entries
            .iter()
            .filter(|ts| now.duration_since(**ts) < Duration::from_secs(60))
            .count() as u32;
        if last_minute >= self.per_minute {
            return Err(60);
        }
        if entries.len() as u32 >= self.per_hour {
            return Err(3600);
        }

        entries.push(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_state::testing::state_over;
    use crate::gateway::local::testing::{Fixture, PASSWORD};

    #[test]
    fn context_follows_published_sessions() {
        let t = state_over(Fixture::new().gw);
        let ctx = ApiContext::new(t.state.clone());
        assert!(ctx.current_session().is_none());

        t.state.sign_in("owner@clinicx.com", PASSWORD).unwrap();
        assert!(ctx.current_session().is_some());
        t.state.expire_session();
        assert!(ctx.current_session().is_none());
    }

    #[tokio::test]
    async fn unauthenticated_gateway_error_expires_the_session() {
        let t = state_over(Fixture::new().gw);
        let ctx = ApiContext::new(t.state.clone());
        t.state.sign_in("owner@clinicx.com", PASSWORD).unwrap();

        let result: Result<(), ApiError> = ctx
            .blocking(|_| Err::<(), _>(GatewayError::NotAuthenticated))
            .await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert!(!t.state.session().is_signed_in());
    }

    #[tokio::test]
    async fn other_failures_keep_the_session() {
        let t = state_over(Fixture::new().gw);
        let ctx = ApiContext::new(t.state.clone());
        t.state.sign_in("owner@clinicx.com", PASSWORD).unwrap();

        let _ = ctx
            .blocking(|_| Err::<(), _>(GatewayError::Forbidden("no".into())))
            .await;
        let list = ctx
            .list(|_| Err::<Vec<u8>, _>(ServiceError::Refused("no".into())))
            .await;
        assert!(matches!(list, ListState::Error(_)));
        assert!(t.state.session().is_signed_in());
    }

    #[test]
    fn limiter_allows_up_to_the_minute_budget() {
        let mut limiter = RateLimiter::new(3, 100);
        for _ in 0..3 {
            assert!(limiter.check("127.0.0.1").is_ok());
        }
        assert_eq!(limiter.check("127.0.0.1"), Err(60));
        assert!(limiter.check("10.0.0.2").is_ok());
    }

    #[test]
    fn limiter_enforces_hourly_budget() {
        let mut limiter = RateLimiter::new(100, 2);
        assert!(limiter.check("k").is_ok());
        assert!(limiter.check("k").is_ok());
        assert_eq!(limiter.check("k"), Err(3600));
    }

    #[test]
    fn idle_keys_are_swept() {
        let mut limiter = RateLimiter::new(10, 100);
        let Some(stale) = Instant::now().checked_sub(Duration::from_secs(3700)) else {
            return;
        };
        limiter.windows.insert("ip:10.0.0.1".into(), vec![stale]);
        limiter.windows.insert("ip:10.0.0.2".into(), vec![stale, stale]);

        assert!(limiter.check("ip:10.0.0.3").is_ok());
        assert_eq!(limiter.windows.len(), 1);
        assert!(limiter.windows.contains_key("ip:10.0.0.3"));
    }

    #[test]
    fn confirm_defaults_to_false() {
        let c: Confirm = serde_json::from_str("{}").unwrap();
        assert!(!c.confirm);
    }
}
