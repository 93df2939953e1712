//! Sign-in rate limiting.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

/// Caller key: the peer address of the connection. Client-supplied
/// headers such as `X-Forwarded-For` are ignored.
fn rate_key(req: &Request<axum::body::Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
        .unwrap_or_else(|| "local".to_string())
}

/// Limit sign-in attempts. Other methods on the route pass through.
pub async fn limit_login(req: Request<axum::body::Body>, next: Next) -> Response {
    match limit_inner(req, next).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn limit_inner(req: Request<axum::body::Body>, next: Next) -> Result<Response, ApiError> {
    if req.method() != axum::http::Method::POST {
        return Ok(next.run(req).await);
    }
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let key = rate_key(&req);

    // MutexGuard is !Send; drop it before awaiting
    {
        let mut limiter = ctx
            .login_limiter
            .lock()
            .map_err(|_| ApiError::Internal("rate limiter lock".into()))?;
        limiter.check(&key).map_err(|retry_after| {
            tracing::warn!(key = %key, retry_after, "sign-in rate limited");
            ApiError::RateLimited { retry_after }
        })?;
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn from_peer(ip: [u8; 4], forwarded: &str) -> Request<axum::body::Body> {
        let mut req = Request::builder()
            .header("X-Forwarded-For", forwarded)
            .body(axum::body::Body::empty())
            .unwrap();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), 40000);
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    #[test]
    fn key_is_the_peer_address_not_the_header() {
        assert_eq!(rate_key(&from_peer([10, 0, 0, 7], "1.2.3.4")), "ip:10.0.0.7");
        assert_eq!(rate_key(&from_peer([10, 0, 0, 7], "5.6.7.8")), "ip:10.0.0.7");
    }

    #[test]
    fn missing_connection_info_falls_back_to_local() {
        let req = Request::builder()
            .header("X-Forwarded-For", "1.2.3.4")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(rate_key(&req), "local");
    }
}
