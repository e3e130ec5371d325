//! axum middleware wiring: identity extraction and verdict rendering.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, error};

use crate::config::LimiterConfig;
use crate::limiter::check_rate_limit;

/// Header carrying the token identity. Absent, the client address is used.
pub const API_KEY_HEADER: &str = "API_KEY";

const KEY_TYPE_TOKEN: &str = "TOKEN";
const KEY_TYPE_IP: &str = "IP";

/// Rate limiting middleware.
///
/// Install with [`axum::middleware::from_fn_with_state`] and a resolved
/// [`LimiterConfig`]:
///
/// ```no_run
/// use std::sync::Arc;
/// use axum::{routing::get, Router};
/// use turnpike::config::{EnvSnapshot, LimiterConfig};
/// use turnpike::middleware::rate_limit;
///
/// # fn main() -> anyhow::Result<()> {
/// let config = Arc::new(LimiterConfig::resolve(None, &EnvSnapshot::from_process())?);
/// let app: Router = Router::new()
///     .route("/", get(|| async { "OK" }))
///     .layer(axum::middleware::from_fn_with_state(config, rate_limit));
/// # Ok(())
/// # }
/// ```
///
/// A request with neither an `API_KEY` header nor connection info yields an
/// empty identity key and is admitted open.
pub async fn rate_limit(
    State(config): State<Arc<LimiterConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    let verdict = if !token.is_empty() {
        let (rate, custom) = config.rate_config_for_token(token);
        if config.debug && custom {
            debug!(target: "turnpike", token, "using custom token policy");
        }
        check_rate_limit(KEY_TYPE_TOKEN, token, &config, &rate).await
    } else {
        let ip = client_ip(&request);
        check_rate_limit(KEY_TYPE_IP, &ip, &config, &config.ip).await
    };

    match verdict {
        Err(err) => {
            error!(%err, "rate limit check failed");
            config.response_writer.write_error(&err)
        }
        Ok(Some(_until)) => config.response_writer.write_blocked(),
        Ok(None) => next.run(request).await,
    }
}

fn client_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use chrono::{DateTime, Utc};
    use tower::ServiceExt;

    use crate::config::{LimiterOptions, RateConfig};
    use crate::error::{Result, TurnpikeError};
    use crate::storage::{MemoryStorageAdapter, StorageAdapter};

    use super::*;

    fn app(options: LimiterOptions) -> Router {
        let config = Arc::new(
            LimiterConfig::resolve(Some(options), &Default::default()).unwrap(),
        );
        Router::new()
            .route("/", get(|| async { "OK" }))
            .layer(axum::middleware::from_fn_with_state(config, rate_limit))
    }

    fn ip_request(ip: [u8; 4]) -> HttpRequest<Body> {
        let mut request = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 4242))));
        request
    }

    fn token_request(token: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .uri("/")
            .header(API_KEY_HEADER, token)
            .body(Body::empty())
            .unwrap()
    }

    fn small_budget_options() -> LimiterOptions {
        LimiterOptions {
            ip: Some(RateConfig::new(2, 60_000)),
            token: Some(RateConfig::new(2, 60_000)),
            disable_env: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_token_identity_blocked_after_budget() {
        let app = app(small_budget_options());

        for _ in 0..2 {
            let response = app.clone().oneshot(token_request("abc")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(token_request("abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // A different token has its own budget.
        let response = app.clone().oneshot(token_request("def")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ip_identity_used_when_header_absent() {
        let app = app(small_budget_options());

        for _ in 0..2 {
            let response = app.clone().oneshot(ip_request([10, 0, 0, 1])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(ip_request([10, 0, 0, 1])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = app.clone().oneshot(ip_request([10, 0, 0, 2])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_token_policy_applies() {
        let mut options = small_budget_options();
        options.custom_tokens =
            HashMap::from([("vip".to_string(), Some(RateConfig::new(5, 60_000)))]);
        let app = app(options);

        for _ in 0..5 {
            let response = app.clone().oneshot(token_request("vip")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(token_request("vip")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_request_without_identity_admitted_open() {
        let app = app(LimiterOptions {
            ip: Some(RateConfig::new(1, 60_000)),
            disable_env: true,
            ..Default::default()
        });

        // No header, no connection info: every request passes.
        for _ in 0..5 {
            let request = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    struct FailingAdapter;

    #[async_trait]
    impl StorageAdapter for FailingAdapter {
        async fn increment_accesses(
            &self,
            _key_type: &str,
            _key: &str,
            _max_accesses: i64,
        ) -> Result<(bool, i64)> {
            Err(TurnpikeError::Storage("backend down".to_string()))
        }

        async fn get_block(&self, _key_type: &str, _key: &str) -> Result<Option<DateTime<Utc>>> {
            Err(TurnpikeError::Storage("backend down".to_string()))
        }

        async fn add_block(
            &self,
            _key_type: &str,
            _key: &str,
            _block_time_ms: i64,
        ) -> Result<DateTime<Utc>> {
            Err(TurnpikeError::Storage("backend down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_storage_failure_renders_internal_error() {
        let app = app(LimiterOptions {
            storage: Some(Arc::new(FailingAdapter)),
            disable_env: true,
            ..Default::default()
        });

        let response = app.oneshot(token_request("abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_blocked_identity_stops_consuming_quota() {
        let storage = Arc::new(MemoryStorageAdapter::new());
        let app = app(LimiterOptions {
            token: Some(RateConfig::new(1, 60_000)),
            storage: Some(storage.clone()),
            disable_env: true,
            ..Default::default()
        });

        let response = app.clone().oneshot(token_request("abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.clone().oneshot(token_request("abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let blocked_at = storage.get_block("TOKEN", "abc").await.unwrap().unwrap();

        // Further rejected requests neither extend nor replace the block.
        let response = app.clone().oneshot(token_request("abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let still = storage.get_block("TOKEN", "abc").await.unwrap().unwrap();
        assert_eq!(still, blocked_at);
    }
}
