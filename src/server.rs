//! HTTP surface of the gateway.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::middleware::ProxyPoolMiddleware;
use crate::pool::ProxyPool;
use crate::proxy::ProxyStatus;
use crate::stats::{DispatchStats, Endpoint, GatewayStats};
use crate::upstream::{ContentApi, UpstreamResponse};

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use log::{error, info};
use reqwest_middleware::ClientBuilder;
use serde::Deserialize;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::Arc;

const SERVICE_NAME: &str = "Jina AI Proxy API";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
const ENDPOINTS: [&str; 5] = ["/", "/search", "/read", "/health", "/stats"];

/// Shared state for the handlers.
#[derive(Clone)]
pub struct AppState {
    pub api: ContentApi,
    /// `None` when the gateway runs without proxies.
    pub pool: Option<Arc<ProxyPool>>,
    pub dispatch: Arc<DispatchStats>,
    pub stats: Arc<GatewayStats>,
    /// Inbound limit for `/search` and `/read`.
    pub limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl AppState {
    pub fn new(api: ContentApi, pool: Option<Arc<ProxyPool>>, dispatch: Arc<DispatchStats>) -> Self {
        Self {
            api,
            pool,
            dispatch,
            stats: Arc::new(GatewayStats::new()),
            limiter: None,
        }
    }

    /// Assemble the outbound client, proxy pool and counters from configuration.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        // Direct calls ignore HTTP_PROXY and friends.
        let base = reqwest::Client::builder()
            .no_proxy()
            .timeout(config.request_timeout)
            .build()
            .map_err(reqwest_middleware::Error::Reqwest)?;

        let (client, pool, dispatch) = if config.use_proxies {
            let middleware = ProxyPoolMiddleware::new(config.pool.clone()).await?;
            let pool = Arc::clone(middleware.pool());
            let dispatch = Arc::clone(middleware.stats());
            (ClientBuilder::new(base).with(middleware).build(), Some(pool), dispatch)
        } else {
            info!("Proxy rotation disabled, all upstream calls go out directly");
            (ClientBuilder::new(base).build(), None, Arc::new(DispatchStats::new()))
        };

        let api = ContentApi::new(
            client,
            config.search_url.clone(),
            config.reader_url.clone(),
            config.api_key.clone(),
        );

        Ok(Self::new(api, pool, dispatch).with_rate_limit(config.rate_limit_per_minute))
    }

    /// Limit `/search` and `/read` to `per_minute` requests. Zero leaves them unlimited.
    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.limiter = NonZeroU32::new(per_minute)
            .map(|n| Arc::new(RateLimiter::direct(Quota::per_minute(n))));
        self
    }

    fn check_rate_limit(&self) -> Result<(), GatewayError> {
        match &self.limiter {
            Some(limiter) if limiter.check().is_err() => Err(GatewayError::RateLimited),
            _ => Ok(()),
        }
    }

    fn service_stats(&self) -> Value {
        json!(self.stats.report(self.pool.as_deref(), &self.dispatch))
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/search", post(search))
        .route("/read", post(read))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .fallback(not_found)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReadRequest {
    pub url: Option<String>,
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn require_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    body.map(|Json(inner)| inner).map_err(|rejection| {
        GatewayError::InvalidRequest(format!("No valid JSON data provided: {}", rejection.body_text()))
    })
}

fn require_field(value: Option<String>, field: &str) -> Result<String, GatewayError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest(format!("Missing or empty '{}' field", field)))
}

fn upstream_success(key: &str, value: &str, source: &str, upstream: UpstreamResponse) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            key: value,
            "content": upstream.body,
            "status_code": upstream.status,
            "source": source,
            "timestamp": timestamp(),
        })),
    )
        .into_response()
}

fn upstream_failure(key: &str, value: &str, err: GatewayError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "success": false,
            "error": err.to_string(),
            key: value,
            "timestamp": timestamp(),
        })),
    )
        .into_response()
}

async fn search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let query = require_field(require_body(body)?.query, "query")?;
    // Only well-formed requests use up the quota
    state.check_rate_limit()?;
    state.stats.record_request(Endpoint::Search);
    info!("Search request for: {}", query);

    match state.api.search(&query).await {
        Ok(upstream) => Ok(upstream_success("query", &query, "jina_search", upstream)),
        Err(e) => {
            error!("Search failed for query '{}': {}", query, e);
            state.stats.record_failure();
            Ok(upstream_failure("query", &query, e))
        }
    }
}

async fn read(
    State(state): State<AppState>,
    body: Result<Json<ReadRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let url = require_field(require_body(body)?.url, "url")?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(GatewayError::InvalidRequest(
            "URL must start with http:// or https://".to_string(),
        ));
    }
    state.check_rate_limit()?;
    state.stats.record_request(Endpoint::Read);
    info!("Read request for: {}", url);

    match state.api.read(&url).await {
        Ok(upstream) => Ok(upstream_success("url", &url, "jina_reader", upstream)),
        Err(e) => {
            error!("URL reading failed for '{}': {}", url, e);
            state.stats.record_failure();
            Ok(upstream_failure("url", &url, e))
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let status = match &state.pool {
        Some(pool) if pool.get_stats().1 == 0 => "degraded",
        _ => "healthy",
    };

    Json(json!({
        "status": status,
        "timestamp": timestamp(),
        "service": format!("{} v{}", SERVICE_NAME, SERVICE_VERSION),
        "stats": state.service_stats(),
    }))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let proxies = state.pool.as_ref().map(|p| p.snapshot()).unwrap_or_default();
    let working: Vec<&str> = proxies
        .iter()
        .filter(|p| p.status != ProxyStatus::Unhealthy)
        .map(|p| p.url.as_str())
        .collect();

    Json(json!({
        "service_stats": state.service_stats(),
        "proxy_details": {
            "working_count": working.len(),
            "failed_count": proxies.len() - working.len(),
            "working_proxies": working.iter().take(5).collect::<Vec<_>>(),
            "proxies": proxies,
            "last_updated": timestamp(),
        },
    }))
}

async fn index(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "description": "A proxy-enabled API wrapper for Jina AI search and reader services",
        "features": [
            "Automatic proxy rotation",
            "Fallback to direct connection",
            "Request statistics",
            "Health monitoring",
            "Rate limiting protection",
        ],
        "endpoints": {
            "/": "API documentation (this page)",
            "/search": "POST - Search the web using Jina AI",
            "/read": "POST - Read URL content using Jina AI",
            "/health": "GET - Health check and statistics",
            "/stats": "GET - Detailed API statistics",
        },
        "usage_examples": {
            "search": {
                "method": "POST",
                "url": "/search",
                "body": {"query": "latest AI developments"},
            },
            "read": {
                "method": "POST",
                "url": "/read",
                "body": {"url": "https://example.com"},
            },
        },
        "stats": state.service_stats(),
    }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Endpoint not found",
            "available_endpoints": ENDPOINTS,
        })),
    )
}
