//! Middleware implementation for reqwest.
//!
//! Each request is tried through up to `retry_count + 1` distinct proxies. When
//! every attempt failed, or no proxy is in rotation, the request falls through
//! to the wrapped client and goes out directly.

use crate::config::ProxyPoolConfig;
use crate::error::NoProxyAvailable;
use crate::pool::ProxyPool;
use crate::stats::DispatchStats;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, info, warn};
use rand::Rng;
use reqwest::StatusCode;
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Middleware that uses a pool of proxies for HTTP requests.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    /// The proxy pool.
    pool: Arc<ProxyPool>,
    stats: Arc<DispatchStats>,
}

impl ProxyPoolMiddleware {
    /// Create a new proxy pool middleware with the given configuration.
    /// This will synchronously initialize the proxy pool and perform health checks.
    pub async fn new(config: ProxyPoolConfig) -> Result<Self> {
        let pool = ProxyPool::new(config).await.map_err(Error::Reqwest)?;
        let (total, healthy) = pool.get_stats();
        info!("Proxy pool initialized with {}/{} healthy proxies", healthy, total);

        if healthy == 0 {
            warn!("No healthy proxies available in pool");
        }

        Ok(Self::with_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn with_pool(pool: Arc<ProxyPool>) -> Self {
        Self {
            pool,
            stats: Arc::new(DispatchStats::new()),
        }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    /// Random pause between two proxy attempts.
    fn retry_delay(&self) -> Duration {
        let (min, max) = (self.pool.config.retry_delay_min, self.pool.config.retry_delay_max);
        if max <= min {
            return min;
        }
        let millis = rand::rng().random_range(min.as_millis()..=max.as_millis());
        Duration::from_millis(millis as u64)
    }

    fn proxied_client(&self, proxy: reqwest::Proxy) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.pool.config.request_timeout)
            .danger_accept_invalid_certs(self.pool.config.accept_invalid_certs)
            .build()
    }
}

/// What a proxied response says about the proxy that delivered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// A usable answer from the upstream service.
    Delivered,
    /// The proxy itself failed: it wants credentials or could not reach the upstream.
    ProxyFailed,
    /// The upstream refused or broke. Try another path, but the proxy is fine.
    Rejected,
}

/// 407, 502 and 504 are produced by the proxy. 429 and other 5xx come from the upstream.
fn classify(status: StatusCode) -> Outcome {
    match status {
        StatusCode::PROXY_AUTHENTICATION_REQUIRED
        | StatusCode::BAD_GATEWAY
        | StatusCode::GATEWAY_TIMEOUT => Outcome::ProxyFailed,
        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => Outcome::Rejected,
        _ => Outcome::Delivered,
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let max_attempts = self.pool.config.retry_count + 1;
        let mut tried = HashSet::new();
        let mut last_rejected = None;

        while tried.len() < max_attempts {
            // Pick a proxy this request has not been through yet
            let proxy = match self.pool.get_proxy_excluding(&tried) {
                Ok(proxy) => proxy,
                Err(NoProxyAvailable) => {
                    let (total, healthy) = self.pool.get_stats();
                    debug!("No untried proxy left. Total: {}, Healthy: {}, tried: {}",
                        total, healthy, tried.len());
                    break;
                }
            };
            let attempt = tried.len() + 1;
            tried.insert(proxy.url.clone());

            let proxied_request = req.try_clone().ok_or_else(|| {
                Error::Middleware(anyhow!(
                    "Request object is not cloneable. Are you passing a streaming body?"
                ))
            })?;

            let proxy_url = proxy.url.clone();
            info!("Using proxy: {} (attempt {})", proxy_url, attempt);

            // Apply rate limiting
            proxy.limiter.until_ready().await;
            self.stats.record_attempt();

            // Build a new client with the proxy
            let client = match proxy.to_reqwest_proxy().and_then(|p| self.proxied_client(p)) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Failed to build client with proxy {}: {}", proxy_url, e);
                    self.pool.report_proxy_failure(&proxy_url);
                    self.stats.record_proxy_failure();
                    continue;
                }
            };

            match client.execute(proxied_request).await {
                Ok(response) => match classify(response.status()) {
                    Outcome::Delivered => {
                        self.pool.report_proxy_success(&proxy_url);
                        self.stats.record_proxy_success();
                        info!("Request successful with proxy: {}", proxy_url);
                        return Ok(response);
                    }
                    Outcome::ProxyFailed => {
                        warn!("Proxy {} answered {} (attempt {})",
                            proxy_url, response.status(), attempt);
                        self.pool.report_proxy_failure(&proxy_url);
                        self.stats.record_proxy_failure();
                    }
                    Outcome::Rejected => {
                        // Upstream trouble, the proxy stays in rotation
                        info!("Upstream answered {} through proxy {} (attempt {})",
                            response.status(), proxy_url, attempt);
                        self.stats.record_rejection();
                        last_rejected = Some(response);
                    }
                },
                Err(err) => {
                    warn!("Request failed with proxy {} (attempt {}): {}",
                        proxy_url, attempt, err);
                    self.pool.report_proxy_failure(&proxy_url);
                    self.stats.record_proxy_failure();
                }
            }

            // Pause only if another proxy attempt follows
            if tried.len() < max_attempts && self.pool.has_proxy_excluding(&tried) {
                let delay = self.retry_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        if !self.pool.config.direct_fallback {
            if let Some(response) = last_rejected {
                return Ok(response);
            }
            warn!("All proxy attempts failed and direct fallback is disabled");
            return Err(Error::Middleware(anyhow!(NoProxyAvailable)));
        }

        // Fall back to a direct connection
        info!("Attempting direct connection (no proxy) after {} proxy attempts", tried.len());
        let result = next.run(req, extensions).await;
        self.stats.record_direct(result.is_ok());
        if let Err(e) = &result {
            warn!("Direct connection also failed: {}", e);
        }
        result
    }
}
