//! Proxy representation and status.

use governor::{clock::DefaultClock, middleware::NoOpMiddleware, state::{InMemoryState, NotKeyed}, Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

/// Status of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    /// The proxy has not been tested yet. It may still be selected.
    Unknown,
    /// The proxy is healthy and can be used.
    Healthy,
    /// The proxy is unhealthy and should not be used.
    Unhealthy,
}

/// Representation of a proxy server.
#[derive(Debug, Clone)]
pub struct Proxy {
    /// The URL of the proxy (e.g. "http://127.0.0.1:8080").
    pub url: String,
    /// The current status of the proxy.
    pub status: ProxyStatus,
    /// Number of successful requests made through this proxy.
    pub success_count: usize,
    /// Number of failed requests made through this proxy.
    pub failure_count: usize,
    /// Failures since the last success or passed health check.
    pub consecutive_failures: usize,
    /// Time when this proxy was last checked.
    pub last_check: Instant,
    /// Time of the most recent failure, if any.
    pub last_failure: Option<Instant>,
    /// Last health check response time in seconds, if available.
    pub response_time: Option<f64>,
    /// Rate limiter to control requests per second.
    pub limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
}

/// Serializable view of a proxy for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProxySnapshot {
    pub url: String,
    pub status: ProxyStatus,
    pub success_count: usize,
    pub failure_count: usize,
    pub consecutive_failures: usize,
    pub success_rate: f64,
    pub response_time: Option<f64>,
    pub seconds_since_check: u64,
    pub seconds_since_failure: Option<u64>,
}

impl Proxy {
    /// Create a new proxy with the given URL and rate limit.
    pub fn new(url: String, max_rps: f64) -> Self {
        let per_second = NonZeroU32::new(max_rps.ceil() as u32).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Self {
            url,
            status: ProxyStatus::Unknown,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            last_check: Instant::now(),
            last_failure: None,
            response_time: None,
            limiter,
        }
    }

    /// Convert the proxy URL to a reqwest::Proxy.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        reqwest::Proxy::all(&self.url)
    }

    /// Whether the proxy may be handed out for a request.
    pub fn is_selectable(&self) -> bool {
        self.status != ProxyStatus::Unhealthy
    }

    /// Calculate the success rate of this proxy.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        self.success_count as f64 / total as f64
    }

    pub fn snapshot(&self) -> ProxySnapshot {
        ProxySnapshot {
            url: self.url.clone(),
            status: self.status,
            success_count: self.success_count,
            failure_count: self.failure_count,
            consecutive_failures: self.consecutive_failures,
            success_rate: self.success_rate(),
            response_time: self.response_time,
            seconds_since_check: self.last_check.elapsed().as_secs(),
            seconds_since_failure: self.last_failure.map(|at| at.elapsed().as_secs()),
        }
    }
}
