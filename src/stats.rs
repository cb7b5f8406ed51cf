//! In-memory counters for the health and stats endpoints.

use crate::pool::ProxyPool;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Outcomes recorded by the proxy dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    proxied_attempts: AtomicU64,
    proxied_successes: AtomicU64,
    proxy_failures: AtomicU64,
    upstream_rejections: AtomicU64,
    direct_fallbacks: AtomicU64,
    direct_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSnapshot {
    pub proxied_attempts: u64,
    pub proxied_successes: u64,
    pub proxy_failures: u64,
    /// Upstream 429/5xx answers seen through a working proxy.
    pub upstream_rejections: u64,
    pub direct_fallbacks: u64,
    pub direct_failures: u64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_attempt(&self) {
        self.proxied_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_proxy_success(&self) {
        self.proxied_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_proxy_failure(&self) {
        self.proxy_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejection(&self) {
        self.upstream_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_direct(&self, ok: bool) {
        self.direct_fallbacks.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.direct_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            proxied_attempts: self.proxied_attempts.load(Ordering::Relaxed),
            proxied_successes: self.proxied_successes.load(Ordering::Relaxed),
            proxy_failures: self.proxy_failures.load(Ordering::Relaxed),
            upstream_rejections: self.upstream_rejections.load(Ordering::Relaxed),
            direct_fallbacks: self.direct_fallbacks.load(Ordering::Relaxed),
            direct_failures: self.direct_failures.load(Ordering::Relaxed),
        }
    }
}

/// Which gateway endpoint served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Search,
    Read,
}

/// Request counters and uptime of the gateway.
#[derive(Debug)]
pub struct GatewayStats {
    started_at: Instant,
    total_requests: AtomicU64,
    search_requests: AtomicU64,
    read_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl Default for GatewayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            search_requests: AtomicU64::new(0),
            read_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self, endpoint: Endpoint) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let counter = match endpoint {
            Endpoint::Search => &self.search_requests,
            Endpoint::Read => &self.read_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Build the `service_stats` report.
    pub fn report(&self, pool: Option<&ProxyPool>, dispatch: &DispatchStats) -> ServiceStats {
        let (total_proxies, working_proxies) = pool.map(ProxyPool::get_stats).unwrap_or((0, 0));

        ServiceStats {
            uptime_seconds: self.uptime_seconds(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            search_requests: self.search_requests.load(Ordering::Relaxed),
            read_requests: self.read_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            working_proxies,
            failed_proxies: total_proxies - working_proxies,
            total_proxies,
            success_rate: format_success_rate(working_proxies, total_proxies),
            dispatch: dispatch.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub search_requests: u64,
    pub read_requests: u64,
    pub failed_requests: u64,
    pub working_proxies: usize,
    pub failed_proxies: usize,
    pub total_proxies: usize,
    /// Share of proxies currently in rotation, e.g. `"66.7%"`.
    pub success_rate: String,
    #[serde(flatten)]
    pub dispatch: DispatchSnapshot,
}

fn format_success_rate(working: usize, total: usize) -> String {
    if total == 0 {
        return "0%".to_string();
    }
    format!("{:.1}%", working as f64 / total as f64 * 100.0)
}
