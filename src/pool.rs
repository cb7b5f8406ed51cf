//! Core proxy pool implementation.

use crate::config::{ProxyPoolConfig, ProxySelectionStrategy};
use crate::error::NoProxyAvailable;
use crate::proxy::{Proxy, ProxySnapshot, ProxyStatus};
use crate::utils;

use futures::future;
use log::{debug, info, warn};
use parking_lot::RwLock;
use rand::seq::IndexedRandom;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::time::{self};

/// A pool of proxies that can be used for HTTP requests.
pub struct ProxyPool {
    /// All proxies in the pool.
    proxies: RwLock<Vec<Proxy>>,
    /// Configuration for the pool.
    pub config: ProxyPoolConfig,
    /// Used for round-robin proxy selection.
    next_index: AtomicUsize,
}

impl ProxyPool {
    /// Create a new proxy pool with the given configuration.
    /// This will fetch proxies from sources and perform health checks synchronously.
    pub async fn new(config: ProxyPoolConfig) -> Result<Arc<Self>, reqwest::Error> {
        let pool = Arc::new(Self::empty(config));

        // Initialize proxies from sources
        pool.initialize_proxies().await?;

        // Perform initial health check synchronously
        info!("Starting synchronous initial health check");
        pool.check_all_proxies().await;

        let (total, healthy) = pool.get_stats();
        info!("Initial proxy pool status: {}/{} healthy proxies", healthy, total);

        // Start background health check task
        if !pool.config.health_check_interval.is_zero() {
            Self::spawn_health_checks(Arc::downgrade(&pool), pool.config.health_check_interval);
        }

        Ok(pool)
    }

    /// Create a pool from known proxy URLs without fetching sources or checking them.
    pub fn from_urls(urls: Vec<impl Into<String>>, config: ProxyPoolConfig) -> Arc<Self> {
        let pool = Self::empty(config);
        pool.add_proxies(urls.into_iter().map(Into::into));
        Arc::new(pool)
    }

    fn empty(config: ProxyPoolConfig) -> Self {
        Self {
            proxies: RwLock::new(Vec::new()),
            config,
            next_index: AtomicUsize::new(0),
        }
    }

    /// Re-check all proxies periodically until the pool is dropped.
    fn spawn_health_checks(pool: Weak<Self>, interval: std::time::Duration) {
        tokio::spawn(async move {
            loop {
                time::sleep(interval).await;
                let Some(pool) = pool.upgrade() else {
                    debug!("Proxy pool dropped, stopping health checks");
                    break;
                };
                pool.check_all_proxies().await;

                let (total, healthy) = pool.get_stats();
                info!("Proxy pool status update: {}/{} healthy proxies", healthy, total);
            }
        });
    }

    /// Initialize the proxy pool from the configured sources and inline proxies.
    async fn initialize_proxies(&self) -> Result<(), reqwest::Error> {
        info!("Initializing proxy pool from {} sources", self.config.sources.len());

        let mut all_proxies = Vec::new();

        // Fetch proxies from each source
        for source in &self.config.sources {
            match utils::fetch_proxies_from_source(source, &self.config.default_scheme).await {
                Ok(source_proxies) => {
                    info!("Fetched {} proxies from {}", source_proxies.len(), source);
                    all_proxies.extend(source_proxies);
                }
                Err(e) => {
                    warn!("Failed to fetch proxies from {}: {}", source, e);
                }
            }
        }

        all_proxies.extend(self.config.proxies.iter().cloned());

        let added = self.add_proxies(all_proxies);
        info!("Found {} unique proxies before health check", added);

        Ok(())
    }

    /// Add proxies, skipping unusable entries and duplicates. Returns how many were added.
    pub fn add_proxies(&self, urls: impl IntoIterator<Item = String>) -> usize {
        let mut proxies = self.proxies.write();
        let mut seen: HashSet<String> = proxies.iter().map(|p| p.url.clone()).collect();
        let mut added = 0;

        for raw in urls {
            let Some(url) = utils::normalize_proxy(&raw, &self.config.default_scheme) else {
                continue;
            };
            if seen.insert(url.clone()) {
                proxies.push(Proxy::new(url, self.config.max_requests_per_second));
                added += 1;
            }
        }

        added
    }

    /// Check the health of all proxies in the pool.
    pub async fn check_all_proxies(&self) {
        info!("Starting health check for all proxies");

        let proxies = {
            let guard = self.proxies.read();
            guard.clone()
        };

        let futures = proxies.iter().map(|proxy| {
            let proxy_url = proxy.url.clone();
            let reqwest_proxy = proxy.to_reqwest_proxy();
            let check_url = self.config.health_check_url.clone();
            let timeout = self.config.health_check_timeout;

            async move {
                let start = Instant::now();

                let client = match reqwest_proxy.and_then(|p| {
                    reqwest::Client::builder().timeout(timeout).proxy(p).build()
                }) {
                    Ok(client) => client,
                    Err(e) => {
                        debug!("Cannot build client for proxy {}: {}", proxy_url, e);
                        return (proxy_url, false, None);
                    }
                };

                match client.get(&check_url).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        let elapsed = start.elapsed().as_secs_f64();
                        (proxy_url, true, Some(elapsed))
                    }
                    Ok(resp) => {
                        debug!("Proxy {} health check returned {}", proxy_url, resp.status());
                        (proxy_url, false, None)
                    }
                    Err(e) => {
                        debug!("Proxy {} health check failed: {}", proxy_url, e);
                        (proxy_url, false, None)
                    }
                }
            }
        });

        // Run all health checks concurrently
        let results = future::join_all(futures).await;

        let mut healthy_count = 0;
        let mut unhealthy_count = 0;

        // Update proxy statuses based on health check results
        {
            let mut proxies = self.proxies.write();

            for (url, is_healthy, response_time) in results {
                if let Some(proxy) = proxies.iter_mut().find(|p| p.url == url) {
                    let old_status = proxy.status;

                    if is_healthy {
                        proxy.status = ProxyStatus::Healthy;
                        proxy.response_time = response_time;
                        proxy.consecutive_failures = 0;
                        healthy_count += 1;
                    } else {
                        proxy.status = ProxyStatus::Unhealthy;
                        unhealthy_count += 1;
                    }

                    // Log status changes
                    if old_status != proxy.status {
                        info!("Proxy {} status changed: {:?} -> {:?}",
                            proxy.url, old_status, proxy.status);
                    }

                    proxy.last_check = Instant::now();
                }
            }
        }

        info!("Health check completed: {} healthy, {} unhealthy",
            healthy_count, unhealthy_count);
    }

    /// Get a proxy from the pool according to the configured selection strategy.
    pub fn get_proxy(&self) -> Result<Proxy, NoProxyAvailable> {
        self.get_proxy_excluding(&HashSet::new())
    }

    /// Like [`get_proxy`](Self::get_proxy), skipping proxies already tried for this request.
    pub fn get_proxy_excluding(&self, tried: &HashSet<String>) -> Result<Proxy, NoProxyAvailable> {
        let proxies = self.proxies.read();

        let candidates: Vec<&Proxy> = proxies.iter()
            .filter(|p| p.is_selectable() && !tried.contains(&p.url))
            .collect();

        if candidates.is_empty() {
            return Err(NoProxyAvailable);
        }

        let selected = match self.config.selection_strategy {
            ProxySelectionStrategy::FastestResponse => candidates.iter()
                .min_by(|a, b| {
                    a.response_time.unwrap_or(f64::MAX)
                        .total_cmp(&b.response_time.unwrap_or(f64::MAX))
                }),
            // `None` orders before any `Some`, so never-failed proxies come first.
            ProxySelectionStrategy::LeastRecentlyFailed => candidates.iter()
                .min_by_key(|p| p.last_failure),
            ProxySelectionStrategy::MostReliable => candidates.iter()
                .max_by(|a, b| a.success_rate().total_cmp(&b.success_rate())),
            ProxySelectionStrategy::Random => candidates.choose(&mut rand::rng()),
            ProxySelectionStrategy::RoundRobin => {
                let idx = self.next_index.fetch_add(1, Ordering::Relaxed) % candidates.len();
                candidates.get(idx)
            }
        };

        selected.map(|p| (*p).clone()).ok_or(NoProxyAvailable)
    }

    /// Whether a selectable proxy outside `tried` remains.
    pub fn has_proxy_excluding(&self, tried: &HashSet<String>) -> bool {
        self.proxies.read()
            .iter()
            .any(|p| p.is_selectable() && !tried.contains(&p.url))
    }

    /// Report a successful request through a proxy.
    pub fn report_proxy_success(&self, url: &str) {
        let mut proxies = self.proxies.write();
        if let Some(proxy) = proxies.iter_mut().find(|p| p.url == url) {
            proxy.success_count += 1;
            proxy.consecutive_failures = 0;
            if proxy.status != ProxyStatus::Healthy {
                debug!("Proxy {} is healthy again", proxy.url);
            }
            proxy.status = ProxyStatus::Healthy;
        }
    }

    /// Report a failed request through a proxy.
    pub fn report_proxy_failure(&self, url: &str) {
        let mut proxies = self.proxies.write();
        if let Some(proxy) = proxies.iter_mut().find(|p| p.url == url) {
            proxy.failure_count += 1;
            proxy.consecutive_failures += 1;
            proxy.last_failure = Some(Instant::now());

            if proxy.consecutive_failures >= self.config.failure_threshold
                && proxy.status != ProxyStatus::Unhealthy
            {
                proxy.status = ProxyStatus::Unhealthy;
                warn!("Proxy {} marked unhealthy: {} failures, {} successes",
                    proxy.url, proxy.failure_count, proxy.success_count);
            }
        }
    }

    /// Get statistics about the proxy pool as `(total, usable)`.
    pub fn get_stats(&self) -> (usize, usize) {
        let proxies = self.proxies.read();
        let total = proxies.len();
        let healthy = proxies.iter()
            .filter(|p| p.is_selectable())
            .count();

        (total, healthy)
    }

    /// Per-proxy view, in pool order.
    pub fn snapshot(&self) -> Vec<ProxySnapshot> {
        self.proxies.read().iter().map(Proxy::snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool_with(strategy: ProxySelectionStrategy, threshold: usize) -> Arc<ProxyPool> {
        let config = ProxyPoolConfig::builder()
            .selection_strategy(strategy)
            .failure_threshold(threshold)
            .build();
        ProxyPool::from_urls(
            vec!["127.0.0.1:8081", "127.0.0.1:8082", "127.0.0.1:8083"],
            config,
        )
    }

    #[test]
    fn test_empty_pool_has_no_proxy() {
        let pool = ProxyPool::from_urls(Vec::<String>::new(), ProxyPoolConfig::default());
        assert!(pool.get_proxy().is_err());
        assert_eq!(pool.get_stats(), (0, 0));
    }

    #[test]
    fn test_from_urls_dedupes_and_normalizes() {
        let pool = ProxyPool::from_urls(
            vec!["127.0.0.1:8081", "http://127.0.0.1:8081", "# comment", "bogus"],
            ProxyPoolConfig::default(),
        );
        assert_eq!(pool.get_stats(), (1, 1));
        assert_eq!(pool.snapshot()[0].url, "http://127.0.0.1:8081");
    }

    #[test]
    fn test_round_robin_order() {
        let pool = pool_with(ProxySelectionStrategy::RoundRobin, 1);
        let urls: Vec<String> = (0..6).map(|_| pool.get_proxy().unwrap().url).collect();
        assert_eq!(
            urls,
            vec![
                "http://127.0.0.1:8081",
                "http://127.0.0.1:8082",
                "http://127.0.0.1:8083",
                "http://127.0.0.1:8081",
                "http://127.0.0.1:8082",
                "http://127.0.0.1:8083",
            ]
        );
    }

    #[test]
    fn test_excluding_tried_proxies() {
        let pool = pool_with(ProxySelectionStrategy::RoundRobin, 1);
        let mut tried = HashSet::new();
        for _ in 0..3 {
            let proxy = pool.get_proxy_excluding(&tried).unwrap();
            assert!(tried.insert(proxy.url));
        }
        assert!(pool.get_proxy_excluding(&tried).is_err());
    }

    #[test]
    fn test_failure_threshold_marks_unhealthy() {
        let pool = pool_with(ProxySelectionStrategy::RoundRobin, 2);
        let url = "http://127.0.0.1:8081";

        pool.report_proxy_failure(url);
        assert_eq!(pool.get_stats(), (3, 3));

        pool.report_proxy_failure(url);
        assert_eq!(pool.get_stats(), (3, 2));
        for _ in 0..4 {
            assert_ne!(pool.get_proxy().unwrap().url, url);
        }

        pool.report_proxy_success(url);
        assert_eq!(pool.get_stats(), (3, 3));
        let snapshot = pool.snapshot();
        assert_eq!(snapshot[0].status, ProxyStatus::Healthy);
        assert_eq!(snapshot[0].failure_count, 2);
        assert_eq!(snapshot[0].consecutive_failures, 0);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let pool = pool_with(ProxySelectionStrategy::RoundRobin, 2);
        let url = "http://127.0.0.1:8082";

        pool.report_proxy_failure(url);
        pool.report_proxy_success(url);
        pool.report_proxy_failure(url);
        assert_eq!(pool.get_stats(), (3, 3));
    }

    #[test]
    fn test_least_recently_failed_prefers_clean_proxies() {
        let pool = pool_with(ProxySelectionStrategy::LeastRecentlyFailed, 10);
        pool.report_proxy_failure("http://127.0.0.1:8081");
        assert_eq!(pool.get_proxy().unwrap().url, "http://127.0.0.1:8082");

        pool.report_proxy_failure("http://127.0.0.1:8082");
        pool.report_proxy_failure("http://127.0.0.1:8083");
        // All failed once; the oldest failure wins.
        assert_eq!(pool.get_proxy().unwrap().url, "http://127.0.0.1:8081");
    }

    #[test]
    fn test_most_reliable() {
        let pool = pool_with(ProxySelectionStrategy::MostReliable, 10);
        pool.report_proxy_success("http://127.0.0.1:8083");
        pool.report_proxy_failure("http://127.0.0.1:8081");
        assert_eq!(pool.get_proxy().unwrap().url, "http://127.0.0.1:8083");
    }

    #[test]
    fn test_fastest_response() {
        let pool = pool_with(ProxySelectionStrategy::FastestResponse, 1);
        {
            let mut proxies = pool.proxies.write();
            proxies[0].response_time = Some(0.8);
            proxies[1].response_time = Some(0.2);
        }
        assert_eq!(pool.get_proxy().unwrap().url, "http://127.0.0.1:8082");

        // Unmeasured proxies rank last, and the fastest is skipped once tried.
        let tried = HashSet::from(["http://127.0.0.1:8082".to_string()]);
        assert_eq!(pool.get_proxy_excluding(&tried).unwrap().url, "http://127.0.0.1:8081");

        pool.report_proxy_failure("http://127.0.0.1:8082");
        assert_eq!(pool.get_proxy().unwrap().url, "http://127.0.0.1:8081");
    }

    #[test]
    fn test_has_proxy_excluding() {
        let pool = pool_with(ProxySelectionStrategy::RoundRobin, 1);
        let mut tried = HashSet::from(["http://127.0.0.1:8081".to_string()]);
        assert!(pool.has_proxy_excluding(&tried));

        tried.insert("http://127.0.0.1:8082".to_string());
        pool.report_proxy_failure("http://127.0.0.1:8083");
        assert!(!pool.has_proxy_excluding(&tried));
    }

    #[test]
    fn test_random_only_returns_selectable() {
        let pool = pool_with(ProxySelectionStrategy::Random, 1);
        pool.report_proxy_failure("http://127.0.0.1:8081");
        pool.report_proxy_failure("http://127.0.0.1:8082");
        for _ in 0..10 {
            assert_eq!(pool.get_proxy().unwrap().url, "http://127.0.0.1:8083");
        }
    }

    #[tokio::test]
    async fn test_health_check_marks_unreachable_proxies() {
        let config = ProxyPoolConfig::builder()
            .health_check_url("http://127.0.0.1:9/")
            .health_check_timeout(Duration::from_millis(500))
            .build();
        // Nothing listens on the discard port, so the proxy connection is refused.
        let pool = ProxyPool::from_urls(vec!["127.0.0.1:9"], config);

        pool.check_all_proxies().await;

        assert_eq!(pool.get_stats(), (1, 0));
        assert_eq!(pool.snapshot()[0].status, ProxyStatus::Unhealthy);
    }
}
