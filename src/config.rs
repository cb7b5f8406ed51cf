//! Configuration for the proxy pool and the gateway.

use crate::error::GatewayError;

use std::str::FromStr;
use std::time::Duration;

/// Default Jina reader endpoint. The target URL is appended verbatim.
pub const DEFAULT_READER_URL: &str = "https://r.jina.ai/";
/// Default Jina search endpoint. The query goes into the `q` parameter.
pub const DEFAULT_SEARCH_URL: &str = "https://s.jina.ai/";

/// Strategy for selecting a proxy from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxySelectionStrategy {
    /// Select the proxy with the fastest response time.
    FastestResponse,
    /// Select the proxy that has never failed, or failed longest ago.
    LeastRecentlyFailed,
    /// Select the proxy with the highest success rate.
    MostReliable,
    /// Select a random healthy proxy.
    Random,
    /// Select proxies in round-robin fashion.
    RoundRobin,
}

impl ProxySelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FastestResponse => "fastest_response",
            Self::LeastRecentlyFailed => "least_recently_failed",
            Self::MostReliable => "most_reliable",
            Self::Random => "random",
            Self::RoundRobin => "round_robin",
        }
    }
}

impl FromStr for ProxySelectionStrategy {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fastest" | "fastest_response" => Ok(Self::FastestResponse),
            "least_recently_failed" | "lrf" => Ok(Self::LeastRecentlyFailed),
            "most_reliable" | "reliable" => Ok(Self::MostReliable),
            "random" => Ok(Self::Random),
            "round_robin" | "roundrobin" => Ok(Self::RoundRobin),
            other => Err(GatewayError::Config(format!(
                "unknown proxy selection strategy: {}",
                other
            ))),
        }
    }
}

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Source URLs or file paths to fetch proxy lists from.
    pub sources: Vec<String>,
    /// Proxies given directly, in the same format as a source line.
    pub proxies: Vec<String>,
    /// Scheme applied to bare `host:port` entries.
    pub default_scheme: String,
    /// Interval between health checks. Zero disables the background check.
    pub health_check_interval: Duration,
    /// Timeout for health checks.
    pub health_check_timeout: Duration,
    /// URL used for health checks.
    pub health_check_url: String,
    /// Number of times to retry a request with different proxies.
    pub retry_count: usize,
    /// Strategy for selecting proxies.
    pub selection_strategy: ProxySelectionStrategy,
    /// Maximum requests per second per proxy.
    pub max_requests_per_second: f64,
    /// Timeout for a single request sent through a proxy.
    pub request_timeout: Duration,
    /// Consecutive failures after which a proxy is taken out of rotation.
    pub failure_threshold: usize,
    /// Lower bound of the pause between two proxy attempts.
    pub retry_delay_min: Duration,
    /// Upper bound of the pause between two proxy attempts.
    pub retry_delay_max: Duration,
    /// Send the request without a proxy once every proxy attempt failed.
    pub direct_fallback: bool,
    /// Accept invalid TLS certificates on proxied connections.
    pub accept_invalid_certs: bool,
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        ProxyPoolConfigBuilder::new().build()
    }
}

/// Builder for `ProxyPoolConfig`.
#[derive(Default)]
pub struct ProxyPoolConfigBuilder {
    sources: Vec<String>,
    proxies: Vec<String>,
    default_scheme: Option<String>,
    health_check_interval: Option<Duration>,
    health_check_timeout: Option<Duration>,
    health_check_url: Option<String>,
    retry_count: Option<usize>,
    selection_strategy: Option<ProxySelectionStrategy>,
    max_requests_per_second: Option<f64>,
    request_timeout: Option<Duration>,
    failure_threshold: Option<usize>,
    retry_delay: Option<(Duration, Duration)>,
    direct_fallback: Option<bool>,
    accept_invalid_certs: Option<bool>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source URLs or files to fetch proxy lists from.
    pub fn sources(mut self, sources: Vec<impl Into<String>>) -> Self {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Set proxies to use in addition to the sources.
    pub fn proxies(mut self, proxies: Vec<impl Into<String>>) -> Self {
        self.proxies = proxies.into_iter().map(Into::into).collect();
        self
    }

    /// Set the scheme used for bare `host:port` entries.
    pub fn default_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.default_scheme = Some(scheme.into());
        self
    }

    /// Set the interval between health checks.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(interval);
        self
    }

    /// Set the timeout for health checks.
    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = Some(timeout);
        self
    }

    /// Set the URL used for health checks.
    pub fn health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    /// Set the number of times to retry a request with different proxies.
    pub fn retry_count(mut self, count: usize) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Set the strategy for selecting proxies.
    pub fn selection_strategy(mut self, strategy: ProxySelectionStrategy) -> Self {
        self.selection_strategy = Some(strategy);
        self
    }

    /// Set the maximum requests per second per proxy.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Set the timeout of a request sent through a proxy.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set how many consecutive failures take a proxy out of rotation.
    pub fn failure_threshold(mut self, failures: usize) -> Self {
        self.failure_threshold = Some(failures);
        self
    }

    /// Set the random pause range between proxy attempts.
    pub fn retry_delay(mut self, min: Duration, max: Duration) -> Self {
        self.retry_delay = Some((min, max.max(min)));
        self
    }

    /// Enable or disable the direct connection fallback.
    pub fn direct_fallback(mut self, enabled: bool) -> Self {
        self.direct_fallback = Some(enabled);
        self
    }

    /// Accept invalid TLS certificates on proxied connections.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = Some(accept);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        let (retry_delay_min, retry_delay_max) = self
            .retry_delay
            .unwrap_or((Duration::from_secs(1), Duration::from_secs(3)));

        ProxyPoolConfig {
            sources: self.sources,
            proxies: self.proxies,
            default_scheme: self.default_scheme.unwrap_or_else(|| "http".to_string()),
            health_check_interval: self.health_check_interval.unwrap_or(Duration::from_secs(300)),
            health_check_timeout: self.health_check_timeout.unwrap_or(Duration::from_secs(10)),
            health_check_url: self.health_check_url.unwrap_or_else(|| "http://httpbin.org/ip".to_string()),
            retry_count: self.retry_count.unwrap_or(3),
            selection_strategy: self.selection_strategy.unwrap_or(ProxySelectionStrategy::RoundRobin),
            max_requests_per_second: self.max_requests_per_second.unwrap_or(5.0),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(30)),
            failure_threshold: self.failure_threshold.unwrap_or(1).max(1),
            retry_delay_min,
            retry_delay_max,
            direct_fallback: self.direct_fallback.unwrap_or(true),
            accept_invalid_certs: self.accept_invalid_certs.unwrap_or(false),
        }
    }
}

/// Settings of the gateway process, read from the environment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Optional bearer token forwarded to the content API.
    pub api_key: Option<String>,
    pub reader_url: String,
    pub search_url: String,
    /// Route outbound calls through the proxy pool.
    pub use_proxies: bool,
    /// Timeout of direct (proxy-less) upstream calls.
    pub request_timeout: Duration,
    /// Inbound requests allowed per minute on `/search` and `/read`. Zero disables.
    pub rate_limit_per_minute: u32,
    pub pool: ProxyPoolConfig,
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, GatewayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let mut pool = ProxyPoolConfig::builder()
            .sources(env.list("PROXY_SOURCES"))
            .proxies(env.list("PROXY_LIST"))
            .retry_count(env.parse("MAX_PROXY_RETRIES", 3)?)
            .request_timeout(Duration::from_secs(env.parse("PROXY_TIMEOUT", 30)?))
            .health_check_interval(Duration::from_secs(env.parse("HEALTH_CHECK_INTERVAL", 300)?))
            .health_check_timeout(Duration::from_secs(env.parse("HEALTH_CHECK_TIMEOUT", 10)?))
            .max_requests_per_second(env.parse("PROXY_MAX_RPS", 5.0)?)
            .failure_threshold(env.parse("PROXY_FAILURE_THRESHOLD", 1)?)
            .retry_delay(
                Duration::from_millis(env.parse("PROXY_RETRY_DELAY_MIN_MS", 1000)?),
                Duration::from_millis(env.parse("PROXY_RETRY_DELAY_MAX_MS", 3000)?),
            )
            .direct_fallback(env.flag("DIRECT_FALLBACK", true)?)
            .accept_invalid_certs(env.flag("PROXY_ACCEPT_INVALID_CERTS", false)?)
            .selection_strategy(env.parse("PROXY_SELECTION", ProxySelectionStrategy::RoundRobin)?);
        if let Some(url) = env.get("HEALTH_CHECK_URL") {
            pool = pool.health_check_url(url);
        }

        Ok(GatewayConfig {
            host: env.get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parse("PORT", 5000)?,
            api_key: env.get("JINA_API_KEY"),
            reader_url: env.get("JINA_READER_URL").unwrap_or_else(|| DEFAULT_READER_URL.to_string()),
            search_url: env.get("JINA_SEARCH_URL").unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string()),
            use_proxies: env.flag("USE_PROXIES", true)?,
            request_timeout: Duration::from_secs(env.parse("REQUEST_TIMEOUT", 30)?),
            rate_limit_per_minute: env.parse("RATE_LIMIT_PER_MINUTE", 60)?,
            pool: pool.build(),
        })
    }

    /// Address the HTTP server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty, trimmed value of `key`.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, GatewayError> {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| GatewayError::Config(format!("{} has an invalid value: {}", key, raw))),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, GatewayError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(GatewayError::Config(format!("{} must be true or false, got {}", key, v))),
            },
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
