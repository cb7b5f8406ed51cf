//! # jina-gateway
//!
//! An HTTP gateway for the Jina search and reader APIs.
//!
//! Outbound calls go through a pool of HTTP or SOCKS5 proxies that is health
//! checked in the background. Each call is retried through different proxies
//! and falls back to a direct connection once the pool is exhausted. The pool
//! is exposed as a reqwest middleware, so it can also be used on its own.

pub mod config;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod proxy;
pub mod server;
pub mod stats;
pub mod upstream;
mod utils;

pub use config::{GatewayConfig, ProxyPoolConfig, ProxyPoolConfigBuilder, ProxySelectionStrategy};
pub use error::{GatewayError, NoProxyAvailable};
pub use middleware::ProxyPoolMiddleware;
pub use pool::ProxyPool;
pub use proxy::{Proxy, ProxySnapshot, ProxyStatus};
pub use server::{create_router, AppState};
pub use stats::{DispatchStats, GatewayStats};
pub use upstream::{ContentApi, UpstreamResponse};
