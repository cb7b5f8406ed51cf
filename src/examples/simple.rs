//! Search through a proxy pool without running the HTTP gateway.

use jina_gateway::{ContentApi, ProxyPoolConfig, ProxyPoolMiddleware, ProxySelectionStrategy};
use reqwest_middleware::ClientBuilder;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Initializing proxy pool...");

    let config = ProxyPoolConfig::builder()
        // plain `host:port` lines, one proxy per line
        .sources(vec![
            "https://cdn.jsdelivr.net/gh/proxifly/free-proxy-list@main/proxies/protocols/http/data.txt",
        ])
        .health_check_timeout(Duration::from_secs(5))
        .health_check_url("http://httpbin.org/ip")
        .retry_count(2)
        .retry_delay(Duration::from_millis(200), Duration::from_millis(800))
        .selection_strategy(ProxySelectionStrategy::LeastRecentlyFailed)
        .max_requests_per_second(3.0)
        .build();

    let proxy_pool = ProxyPoolMiddleware::new(config).await?;
    let stats = proxy_pool.stats().clone();

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(proxy_pool)
        .build();
    let api = ContentApi::new(client, "https://s.jina.ai/", "https://r.jina.ai/", std::env::var("JINA_API_KEY").ok());

    println!("Sending search...");
    let response = api.search("rust proxy rotation").await?;

    println!("Status: {}", response.status);
    println!("Response: {}", response.body);
    println!("Dispatch: {:?}", stats.snapshot());

    Ok(())
}
