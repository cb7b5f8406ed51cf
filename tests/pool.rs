mod common;

use common::{dead_proxy, FakeProxy};
use jina_gateway::{ProxyPool, ProxyPoolConfig, ProxyStatus};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn checked_config(interval: Duration) -> jina_gateway::ProxyPoolConfigBuilder {
    ProxyPoolConfig::builder()
        // The fake proxies answer on behalf of any target.
        .health_check_url("http://example.invalid/ip")
        .health_check_timeout(Duration::from_secs(2))
        .health_check_interval(interval)
}

#[tokio::test]
async fn test_new_loads_file_source_and_checks_health() {
    let good = FakeProxy::spawn(200, "ok").await;
    let dead = dead_proxy().await;

    let mut list = tempfile::NamedTempFile::new().unwrap();
    writeln!(list, "# proxies for tests").unwrap();
    writeln!(list, "{}", good.url.trim_start_matches("http://")).unwrap();
    writeln!(list, "{}", good.url).unwrap();
    writeln!(list, "{}", dead.trim_start_matches("http://")).unwrap();
    writeln!(list, "not-a-proxy").unwrap();
    list.flush().unwrap();

    let config = checked_config(Duration::ZERO)
        .sources(vec![list.path().to_string_lossy().into_owned()])
        .proxies(vec![good.url.clone()])
        .build();
    let pool = ProxyPool::new(config).await.unwrap();

    assert_eq!(pool.get_stats(), (2, 1));
    let snapshot = pool.snapshot();
    assert_eq!(snapshot[0].url, good.url);
    assert_eq!(snapshot[0].status, ProxyStatus::Healthy);
    assert!(snapshot[0].response_time.is_some());
    assert_eq!(snapshot[1].url, dead);
    assert_eq!(snapshot[1].status, ProxyStatus::Unhealthy);
    assert_eq!(good.hits(), 1);
}

#[tokio::test]
async fn test_background_checks_stop_when_pool_dropped() {
    let good = FakeProxy::spawn(200, "ok").await;
    let config = checked_config(Duration::from_millis(100))
        .proxies(vec![good.url.clone()])
        .build();

    let pool = ProxyPool::new(config).await.unwrap();
    assert_eq!(good.hits(), 1);

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(good.hits() >= 2);

    let weak = Arc::downgrade(&pool);
    drop(pool);
    // Let a check that was already running finish.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(weak.upgrade().is_none());

    let settled = good.hits();
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(good.hits(), settled);
}

#[tokio::test]
async fn test_zero_interval_disables_background_checks() {
    let good = FakeProxy::spawn(200, "ok").await;
    let config = checked_config(Duration::ZERO)
        .proxies(vec![good.url.clone()])
        .build();

    let pool = ProxyPool::new(config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(good.hits(), 1);
    assert_eq!(Arc::strong_count(&pool), 1);
}
