#![allow(dead_code)]

use jina_gateway::{ProxyPoolConfig, ProxySelectionStrategy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A forward proxy that answers every request itself with `status` and `body`.
pub struct FakeProxy {
    pub url: String,
    hits: Arc<AtomicUsize>,
}

impl FakeProxy {
    pub async fn spawn(status: u16, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 16 * 1024];
                    let mut filled = 0;
                    while filled < buf.len() {
                        let n = socket.read(&mut buf[filled..]).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        filled += n;
                        if buf[..filled].windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 {} Fake\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { url, hits }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Address of a port nobody listens on, so connecting is refused.
pub async fn dead_proxy() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Pool settings without pauses between attempts.
pub fn fast_config(strategy: ProxySelectionStrategy, retry_count: usize) -> ProxyPoolConfig {
    ProxyPoolConfig::builder()
        .selection_strategy(strategy)
        .retry_count(retry_count)
        .retry_delay(Duration::ZERO, Duration::ZERO)
        .request_timeout(Duration::from_secs(5))
        .health_check_interval(Duration::ZERO)
        .build()
}

/// An HTTP client that never picks up proxies from the environment.
pub fn direct_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
