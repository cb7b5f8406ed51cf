//! Utility functions for the proxy pool.

use log::warn;
use reqwest::Client;

const SUPPORTED_SCHEMES: [&str; 4] = ["http", "https", "socks5", "socks5h"];

/// Fetch and parse a list of proxies from a URL or file path.
pub(crate) async fn fetch_proxies_from_source(
    source: &str,
    default_scheme: &str,
) -> Result<Vec<String>, reqwest::Error> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let client = Client::new();
        let response = client.get(source).send().await?.error_for_status()?;
        let content = response.text().await?;
        Ok(parse_proxy_list(&content, default_scheme))
    } else {
        match tokio::fs::read_to_string(source).await {
            Ok(content) => Ok(parse_proxy_list(&content, default_scheme)),
            Err(e) => {
                warn!("Failed to read proxy list {}: {}", source, e);
                Ok(Vec::new())
            }
        }
    }
}

/// Parse one proxy per line. Bare `host:port` entries get `default_scheme`.
pub(crate) fn parse_proxy_list(content: &str, default_scheme: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| normalize_proxy(line, default_scheme))
        .collect()
}

/// Normalize a single proxy entry, or `None` if it is blank, a comment or unusable.
pub(crate) fn normalize_proxy(entry: &str, default_scheme: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() || entry.starts_with('#') {
        return None;
    }

    let candidate = if entry.contains("://") {
        entry.to_string()
    } else if entry.contains(':') {
        format!("{}://{}", default_scheme, entry)
    } else {
        return None;
    };

    let parsed = url::Url::parse(&candidate).ok()?;
    if !SUPPORTED_SCHEMES.contains(&parsed.scheme()) || parsed.host_str().is_none() {
        warn!("Ignoring unsupported proxy entry: {}", entry);
        return None;
    }

    Some(candidate.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_list() {
        let content = "\
# free proxies
8.210.83.33:80
socks5://47.74.152.29:8888

http://20.205.61.143:80/
ftp://1.1.1.1:21
not-a-proxy
";
        let proxies = parse_proxy_list(content, "http");
        assert_eq!(
            proxies,
            vec![
                "http://8.210.83.33:80",
                "socks5://47.74.152.29:8888",
                "http://20.205.61.143:80",
            ]
        );
    }

    #[test]
    fn test_default_scheme_applies_to_bare_entries() {
        assert_eq!(
            normalize_proxy("127.0.0.1:1080", "socks5").as_deref(),
            Some("socks5://127.0.0.1:1080")
        );
        assert_eq!(normalize_proxy("   ", "http"), None);
    }

    #[tokio::test]
    async fn test_missing_file_yields_empty_list() {
        let proxies = fetch_proxies_from_source("/nonexistent/proxies.txt", "http")
            .await
            .unwrap();
        assert!(proxies.is_empty());
    }
}
