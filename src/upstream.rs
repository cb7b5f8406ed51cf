//! Client for the Jina search and reader APIs.

use crate::error::GatewayError;

use rand::seq::IndexedRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, USER_AGENT};
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
];

/// Raw answer of the content API, passed through to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

/// Sends search and read calls through the (possibly proxied) HTTP client.
#[derive(Clone)]
pub struct ContentApi {
    client: ClientWithMiddleware,
    search_url: String,
    reader_url: String,
    api_key: Option<String>,
}

impl ContentApi {
    pub fn new(
        client: ClientWithMiddleware,
        search_url: impl Into<String>,
        reader_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            search_url: search_url.into(),
            reader_url: reader_url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    /// Search the web. The query is form-encoded into the `q` parameter.
    pub async fn search(&self, query: &str) -> Result<UpstreamResponse, GatewayError> {
        let url = self.search_url_for(query)?;
        self.get(url.as_str()).await
    }

    /// Extract the content of `target`. The URL is appended to the reader endpoint as-is.
    pub async fn read(&self, target: &str) -> Result<UpstreamResponse, GatewayError> {
        let url = format!("{}{}", self.reader_url, target);
        self.get(&url).await
    }

    pub(crate) fn search_url_for(&self, query: &str) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.search_url)?;
        url.query_pairs_mut().append_pair("q", query);
        Ok(url)
    }

    async fn get(&self, url: &str) -> Result<UpstreamResponse, GatewayError> {
        let response = self.client.get(url).headers(self.headers()).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(reqwest_middleware::Error::Reqwest)?;
        Ok(UpstreamResponse { status, body })
    }

    /// Browser-like headers with a random user agent, plus the API key if any.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let agent = USER_AGENTS.choose(&mut rand::rng()).copied().unwrap_or(USER_AGENTS[0]);
        headers.insert(USER_AGENT, HeaderValue::from_static(agent));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, text/html;q=0.9, */*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        if let Some(key) = &self.api_key {
            match HeaderValue::from_str(&format!("Bearer {}", key)) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => log::warn!("API key contains invalid header characters, not sending it"),
            }
        }

        headers
    }
}
