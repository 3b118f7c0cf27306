use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;

// Browser-like User-Agent; some viewer hosts refuse the default reqwest UA.
pub const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers
}

/// Build the HTTP session shared by the discovery and download requests.
/// Cookies set during discovery carry over to the download; redirects are
/// followed by default.
pub fn build_client(timeout_secs: u64, insecure: bool) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .default_headers(default_headers())
        .cookie_store(true)
        .danger_accept_invalid_certs(insecure)
        .build()
        .context("Failed to create HTTP client")
}
