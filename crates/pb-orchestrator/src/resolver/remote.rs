//! Remote configuration transport

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use std::time::Duration;

use pb_core::error::RemoteFetchError;

/// Raw HTTP response from the configuration API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: String,
}

impl RemoteResponse {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fetches one configuration URL with bearer auth
#[async_trait]
pub trait RemoteConfigSource: Send + Sync {
    async fn fetch(&self, url: &str, token: &str) -> Result<RemoteResponse, RemoteFetchError>;
}

/// `reqwest`-backed source with a bounded per-request timeout
#[derive(Clone)]
pub struct HttpConfigSource {
    client: reqwest::Client,
}

impl HttpConfigSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pdv-bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteConfigSource for HttpConfigSource {
    async fn fetch(&self, url: &str, token: &str) -> Result<RemoteResponse, RemoteFetchError> {
        let transport = |e: reqwest::Error| RemoteFetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport)?;
        Ok(RemoteResponse { status, body })
    }
}

/// Candidate endpoints for the company's service configuration, in order
pub fn candidate_urls(base_url: &str, company_id: &str) -> Vec<String> {
    let base = base_url.trim_end_matches('/');
    let id = company_id.trim();
    vec![
        format!("{}/companies/{}/whatsapp-config", base, id),
        format!("{}/company/{}/whatsapp-config", base, id),
        format!("{}/whatsapp-config?company_id={}", base, id),
        format!("{}/whatsapp-configs?company_id={}", base, id),
        format!("{}/companies/{}/whatsapp-configs", base, id),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_urls_order() {
        let urls = candidate_urls("https://api.example.com/v1/", " 42 ");
        assert_eq!(
            urls,
            vec![
                "https://api.example.com/v1/companies/42/whatsapp-config",
                "https://api.example.com/v1/company/42/whatsapp-config",
                "https://api.example.com/v1/whatsapp-config?company_id=42",
                "https://api.example.com/v1/whatsapp-configs?company_id=42",
                "https://api.example.com/v1/companies/42/whatsapp-configs",
            ]
        );
    }

    #[test]
    fn test_success_range() {
        let ok = RemoteResponse { status: 204, body: String::new() };
        let missing = RemoteResponse { status: 404, body: String::new() };
        assert!(ok.is_success());
        assert!(!missing.is_success());
    }
}
