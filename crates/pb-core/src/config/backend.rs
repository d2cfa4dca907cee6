//! Point-of-sale backend credentials

use serde::{Deserialize, Serialize};

/// Base values required before any remote configuration fetch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Primary API base URL (company-scoped endpoints hang off this)
    pub api_base_url: String,

    /// Bearer token for the primary API
    pub api_token: String,

    /// Company identifier
    pub company_id: String,
}

impl BackendConfig {
    /// Name of the first missing base value, if any
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.api_base_url.trim().is_empty() {
            Some("api_base_url")
        } else if self.api_token.trim().is_empty() {
            Some("api_token")
        } else if self.company_id.trim().is_empty() {
            Some("company_id")
        } else {
            None
        }
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim().trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_order() {
        let mut backend = BackendConfig::default();
        assert_eq!(backend.missing_field(), Some("api_base_url"));

        backend.api_base_url = "https://api.example.test/".to_string();
        assert_eq!(backend.missing_field(), Some("api_token"));

        backend.api_token = "tok".to_string();
        assert_eq!(backend.missing_field(), Some("company_id"));

        backend.company_id = "7".to_string();
        assert_eq!(backend.missing_field(), None);
        assert_eq!(backend.base_url(), "https://api.example.test");
    }

    #[test]
    fn test_whitespace_counts_as_missing() {
        let backend = BackendConfig {
            api_base_url: "https://api.example.test".to_string(),
            api_token: "   ".to_string(),
            company_id: "7".to_string(),
        };
        assert_eq!(backend.missing_field(), Some("api_token"));
    }
}
