//! Microsoft Graph HTTP client
//!
//! A thin typed wrapper over `reqwest::Client`: bearer authentication,
//! base-URL construction, and the mapping from HTTP failures onto
//! [`RemoteError`]. All higher-level semantics (delta paging, transfers)
//! live in the sibling modules.

use onedrift_core::ports::RemoteError;
use reqwest::{Client, Method, RequestBuilder, Response};
use tracing::debug;

/// Base URL for Microsoft Graph API v1.0
const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Metadata calls get a fixed deadline; transfers are cancellable instead.
pub(crate) const METADATA_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// HTTP client for Microsoft Graph API calls
///
/// Wraps `reqwest::Client` with authentication headers and base URL
/// construction. The connection pool lives inside the reqwest client.
pub struct GraphClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl GraphClient {
    /// Creates a new GraphClient with the given access token
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: GRAPH_BASE_URL.to_string(),
            access_token: access_token.into(),
        }
    }

    /// Creates a new GraphClient with a custom base URL (useful for testing)
    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            access_token: access_token.into(),
        }
    }

    /// Updates the access token (e.g. after a refresh)
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
        debug!("updated GraphClient access token");
    }

    /// Returns the current access token
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the base URL for API requests
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the underlying reqwest client
    ///
    /// Needed for absolute URLs (upload session URLs, nextLink pages)
    /// that must not have the base URL prepended.
    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Creates an authenticated request builder for a path under the base URL
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .bearer_auth(&self.access_token)
    }

    /// Creates an authenticated request builder for an absolute URL
    pub fn request_url(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.access_token)
    }
}

// ============================================================================
// Error mapping
// ============================================================================

/// Map a transport-level reqwest failure onto the error taxonomy
pub(crate) fn map_transport_error(err: reqwest::Error) -> RemoteError {
    RemoteError::Network(err.to_string())
}

/// Consume a non-success response into the matching [`RemoteError`]
///
/// The status decides the class: 401/403 are authentication failures,
/// 507 is quota, everything else keeps its status for
/// [`onedrift_core::ports::classify_status`].
pub(crate) async fn error_for_response(response: Response) -> RemoteError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    let message: String = message.chars().take(512).collect();

    match status {
        401 | 403 => RemoteError::Auth(format!("HTTP {status}: {message}")),
        507 => RemoteError::QuotaExceeded(message),
        _ => RemoteError::Http { status, message },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use onedrift_core::ports::ErrorClass;

    #[test]
    fn test_client_creation() {
        let client = GraphClient::new("test-token");
        assert_eq!(client.access_token(), "test-token");
        assert_eq!(client.base_url(), GRAPH_BASE_URL);
    }

    #[test]
    fn test_request_builder() {
        let client = GraphClient::new("test-token");
        let request = client.request(Method::GET, "/me").build().unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://graph.microsoft.com/v1.0/me"
        );
        let auth = request
            .headers()
            .get("authorization")
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(auth, "Bearer test-token");
    }

    #[test]
    fn test_custom_base_url() {
        let client = GraphClient::with_base_url("token", "http://localhost:8080");
        let request = client.request(Method::GET, "/me").build().unwrap();
        assert_eq!(request.url().as_str(), "http://localhost:8080/me");
    }

    #[tokio::test]
    async fn test_error_mapping_classes() {
        // Drive the mapping through a real response using wiremock-free
        // construction is not possible; assert on the classifier contract
        // the mapping feeds instead.
        assert_eq!(
            RemoteError::Auth("HTTP 401".to_string()).class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            RemoteError::Http {
                status: 503,
                message: String::new()
            }
            .class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            RemoteError::Http {
                status: 404,
                message: String::new()
            }
            .class(),
            ErrorClass::Skippable
        );
    }
}
