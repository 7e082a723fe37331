use base64::Engine;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, COOKIE, IF_MODIFIED_SINCE,
    IF_NONE_MATCH, USER_AGENT,
};

use super::client_cache::{ClientCache, ClientConfig};

/// Accept header sent with every feed request.
pub const DEFAULT_ACCEPT_HEADER: &str = "application/xml, application/atom+xml, application/rss+xml, application/rdf+xml, application/feed+json, text/html, */*;q=0.9";

/// Per-request headers and transport policy for an outbound GET.
///
/// Methods consume and return the builder; clone it to branch a template:
///
/// ```
/// use brook::fetcher::RequestBuilder;
///
/// let base = RequestBuilder::new().with_user_agent("", "brook/0.1");
/// let conditional = base.clone().with_etag("\"v1\"");
/// assert!(base.headers().get("if-none-match").is_none());
/// assert!(conditional.headers().get("if-none-match").is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestBuilder {
    headers: HeaderMap,
    config: ClientConfig,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.config
    }

    /// Set a header, replacing any previous value for the same
    /// (case-insensitive) name. Names or values that are not valid HTTP are
    /// skipped with a warning.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                tracing::warn!(header = %name, "Skipping invalid request header");
            }
        }
        self
    }

    fn set(mut self, name: HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => {
                tracing::warn!(header = %name, "Skipping invalid request header");
            }
        }
        self
    }

    pub fn with_etag(self, etag: &str) -> Self {
        if etag.is_empty() {
            return self;
        }
        self.set(IF_NONE_MATCH, etag)
    }

    pub fn with_last_modified(self, last_modified: &str) -> Self {
        if last_modified.is_empty() {
            return self;
        }
        self.set(IF_MODIFIED_SINCE, last_modified)
    }

    /// Use `user_agent`, or `default_user_agent` when it is empty.
    pub fn with_user_agent(self, user_agent: &str, default_user_agent: &str) -> Self {
        let value = if user_agent.is_empty() {
            default_user_agent
        } else {
            user_agent
        };
        self.set(USER_AGENT, value)
    }

    pub fn with_cookie(self, cookie: &str) -> Self {
        if cookie.is_empty() {
            return self;
        }
        self.set(COOKIE, cookie)
    }

    /// Basic authentication, only when both parts are present.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        if username.is_empty() || password.is_empty() {
            return self;
        }

        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", username, password));
        match HeaderValue::from_str(&format!("Basic {}", encoded)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(AUTHORIZATION, value);
            }
            Err(_) => {
                tracing::warn!("Skipping invalid authorization header");
            }
        }
        self
    }

    /// Request timeout in seconds. Zero disables the timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.config.timeout_secs = timeout_secs;
        self
    }

    pub fn with_proxy(mut self, proxy_url: &str) -> Self {
        self.config.proxy_url = (!proxy_url.is_empty()).then(|| proxy_url.to_string());
        self
    }

    pub fn use_proxy(mut self, value: bool) -> Self {
        self.config.use_proxy = value;
        self
    }

    /// Return redirect responses as they are instead of following them.
    pub fn without_redirects(mut self) -> Self {
        self.config.without_redirects = true;
        self
    }

    pub fn disable_http2(mut self, value: bool) -> Self {
        self.config.disable_http2 = value;
        self
    }

    pub fn ignore_tls_errors(mut self, value: bool) -> Self {
        self.config.ignore_tls_errors = value;
        self
    }

    /// Send a GET to `url` with the configured headers plus the feed `Accept`
    /// header, through the client `cache` holds for this policy.
    ///
    /// Non-2xx responses are returned as responses, not errors.
    pub async fn execute(
        &self,
        cache: &ClientCache,
        url: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let client = cache.get_or_create(&self.config)?;

        let mut headers = self.headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT_HEADER));

        tracing::debug!(
            method = "GET",
            url = %url,
            headers = ?headers,
            without_redirects = self.config.without_redirects,
            with_proxy = self.config.use_proxy,
            proxy_url = self.config.proxy_url.as_deref().unwrap_or(""),
            ignore_tls_errors = self.config.ignore_tls_errors,
            disable_http2 = self.config.disable_http2,
            timeout_secs = self.config.timeout_secs,
            "Making outgoing request"
        );

        client.get(url).headers(headers).send().await
    }
}
