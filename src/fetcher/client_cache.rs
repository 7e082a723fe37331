use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use reqwest::redirect::Policy;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TCP_KEEPALIVE: Duration = Duration::from_secs(15);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_MAX_IDLE_PER_HOST: usize = 50;
const MAX_REDIRECTS: usize = 10;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Transport settings of a request. Two requests with equal configs share a
/// client and therefore its connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientConfig {
    pub timeout_secs: u64,
    pub proxy_url: Option<String>,
    pub use_proxy: bool,
    pub without_redirects: bool,
    pub disable_http2: bool,
    pub ignore_tls_errors: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            proxy_url: None,
            use_proxy: false,
            without_redirects: false,
            disable_http2: false,
            ignore_tls_errors: false,
        }
    }
}

impl ClientConfig {
    /// Proxy URL to apply, if proxying is on and a URL is set.
    fn effective_proxy(&self) -> Option<&str> {
        if !self.use_proxy {
            return None;
        }
        self.proxy_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

/// Process-wide pool of HTTP clients keyed by [`ClientConfig`].
///
/// Lookup and creation happen under one lock, so concurrent requests with
/// the same config always observe the same client. The cache is bounded;
/// the least recently used client is dropped first.
pub struct ClientCache {
    clients: Mutex<LruCache<ClientConfig, Arc<reqwest::Client>>>,
}

impl ClientCache {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            clients: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the cached client for `config`, building it on first use.
    pub fn get_or_create(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<reqwest::Client>, reqwest::Error> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(client) = clients.get(config) {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(build_client(config)?);
        clients.put(config.clone(), Arc::clone(&client));
        tracing::debug!(cached = clients.len(), "Created HTTP client");
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ClientCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache")
            .field("len", &self.len())
            .finish()
    }
}

fn build_client(config: &ClientConfig) -> Result<reqwest::Client, reqwest::Error> {
    let redirect = if config.without_redirects {
        Policy::none()
    } else {
        Policy::limited(MAX_REDIRECTS)
    };

    let mut builder = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .redirect(redirect);

    if config.timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(config.timeout_secs));
    }

    if config.disable_http2 {
        builder = builder.http1_only();
    }

    if config.ignore_tls_errors {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(proxy_url) = config.effective_proxy() {
        match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(e) => {
                tracing::warn!(
                    proxy = %proxy_url,
                    error = %e,
                    "Invalid proxy URL, connecting directly"
                );
            }
        }
    }

    builder.build()
}
