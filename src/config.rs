use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Backend location used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_STALE_TIME: Duration = Duration::from_secs(30);

/// MES API client configuration.
///
/// The base URL is the only required value and is a constructor parameter.
/// Everything else has a default that can be overridden by chaining:
///
/// ```rust,ignore
/// use std::time::Duration;
/// use mes_client::ClientConfig;
///
/// let config = ClientConfig::new("https://mes.example.com/api".parse()?)
///     .with_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    pub(crate) base_url: Url,
    pub(crate) timeout: Duration,
    pub(crate) stale_time: Duration,
}

impl ClientConfig {
    /// Create a configuration pointing at `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            stale_time: DEFAULT_STALE_TIME,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `MES_API_BASE_URL`: backend base URL (default [`DEFAULT_BASE_URL`])
    /// - `MES_API_TIMEOUT_SECS`: per-request timeout in seconds (default 10)
    /// - `MES_QUERY_STALE_SECS`: how long cached reads stay fresh (default 30)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let base_url = match lookup("MES_API_BASE_URL") {
            Some(raw) => parse_base_url(&raw)
                .map_err(|e| Error::Config(format!("MES_API_BASE_URL: {e}")))?,
            None => default_base_url(),
        };

        let mut config = Self::new(base_url);

        if let Some(raw) = lookup("MES_API_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("MES_API_TIMEOUT_SECS: {e}")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(raw) = lookup("MES_QUERY_STALE_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("MES_QUERY_STALE_SECS: {e}")))?;
            config = config.with_stale_time(Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Override the per-request timeout (default: 10 seconds).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override how long cached reads are served without refetching (default: 30 seconds).
    #[must_use]
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    /// Resolves an API path (`/work-orders/3`) below the base URL, keeping the base path.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("base URL cannot carry a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(default_base_url())
    }
}

fn default_base_url() -> Url {
    DEFAULT_BASE_URL.parse().expect("valid default URL")
}

fn parse_base_url(raw: &str) -> Result<Url, String> {
    let url: Url = raw.trim().parse().map_err(|e: url::ParseError| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported scheme '{other}'")),
    }
}
