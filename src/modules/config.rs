use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use derive_more::with_trait::Display;
use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::modules::error::{Error, Result};

/// Public dashboard API, used whenever the page is not served by the bot host itself.
pub const PUBLIC_API_ORIGIN: &str = "https://1e4fecb5-5c9e-4fb3-8ace-01c2cc75312b.glacierhosting.org";
/// Local dashboard server started by the bot in development.
pub const LOCAL_DEV_ORIGIN: &str = "http://localhost:3027";

const SERVER_DOMAIN: &str = "glacierhosting.org";
const SERVER_SUFFIX: &str = ".glacierhosting.org";
const STATIC_HOSTING_SUFFIX: &str = ".github.io";

pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_CACHE_TTL_MS: u64 = 10_000;
pub const DEFAULT_BANNER_DISMISS_MS: u64 = 5_000;
pub const DEFAULT_BOOTSTRAP_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[display("http")]
    Http,
    #[display("https")]
    Https,
    #[display("file")]
    File,
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_end_matches(':').to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "file" => Ok(Protocol::File),
            other => Err(Error::Config(format!("unsupported protocol '{other}'"))),
        }
    }
}

/// Where the dashboard page itself is running.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{protocol}://{hostname}")]
pub struct HostContext {
    pub protocol: Protocol,
    pub hostname: String,
}

impl HostContext {
    pub fn new(protocol: Protocol, hostname: impl Into<String>) -> Self {
        Self {
            protocol,
            hostname: hostname.into(),
        }
    }

    /// Builds the context from a page URL such as `https://me.github.io/dash/`.
    pub fn from_page_url(page: &str) -> Result<Self> {
        let url = Url::parse(page)?;
        let protocol = url.scheme().parse()?;
        Ok(Self::new(protocol, url.host_str().unwrap_or_default()))
    }

    pub fn is_loopback(&self) -> bool {
        self.hostname == "localhost" || self.hostname == "127.0.0.1"
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new(Protocol::Http, "localhost")
    }
}

/// Picks the API base URL for a page host. Pure: same input, same output.
pub fn resolve_api_url(host: &HostContext) -> Result<Url> {
    let hostname = host.hostname.as_str();

    let resolved = if hostname.ends_with(STATIC_HOSTING_SUFFIX) {
        debug!("Static hosting detected ({hostname}), using public API");
        PUBLIC_API_ORIGIN.to_string()
    } else if host.protocol != Protocol::File
        && (hostname == SERVER_DOMAIN || hostname.ends_with(SERVER_SUFFIX))
    {
        debug!("Server domain detected ({hostname}), using same origin");
        format!("{}://{}", host.protocol, hostname)
    } else if host.is_loopback() {
        debug!("Running locally, using development API");
        LOCAL_DEV_ORIGIN.to_string()
    } else {
        debug!("Remote host or local file ({host}), using public API");
        PUBLIC_API_ORIGIN.to_string()
    };

    Ok(Url::parse(&resolved)?)
}

/// Optional overrides read from a TOML file.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub api_url: Option<Url>,
    pub refresh_interval_ms: Option<u64>,
    pub debug: Option<bool>,
    pub cache_ttl_ms: Option<u64>,
    pub banner_dismiss_ms: Option<u64>,
    pub bootstrap_delay_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

pub fn load_file_config(path: impl AsRef<Path>) -> Result<FileConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardConfig {
    pub api_url: Url,
    pub refresh_interval_ms: u64,
    pub debug: bool,
    pub cache_ttl_ms: u64,
    pub banner_dismiss_ms: u64,
    pub bootstrap_delay_ms: u64,
    pub request_timeout_secs: Option<u64>,
}

impl DashboardConfig {
    /// Defaults for `host`, with the resolver deciding the API URL.
    pub fn for_host(host: &HostContext) -> Result<Self> {
        Ok(Self {
            api_url: resolve_api_url(host)?,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            debug: false,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            banner_dismiss_ms: DEFAULT_BANNER_DISMISS_MS,
            bootstrap_delay_ms: DEFAULT_BOOTSTRAP_DELAY_MS,
            request_timeout_secs: None,
        })
    }

    /// Layers file values over the defaults. Zero intervals are rejected.
    pub fn merge(mut self, file: FileConfig) -> Result<Self> {
        if let Some(api_url) = file.api_url {
            self.api_url = api_url;
        }
        if let Some(ms) = file.refresh_interval_ms {
            if ms == 0 {
                return Err(Error::Config("refresh_interval_ms must be positive".into()));
            }
            self.refresh_interval_ms = ms;
        }
        if let Some(debug) = file.debug {
            self.debug = debug;
        }
        if let Some(ms) = file.cache_ttl_ms {
            self.cache_ttl_ms = ms;
        }
        if let Some(ms) = file.banner_dismiss_ms {
            self.banner_dismiss_ms = ms;
        }
        if let Some(ms) = file.bootstrap_delay_ms {
            self.bootstrap_delay_ms = ms;
        }
        if file.request_timeout_secs.is_some() {
            self.request_timeout_secs = file.request_timeout_secs;
        }
        Ok(self)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn banner_dismiss(&self) -> Duration {
        Duration::from_millis(self.banner_dismiss_ms)
    }

    pub fn bootstrap_delay(&self) -> Duration {
        Duration::from_millis(self.bootstrap_delay_ms)
    }
}
