use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::modules::config::HostContext;
use crate::modules::error::{Error, Result};

/// One JSON request/response exchange with the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: Url) -> Result<Value>;
    async fn post(&self, url: Url, body: Value) -> Result<Value>;
    async fn delete(&self, url: Url, body: Value) -> Result<Value>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn get(&self, url: Url) -> Result<Value> {
        (**self).get(url).await
    }

    async fn post(&self, url: Url, body: Value) -> Result<Value> {
        (**self).post(url, body).await
    }

    async fn delete(&self, url: Url, body: Value) -> Result<Value> {
        (**self).delete(url, body).await
    }
}

/// `Transport` over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("tgdash/0.1"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let mut builder = Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    async fn read(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("Response not OK ({status}), body: {body}");
            return Err(Error::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: Url) -> Result<Value> {
        debug!("GET {url}");
        let response = self.client.get(url).send().await?;
        Self::read(response).await
    }

    async fn post(&self, url: Url, body: Value) -> Result<Value> {
        debug!("POST {url}");
        let response = self.client.post(url).json(&body).send().await?;
        Self::read(response).await
    }

    async fn delete(&self, url: Url, body: Value) -> Result<Value> {
        debug!("DELETE {url}");
        let response = self.client.delete(url).json(&body).send().await?;
        Self::read(response).await
    }
}

/// A decoded response together with the URL that actually produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<R> {
    pub body: R,
    pub url: Url,
    pub used_fallback: bool,
}

/// Shared entry point to the backend. Holds the effective base URL, which a
/// successful HTTPS to HTTP downgrade changes for the rest of the session.
pub struct ApiClient<T = HttpTransport> {
    transport: T,
    base: RwLock<Url>,
    host: HostContext,
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T, base: Url, host: HostContext) -> Self {
        Self {
            transport,
            base: RwLock::new(base),
            host,
        }
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    pub fn base_url(&self) -> Url {
        match self.base.read() {
            Ok(base) => base.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_base_url(&self, url: Url) {
        match self.base.write() {
            Ok(mut base) => *base = url,
            Err(poisoned) => *poisoned.into_inner() = url,
        }
    }

    /// `{base}{path}?{query}`; the base is joined textually so a path prefix survives.
    pub fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let base = self.base_url();
        let mut url = Url::parse(&format!("{}{}", base.as_str().trim_end_matches('/'), path))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Like `endpoint`, with `segment` appended as one percent-encoded path segment.
    pub fn endpoint_with(&self, path: &str, segment: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.endpoint(path, query)?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("{path} cannot take path segments")))?
            .push(segment);
        Ok(url)
    }

    pub async fn get_value(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.endpoint(path, query)?;
        self.transport.get(url).await
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<R> {
        let value = self.get_value(path, query).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn post_json<R: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<R> {
        let url = self.endpoint(path, query)?;
        let body = serde_json::to_value(body)?;
        let value = self.transport.post(url, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// DELETE `{path}/{segment}`; `segment` is a user-supplied key such as a filter trigger.
    pub async fn delete_json<R: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        segment: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<R> {
        let url = self.endpoint_with(path, segment, query)?;
        let body = serde_json::to_value(body)?;
        let value = self.transport.delete(url, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// GET with one retry over plain HTTP when an HTTPS request fails at the
    /// transport level and the page is not running on localhost.
    pub async fn get_with_fallback<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Fetched<R>> {
        let url = self.endpoint(path, query)?;
        let err = match self.transport.get(url.clone()).await {
            Ok(value) => {
                return Ok(Fetched {
                    body: serde_json::from_value(value)?,
                    url,
                    used_fallback: false,
                });
            }
            Err(err) => err,
        };

        if !err.is_transport() || url.scheme() != "https" || self.host.hostname.contains("localhost") {
            return Err(err);
        }

        warn!("HTTPS request failed ({err}), retrying over HTTP");
        let mut http_url = url.clone();
        http_url
            .set_scheme("http")
            .map_err(|_| Error::Transport(format!("cannot downgrade {url}")))?;

        match self.transport.get(http_url.clone()).await {
            Ok(value) => {
                self.downgrade();
                Ok(Fetched {
                    body: serde_json::from_value(value)?,
                    url: http_url,
                    used_fallback: true,
                })
            }
            // The server answered over HTTP, so the downgrade stands even though the request failed.
            Err(status @ Error::Status { .. }) => {
                self.downgrade();
                Err(status)
            }
            Err(second) => Err(Error::FallbackExhausted(second.to_string())),
        }
    }

    fn downgrade(&self) {
        let mut base = self.base_url();
        if base.scheme() == "https" && base.set_scheme("http").is_ok() {
            info!("HTTP connection successful, API base is now {base}");
            self.set_base_url(base);
        }
    }
}
