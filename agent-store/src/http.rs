//! JSON-over-HTTPS transport shared by the networked backends.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use hyper::{Body, Client, Method, Request, Uri};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::debug;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::{StoreError, StoreResult};

type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

fn build_https_client(connect_timeout: Duration) -> HyperClient {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(connect_timeout));

    let connector = HttpsConnector::from((http, Arc::new(config)));

    Client::builder().build::<_, Body>(connector)
}

/// Minimal JSON client bound to one service base URL.
///
/// The underlying connection pool is created on first use; concurrent first
/// callers share a single initialisation.
pub struct JsonClient {
    base_url: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    timeout: Duration,
    client: OnceCell<HyperClient>,
}

impl fmt::Debug for JsonClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl JsonClient {
    /// Creates a client for `base_url`, bounding every request by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if the URL has no http(s) scheme or
    /// does not parse.
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> StoreResult<Self> {
        Ok(Self {
            base_url: sanitize_base_url(base_url.as_ref())?,
            headers: Vec::new(),
            timeout,
            client: OnceCell::new(),
        })
    }

    /// Adds a header sent with every request (API keys and the like).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if the value is not a valid header.
    pub fn with_header(mut self, name: &'static str, value: &str) -> StoreResult<Self> {
        let value = HeaderValue::from_str(value)
            .map_err(|err| StoreError::invalid_config(format!("invalid `{name}` header: {err}")))?;
        self.headers.push((HeaderName::from_static(name), value));
        Ok(self)
    }

    /// Returns the normalised base URL (always ending in `/`).
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends a `POST` with a JSON body and decodes the JSON answer.
    ///
    /// # Errors
    ///
    /// See [`JsonClient::send`].
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> StoreResult<Value> {
        self.send(Method::POST, path, Some(body)).await
    }

    /// Sends a `PUT` with a JSON body and decodes the JSON answer.
    ///
    /// # Errors
    ///
    /// See [`JsonClient::send`].
    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> StoreResult<Value> {
        self.send(Method::PUT, path, Some(body)).await
    }

    /// Sends a `GET` and decodes the JSON answer.
    ///
    /// # Errors
    ///
    /// See [`JsonClient::send`].
    pub async fn get(&self, path: &str) -> StoreResult<Value> {
        self.send::<Value>(Method::GET, path, None).await
    }

    /// Sends a request relative to the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connectivity`] on transport failure or timeout,
    /// [`StoreError::Rejected`] for non-success statuses, and
    /// [`StoreError::Encoding`] when either body is not valid JSON.
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> StoreResult<Value> {
        let uri = format!("{}{}", self.base_url, path.trim_start_matches('/'))
            .parse::<Uri>()
            .map_err(|err| StoreError::invalid_config(format!("invalid request path `{path}`: {err}")))?;

        let payload = match body {
            Some(body) => Body::from(serde_json::to_vec(body)?),
            None => Body::empty(),
        };

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(payload)
            .map_err(|err| StoreError::invalid_config(format!("failed to build request: {err}")))?;

        let client = self
            .client
            .get_or_init(|| async { build_https_client(self.timeout) })
            .await;

        debug!(%method, path, "sending store request");
        let response = timeout(self.timeout, client.request(request))
            .await
            .map_err(|_| StoreError::connectivity(format!("{method} {path} timed out")))?
            .map_err(|err| StoreError::connectivity(format!("{method} {path} failed: {err}")))?;

        let status = response.status();
        let bytes = timeout(self.timeout, hyper::body::to_bytes(response.into_body()))
            .await
            .map_err(|_| StoreError::connectivity(format!("{method} {path} body timed out")))?
            .map_err(|err| StoreError::connectivity(format!("failed to read response: {err}")))?;

        if !status.is_success() {
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                reason: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        decode_body(&bytes)
    }
}

fn decode_body(bytes: &Bytes) -> StoreResult<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(bytes)?)
}

fn sanitize_base_url(input: &str) -> StoreResult<String> {
    let mut base = input.trim().to_owned();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(StoreError::invalid_config(
            "service URL must start with http:// or https://",
        ));
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base.parse::<Uri>()
        .map_err(|err| StoreError::invalid_config(format!("invalid service URL: {err}")))?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_url_without_scheme() {
        let err = JsonClient::new("localhost:6333", Duration::from_secs(1))
            .expect_err("missing scheme should error");
        assert!(matches!(err, StoreError::InvalidConfig { .. }));
    }

    #[test]
    fn adds_trailing_slash() {
        let client = JsonClient::new("http://localhost:6333", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:6333/");
    }

    #[test]
    fn empty_body_decodes_as_null() {
        assert_eq!(decode_body(&Bytes::from_static(b" \n")).unwrap(), Value::Null);
        assert!(decode_body(&Bytes::from_static(b"{oops")).is_err());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_connectivity_error() {
        // Port 9 (discard) is closed on test hosts; the connect fails fast.
        let client = JsonClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.get("health").await.expect_err("nothing listens there");
        assert!(err.is_connectivity());
    }
}
