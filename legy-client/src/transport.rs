//! Moving request bytes to the service and response bytes back.
//!
//! [`Transport`] is the seam tests replace with a scripted fake.
//! [`HttpTransport`] is the real thing: HTTP/2 over rustls, one pooled
//! client shared by every concurrent request.

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tokio::sync::OnceCell;

use crate::errors::TransportError;

/// Largest response body [`decode_body`] inflates a gzip body to.
pub const MAX_DECODED_BODY: usize = 32 * 1024 * 1024;

/// One POST to the service.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub url:     String,
    pub headers: Vec<(String, String)>,
    pub body:    Vec<u8>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends requests. Must be safe to call concurrently; never retries.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn request(&self, req: HttpRequest) -> Result<Vec<u8>, TransportError>;

    /// Refuse further requests. In-flight requests may still complete.
    async fn close(&self) {}
}

// ─── HttpTransport ────────────────────────────────────────────────────────────

/// [`Transport`] backed by `reqwest`.
///
/// The underlying client (and its connection pool) is built on first use,
/// exactly once even when many requests race to be first.
pub struct HttpTransport {
    proxy:  Option<String>,
    client: OnceCell<reqwest::Client>,
    builds: AtomicUsize,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(proxy: Option<String>) -> Self {
        Self {
            proxy,
            client: OnceCell::new(),
            builds: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// How many times the underlying client has been built: zero before
    /// the first request, one ever after.
    pub fn clients_built(&self) -> usize {
        self.builds.load(Ordering::Acquire)
    }

    async fn client(&self) -> Result<&reqwest::Client, TransportError> {
        self.client.get_or_try_init(|| async {
            let mut builder = reqwest::Client::builder()
                .use_rustls_tls()
                .pool_idle_timeout(Duration::from_secs(90));
            if let Some(url) = &self.proxy {
                let proxy = reqwest::Proxy::all(url)
                    .map_err(|e| TransportError::disconnected(format!("bad proxy url: {e}")))?;
                builder = builder.proxy(proxy);
            }
            log::debug!("[legy] building HTTP client (proxy: {})", self.proxy.is_some());
            self.builds.fetch_add(1, Ordering::AcqRel);
            builder.build().map_err(|e| TransportError::disconnected(e.to_string()))
        }).await
    }
}

impl Default for HttpTransport {
    fn default() -> Self { Self::new(None) }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::timeout()
    } else {
        TransportError::disconnected(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, req: HttpRequest) -> Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::closed());
        }
        let client = self.client().await?;

        let mut rb = client.post(&req.url).timeout(req.timeout).body(req.body);
        for (name, value) in &req.headers {
            rb = rb.header(name.as_str(), value.as_str());
        }

        let resp = rb.send().await.map_err(map_reqwest)?;
        let status = resp.status();
        let encoding = resp.headers()
            .get(reqwest::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let raw = resp.bytes().await.map_err(map_reqwest)?;
        let body = decode_body(encoding.as_deref(), &raw)?;

        if !status.is_success() {
            log::debug!("[legy] {} -> HTTP {}", req.url, status.as_u16());
            return Err(TransportError::status(status.as_u16(), body));
        }
        Ok(body)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Undo the response's content encoding. Only gzip is ever requested.
///
/// A gzip body inflating past [`MAX_DECODED_BODY`] is an error.
pub fn decode_body(content_encoding: Option<&str>, raw: &[u8]) -> Result<Vec<u8>, TransportError> {
    decode_body_limited(content_encoding, raw, MAX_DECODED_BODY)
}

/// [`decode_body`] with an explicit inflation limit.
pub fn decode_body_limited(
    content_encoding: Option<&str>,
    raw:              &[u8],
    limit:            usize,
) -> Result<Vec<u8>, TransportError> {
    match content_encoding {
        Some(enc) if enc.trim().eq_ignore_ascii_case("gzip") => {
            let mut out = Vec::with_capacity(raw.len().saturating_mul(2).min(limit));
            GzDecoder::new(raw)
                .take(limit as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|e| TransportError::disconnected(format!("corrupt gzip body: {e}")))?;
            if out.len() > limit {
                return Err(TransportError::disconnected(format!("gzip body inflates past {limit} bytes")));
            }
            Ok(out)
        }
        _ => Ok(raw.to_vec()),
    }
}
