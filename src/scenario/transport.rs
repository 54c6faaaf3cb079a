//! HTTP transport
//!
//! The case pipeline talks to the network only through [`Transport`].
//! Sending returns as soon as the response head is in; the body is drained
//! separately so that the two failure points stay distinct.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;
use tower::{Layer, Service};

use crate::common::config::HttpConfig;
use crate::common::{Error, Result};

/// A fully resolved request ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl OutboundRequest {
    /// Check that method, URL and headers form a valid HTTP request
    pub fn validate(&self) -> Result<()> {
        self.parsed_method()?;
        self.parsed_url()?;
        self.header_map()?;
        Ok(())
    }

    fn parsed_method(&self) -> Result<Method> {
        Method::from_bytes(self.method.as_bytes())
            .map_err(|e| Error::build(format!("invalid method '{}': {}", self.method, e)))
    }

    fn parsed_url(&self) -> Result<Url> {
        Url::parse(&self.url).map_err(|e| Error::build(format!("invalid URL '{}': {}", self.url, e)))
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (key, value) in &self.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| Error::build(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::build(format!("invalid header value for '{}': {}", key, e)))?;
            headers.append(name, value);
        }
        Ok(headers)
    }
}

/// Timing breakdown in milliseconds
///
/// Phases the transport could not observe (for example DNS on a reused
/// connection) stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Timing {
    pub dns_ms: f64,
    pub connect_ms: f64,
    pub tls_handshake_ms: f64,
    pub first_byte_ms: f64,
    pub total_ms: f64,
}

impl Timing {
    /// Build a breakdown from the phases seen while sending
    ///
    /// `setup` spans the whole connector, so DNS is subtracted from it.
    /// On HTTPS the handshake happens inside the same span and is reported
    /// with it.
    fn observed(
        dns: Option<Duration>,
        setup: Option<Duration>,
        first_byte: Duration,
        https: bool,
    ) -> Self {
        let dns = dns.unwrap_or_default();
        let connect = setup.map(|s| s.saturating_sub(dns)).unwrap_or_default();
        Self {
            dns_ms: millis(dns),
            connect_ms: millis(connect),
            tls_handshake_ms: if https { millis(connect) } else { 0.0 },
            first_byte_ms: millis(first_byte),
            total_ms: millis(first_byte),
        }
    }
}

/// Convert a duration to fractional milliseconds
pub fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Response head plus a body still to be read
pub struct Dispatched {
    pub status: u16,
    pub content_length: Option<u64>,
    pub timing: Timing,
    pub body: Box<dyn ResponseBody>,
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatched")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

/// Response payload that has not been read yet
#[async_trait]
pub trait ResponseBody: Send {
    /// Drain the whole body into memory
    async fn read_all(self: Box<Self>) -> Result<Vec<u8>>;
}

#[async_trait]
impl ResponseBody for Vec<u8> {
    async fn read_all(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(*self)
    }
}

/// Something that can send HTTP requests
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<Dispatched>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: &OutboundRequest) -> Result<Dispatched> {
        (**self).send(request).await
    }
}

/// [`Transport`] backed by a shared `reqwest` client
pub struct HttpTransport {
    client: reqwest::Client,
    dns: PhaseClock,
    connect: PhaseClock,
}

impl HttpTransport {
    /// Create a transport with default client settings
    pub fn new() -> Result<Self> {
        Self::from_config(&HttpConfig::default())
    }

    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        let dns = PhaseClock::default();
        let connect = PhaseClock::default();

        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .dns_resolver(Arc::new(TimedResolver { clock: dns.clone() }))
            .connector_layer(ConnectTimer {
                clock: connect.clone(),
            });

        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        if config.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            dns,
            connect,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<Dispatched> {
        let method = request.parsed_method()?;
        let url = request.parsed_url()?;
        let headers = request.header_map()?;
        let https = url.scheme() == "https";

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        self.dns.reset();
        self.connect.reset();
        let start = Instant::now();
        let response = builder.send().await.map_err(|e| Error::transport(e.to_string()))?;
        let first_byte = start.elapsed();

        let timing = Timing::observed(self.dns.take(), self.connect.take(), first_byte, https);

        tracing::debug!(
            status = response.status().as_u16(),
            first_byte_ms = timing.first_byte_ms,
            "Response head received"
        );

        Ok(Dispatched {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            timing,
            body: Box::new(StreamedBody(response)),
        })
    }
}

struct StreamedBody(reqwest::Response);

#[async_trait]
impl ResponseBody for StreamedBody {
    async fn read_all(self: Box<Self>) -> Result<Vec<u8>> {
        let mut stream = self.0.bytes_stream();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::body_read(e.to_string()))?;
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// Last measured duration of one connection phase
#[derive(Debug, Default, Clone)]
struct PhaseClock(Arc<Mutex<Option<Duration>>>);

impl PhaseClock {
    fn reset(&self) {
        if let Ok(mut last) = self.0.lock() {
            *last = None;
        }
    }

    fn record(&self, elapsed: Duration) {
        if let Ok(mut last) = self.0.lock() {
            *last = Some(elapsed);
        }
    }

    fn take(&self) -> Option<Duration> {
        self.0.lock().ok().and_then(|mut last| last.take())
    }
}

/// DNS resolver that records how long the last lookup took
#[derive(Debug)]
struct TimedResolver {
    clock: PhaseClock,
}

impl Resolve for TimedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let clock = self.clock.clone();
        Box::pin(async move {
            let start = Instant::now();
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((name.as_str(), 0))
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?
                .collect();
            clock.record(start.elapsed());
            tracing::trace!(host = name.as_str(), count = addrs.len(), "Resolved host");
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

/// Connector layer that records how long new connections take to set up
///
/// Pooled connections skip the connector, so reuse leaves the clock empty.
#[derive(Debug, Clone)]
struct ConnectTimer {
    clock: PhaseClock,
}

impl<S> Layer<S> for ConnectTimer {
    type Service = TimedConnect<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimedConnect {
            inner,
            clock: self.clock.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct TimedConnect<S> {
    inner: S,
    clock: PhaseClock,
}

impl<S, R> Service<R> for TimedConnect<S>
where
    S: Service<R>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), S::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, target: R) -> Self::Future {
        let clock = self.clock.clone();
        let start = Instant::now();
        let connecting = self.inner.call(target);
        Box::pin(async move {
            let conn = connecting.await?;
            clock.record(start.elapsed());
            Ok(conn)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, url: &str) -> OutboundRequest {
        OutboundRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_request() {
        let mut req = request("POST", "http://localhost:8080/posts?userId=1");
        req.headers.insert("Authorization".into(), "Bearer abc".into());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_parts() {
        assert_eq!(request("GET", "not a url").validate().unwrap_err().kind(), "BuildError");
        assert_eq!(request("GE T", "http://x/").validate().unwrap_err().kind(), "BuildError");

        let mut req = request("GET", "http://x/");
        req.headers.insert("X-Token".into(), "line\nbreak".into());
        assert_eq!(req.validate().unwrap_err().kind(), "BuildError");
    }

    #[test]
    fn test_millis() {
        assert_eq!(millis(Duration::from_millis(250)), 250.0);
    }

    #[test]
    fn test_observed_timing_splits_dns_from_connect() {
        let ms = Duration::from_millis;
        let timing = Timing::observed(Some(ms(125)), Some(ms(500)), ms(1000), false);
        assert_eq!(timing.dns_ms, 125.0);
        assert_eq!(timing.connect_ms, 375.0);
        assert_eq!(timing.tls_handshake_ms, 0.0);
        assert_eq!(timing.first_byte_ms, 1000.0);

        let timing = Timing::observed(None, Some(ms(250)), ms(1000), true);
        assert_eq!(timing.connect_ms, 250.0);
        assert_eq!(timing.tls_handshake_ms, 250.0);

        let reused = Timing::observed(None, None, ms(500), true);
        assert_eq!(reused.connect_ms, 0.0);
        assert_eq!(reused.tls_handshake_ms, 0.0);
    }

    /// Connector stand-in that waits `delay` ms, failing on zero
    struct Delayed;

    impl Service<u64> for Delayed {
        type Response = u64;
        type Error = std::io::Error;
        type Future = Pin<Box<dyn Future<Output = std::io::Result<u64>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, delay: u64) -> Self::Future {
            Box::pin(async move {
                if delay == 0 {
                    return Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
                }
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(delay)
            })
        }
    }

    #[tokio::test]
    async fn test_connect_timer_records_successful_connects() {
        let clock = PhaseClock::default();
        let mut service = ConnectTimer {
            clock: clock.clone(),
        }
        .layer(Delayed);

        assert_eq!(service.call(5).await.unwrap(), 5);
        assert!(clock.take().is_some_and(|d| d >= Duration::from_millis(5)));
        assert!(clock.take().is_none());

        assert!(service.call(0).await.is_err());
        assert!(clock.take().is_none());
    }

    #[tokio::test]
    async fn test_vec_body_reads_back() {
        let body: Box<dyn ResponseBody> = Box::new(b"hello".to_vec());
        assert_eq!(body.read_all().await.unwrap(), b"hello");
    }
}
