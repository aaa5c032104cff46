//! Outbound transport abstraction
//!
//! The orchestrator never talks to the network directly. It hands a fully
//! built `TransportRequest` to a `Transport` and gets back status, headers
//! and a body that may still be streaming. The gateway binary provides the
//! reqwest-backed implementation; tests provide scripted ones.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

/// Body chunks as they arrive from upstream.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Failure to obtain (or finish reading) an upstream response.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("upstream timed out after {0}s")]
    Timeout(u64),

    #[error("upstream connection failed: {0}")]
    Connect(String),

    #[error("upstream request failed: {0}")]
    Request(String),

    #[error("upstream body read failed: {0}")]
    Body(String),

    #[error("upstream body exceeds {0} bytes")]
    TooLarge(usize),
}

/// One outbound attempt, ready to send.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub headers: HeaderMap,
    /// JSON body with the provider's model already substituted. The client's
    /// `stream` flag travels inside it untouched.
    pub body: serde_json::Value,
    pub timeout: Duration,
}

/// Response body, either fully read or still arriving.
pub enum ResponseBody {
    Buffered(Bytes),
    Streaming(BodyStream),
}

impl ResponseBody {
    /// Read the whole body into memory, failing with `TooLarge` once more
    /// than `limit` bytes have arrived.
    pub async fn collect(self, limit: usize) -> Result<Bytes, TransportError> {
        match self {
            ResponseBody::Buffered(bytes) if bytes.len() > limit => {
                Err(TransportError::TooLarge(limit))
            }
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Streaming(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    if buf.len() + chunk.len() > limit {
                        return Err(TransportError::TooLarge(limit));
                    }
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            ResponseBody::Streaming(_) => write!(f, "Streaming"),
        }
    }
}

/// Upstream answer as relayed to the client.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl UpstreamResponse {
    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.headers.get(CONTENT_TYPE)
    }
}

/// Executes outbound attempts.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Transport>`). Implementations must bound the attempt by
/// `request.timeout` and report any failure to get a response as
/// `TransportError`; HTTP error statuses are responses, not errors.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, TransportError>> + Send + '_>>;
}
