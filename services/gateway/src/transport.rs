//! reqwest-backed upstream transport
//!
//! One shared client, no outbound proxy. Bodies are never read here: every
//! response comes back as a stream, and the orchestrator decides how much of
//! it to buffer. The per-provider timeout bounds the wait for response
//! headers and the idle gap between body chunks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use failover::{
    BodyStream, ResponseBody, Transport, TransportError, TransportRequest, UpstreamResponse,
};
use futures_util::StreamExt;
use tracing::debug;

/// Sends attempts over HTTP with a shared `reqwest::Client`.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client that never routes through an outbound proxy, whatever
    /// the environment says.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self { client })
    }

    async fn execute(&self, request: TransportRequest) -> Result<UpstreamResponse, TransportError> {
        let secs = request.timeout.as_secs();
        let body = serde_json::to_vec(&request.body)
            .map_err(|e| TransportError::Request(format!("failed to encode body: {e}")))?;

        let send = self
            .client
            .post(&request.url)
            .headers(request.headers)
            .body(body)
            .send();

        let response = tokio::time::timeout(request.timeout, send)
            .await
            .map_err(|_| TransportError::Timeout(secs))?
            .map_err(|e| map_send_error(e, secs))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        debug!(url = %request.url, status, "upstream responded");

        Ok(UpstreamResponse {
            status,
            headers,
            body: ResponseBody::Streaming(idle_timeout_stream(response, request.timeout)),
        })
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, TransportError>> + Send + '_>> {
        Box::pin(self.execute(request))
    }
}

fn map_send_error(e: reqwest::Error, secs: u64) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(secs)
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

/// Relay chunks as they arrive, ending with `Timeout` if upstream goes quiet
/// for longer than `idle`. The stream ends after the first error.
fn idle_timeout_stream(response: reqwest::Response, idle: Duration) -> BodyStream {
    let secs = idle.as_secs();
    let chunks = Box::pin(response.bytes_stream());

    Box::pin(futures_util::stream::unfold(
        Some(chunks),
        move |state| async move {
            let mut chunks = state?;
            match tokio::time::timeout(idle, chunks.next()).await {
                Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(chunks))),
                Ok(Some(Err(e))) => Some((Err(TransportError::Body(e.to_string())), None)),
                Ok(None) => None,
                Err(_) => Some((Err(TransportError::Timeout(secs)), None)),
            }
        },
    ))
}
