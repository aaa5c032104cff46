//! Per-request failover loop
//!
//! For each inbound request:
//! 1. Select candidates for the protocol (none → `NoEligibleProviders`)
//! 2. For each candidate in order, build URL, body and headers and send
//! 3. Classify the attempt:
//!    - 200 → clear cooldown, relay the (streaming) response
//!    - soft 400 / retriable status / transport error → cooldown, next candidate
//!    - anything else → relay verbatim, cooldown untouched
//! 4. Candidates exhausted → aggregate failure from the last recorded error
//!
//! Candidates are tried strictly one after another. Cooldown updates are the
//! only side effect visible to other requests.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::classify::{AttemptOutcome, SOFT_FAILURE_COOLDOWN_SECS, classify_response};
use crate::cooldown::{CooldownTracker, FailoverPolicy, TRANSPORT_FAILURE_STATUS};
use crate::error::{FailoverError, Result};
use crate::headers::{build_outbound_headers, sanitize_response_headers};
use crate::model::resolve_model;
use crate::registry::{Protocol, ProviderRecord, Registry};
use crate::selector::select_candidates;
use crate::transport::{ResponseBody, Transport, TransportRequest, UpstreamResponse};

/// Largest non-200 body read for classification. Anything longer counts as
/// a transport failure for that provider.
pub const MAX_ERROR_BODY_BYTES: usize = 1024 * 1024;

/// A client request as the orchestrator sees it.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub protocol: Protocol,
    /// Path appended to provider base URLs, e.g. `/v1/messages`.
    pub target_path: String,
    pub headers: HeaderMap,
    pub body: Map<String, Value>,
}

/// The last failure worth reporting once every candidate has been tried.
#[derive(Debug, Clone, Copy)]
struct LastError {
    status: u16,
    soft: bool,
}

/// Drives the failover loop over an immutable registry and a shared
/// cooldown tracker.
pub struct Orchestrator {
    registry: Arc<Registry>,
    cooldowns: Arc<CooldownTracker>,
    policy: FailoverPolicy,
    transport: Arc<dyn Transport>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        cooldowns: Arc<CooldownTracker>,
        policy: FailoverPolicy,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            cooldowns,
            policy,
            transport,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    /// Forward `request` to the first provider that accepts it.
    ///
    /// `Ok` carries either a successful response (sanitized headers, body
    /// still streaming) or a non-retriable upstream answer relayed as-is.
    /// The client's `stream` flag is left in the body for the provider.
    /// `Err` is the aggregate failure the client should see.
    pub async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse> {
        let candidates = select_candidates(
            &self.registry,
            &self.cooldowns,
            request.protocol,
            Instant::now(),
        );
        if candidates.is_empty() {
            warn!(protocol = %request.protocol, "no eligible providers");
            return Err(FailoverError::NoEligibleProviders {
                protocol: request.protocol,
            });
        }

        let requested_model = request
            .body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut last_error: Option<LastError> = None;

        for provider in candidates {
            let mapped_model = resolve_model(provider, &requested_model);
            let mut body = request.body.clone();
            body.insert("model".to_string(), Value::String(mapped_model.clone()));

            let outbound = TransportRequest {
                url: resolve_target_url(provider, &request.target_path),
                headers: build_outbound_headers(provider, &request.headers, request.protocol),
                body: Value::Object(body),
                timeout: Duration::from_secs(provider.timeout_seconds),
            };

            info!(
                provider = %provider.name,
                protocol = %request.protocol,
                requested_model = %requested_model,
                mapped_model = %mapped_model,
                url = %outbound.url,
                "forwarding to provider"
            );

            let response = match self.transport.send(outbound).await {
                Ok(response) => response,
                Err(e) => {
                    self.record_failure(provider, AttemptOutcome::TransportException(e));
                    continue;
                }
            };

            if response.status == 200 {
                self.record_success(provider);
                return Ok(UpstreamResponse {
                    status: response.status,
                    headers: sanitize_response_headers(&response.headers),
                    body: response.body,
                });
            }

            let UpstreamResponse {
                status,
                headers,
                body,
            } = response;
            let body = match body.collect(MAX_ERROR_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.record_failure(provider, AttemptOutcome::TransportException(e));
                    continue;
                }
            };

            match classify_response(&self.policy, status, &headers, &body) {
                AttemptOutcome::Success => {
                    self.record_success(provider);
                    return Ok(UpstreamResponse {
                        status,
                        headers: sanitize_response_headers(&headers),
                        body: ResponseBody::Buffered(body),
                    });
                }
                AttemptOutcome::TerminalFail { status, body } => {
                    info!(
                        provider = %provider.name,
                        status,
                        "non-retriable upstream status, relaying to client"
                    );
                    record_attempt(provider, "terminal");
                    return Ok(terminal_response(status, &headers, body));
                }
                outcome @ AttemptOutcome::SoftFailContinue { .. } => {
                    self.record_failure(provider, outcome);
                    last_error = Some(LastError { status, soft: true });
                }
                outcome @ AttemptOutcome::RetriableFailContinue { .. } => {
                    self.record_failure(provider, outcome);
                    last_error = Some(LastError {
                        status,
                        soft: false,
                    });
                }
                outcome @ AttemptOutcome::TransportException(_) => {
                    self.record_failure(provider, outcome);
                }
            }
        }

        match last_error {
            Some(LastError { status, soft }) => {
                warn!(
                    protocol = %request.protocol,
                    last_status = status,
                    "all providers failed"
                );
                Err(FailoverError::Exhausted {
                    last_status: status,
                    soft,
                })
            }
            None => {
                warn!(protocol = %request.protocol, "all providers failed with connection errors");
                Err(FailoverError::ConnectionsFailed)
            }
        }
    }

    fn record_success(&self, provider: &ProviderRecord) {
        self.cooldowns.mark_success(&provider.name);
        record_attempt(provider, "success");
        info!(provider = %provider.name, "provider succeeded");
    }

    fn record_failure(&self, provider: &ProviderRecord, outcome: AttemptOutcome) {
        let now = Instant::now();
        match &outcome {
            AttemptOutcome::SoftFailContinue { reason } => {
                warn!(
                    provider = %provider.name,
                    reason = %reason,
                    "provider rejected model or feature, trying next"
                );
                self.cooldowns.mark_failure_for(
                    &provider.name,
                    400,
                    Duration::from_secs(SOFT_FAILURE_COOLDOWN_SECS),
                    now,
                );
            }
            AttemptOutcome::RetriableFailContinue {
                status,
                retry_after,
            } => {
                warn!(
                    provider = %provider.name,
                    status,
                    retry_after,
                    "retriable upstream status, trying next"
                );
                self.cooldowns
                    .mark_failure(&provider.name, *status, *retry_after, now, &self.policy);
            }
            AttemptOutcome::TransportException(e) => {
                warn!(provider = %provider.name, error = %e, "upstream transport error, trying next");
                self.cooldowns.mark_failure(
                    &provider.name,
                    TRANSPORT_FAILURE_STATUS,
                    None,
                    now,
                    &self.policy,
                );
            }
            AttemptOutcome::Success | AttemptOutcome::TerminalFail { .. } => {}
        }
        record_attempt(provider, outcome.label());
    }
}

fn record_attempt(provider: &ProviderRecord, outcome: &'static str) {
    metrics::counter!(
        "gateway_upstream_attempts_total",
        "provider" => provider.name.clone(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Non-retriable answers keep only their status, body and content type.
fn terminal_response(status: u16, upstream_headers: &HeaderMap, body: Bytes) -> UpstreamResponse {
    let mut headers = HeaderMap::new();
    if let Some(content_type) = upstream_headers.get(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, content_type.clone());
    }
    UpstreamResponse {
        status,
        headers,
        body: ResponseBody::Buffered(body),
    }
}

/// URL for one attempt against `provider`.
///
/// With `full_endpoint` set, the flag decides. Otherwise a `base_url` that
/// already ends with the target path (e.g. `https://host/v1/messages`) is
/// taken as the complete endpoint, and anything else gets the path appended.
pub fn resolve_target_url(provider: &ProviderRecord, target_path: &str) -> String {
    let base = provider.base_url.trim_end_matches('/');
    let full = provider
        .full_endpoint
        .unwrap_or_else(|| looks_like_full_endpoint(base, target_path));
    if full {
        base.to_string()
    } else {
        format!("{base}{target_path}")
    }
}

fn looks_like_full_endpoint(base: &str, target_path: &str) -> bool {
    base.contains("/v1") && target_path.starts_with("/v1") && base.ends_with(target_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::MAX_COOLDOWN;
    use crate::transport::TransportError;
    use futures_util::StreamExt;
    use reqwest::header::HeaderValue;
    use std::collections::{HashMap, VecDeque};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    /// Canned upstream behaviour for one call.
    enum Reply {
        Status {
            status: u16,
            headers: Vec<(&'static str, &'static str)>,
            body: &'static str,
        },
        Chunks(Vec<&'static str>),
        /// Error status whose body never ends.
        Endless(u16),
        Refused,
    }

    fn reply(status: u16, body: &'static str) -> Reply {
        Reply::Status {
            status,
            headers: vec![("content-type", "application/json")],
            body,
        }
    }

    /// Transport that answers from per-URL scripts and records every call.
    #[derive(Default)]
    struct ScriptedTransport {
        scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<TransportRequest>>,
    }

    impl ScriptedTransport {
        fn script(&self, url: &str, reply: Reply) {
            self.scripts
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(reply);
        }

        fn calls_to(&self, url: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.url == url)
                .count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn last_call(&self) -> TransportRequest {
            self.calls.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl Transport for ScriptedTransport {
        fn send(
            &self,
            request: TransportRequest,
        ) -> Pin<
            Box<dyn Future<Output = std::result::Result<UpstreamResponse, TransportError>> + Send + '_>,
        > {
            let next = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&request.url)
                .and_then(VecDeque::pop_front);
            self.calls.lock().unwrap().push(request);

            Box::pin(async move {
                match next {
                    Some(Reply::Status {
                        status,
                        headers,
                        body,
                    }) => {
                        let mut map = HeaderMap::new();
                        for (name, value) in headers {
                            map.insert(name, HeaderValue::from_static(value));
                        }
                        Ok(UpstreamResponse {
                            status,
                            headers: map,
                            body: ResponseBody::Buffered(Bytes::from_static(body.as_bytes())),
                        })
                    }
                    Some(Reply::Chunks(chunks)) => {
                        let mut map = HeaderMap::new();
                        map.insert("content-type", HeaderValue::from_static("text/event-stream"));
                        map.insert("content-length", HeaderValue::from_static("999"));
                        let stream = futures_util::stream::iter(
                            chunks
                                .into_iter()
                                .map(|c| Ok::<_, TransportError>(Bytes::from_static(c.as_bytes()))),
                        );
                        Ok(UpstreamResponse {
                            status: 200,
                            headers: map,
                            body: ResponseBody::Streaming(Box::pin(stream)),
                        })
                    }
                    Some(Reply::Endless(status)) => {
                        let stream = futures_util::stream::repeat_with(|| {
                            Ok::<_, TransportError>(Bytes::from_static(&[b'x'; 8192]))
                        });
                        Ok(UpstreamResponse {
                            status,
                            headers: HeaderMap::new(),
                            body: ResponseBody::Streaming(Box::pin(stream)),
                        })
                    }
                    Some(Reply::Refused) | None => {
                        Err(TransportError::Connect("connection refused".into()))
                    }
                }
            })
        }
    }

    const ONE: &str = "https://one.test/v1/messages";
    const TWO: &str = "https://two.test/v1/messages";
    const OAI: &str = "https://oai.test/v1/chat/completions";

    fn anthropic_pair() -> Vec<ProviderRecord> {
        vec![
            ProviderRecord::new("one", Protocol::Anthropic, "https://one.test", "key-one")
                .with_priority(1),
            ProviderRecord::new("two", Protocol::Anthropic, "https://two.test/", "key-two")
                .with_priority(2),
        ]
    }

    fn orchestrator(
        records: Vec<ProviderRecord>,
        transport: Arc<ScriptedTransport>,
    ) -> Orchestrator {
        Orchestrator::new(
            Arc::new(Registry::new(records).unwrap()),
            Arc::new(CooldownTracker::new()),
            FailoverPolicy::default(),
            transport,
        )
    }

    fn request(protocol: Protocol, body: Value) -> ForwardRequest {
        let target_path = match protocol {
            Protocol::Anthropic => "/v1/messages",
            Protocol::OpenAi => "/v1/chat/completions",
        };
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("client-key"));
        headers.insert("anthropic-beta", HeaderValue::from_static("tools-2024-04-04"));
        ForwardRequest {
            protocol,
            target_path: target_path.to_string(),
            headers,
            body: body.as_object().cloned().unwrap_or_default(),
        }
    }

    fn messages_request() -> ForwardRequest {
        request(
            Protocol::Anthropic,
            serde_json::json!({"model": "claude-3-opus", "max_tokens": 10, "messages": []}),
        )
    }

    async fn body_of(response: UpstreamResponse) -> String {
        let bytes = response.body.collect(MAX_ERROR_BODY_BYTES).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_provider_fails_over_and_cools_down() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            ONE,
            Reply::Status {
                status: 429,
                headers: vec![("retry-after", "30")],
                body: r#"{"error":{"type":"rate_limit_error"}}"#,
            },
        );
        transport.script(TWO, reply(200, r#"{"id":"from-two"}"#));
        transport.script(TWO, reply(200, r#"{"id":"from-two-again"}"#));
        let orch = orchestrator(anthropic_pair(), transport.clone());

        let response = orch.forward(messages_request()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(body_of(response).await, r#"{"id":"from-two"}"#);
        assert_eq!(transport.calls_to(ONE), 1);

        // 5s later provider one is still cooling down
        tokio::time::advance(Duration::from_secs(5)).await;
        let response = orch.forward(messages_request()).await.unwrap();
        assert_eq!(body_of(response).await, r#"{"id":"from-two-again"}"#);
        assert_eq!(transport.calls_to(ONE), 1, "one must be skipped at +5s");

        // 31s after the failure it is selected first again
        tokio::time::advance(Duration::from_secs(26)).await;
        transport.script(ONE, reply(200, r#"{"id":"from-one"}"#));
        let response = orch.forward(messages_request()).await.unwrap();
        assert_eq!(body_of(response).await, r#"{"id":"from-one"}"#);
        assert_eq!(transport.calls_to(ONE), 2);
        assert!(orch.cooldowns().is_empty(), "success clears the cooldown entry");
    }

    #[tokio::test(start_paused = true)]
    async fn model_rejection_yields_503_and_short_cooldown() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            OAI,
            reply(400, r#"{"error":{"message":"model 'x' not supported"}}"#),
        );
        let orch = orchestrator(
            vec![ProviderRecord::new("oai", Protocol::OpenAi, "https://oai.test", "k")],
            transport.clone(),
        );
        let started = Instant::now();

        let err = orch
            .forward(request(Protocol::OpenAi, serde_json::json!({"model": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 503);
        assert!(matches!(
            err,
            FailoverError::Exhausted {
                last_status: 400,
                soft: true
            }
        ));

        assert!(!orch.cooldowns().is_eligible("oai", started + Duration::from_secs(4)));
        assert!(orch.cooldowns().is_eligible("oai", started + Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn non_retriable_status_is_relayed_verbatim() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            ONE,
            Reply::Status {
                status: 404,
                headers: vec![("content-type", "application/problem+json"), ("x-upstream", "1")],
                body: r#"{"error":"no such route"}"#,
            },
        );
        let orch = orchestrator(anthropic_pair(), transport.clone());

        let response = orch.forward(messages_request()).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(
            response.content_type().unwrap(),
            "application/problem+json"
        );
        assert!(response.headers.get("x-upstream").is_none());
        assert_eq!(body_of(response).await, r#"{"error":"no such route"}"#);

        assert_eq!(transport.calls_to(TWO), 0, "terminal answers end the loop");
        assert!(orch.cooldowns().is_empty(), "terminal answers set no cooldown");
    }

    #[tokio::test]
    async fn missing_protocol_fails_without_outbound_call() {
        let transport = Arc::new(ScriptedTransport::default());
        let orch = orchestrator(anthropic_pair(), transport.clone());

        let err = orch
            .forward(request(Protocol::OpenAi, serde_json::json!({"model": "gpt-4o"})))
            .await
            .unwrap_err();

        assert_eq!(err.status(), 503);
        assert!(
            err.to_string()
                .contains("No available providers for protocol 'openai'")
        );
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn all_connection_errors_yield_503() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(ONE, Reply::Refused);
        transport.script(TWO, Reply::Refused);
        let orch = orchestrator(anthropic_pair(), transport.clone());

        let err = orch.forward(messages_request()).await.unwrap_err();
        assert!(matches!(err, FailoverError::ConnectionsFailed));
        assert_eq!(err.status(), 503);
        assert_eq!(transport.total_calls(), 2);

        // Both providers now sit on the default cooldown
        let now = Instant::now();
        assert!(!orch.cooldowns().is_eligible("one", now));
        assert!(!orch.cooldowns().is_eligible("two", now));
        assert!(orch.cooldowns().is_eligible("one", now + Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn last_http_error_wins_over_later_connection_error() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(ONE, reply(502, "bad gateway"));
        transport.script(TWO, Reply::Refused);
        let orch = orchestrator(anthropic_pair(), transport);

        let err = orch.forward(messages_request()).await.unwrap_err();
        assert_eq!(err.status(), 502);
        assert_eq!(err.to_string(), "All providers failed. Last error: 502");
    }

    #[tokio::test]
    async fn credential_failure_gets_long_cooldown() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(ONE, reply(401, r#"{"error":"invalid x-api-key"}"#));
        transport.script(TWO, reply(200, "{}"));
        let orch = orchestrator(anthropic_pair(), transport);

        let response = orch.forward(messages_request()).await.unwrap();
        assert_eq!(response.status, 200);

        let now = Instant::now();
        assert!(!orch.cooldowns().is_eligible("one", now + Duration::from_secs(3599)));
        assert!(orch.cooldowns().is_eligible("one", now + Duration::from_secs(3601)));
    }

    #[tokio::test]
    async fn plain_bad_request_is_relayed_without_failover() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(ONE, reply(400, r#"{"error":"max_tokens: field required"}"#));
        let orch = orchestrator(anthropic_pair(), transport.clone());

        let response = orch.forward(messages_request()).await.unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(transport.calls_to(TWO), 0);
        assert!(orch.cooldowns().is_empty());
    }

    #[tokio::test]
    async fn outbound_call_carries_mapped_model_and_provider_credentials() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(ONE, reply(200, "{}"));
        let mut records = anthropic_pair();
        records[0]
            .models
            .insert("opus".to_string(), "provider-opus-latest".to_string());
        let orch = orchestrator(records, transport.clone());

        let mut req = messages_request();
        req.body.insert("stream".to_string(), Value::Bool(false));
        orch.forward(req).await.unwrap();

        let call = transport.last_call();
        assert_eq!(call.url, ONE);
        assert_eq!(call.body["model"], "provider-opus-latest");
        assert_eq!(call.body["max_tokens"], 10);
        assert_eq!(call.body["stream"], false);
        assert_eq!(call.timeout, Duration::from_secs(60));
        assert_eq!(call.headers.get("x-api-key").unwrap(), "key-one");
        assert_eq!(call.headers.get("anthropic-beta").unwrap(), "tools-2024-04-04");
    }

    #[tokio::test]
    async fn absent_stream_flag_stays_absent_and_missing_model_is_empty() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(ONE, reply(200, "{}"));
        let orch = orchestrator(anthropic_pair(), transport.clone());

        orch.forward(request(Protocol::Anthropic, serde_json::json!({})))
            .await
            .unwrap();

        let call = transport.last_call();
        assert!(call.body.get("stream").is_none());
        assert_eq!(call.body["model"], "");
    }

    #[tokio::test]
    async fn streaming_success_is_relayed_chunk_by_chunk() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            ONE,
            Reply::Chunks(vec!["event: message_start\n\n", "event: message_stop\n\n"]),
        );
        let orch = orchestrator(anthropic_pair(), transport);

        let response = orch.forward(messages_request()).await.unwrap();
        assert_eq!(response.content_type().unwrap(), "text/event-stream");
        assert!(
            response.headers.get("content-length").is_none(),
            "framing headers are stripped"
        );
        let ResponseBody::Streaming(stream) = response.body else {
            panic!("expected a streaming body");
        };
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn soft_rejection_moves_on_to_next_candidate() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            ONE,
            Reply::Status {
                status: 400,
                headers: vec![("content-type", "application/json"), ("retry-after", "600")],
                body: r#"{"error":{"message":"model 'claude-3-opus' not found"}}"#,
            },
        );
        transport.script(TWO, reply(200, r#"{"id":"from-two"}"#));
        let orch = orchestrator(anthropic_pair(), transport.clone());
        let started = Instant::now();

        let response = orch.forward(messages_request()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(body_of(response).await, r#"{"id":"from-two"}"#);
        assert_eq!(transport.calls_to(ONE), 1);
        assert_eq!(transport.calls_to(TWO), 1);

        // Short fixed cooldown; the retry-after header does not stretch it
        let cooldowns = orch.cooldowns();
        assert!(!cooldowns.is_eligible("one", started + Duration::from_secs(4)));
        assert!(cooldowns.is_eligible("one", started + Duration::from_secs(5)));
        assert!(cooldowns.is_eligible("two", started));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_retry_after_is_capped_and_fails_over() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            ONE,
            Reply::Status {
                status: 429,
                headers: vec![("retry-after", "18446744073709551615")],
                body: "",
            },
        );
        transport.script(TWO, reply(200, "{}"));
        let orch = orchestrator(anthropic_pair(), transport);
        let started = Instant::now();

        let response = orch.forward(messages_request()).await.unwrap();
        assert_eq!(response.status, 200);

        let cooldowns = orch.cooldowns();
        assert!(!cooldowns.is_eligible("one", started + Duration::from_secs(86_400)));
        assert!(cooldowns.is_eligible("one", started + MAX_COOLDOWN));
    }

    #[tokio::test]
    async fn oversized_error_body_is_a_transport_failure() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(ONE, Reply::Endless(500));
        transport.script(TWO, reply(200, "{}"));
        let orch = orchestrator(anthropic_pair(), transport);

        let response = orch.forward(messages_request()).await.unwrap();
        assert_eq!(response.status, 200);

        let now = Instant::now();
        assert!(!orch.cooldowns().is_eligible("one", now + Duration::from_secs(59)));
    }

    #[tokio::test]
    async fn oversized_error_body_alone_reports_connection_failure() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(ONE, Reply::Endless(404));
        let orch = orchestrator(
            vec![ProviderRecord::new("one", Protocol::Anthropic, "https://one.test", "k")],
            transport,
        );

        let err = orch.forward(messages_request()).await.unwrap_err();
        assert!(matches!(err, FailoverError::ConnectionsFailed), "got {err:?}");
    }

    #[test]
    fn target_url_appends_path_to_root() {
        let p = ProviderRecord::new("p", Protocol::OpenAi, "https://api.example.com/", "k");
        assert_eq!(
            resolve_target_url(&p, "/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn target_url_keeps_full_anthropic_endpoint() {
        let p = ProviderRecord::new(
            "p",
            Protocol::Anthropic,
            "https://relay.example.com/api/v1/messages/",
            "k",
        );
        assert_eq!(
            resolve_target_url(&p, "/v1/messages"),
            "https://relay.example.com/api/v1/messages"
        );
    }

    #[test]
    fn target_url_keeps_full_openai_endpoint() {
        let p = ProviderRecord::new(
            "p",
            Protocol::OpenAi,
            "https://relay.example.com/v1/chat/completions",
            "k",
        );
        assert_eq!(
            resolve_target_url(&p, "/v1/chat/completions"),
            "https://relay.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn target_url_appends_to_versioned_root() {
        let p = ProviderRecord::new("p", Protocol::Anthropic, "https://relay.example.com/v1", "k");
        assert_eq!(
            resolve_target_url(&p, "/v1/messages"),
            "https://relay.example.com/v1/v1/messages"
        );
    }

    #[test]
    fn explicit_full_endpoint_flag_overrides_heuristic() {
        let mut p = ProviderRecord::new("p", Protocol::OpenAi, "https://gw.example.com/chat", "k");
        p.full_endpoint = Some(true);
        assert_eq!(
            resolve_target_url(&p, "/v1/chat/completions"),
            "https://gw.example.com/chat"
        );

        let mut q =
            ProviderRecord::new("q", Protocol::Anthropic, "https://gw.example.com/v1/messages", "k");
        q.full_endpoint = Some(false);
        assert_eq!(
            resolve_target_url(&q, "/v1/messages"),
            "https://gw.example.com/v1/messages/v1/messages"
        );
    }
}
