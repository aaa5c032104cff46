//! Outbound header construction and response header sanitizing

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::registry::{Protocol, ProviderRecord};

/// Inbound headers never forwarded upstream: connection-scoped, length-scoped
/// (the body is re-serialized) or credentials that get replaced.
const EXCLUDED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "authorization",
    "x-api-key",
    "content-length",
    "connection",
    "upgrade",
    "accept-encoding",
];

/// Upstream response headers dropped before relaying; the body is re-framed.
const EXCLUDED_RESPONSE_HEADERS: &[&str] = &[
    "content-encoding",
    "transfer-encoding",
    "connection",
    "content-length",
];

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

fn is_excluded(name: &str, excluded: &[&str]) -> bool {
    excluded.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Build the headers for one upstream attempt.
///
/// Copies the client's headers minus the excluded set, injects the
/// provider's credentials for `protocol` and forces a JSON content type.
pub fn build_outbound_headers(
    provider: &ProviderRecord,
    inbound: &HeaderMap,
    protocol: Protocol,
) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 3);
    for (name, value) in inbound {
        if !is_excluded(name.as_str(), EXCLUDED_REQUEST_HEADERS) {
            headers.append(name.clone(), value.clone());
        }
    }

    match protocol {
        Protocol::Anthropic => {
            if let Some(key) = credential_value(provider, provider.api_key.expose()) {
                headers.insert(HeaderName::from_static("x-api-key"), key);
            }
            headers.insert(
                HeaderName::from_static("anthropic-version"),
                HeaderValue::from_static(ANTHROPIC_VERSION),
            );
        }
        Protocol::OpenAi => {
            let bearer = format!("Bearer {}", provider.api_key.expose());
            if let Some(value) = credential_value(provider, &bearer) {
                headers.insert(AUTHORIZATION, value);
            }
        }
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

fn credential_value(provider: &ProviderRecord, raw: &str) -> Option<HeaderValue> {
    match HeaderValue::from_str(raw) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Some(value)
        }
        Err(e) => {
            warn!(provider = %provider.name, error = %e, "api key is not a valid header value");
            None
        }
    }
}

/// Copy upstream response headers minus the framing headers.
pub fn sanitize_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !is_excluded(name.as_str(), EXCLUDED_RESPONSE_HEADERS) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}
