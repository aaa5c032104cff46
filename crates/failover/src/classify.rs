//! Classification of a single upstream attempt
//!
//! Decides, from status, headers and (buffered) error body, whether the
//! orchestrator should return, move on to the next candidate, or relay the
//! upstream answer as final.

use bytes::Bytes;
use reqwest::header::HeaderMap;

use crate::cooldown::FailoverPolicy;
use crate::retry_signal::{extract_wait_seconds, parse_retry_after};
use crate::transport::TransportError;

/// Phrases in a 400 body that mark the rejection as model/feature specific
/// to that provider rather than a malformed request.
const MODEL_REJECTION_PATTERNS: &[&str] = &["model", "not found", "support"];

/// Cooldown applied to a provider that rejected the requested model.
pub const SOFT_FAILURE_COOLDOWN_SECS: u64 = 5;

/// How one provider attempt ended.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// 200: relay to the client.
    Success,
    /// 400 naming the model or an unsupported feature: short cooldown, next
    /// candidate.
    SoftFailContinue { reason: String },
    /// Configured retriable status: cooldown, next candidate.
    RetriableFailContinue {
        status: u16,
        retry_after: Option<u64>,
    },
    /// Anything else: relay verbatim, cooldown untouched.
    TerminalFail { status: u16, body: Bytes },
    /// No HTTP response at all.
    TransportException(TransportError),
}

impl AttemptOutcome {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::SoftFailContinue { .. } => "soft_fail",
            AttemptOutcome::RetriableFailContinue { .. } => "retriable_fail",
            AttemptOutcome::TerminalFail { .. } => "terminal",
            AttemptOutcome::TransportException(_) => "transport_error",
        }
    }
}

/// True when a 400 body parses as JSON and mentions the model, "not found"
/// or "support" anywhere in its structure (case-insensitive).
///
/// Unparseable bodies never match.
pub fn is_model_rejection(body: &[u8]) -> bool {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => {
            let text = value.to_string().to_lowercase();
            MODEL_REJECTION_PATTERNS.iter().any(|p| text.contains(p))
        }
        Err(_) => false,
    }
}

/// Classify an HTTP response from one provider.
///
/// `body` is only consulted for 400 (model rejection) and for 429 without a
/// usable `Retry-After` header (free-text wait hint).
pub fn classify_response(
    policy: &FailoverPolicy,
    status: u16,
    headers: &HeaderMap,
    body: &Bytes,
) -> AttemptOutcome {
    if status == 200 {
        return AttemptOutcome::Success;
    }

    if status == 400 && is_model_rejection(body) {
        let reason: String = String::from_utf8_lossy(body).chars().take(100).collect();
        return AttemptOutcome::SoftFailContinue { reason };
    }

    if policy.is_retriable(status) {
        let retry_after = parse_retry_after(headers)
            .filter(|&s| s > 0)
            .or_else(|| {
                if status == 429 {
                    extract_wait_seconds(&String::from_utf8_lossy(body))
                } else {
                    None
                }
            });
        return AttemptOutcome::RetriableFailContinue {
            status,
            retry_after,
        };
    }

    AttemptOutcome::TerminalFail {
        status,
        body: body.clone(),
    }
}
