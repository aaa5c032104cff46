//! Failover engine for upstream completion providers
//!
//! Owns every decision the gateway makes about where a request goes:
//!
//! 1. `Registry` holds the enabled provider records loaded at startup
//! 2. `CooldownTracker` records which providers failed recently and until when
//! 3. `select_candidates` orders the eligible providers for one request
//! 4. `resolve_model` / `build_outbound_headers` translate the request
//! 5. `Orchestrator::forward` tries candidates in order through a `Transport`,
//!    classifies each outcome, updates cooldowns and decides when to stop
//!
//! The HTTP client lives behind the `Transport` trait so the engine can be
//! driven by an in-memory transport in tests.

pub mod classify;
pub mod cooldown;
pub mod error;
pub mod headers;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod retry_signal;
pub mod selector;
pub mod transport;

pub use classify::{AttemptOutcome, is_model_rejection};
pub use cooldown::{CooldownSnapshot, CooldownTracker, FailoverPolicy};
pub use error::{FailoverError, Result};
pub use headers::{build_outbound_headers, sanitize_response_headers};
pub use model::resolve_model;
pub use orchestrator::{ForwardRequest, Orchestrator, resolve_target_url};
pub use registry::{Protocol, ProviderRecord, Registry};
pub use retry_signal::{extract_wait_seconds, parse_retry_after};
pub use selector::select_candidates;
pub use transport::{
    BodyStream, ResponseBody, Transport, TransportError, TransportRequest, UpstreamResponse,
};
