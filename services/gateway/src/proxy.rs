//! Inbound request handling
//!
//! Reads the client body, hands it to the failover orchestrator and turns
//! the outcome into an HTTP response. Successful streams are relayed chunk
//! by chunk; upstream error answers that end the loop are relayed verbatim;
//! aggregate failures become a JSON gateway error.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use failover::{ForwardRequest, Orchestrator, Protocol, ResponseBody, UpstreamResponse};
use futures_util::TryStreamExt;
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};

/// Largest accepted client body.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// JSON error response: {"error":{"type":"gateway_error","message":"...","request_id":"req_..."}}
pub fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "gateway_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Client body as a JSON object. Anything else (invalid JSON, arrays,
/// scalars, empty body) is treated as `{}`.
pub fn parse_body(bytes: &[u8]) -> Map<String, Value> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Forward a client request for `protocol` through the failover loop.
#[instrument(skip_all, fields(request_id = %request_id, protocol = %protocol, path = target_path))]
pub async fn forward_request(
    orchestrator: &Orchestrator,
    protocol: Protocol,
    target_path: &'static str,
    route: &'static str,
    request: Request<Body>,
    request_id: String,
) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();

    let body_bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            let response = error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
                &request_id,
            );
            record(route, &response, start);
            return response;
        }
    };

    let forward = ForwardRequest {
        protocol,
        target_path: target_path.to_string(),
        headers: parts.headers,
        body: parse_body(&body_bytes),
    };

    let response = match orchestrator.forward(forward).await {
        Ok(upstream) => {
            info!(status = upstream.status, "relaying upstream response");
            into_response(upstream, &request_id)
        }
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status()).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
            warn!(status = status.as_u16(), error = %e, "request failed on every provider");
            error_response(status, &e.to_string(), &request_id)
        }
    };

    record(route, &response, start);
    response
}

fn record(route: &'static str, response: &Response, start: Instant) {
    crate::metrics::record_request(
        route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
}

/// Build the client response from an upstream answer.
fn into_response(upstream: UpstreamResponse, request_id: &str) -> Response {
    let mut builder = Response::builder().status(upstream.status);
    for (name, value) in &upstream.headers {
        builder = builder.header(name, value);
    }

    let body = match upstream.body {
        ResponseBody::Buffered(bytes) => Body::from(bytes),
        ResponseBody::Streaming(stream) => Body::from_stream(stream.inspect_err(|e| {
            warn!(error = %e, "upstream stream ended with an error");
        })),
    };

    builder.body(body).unwrap_or_else(|e| {
        error!(error = %e, "failed to build response");
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("response build error: {e}"),
            request_id,
        )
    })
}
