//! One structured record per request cycle.
//!
//! Every cycle ends in exactly one call here, which writes the log event
//! and the request metrics together so the two never disagree.

use crate::http::context::{Outcome, ProxyRequestContext};
use crate::observability::metrics;

/// Log that a request was routed to a backend.
pub fn request_routed(ctx: &ProxyRequestContext) {
    tracing::debug!(
        request_id = %ctx.id,
        client = %ctx.client_addr,
        method = %ctx.method,
        target = %ctx.target,
        backend = %ctx.backend_name(),
        "Proxying request"
    );
}

/// Emit the completion record for a request cycle.
pub fn request_finished(ctx: &ProxyRequestContext) {
    let elapsed = ctx.elapsed();
    let latency_ms = elapsed.as_millis() as u64;
    let status = ctx.status.unwrap_or(0);

    match ctx.outcome {
        Outcome::Success => tracing::info!(
            request_id = %ctx.id,
            client = %ctx.client_addr,
            method = %ctx.method,
            target = %ctx.target,
            backend = %ctx.backend_name(),
            status,
            latency_ms,
            request_bytes = ctx.request_bytes,
            response_bytes = ctx.response_bytes,
            "Request completed"
        ),
        Outcome::NoBackend => tracing::warn!(
            request_id = %ctx.id,
            client = %ctx.client_addr,
            method = %ctx.method,
            target = %ctx.target,
            "No backend available"
        ),
        Outcome::Rejected => tracing::debug!(
            request_id = %ctx.id,
            client = %ctx.client_addr,
            method = %ctx.method,
            target = %ctx.target,
            backend = %ctx.backend_name(),
            status,
            "Request rejected"
        ),
        outcome => tracing::warn!(
            request_id = %ctx.id,
            client = %ctx.client_addr,
            method = %ctx.method,
            target = %ctx.target,
            backend = %ctx.backend_name(),
            outcome = outcome.as_str(),
            status,
            latency_ms,
            response_started = ctx.response_started,
            "Request failed"
        ),
    }

    if ctx.outcome == Outcome::NoBackend {
        metrics::record_no_backend();
    }
    metrics::record_request(ctx.backend_name(), ctx.outcome.as_str(), ctx.status, elapsed);
    if ctx.backend.is_some() {
        metrics::record_bytes(ctx.backend_name(), ctx.request_bytes, ctx.response_bytes);
    }
}
