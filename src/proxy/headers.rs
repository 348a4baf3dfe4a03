//! Header rewriting for forwarded requests and relayed responses.

use std::net::SocketAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::observability::tracing::{TRACEPARENT, X_SPAN_ID, X_TRACE_ID};
use crate::observability::TraceContext;

pub const X_FORWARDED_BY: &str = "x-forwarded-by";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_GATEWAY_SERVICE: &str = "x-gateway-service";

/// Value of `x-forwarded-by` on every forwarded request.
pub const GATEWAY_NAME: &str = "api-gateway";

/// Connection-scoped headers that must not cross the proxy (RFC 9110 §7.6.1).
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}

/// Rewrite inbound headers for the backend named `service`.
///
/// `Host` is dropped so the client sets it from the backend URI.
pub fn prepare_forward_headers(
    headers: &mut HeaderMap,
    service: &str,
    client_addr: Option<SocketAddr>,
    trace: &TraceContext,
) {
    strip_hop_by_hop(headers);
    headers.remove(header::HOST);

    headers.insert(X_FORWARDED_BY, HeaderValue::from_static(GATEWAY_NAME));
    if let Ok(value) = HeaderValue::from_str(service) {
        headers.insert(X_GATEWAY_SERVICE, value);
    }

    if let Some(addr) = client_addr {
        let ip = addr.ip().to_string();
        let forwarded = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.trim().is_empty() => format!("{existing}, {ip}"),
            _ => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    let pairs = [
        (TRACEPARENT, trace.to_traceparent()),
        (X_TRACE_ID, trace.trace_id.clone()),
        (X_SPAN_ID, trace.span_id.clone()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}
