//! Distributed tracing support.
//!
//! # Responsibilities
//! - Extract trace context from incoming requests
//! - Propagate trace context to backend requests
//!
//! # Design Decisions
//! - Supports W3C Trace Context (`traceparent`) headers
//! - The gateway acts as one hop: backends receive a fresh child span id
//! - Requests without a context start a new sampled trace at the gateway

use axum::http::HeaderMap;
use rand::Rng;

pub const TRACEPARENT: &str = "traceparent";
pub const X_TRACE_ID: &str = "x-trace-id";
pub const X_SPAN_ID: &str = "x-span-id";

/// A parsed W3C trace context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// 32 lowercase hex characters.
    pub trace_id: String,
    /// 16 lowercase hex characters.
    pub span_id: String,
    pub flags: u8,
}

impl TraceContext {
    /// Parse the `traceparent` header, if present and well formed.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(TRACEPARENT)?.to_str().ok()?;
        Self::parse(value)
    }

    /// Parse a `version-traceid-spanid-flags` string.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        if version.len() != 2 || version == "ff" || !is_hex(version) {
            return None;
        }
        // Version 00 has exactly four fields.
        if version == "00" && parts.next().is_some() {
            return None;
        }
        if trace_id.len() != 32 || !is_hex(trace_id) || trace_id.bytes().all(|b| b == b'0') {
            return None;
        }
        if span_id.len() != 16 || !is_hex(span_id) || span_id.bytes().all(|b| b == b'0') {
            return None;
        }
        if flags.len() != 2 {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            flags,
        })
    }

    /// A new sampled trace for a request that arrived without one.
    pub fn root() -> Self {
        let mut rng = rand::thread_rng();
        let trace: u128 = rng.gen_range(1..=u128::MAX);
        let span: u64 = rng.gen_range(1..=u64::MAX);
        Self {
            trace_id: format!("{trace:032x}"),
            span_id: format!("{span:016x}"),
            flags: 0x01,
        }
    }

    /// The trace to forward for an inbound request: a child of the caller's
    /// context when present, otherwise a new root.
    pub fn for_forwarding(headers: &HeaderMap) -> Self {
        Self::from_headers(headers).map_or_else(Self::root, |ctx| ctx.child())
    }

    /// Same trace, new span id for the outbound hop.
    pub fn child(&self) -> Self {
        let span: u64 = rand::thread_rng().gen_range(1..=u64::MAX);
        Self {
            trace_id: self.trace_id.clone(),
            span_id: format!("{span:016x}"),
            flags: self.flags,
        }
    }

    /// Render as a `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, self.span_id, self.flags)
    }
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}
