//! Trace context propagation across service boundaries.
//!
//! # Responsibilities
//! - Extract trace context from incoming requests
//! - Inject trace context into outbound requests
//!
//! # Wire Format
//! A single `traceparent` header (W3C Trace Context, version `00`):
//! ```text
//! 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01
//! ^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ ^^^^^^^^^^^^^^^^ ^^
//! version        trace id (32 hex)      span id (16)  flags (bit 0 = sampled)
//! ```
//!
//! # Design Decisions
//! - A missing or malformed header is an error for the caller to recover from
//!   (by starting a new root), never a reason to reject the request
//! - Only the sampled bit of the flags byte is interpreted

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use thiserror::Error;

use crate::observability::context::{SpanId, TraceContext, TraceId};

/// Carrier field name.
pub const TRACEPARENT: &str = "traceparent";

const VERSION: &str = "00";
const SEPARATOR: char = '-';
const FLAG_SAMPLED: u8 = 0x01;

/// Inbound trace context was absent or unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropagationError {
    #[error("missing trace context: {0}")]
    MissingContext(&'static str),
}

/// Something a trace context can be written to and read from.
pub trait Carrier {
    fn get(&self, key: &str) -> Option<&str>;
    fn set(&mut self, key: &str, value: String);
}

impl Carrier for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|v| v.to_str().ok())
    }

    fn set(&mut self, key: &str, value: String) {
        // The encoded context is plain ASCII, so both conversions hold.
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.insert(name, value);
        }
    }
}

impl Carrier for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).map(String::as_str)
    }

    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), value);
    }
}

/// Encode a context in the `traceparent` format.
pub fn encode(ctx: &TraceContext) -> String {
    let flags = if ctx.is_sampled() { FLAG_SAMPLED } else { 0 };
    format!(
        "{VERSION}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{:02x}",
        ctx.trace_id(),
        ctx.span_id(),
        flags
    )
}

/// Decode a `traceparent` value.
///
/// The returned context describes the *remote* span: its span id is the
/// caller's span, and it has no parent of its own.
pub fn decode(value: &str) -> Result<TraceContext, PropagationError> {
    let value = value.trim();
    let mut parts = value.split(SEPARATOR);
    let (Some(version), Some(trace), Some(span), Some(flags), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(PropagationError::MissingContext("expected four fields"));
    };

    let version = hex_byte(version).ok_or(PropagationError::MissingContext("unsupported version"))?;
    if version == 0xff {
        return Err(PropagationError::MissingContext("unsupported version"));
    }
    let trace_id: TraceId = trace
        .parse()
        .map_err(|_| PropagationError::MissingContext("invalid trace id"))?;
    let span_id: SpanId = span
        .parse()
        .map_err(|_| PropagationError::MissingContext("invalid span id"))?;
    let flags = hex_byte(flags).ok_or(PropagationError::MissingContext("invalid flags"))?;

    Ok(TraceContext::new(
        trace_id,
        span_id,
        None,
        flags & FLAG_SAMPLED != 0,
    ))
}

/// Two lowercase hex digits as one byte.
fn hex_byte(field: &str) -> Option<u8> {
    if field.len() != 2 || !field.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    u8::from_str_radix(field, 16).ok()
}

/// Read the inbound trace context from a carrier.
pub fn extract<C: Carrier + ?Sized>(carrier: &C) -> Result<TraceContext, PropagationError> {
    let value = carrier
        .get(TRACEPARENT)
        .ok_or(PropagationError::MissingContext("no traceparent header"))?;
    decode(value)
}

/// Write `ctx` onto an outbound carrier.
pub fn inject<C: Carrier + ?Sized>(ctx: &TraceContext, carrier: &mut C) {
    carrier.set(TRACEPARENT, encode(ctx));
}
