//! Trace identity types.
//!
//! `TraceId` (128-bit) and `SpanId` (64-bit) are drawn from the thread-local
//! CSPRNG and are never zero; the all-zero value is reserved as invalid on
//! the wire.

use rand::Rng;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 128-bit trace identifier, rendered as 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    /// Generate a fresh, non-zero trace id.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let id: u128 = rng.gen();
            if id != 0 {
                return Self(id);
            }
        }
    }

    /// Wrap a raw value. Returns `None` for the invalid all-zero id.
    pub fn from_u128(id: u128) -> Option<Self> {
        (id != 0).then_some(Self(id))
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = parse_lower_hex(s, 32)?;
        u128::from_str_radix(raw, 16)
            .ok()
            .and_then(Self::from_u128)
            .ok_or(IdParseError::Zero)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 64-bit span identifier, rendered as 16 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    /// Generate a fresh, non-zero span id.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let id: u64 = rng.gen();
            if id != 0 {
                return Self(id);
            }
        }
    }

    /// Wrap a raw value. Returns `None` for the invalid all-zero id.
    pub fn from_u64(id: u64) -> Option<Self> {
        (id != 0).then_some(Self(id))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = parse_lower_hex(s, 16)?;
        u64::from_str_radix(raw, 16)
            .ok()
            .and_then(Self::from_u64)
            .ok_or(IdParseError::Zero)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Why a hex id was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    #[error("expected {expected} hex digits, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("not lowercase hex")]
    NotHex,
    #[error("all-zero id")]
    Zero,
}

fn parse_lower_hex(s: &str, len: usize) -> Result<&str, IdParseError> {
    if s.len() != len {
        return Err(IdParseError::Length {
            expected: len,
            actual: s.len(),
        });
    }
    if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(IdParseError::NotHex);
    }
    Ok(s)
}

/// Causal identity of one span, as carried across a service boundary.
///
/// Immutable once created: there are no setters, and children are derived
/// through [`TraceContext::child`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    sampled: bool,
}

impl TraceContext {
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        parent_span_id: Option<SpanId>,
        sampled: bool,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id,
            sampled,
        }
    }

    /// A brand-new root: fresh trace id, fresh span id, sampled.
    pub fn new_root() -> Self {
        Self::new(TraceId::generate(), SpanId::generate(), None, true)
    }

    /// Context for a new span whose parent is `self`.
    pub fn child(&self) -> Self {
        Self::new(
            self.trace_id,
            SpanId::generate(),
            Some(self.span_id),
            self.sampled,
        )
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }
}
