//! Resilience primitives shared by outbound calls.
//!
//! # Data Flow
//! ```text
//! Outbound hop:
//!     → timeouts.rs (deadline per hop, expiry classified as timeout)
//!
//! Span export:
//!     → backoff.rs (bounded retries with jittered exponential delay)
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - Hops on the request path are never retried; only the background
//!   exporter retries, and only a bounded number of times

pub mod backoff;
pub mod timeouts;
