//! Call chain orchestration.
//!
//! # Responsibilities
//! - Sequence one inbound request's downstream hops in a declared order
//! - Open a child span per hop and hand its context to the outbound call
//! - Decide the overall outcome from required and optional hop results
//!
//! # State Machine
//! ```text
//! Received → ContextBound → Hop(1) → … → Hop(N) → Responded
//!                              │
//!                              └─ required hop fails → Aborted
//! ```
//!
//! # Design Decisions
//! - The plan is declared up front; hops must be run in that order with the
//!   declared requirement, so a handler cannot silently skip or reorder one
//! - Required failures return a terminal error with no partial result;
//!   optional failures return `None` and mark the chain degraded
//! - Timeouts are classified like transport errors for this decision but
//!   keep their own outcome for metrics and status mapping

pub mod hop;
pub mod orchestrator;

pub use hop::{Hop, HopContext, HopFailure, HopOutcome, HopSpec, Requirement};
pub use orchestrator::{
    CallChain, ChainBinding, ChainError, ChainOutcome, ChainReport, ChainState,
};
