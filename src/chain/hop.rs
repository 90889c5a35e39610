//! Hop declarations and outcomes.

use std::time::Duration;
use thiserror::Error;

use crate::observability::context::TraceContext;
use crate::observability::labels::{CallOutcome, Downstream};

/// Whether a hop's failure aborts the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

/// One declared step of a call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopSpec {
    pub operation: &'static str,
    pub service: Downstream,
    pub requirement: Requirement,
}

impl HopSpec {
    pub const fn required(operation: &'static str, service: Downstream) -> Self {
        Self {
            operation,
            service,
            requirement: Requirement::Required,
        }
    }

    pub const fn optional(operation: &'static str, service: Downstream) -> Self {
        Self {
            operation,
            service,
            requirement: Requirement::Optional,
        }
    }

    pub fn is_required(&self) -> bool {
        self.requirement == Requirement::Required
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HopOutcome {
    #[default]
    Pending,
    Success,
    Failed,
    TimedOut,
}

impl HopOutcome {
    /// Metric label for a finished hop; `None` while pending.
    pub fn call_outcome(&self) -> Option<CallOutcome> {
        match self {
            HopOutcome::Pending => None,
            HopOutcome::Success => Some(CallOutcome::Success),
            HopOutcome::Failed => Some(CallOutcome::Failed),
            HopOutcome::TimedOut => Some(CallOutcome::TimedOut),
        }
    }
}

/// A declared hop and what happened to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub spec: HopSpec,
    pub outcome: HopOutcome,
}

/// Why an outbound hop did not produce a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HopFailure {
    #[error("connection failed: {0}")]
    Transport(String),

    #[error("downstream returned status {0}")]
    Status(u16),

    #[error("invalid downstream response: {0}")]
    Decode(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl HopFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HopFailure::Timeout(_))
    }

    pub fn outcome(&self) -> HopOutcome {
        if self.is_timeout() {
            HopOutcome::TimedOut
        } else {
            HopOutcome::Failed
        }
    }
}

/// What a hop's closure receives: the hop span's identity to inject on the
/// outbound request, plus the inbound request id to forward.
#[derive(Debug, Clone)]
pub struct HopContext {
    pub trace: TraceContext,
    pub request_id: Option<String>,
}
