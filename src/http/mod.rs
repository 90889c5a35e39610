//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, graceful shutdown)
//!     → middleware/ (request id, trace context, metrics, access log)
//!     → services (role handlers)
//!     → client.rs (outbound hops with traceparent injected)
//!     → response.rs (error bodies with stable codes)
//! ```

pub mod client;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use client::DownstreamClient;
pub use request::{X_REQUEST_ID, X_TRACE_ID};
pub use response::ApiError;
pub use server::MeshServer;
