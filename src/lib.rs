//! Distributed-tracing service mesh library.
//!
//! One binary plays any of four roles (gateway, user, order, notification).
//! Every request is correlated across services by a W3C `traceparent`
//! header; spans, JSON logs and Prometheus metrics all carry the same
//! trace id.

pub mod chain;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod services;

pub use config::schema::MeshConfig;
pub use http::MeshServer;
pub use lifecycle::Shutdown;
pub use observability::Telemetry;
