//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment overrides: JAEGER_ENDPOINT, *_SERVICE_URL, LOG_*)
//!     → validation.rs (semantic checks)
//!     → MeshConfig (validated, immutable)
//!     → shared by value with every subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    DownstreamConfig, ExporterConfig, ListenerConfig, LogFormat, MeshConfig, NotificationConfig,
    ObservabilityConfig, ServiceConfig, ServiceRole, TimeoutConfig,
};
