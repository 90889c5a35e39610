//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a mesh service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Root configuration for one mesh service process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MeshConfig {
    /// Which service this process runs, plus its identity fields.
    pub service: ServiceConfig,

    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Base URLs of the downstream services.
    pub downstream: DownstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,

    /// Trace export settings.
    pub exporter: ExporterConfig,

    /// Notification service behavior.
    pub notification: NotificationConfig,
}

impl MeshConfig {
    /// Address to bind, falling back to the role's conventional port.
    pub fn bind_address(&self) -> String {
        self.listener
            .bind_address
            .clone()
            .unwrap_or_else(|| self.service.role.default_bind_address().to_string())
    }

    /// Path of the durable log file, falling back to `/app/logs/<service>.log`.
    pub fn log_file(&self) -> String {
        self.observability
            .log_file
            .clone()
            .unwrap_or_else(|| format!("/app/logs/{}.log", self.service.name()))
    }
}

/// The four roles of the demonstration mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    #[default]
    Gateway,
    User,
    Order,
    Notification,
}

impl ServiceRole {
    /// Service name used in logs, spans and `/health`.
    pub fn default_name(&self) -> &'static str {
        match self {
            ServiceRole::Gateway => "api-gateway",
            ServiceRole::User => "user-service",
            ServiceRole::Order => "order-service",
            ServiceRole::Notification => "notification-service",
        }
    }

    pub fn default_bind_address(&self) -> &'static str {
        match self {
            ServiceRole::Gateway => "0.0.0.0:8080",
            ServiceRole::User => "0.0.0.0:8081",
            ServiceRole::Order => "0.0.0.0:8082",
            ServiceRole::Notification => "0.0.0.0:8083",
        }
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceRole::Gateway => "gateway",
            ServiceRole::User => "user",
            ServiceRole::Order => "order",
            ServiceRole::Notification => "notification",
        };
        f.write_str(s)
    }
}

impl FromStr for ServiceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gateway" | "api-gateway" => Ok(ServiceRole::Gateway),
            "user" | "user-service" => Ok(ServiceRole::User),
            "order" | "order-service" => Ok(ServiceRole::Order),
            "notification" | "notification-service" => Ok(ServiceRole::Notification),
            other => Err(format!("unknown service role '{}'", other)),
        }
    }
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Role this process plays in the mesh.
    pub role: ServiceRole,

    /// Service name override (defaults to the role's name).
    pub name: Option<String>,

    /// Service version reported in logs and trace resources.
    pub version: String,

    /// Deployment environment reported in trace resources.
    pub environment: String,
}

impl ServiceConfig {
    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.role.default_name().to_string())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            role: ServiceRole::Gateway,
            name: None,
            version: "1.0.0".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080"). Role default when unset.
    pub bind_address: Option<String>,
}

/// Downstream service locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// User service base URL (env `USER_SERVICE_URL`).
    pub user_service_url: String,

    /// Order service base URL (env `ORDER_SERVICE_URL`).
    pub order_service_url: String,

    /// Notification service base URL (env `NOTIFICATION_SERVICE_URL`).
    pub notification_service_url: String,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            user_service_url: "http://localhost:8081".to_string(),
            order_service_url: "http://localhost:8082".to_string(),
            notification_service_url: "http://localhost:8083".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout for outbound hops, in milliseconds.
    pub connect_ms: u64,

    /// Deadline for one outbound hop (request + response body), in milliseconds.
    pub hop_ms: u64,

    /// Whole inbound request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 2_000,
            hop_ms: 10_000,
            request_secs: 30,
        }
    }
}

/// Console output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Minimum log level (trace, debug, info, warn, error). Env `LOG_LEVEL`.
    pub log_level: String,

    /// Console encoding. The file sink is always JSON.
    pub log_format: LogFormat,

    /// Durable log file path. Env `LOG_FILE`.
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            log_file: None,
        }
    }
}

/// Trace export configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Enable span export. Spans are still tracked when disabled.
    pub enabled: bool,

    /// Collector base URL (env `JAEGER_ENDPOINT`); spans go to `<endpoint>/v1/traces`.
    pub endpoint: String,

    /// Capacity of the export queue; overflow drops spans.
    pub queue_capacity: usize,

    /// Flush as soon as this many spans are buffered.
    pub batch_size: usize,

    /// Flush at least this often, in milliseconds.
    pub flush_interval_ms: u64,

    /// Per-attempt request timeout, in milliseconds.
    pub timeout_ms: u64,

    /// Attempts per batch before it is dropped.
    pub max_attempts: u32,

    /// Base delay for exponential backoff between attempts.
    pub base_delay_ms: u64,

    /// Maximum delay between attempts.
    pub max_delay_ms: u64,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://tempo:4318".to_string(),
            queue_capacity: 2048,
            batch_size: 512,
            flush_interval_ms: 5_000,
            timeout_ms: 10_000,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

/// Notification service settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Probability in [0, 1] that a send is reported as failed.
    pub failure_rate: f64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { failure_rate: 0.05 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_defaults() {
        let config = MeshConfig::default();
        assert_eq!(config.service.role, ServiceRole::Gateway);
        assert_eq!(config.service.name(), "api-gateway");
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.log_file(), "/app/logs/api-gateway.log");
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("order".parse::<ServiceRole>().unwrap(), ServiceRole::Order);
        assert_eq!(
            "notification-service".parse::<ServiceRole>().unwrap(),
            ServiceRole::Notification
        );
        assert!("billing".parse::<ServiceRole>().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: MeshConfig = toml::from_str(
            r#"
            [service]
            role = "user"

            [timeouts]
            hop_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.service.role, ServiceRole::User);
        assert_eq!(config.bind_address(), "0.0.0.0:8081");
        assert_eq!(config.timeouts.hop_ms, 250);
        assert_eq!(config.timeouts.request_secs, 30);
        assert_eq!(config.exporter.endpoint, "http://tempo:4318");
    }
}
