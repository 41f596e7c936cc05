//! Service configuration.
//!
//! Read from an optional TOML file, then overridden by `COURIER__*`
//! environment variables (`COURIER__QUEUE__URL`, `COURIER__HTTP__BIND`, ...).

use config::{Config, Environment, File};
use courier_core::{CarrierPlacement, DEFAULT_QUEUE_NAME};
use courier_mailer::MailerConfig;
use courier_queue::{QueueBackend, QueueConfig};
use courier_trace::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Default file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "courier";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Labels every span.
    pub service_name: String,
    pub http: HttpConfig,
    pub queue: QueueSettings,
    pub mailer: MailerConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            service_name: "courier".to_string(),
            http: HttpConfig::default(),
            queue: QueueSettings::default(),
            mailer: MailerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub backend: QueueBackend,
    /// Broker URL; several may be given comma-separated.
    pub url: String,
    pub name: String,
    pub carrier_placement: CarrierPlacement,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Nats,
            url: "nats://localhost:4222".to_string(),
            name: DEFAULT_QUEUE_NAME.to_string(),
            carrier_placement: CarrierPlacement::Headers,
        }
    }
}

impl QueueSettings {
    pub fn to_queue_config(&self) -> QueueConfig {
        let urls = self
            .url
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();

        QueueConfig {
            backend: self.backend,
            ..QueueConfig::default()
        }
        .with_urls(urls)
        .with_name(self.name.clone())
        .with_placement(self.carrier_placement)
    }
}

impl CourierConfig {
    /// Load from `path`, or from `courier.toml` when present, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Reject settings the services cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::Invalid("service_name must not be empty".into()));
        }
        if self.queue.name.trim().is_empty() {
            return Err(ConfigError::Invalid("queue.name must not be empty".into()));
        }
        if self.queue.backend == QueueBackend::Nats && self.queue.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "queue.url is required for the nats backend".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.telemetry.sample_rate) {
            return Err(ConfigError::Invalid(
                "telemetry.sample_rate must be between 0 and 1".into(),
            ));
        }
        self.bind_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http.bind.parse().map_err(|e| {
            ConfigError::Invalid(format!("http.bind {:?} is not an address: {}", self.http.bind, e))
        })
    }
}

fn environment() -> Environment {
    Environment::with_prefix("COURIER")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_trace::LogFormat;
    use std::io::Write;

    fn no_env() -> Environment {
        environment().source(Some(config::Map::new()))
    }

    fn env_from(vars: &[(&str, &str)]) -> Environment {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = CourierConfig::default();
        assert_eq!(config.service_name, "courier");
        assert_eq!(config.http.bind, "0.0.0.0:3000");
        assert_eq!(config.queue.backend, QueueBackend::Nats);
        assert_eq!(config.queue.url, "nats://localhost:4222");
        assert_eq!(config.queue.name, "email_queue");
        assert_eq!(config.queue.carrier_placement, CarrierPlacement::Headers);
        assert_eq!(config.mailer.simulated_delay_ms, 50);
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
service_name = "courier-staging"

[queue]
backend = "memory"
carrier_placement = "body"

[mailer]
simulated_delay_ms = 5

[telemetry]
log_format = "pretty"
sample_rate = 0.5
"#
        )
        .unwrap();

        let config = CourierConfig::load_with(Some(file.path()), no_env()).unwrap();
        assert_eq!(config.service_name, "courier-staging");
        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.queue.carrier_placement, CarrierPlacement::Body);
        assert_eq!(config.queue.name, "email_queue");
        assert_eq!(config.mailer.simulated_delay_ms, 5);
        assert_eq!(config.telemetry.log_format, LogFormat::Pretty);
        assert_eq!(config.telemetry.sample_rate, 0.5);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let result = CourierConfig::load_with(Some(Path::new("/nonexistent/courier.toml")), no_env());
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let env = env_from(&[
            ("COURIER__QUEUE__URL", "nats://broker:4222"),
            ("COURIER__HTTP__BIND", "127.0.0.1:8080"),
        ]);
        let config = CourierConfig::load_with(None, env).unwrap();
        assert_eq!(config.queue.url, "nats://broker:4222");
        assert_eq!(config.http.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CourierConfig::default();
        config.queue.name = " ".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = CourierConfig::default();
        config.http.bind = "localhost".into();
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config.service_name = String::new();
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config.telemetry.sample_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_settings_to_queue_config() {
        let settings = QueueSettings {
            url: "nats://a:4222, nats://b:4222".into(),
            carrier_placement: CarrierPlacement::Body,
            ..QueueSettings::default()
        };
        let config = settings.to_queue_config();
        assert_eq!(config.urls, vec!["nats://a:4222", "nats://b:4222"]);
        assert_eq!(config.name, "email_queue");
        assert_eq!(config.carrier_placement, CarrierPlacement::Body);
        assert_eq!(config.stream_name(), "EMAIL_QUEUE");
    }
}
