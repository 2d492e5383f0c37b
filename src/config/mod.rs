//! Configuration module
//!
//! Handles loading and saving CurveLink configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::NetworkConfig;
use crate::protocol::{EvaluationRequest, LengthAccounting};
use crate::transport::default_endpoint;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Reasons a request is refused before it is sent
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unknown function '{name}' (known: {known})")]
    UnknownFunction { name: String, known: String },

    #[error("Order {order} exceeds the maximum of {max}")]
    OrderTooLarge { order: u32, max: u32 },

    #[error("Point count {points} exceeds the maximum of {max}")]
    TooManyPoints { points: u32, max: u32 },

    #[error("Domain bound is not a finite number: {0}")]
    NonFiniteDomain(f64),
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Where the server listens
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Framing settings
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Input limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Functions the server knows
    #[serde(default = "default_functions")]
    pub functions: Vec<FunctionEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            endpoint: EndpointConfig::default(),
            protocol: ProtocolConfig::default(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            functions: default_functions(),
        }
    }
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Endpoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Socket path / pipe name override (platform default if not set)
    pub path: Option<String>,
}

/// Protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Whether the length field counts itself ("inclusive") or not ("payload")
    #[serde(default)]
    pub length_accounting: LengthAccounting,
    /// Largest reply accepted, in bytes
    #[serde(default = "default_max_reply_bytes")]
    pub max_reply_bytes: usize,
}

fn default_max_reply_bytes() -> usize {
    256 * 1024 * 1024 // 256 MB
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            length_accounting: LengthAccounting::default(),
            max_reply_bytes: default_max_reply_bytes(),
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Reply timeout in ms
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_reply_timeout() -> u64 {
    30_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            reply_timeout_ms: default_reply_timeout(),
        }
    }
}

/// Input limits applied before a request is sent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest order parameter accepted
    #[serde(default = "default_max_order")]
    pub max_order: u32,
    /// Largest sample count accepted
    #[serde(default = "default_max_points")]
    pub max_points: u32,
}

fn default_max_order() -> u32 {
    10
}

fn default_max_points() -> u32 {
    i32::MAX as u32
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_order: default_max_order(),
            max_points: default_max_points(),
        }
    }
}

/// One entry of the function catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEntry {
    /// Selector sent on the wire
    pub name: String,
    /// Whether the order parameter means anything for this function
    #[serde(default)]
    pub takes_order: bool,
}

impl FunctionEntry {
    pub fn new(name: &str, takes_order: bool) -> Self {
        Self {
            name: name.to_string(),
            takes_order,
        }
    }
}

fn default_functions() -> Vec<FunctionEntry> {
    vec![
        FunctionEntry::new("sin", false),
        FunctionEntry::new("cos", false),
        FunctionEntry::new("bessel", true),
    ]
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("curvelink/config.toml")),
            Some(PathBuf::from("./curvelink.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Endpoint to connect to
    pub fn endpoint(&self) -> String {
        self.endpoint.path.clone().unwrap_or_else(default_endpoint)
    }

    /// Channel settings derived from this configuration
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            connect_timeout_ms: self.timeouts.connect_timeout_ms,
            reply_timeout_ms: self.timeouts.reply_timeout_ms,
            max_reply_bytes: self.protocol.max_reply_bytes,
            accounting: self.protocol.length_accounting,
        }
    }

    /// Look up a function in the catalog
    pub fn function(&self, name: &str) -> Option<&FunctionEntry> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Check a request against the catalog and limits
    pub fn validate(&self, request: &EvaluationRequest) -> Result<(), ValidationError> {
        let entry = self.function(&request.function).ok_or_else(|| ValidationError::UnknownFunction {
            name: request.function.clone(),
            known: self
                .functions
                .iter()
                .map(|f| f.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })?;

        for bound in [request.domain_start, request.domain_end] {
            if !bound.is_finite() {
                return Err(ValidationError::NonFiniteDomain(bound));
            }
        }

        if request.sample_count > self.limits.max_points {
            return Err(ValidationError::TooManyPoints {
                points: request.sample_count,
                max: self.limits.max_points,
            });
        }

        if entry.takes_order && request.order > self.limits.max_order {
            return Err(ValidationError::OrderTooLarge {
                order: request.order,
                max: self.limits.max_order,
            });
        }

        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        endpoint: EndpointConfig {
            path: Some(default_endpoint()),
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.endpoint(), default_endpoint());
        assert_eq!(config.limits.max_order, 10);
        assert_eq!(config.protocol.length_accounting, LengthAccounting::Payload);
        assert!(config.function("bessel").unwrap().takes_order);
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.timeouts.reply_timeout_ms = 1234;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.timeouts.reply_timeout_ms, 1234);
        assert_eq!(loaded.functions, config.functions);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[protocol]\nlength_accounting = \"inclusive\"\n\n[endpoint]\npath = \"/run/calc.sock\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.protocol.length_accounting, LengthAccounting::Inclusive);
        assert_eq!(config.endpoint(), "/run/calc.sock");
        assert_eq!(config.timeouts.connect_timeout_ms, 5000);
        assert_eq!(config.functions.len(), 3);

        let net = config.network_config();
        assert_eq!(net.accounting, LengthAccounting::Inclusive);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(
            parsed.protocol.length_accounting,
            Config::default().protocol.length_accounting
        );
        assert_eq!(parsed.endpoint(), default_endpoint());
    }

    #[test]
    fn test_validate() {
        let config = Config::default();

        assert!(config.validate(&EvaluationRequest::new("sin", 0.0, 6.28, 100)).is_ok());
        assert!(config
            .validate(&EvaluationRequest::new("bessel", 0.0, 20.0, 100).with_order(10))
            .is_ok());
        // Order is ignored for functions that do not take one
        assert!(config
            .validate(&EvaluationRequest::new("sin", 0.0, 1.0, 1).with_order(99))
            .is_ok());

        assert!(matches!(
            config.validate(&EvaluationRequest::new("tan", 0.0, 1.0, 1)),
            Err(ValidationError::UnknownFunction { .. })
        ));
        assert_eq!(
            config.validate(&EvaluationRequest::new("bessel", 0.0, 1.0, 1).with_order(11)),
            Err(ValidationError::OrderTooLarge { order: 11, max: 10 })
        );
        assert!(matches!(
            config.validate(&EvaluationRequest::new("cos", 0.0, f64::INFINITY, 1)),
            Err(ValidationError::NonFiniteDomain(_))
        ));
        assert!(matches!(
            config.validate(&EvaluationRequest::new("cos", 0.0, 1.0, u32::MAX)),
            Err(ValidationError::TooManyPoints { .. })
        ));
    }
}
