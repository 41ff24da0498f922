pub mod server;
pub mod tracing;

use std::env;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use server::{Address, Port, ServerConfig, Version};

/// Configuration error type
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("Address must not be empty")]
    EmptyAddress,

    #[error("Address must not contain a colon")]
    AddressContainsColon,

    #[error("Address must not contain a space")]
    AddressContainsSpace,

    #[error("Address must not contain a path")]
    AddressContainsPath,

    #[error("Port {0} is outside the allowed range [1024, 65534)")]
    PortOutOfRange(u16),

    #[error("Version '{0}' must be of the form major.minor.patch")]
    VersionFormat(String),

    #[error("Version component '{0}' must be an integer")]
    VersionNotInteger(String),

    #[error("Version component '{0}' must not be negative")]
    VersionNegative(String),

    #[error("Unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error("{0}")]
    Validation(ConfigErrors),
}

/// Every violation found while validating a config, reported together so a
/// config broken in several fields surfaces all of them at once.
#[derive(Debug, PartialEq, Eq)]
pub struct ConfigErrors(pub Vec<ConfigError>);

impl ConfigErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, err: &ConfigError) -> bool {
        self.0.contains(err)
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for err in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

impl From<ConfigErrors> for ConfigError {
    fn from(errs: ConfigErrors) -> Self {
        ConfigError::Validation(errs)
    }
}

/// Application environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development, // Local dev or kind cluster
    Staging,     // Pre-production cluster
    Production,  // Full k8s cluster
    Ci,          // Continuous integration runners
}

impl Environment {
    /// Reads `APP_ENV`, defaulting to development when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        env_or_default("APP_ENV", "development").parse()
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
            Environment::Ci => "ci",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            "ci" => Ok(Environment::Ci),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Static name/version pair identifying the running binary.
#[derive(Clone, Copy, Debug)]
pub struct AppInfo {
    pub name: &'static str,
    pub version: &'static str,
}

/// Build an [`AppInfo`] from the calling crate's own Cargo metadata.
#[macro_export]
macro_rules! app_info {
    () => {
        $crate::AppInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    };
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Helper to load and parse environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load and parse environment variable or return error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env().unwrap();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_parses_all_variants() {
        assert_eq!(
            "development".parse::<Environment>().unwrap(),
            Environment::Development
        );
        assert_eq!(
            "staging".parse::<Environment>().unwrap(),
            Environment::Staging
        );
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!("ci".parse::<Environment>().unwrap(), Environment::Ci);
    }

    #[test]
    fn test_environment_parse_case_insensitive() {
        assert_eq!(
            "PRODUCTION".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!(
            "Staging".parse::<Environment>().unwrap(),
            Environment::Staging
        );
    }

    #[test]
    fn test_environment_unknown_is_an_error() {
        let err = "sandbox".parse::<Environment>().unwrap_err();
        assert_eq!(err, ConfigError::UnknownEnvironment("sandbox".to_string()));
    }

    #[test]
    fn test_env_or_default_with_value() {
        temp_env::with_var("TEST_VAR", Some("test_value"), || {
            let result = env_or_default("TEST_VAR", "default");
            assert_eq!(result, "test_value");
        });
    }

    #[test]
    fn test_env_or_default_without_value() {
        temp_env::with_var_unset("MISSING_VAR", || {
            let result = env_or_default("MISSING_VAR", "default_value");
            assert_eq!(result, "default_value");
        });
    }

    #[test]
    fn test_env_required_success() {
        temp_env::with_var("REQUIRED_VAR", Some("required_value"), || {
            let result = env_required("REQUIRED_VAR");
            assert!(result.is_ok());
            assert_eq!(result.unwrap(), "required_value");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("MISSING_REQUIRED", || {
            let result = env_required("MISSING_REQUIRED");
            assert!(result.is_err());
            let err = result.unwrap_err();
            assert!(err.to_string().contains("MISSING_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_config_errors_display_joins_violations() {
        let errs = ConfigErrors(vec![
            ConfigError::EmptyAddress,
            ConfigError::PortOutOfRange(80),
        ]);
        let rendered = errs.to_string();
        assert!(rendered.contains("Address must not be empty"));
        assert!(rendered.contains("; "));
        assert!(rendered.contains("allowed range"));
    }

    #[test]
    fn test_app_info_macro() {
        let info = app_info!();
        assert_eq!(info.name, "core_config");
        assert!(!info.version.is_empty());
    }
}
