use crate::{env_or_default, ConfigError, ConfigErrors, Environment, FromEnv};
use std::fmt;

/// Bind address for a listener. Must be a bare host: an IP address or a
/// domain name, with no port, scheme, or path attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.0.is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        if self.0.contains(':') {
            return Err(ConfigError::AddressContainsColon);
        }
        if self.0.contains(' ') {
            return Err(ConfigError::AddressContainsSpace);
        }
        if self.0.contains('/') {
            return Err(ConfigError::AddressContainsPath);
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Layer-4 port. Well-known ports and the upper reserved band are refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Port(u16);

impl Port {
    pub fn new(port: u16) -> Self {
        Self(port)
    }

    pub fn get(&self) -> u16 {
        self.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.0 < 1024 || self.0 >= 65534 {
            return Err(ConfigError::PortOutOfRange(self.0));
        }
        Ok(())
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Software version of the form `major.minor.patch`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Version(String);

impl Version {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let parts: Vec<&str> = self.0.split('.').collect();
        if parts.len() != 3 {
            return Err(ConfigError::VersionFormat(self.0.clone()));
        }
        for part in parts {
            let n: i64 = part
                .parse()
                .map_err(|_| ConfigError::VersionNotInteger(part.to_string()))?;
            if n < 0 {
                return Err(ConfigError::VersionNegative(part.to_string()));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable server configuration, constructed once at process startup.
///
/// Construction validates every field and reports all violations together,
/// so an operator fixing a broken deployment sees the full list instead of
/// one error per restart.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: Address,
    pub port: Port,
    pub env: Environment,
    pub version: Version,
    /// Enables the telemetry layers (metrics, request tracing) on both
    /// server kinds.
    pub telemetry: bool,
}

impl ServerConfig {
    pub fn new(
        addr: impl Into<String>,
        port: u16,
        env: Environment,
        version: impl Into<String>,
    ) -> Result<Self, ConfigErrors> {
        let config = Self {
            addr: Address::new(addr),
            port: Port::new(port),
            env,
            version: Version::new(version),
            telemetry: true,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_telemetry(mut self, enabled: bool) -> Self {
        self.telemetry = enabled;
        self
    }

    /// Checks every field, collecting all violations.
    pub fn validate(&self) -> Result<(), ConfigErrors> {
        let mut errors = Vec::new();
        if let Err(e) = self.addr.validate() {
            errors.push(e);
        }
        if let Err(e) = self.port.validate() {
            errors.push(e);
        }
        if let Err(e) = self.version.validate() {
            errors.push(e);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigErrors(errors))
        }
    }

    /// Get the listen address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

impl FromEnv for ServerConfig {
    /// Reads from environment variables with sensible defaults:
    /// - HOST: defaults to "localhost"
    /// - PORT: defaults to 8080
    /// - APP_ENV: defaults to "development"
    /// - VERSION: defaults to "0.1.0"
    /// - TELEMETRY: defaults to enabled; "false"/"0" disable it
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("HOST", "localhost");
        let port = env_or_default("PORT", "8080")
            .parse()
            .map_err(|e| ConfigError::ParseError {
                key: "PORT".to_string(),
                details: format!("{}", e),
            })?;
        let env = Environment::from_env()?;
        let version = env_or_default("VERSION", "0.1.0");
        let telemetry = {
            let raw = env_or_default("TELEMETRY", "true");
            raw != "false" && raw != "0"
        };

        let config = ServerConfig::new(host, port, env, version)?;
        Ok(config.with_telemetry(telemetry))
    }
}
