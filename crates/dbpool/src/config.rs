//! Pool and backend configuration.

use std::fmt;
use std::time::Duration;

use crate::error::PoolError;

/// Default backend port.
pub const DEFAULT_PORT: u16 = 3306;

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
///
/// The configuration is consumed once at construction and never changes
/// for the lifetime of the pool.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Number of connections opened at startup; the reaper never shrinks
    /// the pool below this floor.
    pub min_connections: u32,

    /// Maximum number of connections allowed.
    pub max_connections: u32,

    /// Time to wait for a connection before timing out.
    pub connection_timeout: Duration,

    /// Time a connection can be idle before it becomes eligible for reaping.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection, if any.
    pub max_lifetime: Option<Duration>,

    /// Whether to test connections on checkout.
    pub test_on_checkout: bool,

    /// Whether to test connections on checkin.
    pub test_on_checkin: bool,

    /// How often the reaper wakes. Defaults to `idle_timeout`.
    pub reap_interval: Option<Duration>,

    /// How long the producer backs off after a failed connect.
    pub retry_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: None,
            test_on_checkout: true,
            test_on_checkin: true,
            reap_interval: None,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of connections opened at startup.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Enable or disable testing connections on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Enable or disable testing connections on checkin.
    #[must_use]
    pub fn test_on_checkin(mut self, enabled: bool) -> Self {
        self.test_on_checkin = enabled;
        self
    }

    /// Set the reaper wake-up interval.
    #[must_use]
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = Some(interval);
        self
    }

    /// Set the producer back-off after a failed connect.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Interval the reaper actually sleeps between sweeps.
    #[must_use]
    pub fn effective_reap_interval(&self) -> Duration {
        self.reap_interval.unwrap_or(self.idle_timeout)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections == 0 {
            return Err(PoolError::Configuration(
                "min_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(
                "min_connections cannot be greater than max_connections".into(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "idle_timeout must be greater than 0".into(),
            ));
        }
        if self.effective_reap_interval().is_zero() {
            return Err(PoolError::Configuration(
                "reap_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Connection parameters handed to the connection manager for every new
/// connection.
#[derive(Clone)]
#[non_exhaustive]
pub struct BackendConfig {
    /// Backend host name or address.
    pub host: String,
    /// Backend port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Default database.
    pub database: String,
    /// Timeout for establishing a single connection.
    pub connect_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl BackendConfig {
    /// Create backend parameters for the given host.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Set the port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set user and password.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the default database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the per-connection connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `host:port` pair.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse backend parameters from a `key=value;key=value` string.
    ///
    /// Keys are case-insensitive. Unknown keys are logged and ignored.
    /// The result is validated before it is returned.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, PoolError> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Configuration(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "host" | "server" | "ip" | "data source" => {
                    if let Some((host, port)) = value.split_once(':') {
                        config.host = host.to_string();
                        config.port = parse_port(port)?;
                    } else {
                        config.host = value.to_string();
                    }
                }
                "port" => config.port = parse_port(value)?,
                "user" | "username" | "user id" | "uid" => config.user = value.to_string(),
                "password" | "pwd" => config.password = value.to_string(),
                "database" | "dbname" | "initial catalog" => config.database = value.to_string(),
                "connect timeout" | "connect_timeout" | "connection timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        PoolError::Configuration(format!("invalid timeout: {value}"))
                    })?;
                    config.connect_timeout = Duration::from_secs(secs);
                }
                _ => {
                    tracing::warn!(key = %key, "ignoring unknown connection string key");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate that every required field is present.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.host.is_empty() {
            return Err(PoolError::Configuration("missing required field: host".into()));
        }
        if self.user.is_empty() {
            return Err(PoolError::Configuration("missing required field: user".into()));
        }
        if self.database.is_empty() {
            return Err(PoolError::Configuration(
                "missing required field: database".into(),
            ));
        }
        Ok(())
    }
}

fn parse_port(value: &str) -> Result<u16, PoolError> {
    value
        .trim()
        .parse()
        .map_err(|_| PoolError::Configuration(format!("invalid port: {value}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.max_connections, 10);
        assert!(config.test_on_checkout);
        assert!(config.test_on_checkin);
        assert!(config.max_lifetime.is_none());
        assert_eq!(config.effective_reap_interval(), config.idle_timeout);
    }

    #[test]
    fn test_config_builder_methods() {
        let config = PoolConfig::new()
            .min_connections(5)
            .max_connections(50)
            .connection_timeout(Duration::from_secs(60))
            .idle_timeout(Duration::from_secs(120))
            .max_lifetime(Duration::from_secs(3600))
            .test_on_checkout(false)
            .test_on_checkin(false)
            .reap_interval(Duration::from_secs(10))
            .retry_delay(Duration::from_millis(50));

        assert_eq!(config.min_connections, 5);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.connection_timeout, Duration::from_secs(60));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.max_lifetime, Some(Duration::from_secs(3600)));
        assert!(!config.test_on_checkout);
        assert!(!config.test_on_checkin);
        assert_eq!(config.effective_reap_interval(), Duration::from_secs(10));
        assert_eq!(config.retry_delay, Duration::from_millis(50));
    }

    #[test]
    fn test_config_validation_success() {
        let config = PoolConfig::new().min_connections(1).max_connections(10);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_min_greater_than_max() {
        let config = PoolConfig::new().min_connections(20).max_connections(10);

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("min_connections cannot be greater than max_connections")
        );
    }

    #[test]
    fn test_config_validation_zero_sizes() {
        let err = PoolConfig::new().max_connections(0).validate().unwrap_err();
        assert!(err.to_string().contains("max_connections must be greater than 0"));

        let err = PoolConfig::new().min_connections(0).validate().unwrap_err();
        assert!(err.to_string().contains("min_connections must be greater than 0"));
    }

    #[test]
    fn test_config_validation_zero_idle_timeout() {
        let err = PoolConfig::new()
            .idle_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("idle_timeout"));
    }

    #[test]
    fn test_config_equal_min_max() {
        let config = PoolConfig::new().min_connections(5).max_connections(5);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_from_connection_string() {
        let backend = BackendConfig::from_connection_string(
            "Host=db.internal;Port=3307;User=app;Password=s3cret;Database=orders;Connect Timeout=5",
        )
        .unwrap();

        assert_eq!(backend.host, "db.internal");
        assert_eq!(backend.port, 3307);
        assert_eq!(backend.user, "app");
        assert_eq!(backend.password, "s3cret");
        assert_eq!(backend.database, "orders");
        assert_eq!(backend.connect_timeout, Duration::from_secs(5));
        assert_eq!(backend.address(), "db.internal:3307");
    }

    #[test]
    fn test_backend_aliases_and_host_port() {
        let backend =
            BackendConfig::from_connection_string("ip=127.0.0.1:3310; uid=root; dbname=test;")
                .unwrap();

        assert_eq!(backend.host, "127.0.0.1");
        assert_eq!(backend.port, 3310);
        assert_eq!(backend.user, "root");
        assert_eq!(backend.database, "test");
        assert!(backend.password.is_empty());
    }

    #[test]
    fn test_backend_unknown_keys_ignored() {
        let backend = BackendConfig::from_connection_string(
            "host=localhost;user=root;database=test;validation_query=SELECT 1",
        )
        .unwrap();
        assert_eq!(backend.port, DEFAULT_PORT);
    }

    #[test]
    fn test_backend_missing_required_field() {
        let err = BackendConfig::from_connection_string("host=localhost;user=root").unwrap_err();
        assert!(err.to_string().contains("database"));

        let err = BackendConfig::from_connection_string("user=root;database=test").unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[test]
    fn test_backend_malformed_values() {
        assert!(BackendConfig::from_connection_string("host=localhost;bogus").is_err());
        assert!(
            BackendConfig::from_connection_string("host=h;port=abc;user=u;database=d").is_err()
        );
        assert!(
            BackendConfig::from_connection_string("host=h;user=u;database=d;connect timeout=x")
                .is_err()
        );
    }

    #[test]
    fn test_backend_debug_redacts_password() {
        let backend = BackendConfig::new("localhost")
            .credentials("root", "hunter2")
            .database("test");
        let debug = format!("{backend:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
