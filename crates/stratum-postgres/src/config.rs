//! PostgreSQL connection configuration.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Connection parameters for a PostgreSQL server.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Hostname or IP address.
    pub host: String,
    /// Port number (default: 5432).
    pub port: u16,
    /// Role to authenticate as.
    pub user: String,
    /// Password, when the server requires one.
    pub password: Option<String>,
    /// Database name.
    pub database: String,
    /// Reported application name.
    pub application_name: Option<String>,
    /// Pool capacity used by executors built from this config.
    pub pool_size: usize,
    /// Connect timeout.
    pub connect_timeout: Duration,
}

impl PgConfig {
    /// Config for `host`/`user`/`database` with defaults for the rest.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: 5432,
            user: user.into(),
            password: None,
            database: database.into(),
            application_name: None,
            pool_size: 8,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the reported application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Set the pool capacity.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Resolve the configured endpoint to a socket address.
    pub fn socket_addr(&self) -> std::io::Result<SocketAddr> {
        if let Ok(addr) = format!("{}:{}", self.host, self.port).parse() {
            return Ok(addr);
        }
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address for {}:{}", self.host, self.port),
                )
            })
    }

    /// Key/value pairs for the startup packet.
    pub fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("user".to_string(), self.user.clone()),
            ("database".to_string(), self.database.clone()),
            ("client_encoding".to_string(), "UTF8".to_string()),
        ];
        if let Some(name) = &self.application_name {
            params.push(("application_name".to_string(), name.clone()));
        }
        params
    }
}
