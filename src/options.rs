//! Broker connection options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::broker::ConnectSettings;
use crate::error::{Result, TransportError};

/// Hook applied to the native connection settings before the first connect.
pub type ConnectSettingsHook = Arc<dyn Fn(&mut ConnectSettings) + Send + Sync>;

/// Options for reaching the broker.
///
/// All fields have defaults, so partial JSON documents deserialize:
///
/// ```
/// use sourced_broker::BrokerOptions;
///
/// let json = r#"{"host_name": "mq.internal", "use_ssl": true}"#;
/// let options = BrokerOptions::from_json(json).unwrap();
/// assert_eq!(options.port, 61616);
/// assert_eq!(options.broker_uri(), "activemq:ssl://mq.internal:61616");
/// ```
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BrokerOptions {
    /// The host to connect to.
    pub host_name: String,
    /// The port to connect on. Default to 61616.
    pub port: u16,
    /// Whether to use TLS. Default to false.
    pub use_ssl: bool,
    pub user_name: Option<String>,
    pub password: Option<String>,
    /// Lifetime of published messages in milliseconds. Default 864000000 ms (10 days).
    pub message_expiry_ms: u64,
    /// Soft capacity of the publisher session pool.
    pub pool_size: usize,
    #[serde(skip)]
    pub connection_factory_options: Option<ConnectSettingsHook>,
}

impl BrokerOptions {
    pub const DEFAULT_PORT: u16 = 61616;
    pub const DEFAULT_MESSAGE_EXPIRY_MS: u64 = 864_000_000;
    pub const DEFAULT_POOL_SIZE: usize = 15;

    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            ..Self::default()
        }
    }

    /// Parse options from a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TransportError::invalid_argument(format!("broker options: {}", e)))
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    pub fn with_credentials(
        mut self,
        user_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user_name = Some(user_name.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_message_expiry(mut self, expiry: Duration) -> Self {
        self.message_expiry_ms = u64::try_from(expiry.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Customize the native connection settings before connecting.
    pub fn with_connection_factory_options<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ConnectSettings) + Send + Sync + 'static,
    {
        self.connection_factory_options = Some(Arc::new(hook));
        self
    }

    pub fn broker_uri(&self) -> String {
        let protocol = if self.use_ssl { "ssl" } else { "tcp" };
        format!("activemq:{}://{}:{}", protocol, self.host_name, self.port)
    }

    pub fn message_expiry(&self) -> Duration {
        Duration::from_millis(self.message_expiry_ms)
    }

    /// Build the settings handed to the connector, with the customization hook applied.
    pub fn connect_settings(&self) -> ConnectSettings {
        let mut settings = ConnectSettings {
            uri: self.broker_uri(),
            user_name: self.user_name.clone(),
            password: self.password.clone(),
            ..ConnectSettings::default()
        };
        if let Some(hook) = &self.connection_factory_options {
            hook(&mut settings);
        }
        settings
    }
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            port: Self::DEFAULT_PORT,
            use_ssl: false,
            user_name: None,
            password: None,
            message_expiry_ms: Self::DEFAULT_MESSAGE_EXPIRY_MS,
            pool_size: Self::DEFAULT_POOL_SIZE,
            connection_factory_options: None,
        }
    }
}

impl fmt::Debug for BrokerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerOptions")
            .field("host_name", &self.host_name)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("user_name", &self.user_name)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("message_expiry_ms", &self.message_expiry_ms)
            .field("pool_size", &self.pool_size)
            .field(
                "connection_factory_options",
                &self.connection_factory_options.is_some(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = BrokerOptions::default();
        assert_eq!(options.host_name, "localhost");
        assert_eq!(options.port, 61616);
        assert!(!options.use_ssl);
        assert_eq!(options.message_expiry(), Duration::from_millis(864_000_000));
        assert_eq!(options.pool_size, 15);
        assert_eq!(options.broker_uri(), "activemq:tcp://localhost:61616");
    }

    #[test]
    fn from_partial_json() {
        let options =
            BrokerOptions::from_json(r#"{"host_name":"mq","port":61617,"user_name":"admin"}"#)
                .unwrap();
        assert_eq!(options.broker_uri(), "activemq:tcp://mq:61617");
        assert_eq!(options.user_name.as_deref(), Some("admin"));
        assert_eq!(options.password, None);
    }

    #[test]
    fn invalid_json_is_rejected() {
        let err = BrokerOptions::from_json(r#"{"port":"not a number"}"#).unwrap_err();
        assert!(matches!(err, TransportError::InvalidArgument(_)));
    }

    #[test]
    fn hook_customizes_settings() {
        let options = BrokerOptions::new("mq")
            .with_credentials("user", "secret")
            .with_connection_factory_options(|settings| {
                settings.client_id = Some("relay-1".into());
                settings
                    .properties
                    .insert("transport.useInactivityMonitor".into(), "false".into());
            });

        let settings = options.connect_settings();
        assert_eq!(settings.uri, "activemq:tcp://mq:61616");
        assert_eq!(settings.user_name.as_deref(), Some("user"));
        assert_eq!(settings.client_id.as_deref(), Some("relay-1"));
        assert_eq!(settings.properties.len(), 1);
    }

    #[test]
    fn debug_hides_password() {
        let options = BrokerOptions::new("mq").with_credentials("user", "secret");
        let rendered = format!("{:?}", options);
        assert!(!rendered.contains("secret"));
    }
}
