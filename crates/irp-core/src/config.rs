//! Environment-driven configuration.
//!
//! | Variable | Default | Used by |
//! |----------|---------|---------|
//! | `RISK_MODELER_BASE_URL` | `https://api-euw1.rms-ppe.com` | [`ClientConfig`] |
//! | `RISK_MODELER_API_KEY` | `your_api_key` | [`ClientConfig`] |
//! | `RISK_MODELER_RESOURCE_GROUP_ID` | `your_resource_id` | [`ClientConfig`] |
//! | `DATABRIDGE_GROUP_ID` | none | RDM group access |
//! | `MSSQL_{NAME}_SERVER` | required | [`DataBridgeConfig`] |
//! | `MSSQL_{NAME}_USER` | required | [`DataBridgeConfig`] |
//! | `MSSQL_{NAME}_PASSWORD` | required | [`DataBridgeConfig`] |
//! | `MSSQL_{NAME}_PORT` | `1433` | [`DataBridgeConfig`] |
//! | `MSSQL_TRUST_CERT` | `yes` | [`DataBridgeConfig`] |
//! | `MSSQL_TIMEOUT` | `30` (seconds) | [`DataBridgeConfig`] |

use std::time::Duration;

use crate::error::{DataBridgeError, Result};
use crate::retry::RetryConfig;

pub const DEFAULT_BASE_URL: &str = "https://api-euw1.rms-ppe.com";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(200);
pub const DEFAULT_DATABRIDGE_CONNECTION: &str = "DATABRIDGE";

/// Settings for the platform REST client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub resource_group_id: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
    /// Default group granted access to exported RDMs.
    pub databridge_group_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            base_url: non_empty("RISK_MODELER_BASE_URL")
                .unwrap_or_else(|| String::from(DEFAULT_BASE_URL)),
            api_key: non_empty("RISK_MODELER_API_KEY")
                .unwrap_or_else(|| String::from("your_api_key")),
            resource_group_id: non_empty("RISK_MODELER_RESOURCE_GROUP_ID")
                .unwrap_or_else(|| String::from("your_resource_id")),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryConfig::default(),
            databridge_group_id: non_empty("DATABRIDGE_GROUP_ID"),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_databridge_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.databridge_group_id = Some(group_id.into());
        self
    }
}

/// Settings for one named SQL Server connection.
#[derive(Clone, PartialEq, Eq)]
pub struct DataBridgeConfig {
    pub connection_name: String,
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub trust_cert: bool,
    pub timeout: Duration,
}

impl std::fmt::Debug for DataBridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBridgeConfig")
            .field("connection_name", &self.connection_name)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("trust_cert", &self.trust_cert)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DataBridgeConfig {
    pub fn from_env(connection_name: Option<&str>) -> Result<Self> {
        Self::from_lookup(connection_name, |name| std::env::var(name).ok())
    }

    pub fn from_lookup(
        connection_name: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let name = connection_name
            .unwrap_or(DEFAULT_DATABRIDGE_CONNECTION)
            .to_ascii_uppercase();
        let prefix = format!("MSSQL_{name}_");
        let get = |suffix: &str| lookup(&format!("{prefix}{suffix}")).filter(|v| !v.is_empty());

        let server = get("SERVER");
        let user = get("USER");
        let password = get("PASSWORD");

        let missing: Vec<String> = [("SERVER", &server), ("USER", &user), ("PASSWORD", &password)]
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(suffix, _)| format!("{prefix}{suffix}"))
            .collect();
        let (Some(server), Some(user), Some(password)) = (server, user, password) else {
            return Err(DataBridgeError::Config(format!(
                "SQL Server connection '{name}' is not properly configured; missing environment variables: {}",
                missing.join(", ")
            ))
            .into());
        };

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                DataBridgeError::Config(format!("{prefix}PORT must be a port number, got '{raw}'"))
            })?,
            None => 1433,
        };
        let trust_cert = lookup("MSSQL_TRUST_CERT")
            .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "yes" | "true" | "1"))
            .unwrap_or(true);
        let timeout_secs = match lookup("MSSQL_TIMEOUT") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                DataBridgeError::Config(format!("MSSQL_TIMEOUT must be seconds, got '{raw}'"))
            })?,
            None => 30,
        };

        Ok(Self {
            connection_name: name,
            server,
            port,
            user,
            password,
            trust_cert,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn client_config_falls_back_to_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[]));

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.api_key, "your_api_key");
        assert_eq!(config.timeout, Duration::from_secs(200));
        assert!(config.databridge_group_id.is_none());
    }

    #[test]
    fn client_config_reads_environment_values() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("RISK_MODELER_BASE_URL", "https://api.example.test"),
            ("RISK_MODELER_API_KEY", "secret"),
            ("RISK_MODELER_RESOURCE_GROUP_ID", "rg-9"),
            ("DATABRIDGE_GROUP_ID", "grp-1"),
        ]));

        assert_eq!(config.base_url, "https://api.example.test");
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.resource_group_id, "rg-9");
        assert_eq!(config.databridge_group_id.as_deref(), Some("grp-1"));
    }

    #[test]
    fn databridge_config_uses_upper_cased_connection_prefix() {
        let config = DataBridgeConfig::from_lookup(
            Some("analytics"),
            lookup(&[
                ("MSSQL_ANALYTICS_SERVER", "db.example.test"),
                ("MSSQL_ANALYTICS_USER", "svc"),
                ("MSSQL_ANALYTICS_PASSWORD", "pw"),
                ("MSSQL_TRUST_CERT", "no"),
            ]),
        )
        .expect("config resolves");

        assert_eq!(config.connection_name, "ANALYTICS");
        assert_eq!(config.port, 1433);
        assert!(!config.trust_cert);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(!format!("{config:?}").contains("pw"));
    }

    #[test]
    fn databridge_config_lists_every_missing_variable() {
        let error = DataBridgeConfig::from_lookup(
            None,
            lookup(&[("MSSQL_DATABRIDGE_SERVER", "db")]),
        )
        .expect_err("user and password missing");

        let message = error.to_string();
        assert!(message.contains("MSSQL_DATABRIDGE_USER"));
        assert!(message.contains("MSSQL_DATABRIDGE_PASSWORD"));
        assert!(!message.contains("MSSQL_DATABRIDGE_SERVER,"));
    }
}
