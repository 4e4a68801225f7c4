//! Service configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing_subscriber::filter::Directive;

/// Environment variable overriding [`Identity::project_id`]
pub const PROJECT_ID_ENV: &str = "IDENTITY_PROJECT_ID";
/// Environment variable overriding [`Identity::client_email`]
pub const CLIENT_EMAIL_ENV: &str = "IDENTITY_CLIENT_EMAIL";
/// Environment variable overriding [`Identity::private_key`]
pub const PRIVATE_KEY_ENV: &str = "IDENTITY_PRIVATE_KEY";

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Missing identity service credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),
}

/// Logging output format
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Logging {
    /// Additional filtering directives
    #[serde(default, deserialize_with = "Logging::deserialize_filters")]
    pub filters: Vec<Directive>,

    /// Logging format
    #[serde(default)]
    pub format: LogFormat,
}

impl Logging {
    fn deserialize_filters<'de, D>(deserializer: D) -> Result<Vec<Directive>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let dirs: Vec<String> = Deserialize::deserialize(deserializer)?;
        dirs.into_iter()
            .map(|dir| dir.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Database {
    /// In-memory database, always migrated on startup
    Memory {
        #[serde(default = "Database::default_max_connections")]
        max_connections: u32,
    },
    /// File based SQLite database
    SqLite {
        path: PathBuf,
        #[serde(default = "Database::default_max_connections")]
        max_connections: u32,
        /// Run migrations on startup
        #[serde(default)]
        migrate: bool,
    },
}

impl Database {
    fn default_max_connections() -> u32 {
        1
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::Memory {
            max_connections: Self::default_max_connections(),
        }
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Identity service credentials as present in the config file
///
/// Every value can be overridden from the environment, but all three have to be present after
/// that - see [`Identity::resolve`].
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Identity {
    /// Project the tokens are issued for, used as the token audience
    pub project_id: Option<String>,
    /// Service account identity, used as the token issuer
    pub client_email: Option<String>,
    /// PASERK encoded `k4.secret` key signing all the tokens
    pub private_key: Option<String>,
}

/// Identity credentials with all the values present
#[derive(Debug, Clone)]
pub struct Credentials {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
}

impl Identity {
    /// Applies environment overrides and verifies all credentials are present
    pub fn resolve(self) -> Result<Credentials, Error> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    fn resolve_with(self, env: impl Fn(&str) -> Option<String>) -> Result<Credentials, Error> {
        let value = |name: &str, configured: Option<String>| {
            env(name)
                .or(configured)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let project_id = value(PROJECT_ID_ENV, self.project_id);
        let client_email = value(CLIENT_EMAIL_ENV, self.client_email);
        let private_key = value(PRIVATE_KEY_ENV, self.private_key);

        match (project_id, client_email, private_key) {
            (Some(project_id), Some(client_email), Some(private_key)) => Ok(Credentials {
                project_id,
                client_email,
                private_key,
            }),
            (project_id, client_email, private_key) => {
                let missing = [
                    (PROJECT_ID_ENV, project_id.is_none()),
                    (CLIENT_EMAIL_ENV, client_email.is_none()),
                    (PRIVATE_KEY_ENV, private_key.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, missing)| missing.then_some(name))
                .collect();

                Err(Error::MissingCredentials(missing))
            }
        }
    }
}

/// Top level service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address where to host the service
    #[serde(default = "Config::default_host")]
    pub host: SocketAddr,

    /// Enables GraphiQL endpoint
    #[serde(default)]
    pub graphiql: bool,

    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,

    /// Logging configuration
    #[serde(default)]
    pub logging: Logging,

    /// Database configuration
    #[serde(default)]
    pub db: Database,

    /// Identity service credentials
    #[serde(default)]
    pub identity: Identity,
}

impl Config {
    fn default_host() -> SocketAddr {
        ([127, 0, 0, 1], 3030).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.host, Config::default_host());
        assert!(!config.graphiql);
        assert_eq!(config.environment, Environment::Development);
        assert!(matches!(config.db, Database::Memory { max_connections: 1 }));
        assert!(config.identity.project_id.is_none());
    }

    #[test]
    fn full_config() {
        let config: Config = toml::from_str(
            r#"
            host = "0.0.0.0:8080"
            graphiql = true
            environment = "Production"

            [logging]
            filters = ["sqlx=warn"]
            format = "Pretty"

            [db]
            kind = "SqLite"
            path = "interviews.db"
            max_connections = 4
            migrate = true

            [identity]
            project_id = "interviews"
            client_email = "service@interviews.example"
            private_key = "k4.secret.xxx"
            "#,
        )
        .unwrap();

        assert_eq!(config.host, ([0, 0, 0, 0], 8080).into());
        assert!(config.graphiql);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.logging.filters.len(), 1);
        assert!(matches!(
            config.db,
            Database::SqLite {
                max_connections: 4,
                migrate: true,
                ..
            }
        ));
        assert_eq!(config.identity.project_id.as_deref(), Some("interviews"));
    }

    #[test]
    fn credentials_from_file() {
        let identity = Identity {
            project_id: Some("interviews".into()),
            client_email: Some("service@interviews.example".into()),
            private_key: Some("k4.secret.xxx\n".into()),
        };

        let credentials = identity.resolve_with(|_| None).unwrap();
        assert_eq!(credentials.project_id, "interviews");
        assert_eq!(credentials.private_key, "k4.secret.xxx");
    }

    #[test]
    fn credentials_env_overrides_file() {
        let identity = Identity {
            project_id: Some("from-file".into()),
            client_email: Some("service@interviews.example".into()),
            private_key: Some("k4.secret.xxx".into()),
        };

        let credentials = identity
            .resolve_with(|name| (name == PROJECT_ID_ENV).then(|| "from-env".to_owned()))
            .unwrap();
        assert_eq!(credentials.project_id, "from-env");
    }

    #[test]
    fn missing_credentials_are_listed() {
        let identity = Identity {
            project_id: Some("interviews".into()),
            client_email: Some("   ".into()),
            private_key: None,
        };

        let Err(Error::MissingCredentials(missing)) = identity.resolve_with(|_| None) else {
            panic!("Credentials should be incomplete");
        };
        assert_eq!(missing, [CLIENT_EMAIL_ENV, PRIVATE_KEY_ENV]);
    }
}
