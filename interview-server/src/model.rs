//! Service model shared by all the requests

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::Result;

pub mod accounts;
pub mod documents;
pub mod identity;
pub mod interviews;
pub mod session;
pub mod users;

use async_graphql::EmptySubscription;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use thiserror::Error;

use crate::config;
use crate::model::identity::Identity;
use crate::mutation::Mutation;
use crate::query::Query;
use crate::service::Schema;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Invalid SQLite path: {path}")]
    InvalidSQLitePath { path: PathBuf },
}

/// Context for GraphQL schema
#[derive(Clone)]
pub struct Model {
    /// Database access
    db: sqlx::SqlitePool,
    /// Identity service
    identity: Arc<Identity>,
    /// Marks session cookies as `Secure`
    secure_cookies: bool,
}

impl Model {
    /// Context for testing purposes - using the in-memory SQLite database and a generated identity
    /// key
    #[cfg(test)]
    pub async fn test() -> Result<Self> {
        let opts: SqliteConnectOptions = "sqlite::memory:".parse()?;
        let opts = opts.foreign_keys(true);

        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(opts);

        sqlx::migrate!("model/migrations").run(&db).await?;

        let identity = Identity::generate("interviews-test", "service@interviews.test")?;

        Ok(Self {
            db,
            identity: Arc::new(identity),
            secure_cookies: false,
        })
    }

    /// Switches `Secure` session cookies for tests
    #[cfg(test)]
    pub fn with_secure_cookies(self, secure_cookies: bool) -> Self {
        Self {
            secure_cookies,
            ..self
        }
    }

    /// Context from configuration
    ///
    /// If the database is created in-memory, the migrations are being executed automatically. If database is
    /// file based migrations would be executed only if requested by configuration.
    ///
    /// Fails if any of the identity credentials is missing.
    pub async fn with_config(
        db: config::Database,
        identity: config::Identity,
        environment: config::Environment,
    ) -> Result<Self> {
        use config::Database::*;

        let identity = Identity::new(identity.resolve()?)?;

        let db = match db {
            Memory { max_connections } => {
                let opts: SqliteConnectOptions = "sqlite::memory:".parse()?;
                let opts = opts.foreign_keys(true);

                let pool = SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .connect_lazy_with(opts);

                sqlx::migrate!("model/migrations").run(&pool).await?;
                pool
            }

            SqLite {
                path,
                max_connections,
                migrate,
            } => {
                let path = path
                    .as_path()
                    .to_str()
                    .ok_or_else(|| Error::InvalidSQLitePath { path: path.clone() })?;

                let opts = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .foreign_keys(true);

                let pool = SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .connect_lazy_with(opts);

                if migrate {
                    sqlx::migrate!("model/migrations").run(&pool).await?;
                }

                pool
            }
        };

        Ok(Self {
            db,
            identity: Arc::new(identity),
            secure_cookies: environment == config::Environment::Production,
        })
    }

    /// Builds schema with attached model
    pub fn schema(&self) -> Schema {
        Schema::build(Query::new(), Mutation::new(), EmptySubscription)
            .data(self.clone())
            .finish()
    }

    /// Accesses the DB pool
    pub fn db(&self) -> &sqlx::SqlitePool {
        &self.db
    }

    /// Accesses the identity service
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Whether session cookies are restricted to HTTPS
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }
}
