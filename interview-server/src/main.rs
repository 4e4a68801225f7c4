//! Interview accounts service

use actix_web::{App, HttpServer};
use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::OptionExt;
use std::io::read_to_string;
use tracing::info;
use tracing_actix_web::TracingLogger;

use crate::config::{Config, LogFormat};
use crate::model::Model;
use crate::model::identity::{Identity, IdentityRecord};
use crate::opt::{Command, Opt};

mod config;
pub mod model;
mod mutation;
mod opt;
mod query;
mod service;

/// Initializes tracing collection
fn setup_tracing(config: config::Logging) -> Result<()> {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let fmt_layer = match config.format {
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let filter_layer = config
        .filters
        .into_iter()
        .fold(filter_layer, |layer, filter| layer.add_directive(filter));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();

    Ok(())
}

/// Reads the configuration and initializes tracing and error reporting
fn load_config(mut config_file: clio::Input) -> Result<Config> {
    let config = read_to_string(&mut config_file)?;
    let config: Config = toml::from_str(&config)?;

    setup_tracing(config.logging.clone())?;
    color_eyre::install()?;

    info!(
        config = ?config_file.path().path(),
        environment = ?config.environment,
        "Tracing initialized"
    );

    Ok(config)
}

/// Runs the HTTP service until it is stopped
async fn serve(config_file: clio::Input) -> Result<()> {
    let config = load_config(config_file)?;

    let graphiql_enabled = config.graphiql;
    let model = Model::with_config(config.db, config.identity, config.environment).await?;
    let service_config = service::configure(graphiql_enabled, model).await?;
    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .configure(service_config.clone())
    })
    .bind(config.host)?
    .run()
    .await?;

    info!("Service stopped, tearing down");
    Ok(())
}

/// Invalidates sessions of the user with the given email
async fn revoke_sessions(config_file: clio::Input, email: &str) -> Result<()> {
    let config = load_config(config_file)?;
    let model = Model::with_config(config.db, config.identity, config.environment).await?;

    let user = IdentityRecord::fetch_by_email(model.db(), email)
        .await?
        .ok_or_eyre("User not found")?;
    IdentityRecord::revoke_sessions(model.db(), user.uid).await?;

    info!(user = %user.uid, "Sessions revoked");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let Opt { command } = Opt::parse();

    match command {
        Command::Serve { config } => serve(config).await,
        Command::RevokeSessions { config, email } => revoke_sessions(config, &email).await,
        Command::Keygen => {
            color_eyre::install()?;
            println!("{}", Identity::generate_key()?);
            Ok(())
        }
    }
}
