use clap::{Parser, Subcommand};
use clio::Input;

#[derive(Debug, Parser)]
#[command(name = "interview-server", about = "Interview accounts service")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the service
    Serve {
        /// Config file path
        #[arg(short, long, value_parser, default_value = "config.toml")]
        config: Input,
    },
    /// Prints a freshly generated identity signing key
    Keygen,
    /// Invalidates all the sessions of the user
    RevokeSessions {
        /// Config file path
        #[arg(short, long, value_parser, default_value = "config.toml")]
        config: Input,
        /// Email of the user
        email: String,
    },
}
