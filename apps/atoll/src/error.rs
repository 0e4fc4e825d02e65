use crate::api::ApiError;
use crate::auth::AuthError;
use crate::commands::import::ImportError;
use crate::config::ConfigError;
use crate::wp::transport::TransportError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Import(#[from] ImportError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("no application/environment selected; pass --app/--env or run 'atoll app use'")]
    MissingTarget,
    #[error("not logged in; run 'atoll auth login' first")]
    NotLoggedIn,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Print an API failure the way the rest of the CLI reports errors. A
/// rejected command carries one message per validation failure; each gets
/// its own line.
pub fn report_api_error(err: &ApiError) {
    match err {
        ApiError::Rejected(messages) => {
            for message in messages {
                eprintln!("Error: {message}");
            }
        }
        other => eprintln!("Error: {other}"),
    }
}

pub fn report_cli_error(err: &CliError) {
    match err {
        CliError::Api(api) => report_api_error(api),
        other => eprintln!("Error: {other}"),
    }
}
