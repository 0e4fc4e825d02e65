pub mod credentials;

use crate::cli::AuthLoginArgs;
use crate::config::Config;
use credentials::CredentialStore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("credential storage error: {0}")]
    Storage(String),
    #[error("no token provided")]
    EmptyToken,
    #[error("token prompt failed: {0}")]
    Prompt(String),
}

pub fn login(config: &Config, args: AuthLoginArgs) -> Result<(), AuthError> {
    let token = match args.token {
        Some(token) => token,
        None => rpassword::prompt_password("🔑 Atoll API token: ")
            .map_err(|err| AuthError::Prompt(err.to_string()))?,
    };
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::EmptyToken);
    }

    let store = CredentialStore::default();
    store.store(token)?;
    println!("Logged in to {}.", config.resolve_api_base(None));
    Ok(())
}

pub fn logout() -> Result<(), AuthError> {
    let store = CredentialStore::default();
    if store.clear()? {
        println!("Logged out.");
    } else {
        println!("No credentials were stored.");
    }
    Ok(())
}

pub fn status(config: &Config, api_base: &str) -> Result<(), AuthError> {
    let store = CredentialStore::default();
    println!("API base : {api_base}");
    match (&config.default_app, &config.default_env) {
        (Some(app), Some(env)) => println!("Target   : {app}/{env}"),
        _ => println!("Target   : none selected (run 'atoll app use')"),
    }
    if store.load()?.is_some() {
        println!("Token    : stored");
    } else {
        println!("Token    : missing (run 'atoll auth login')");
    }
    Ok(())
}
