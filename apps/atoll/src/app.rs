//! Top-level command dispatch: resolve configuration and credentials, then
//! hand off to the subcommand implementations.

use crate::api::{ApiClient, ApiConfig, Environment};
use crate::auth::{self, credentials::CredentialStore};
use crate::cli::{AppCommand, AuthCommand, Cli, Command};
use crate::config::Config;
use crate::error::CliError;
use crate::{commands, wp};

pub async fn run(cli: Cli) -> Result<i32, CliError> {
    let config = Config::load()?;
    let api_base = config.resolve_api_base(cli.api_base.as_deref());

    match cli.command {
        Command::Wp(args) => {
            let api = authenticated_client(&api_base)?;
            let environment =
                resolve_environment(&api, &config, args.app.as_deref(), args.env.as_deref())
                    .await?;
            wp::run(&api, &environment, &args).await
        }
        Command::ImportSql(args) => {
            let api = authenticated_client(&api_base)?;
            let environment =
                resolve_environment(&api, &config, args.app.as_deref(), args.env.as_deref())
                    .await?;
            commands::import::run(&api, &environment, &args).await
        }
        Command::SearchReplace(args) => commands::search_replace::run(&args),
        Command::Auth(AuthCommand::Login(args)) => {
            auth::login(&config, args)?;
            Ok(0)
        }
        Command::Auth(AuthCommand::Logout) => {
            auth::logout()?;
            Ok(0)
        }
        Command::Auth(AuthCommand::Status) => {
            auth::status(&config, &api_base)?;
            Ok(0)
        }
        Command::App(AppCommand::Use(args)) => {
            let mut config = config;
            config.default_app = Some(args.app.clone());
            config.default_env = Some(args.env.clone());
            config.save()?;
            println!("Now targeting {}/{}.", args.app, args.env);
            Ok(0)
        }
        Command::App(AppCommand::Show) => {
            match (&config.default_app, &config.default_env) {
                (Some(app), Some(env)) => println!("{app}/{env}"),
                _ => println!("No default selected. Run 'atoll app use <app> <env>'."),
            }
            Ok(0)
        }
    }
}

fn authenticated_client(api_base: &str) -> Result<ApiClient, CliError> {
    let token = CredentialStore::default().load()?;
    if token.is_none() {
        return Err(CliError::NotLoggedIn);
    }
    let config = ApiConfig::new(api_base)?.with_bearer_token(token);
    Ok(ApiClient::new(config)?)
}

async fn resolve_environment(
    api: &ApiClient,
    config: &Config,
    app_flag: Option<&str>,
    env_flag: Option<&str>,
) -> Result<Environment, CliError> {
    let (app, env) = config
        .resolve_target(app_flag, env_flag)
        .ok_or(CliError::MissingTarget)?;
    Ok(api.lookup_environment(&app, &env).await?)
}
