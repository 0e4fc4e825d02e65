use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "atoll",
    about = "🪸  Run wp-cli commands and manage SQL imports on Atoll-hosted WordPress sites",
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("BUILD_TIMESTAMP"))
)]
pub struct Cli {
    #[arg(
        long = "api-base",
        global = true,
        env = "ATOLL_API_BASE",
        value_name = "URL",
        help = "Base URL for the Atoll platform API"
    )]
    pub api_base: Option<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "ATOLL_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "ATOLL_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a wp-cli command on a remote environment (no arguments opens a subshell)
    Wp(WpArgs),
    /// Upload a SQL dump and import it into an environment
    ImportSql(ImportSqlArgs),
    /// Rewrite occurrences of a string in a SQL dump before import
    SearchReplace(SearchReplaceArgs),
    /// Manage stored Atoll API credentials
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Inspect or change the default application/environment
    #[command(subcommand)]
    App(AppCommand),
}

#[derive(Args, Debug, Default)]
pub struct WpArgs {
    #[arg(
        long,
        env = "ATOLL_APP",
        value_name = "APP",
        help = "Application slug (defaults to the stored selection)"
    )]
    pub app: Option<String>,

    #[arg(
        long,
        env = "ATOLL_ENV",
        value_name = "ENV",
        help = "Environment name (defaults to the stored selection)"
    )]
    pub env: Option<String>,

    #[arg(
        long = "log",
        value_name = "COMMAND_ID",
        num_args = 0..=1,
        default_missing_value = "true",
        help = "Attach to a completed command's output, or list recent commands when no id is given"
    )]
    pub log: Option<String>,

    #[arg(
        long = "yes",
        short = 'y',
        action = clap::ArgAction::SetTrue,
        help = "Skip the confirmation prompt on production environments"
    )]
    pub yes: bool,

    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "ARGS",
        help = "wp-cli arguments to run once (omit to open an interactive subshell)"
    )]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ImportSqlArgs {
    #[arg(value_name = "FILE", help = "Path to the SQL dump to import")]
    pub file: PathBuf,

    #[arg(
        long,
        env = "ATOLL_APP",
        value_name = "APP",
        help = "Application slug (defaults to the stored selection)"
    )]
    pub app: Option<String>,

    #[arg(
        long,
        env = "ATOLL_ENV",
        value_name = "ENV",
        help = "Environment name (defaults to the stored selection)"
    )]
    pub env: Option<String>,

    #[arg(
        long = "yes",
        short = 'y',
        action = clap::ArgAction::SetTrue,
        help = "Skip the confirmation prompt on production environments"
    )]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct SearchReplaceArgs {
    #[arg(value_name = "FILE", help = "Path to the SQL dump to rewrite")]
    pub file: PathBuf,

    #[arg(value_name = "FROM", help = "String to search for")]
    pub from: String,

    #[arg(value_name = "TO", help = "Replacement string")]
    pub to: String,

    #[arg(
        long,
        short = 'o',
        value_name = "PATH",
        help = "Write the rewritten dump here instead of '<FILE>.out'"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Store an API token for the configured platform
    Login(AuthLoginArgs),
    /// Remove the stored API token
    Logout,
    /// Show the active API base and whether a token is stored
    Status,
}

#[derive(Args, Debug, Default)]
pub struct AuthLoginArgs {
    #[arg(
        long = "token",
        value_name = "TOKEN",
        hide_env_values = true,
        env = "ATOLL_API_TOKEN",
        help = "API token (prompted interactively if omitted)"
    )]
    pub token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum AppCommand {
    /// Persist a default application/environment selection
    Use(AppUseArgs),
    /// Print the current default selection
    Show,
}

#[derive(Args, Debug)]
pub struct AppUseArgs {
    #[arg(value_name = "APP", help = "Application slug")]
    pub app: String,

    #[arg(value_name = "ENV", help = "Environment name")]
    pub env: String,
}

pub fn parse() -> Cli {
    Cli::parse()
}
