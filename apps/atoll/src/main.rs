use std::process;

use atoll_core::error::report_cli_error;
use atoll_core::{app, cli, telemetry};

#[tokio::main]
async fn main() {
    let cli = cli::parse();

    // The guard keeps the file appender flushing until the process exits.
    let _guard = match telemetry::logging::init(&cli.logging.to_config()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: logging initialization failed: {err}");
            process::exit(1);
        }
    };

    match app::run(cli).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            report_cli_error(&err);
            process::exit(1);
        }
    }
}
