use clap::Parser;
use rc_client_core::telemetry::logging;
use rc_client_core::terminal::{app, cli::Cli, error::CliError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match logging::init(&cli.logging.to_config()) {
        Ok(()) => app::run(cli).await,
        Err(err) => Err(CliError::Logging(err.to_string())),
    };
    let code = match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("rc: {err}");
            err.exit_code()
        }
    };
    // the stdin reader thread may still be blocked on a read
    std::process::exit(code);
}
