use crate::api::{ApiClient, SessionDirectory};
use crate::config::ClientConfig;
use crate::terminal::attach;
use crate::terminal::cli::{Cli, Command, ConfigCommand, ConfigKey, CreateArgs};
use crate::terminal::error::CliError;
use rc_proto::{CreateSessionRequest, SessionInfo};
use tracing::info;

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let command = match cli.command {
        Command::Config(command) => return run_config(command),
        other => other,
    };

    let config = ClientConfig::load()?.with_overrides(cli.base_url, cli.token);
    let api = ApiClient::from_config(&config)?;
    info!(target: "rc::config", base_url = %api.endpoint().base_url(), "using endpoint");

    match command {
        Command::Health => {
            if api.healthz().await? {
                println!("ok");
                Ok(())
            } else {
                Err(CliError::Unhealthy)
            }
        }
        Command::Engines => {
            for engine in api.list_engines().await? {
                println!("{engine}");
            }
            Ok(())
        }
        Command::Sessions => {
            let sessions = api.list_sessions().await?;
            if sessions.is_empty() {
                println!("no sessions");
            }
            for session in &sessions {
                println!("{}", session_row(session));
            }
            Ok(())
        }
        Command::Create(args) => {
            let session = api.create_session(&create_request(args)).await?;
            println!("{}", session_row(&session));
            Ok(())
        }
        Command::Terminate(args) => {
            api.terminate_session(&args.session_id).await?;
            println!("terminated {}", args.session_id);
            Ok(())
        }
        Command::Attach(args) => attach::run(api, args).await,
        Command::Config(_) => Ok(()),
    }
}

fn run_config(command: ConfigCommand) -> Result<(), CliError> {
    let path = ClientConfig::path()?;
    let mut config = ClientConfig::load_from(&path)?;
    match command {
        ConfigCommand::Show => {
            println!("config: {}", path.display());
            println!("base_url: {}", config.base_url().unwrap_or("(not set)"));
            println!(
                "token: {}",
                config.token().map(mask_token).unwrap_or_else(|| "(not set)".into())
            );
            return Ok(());
        }
        ConfigCommand::Set(args) => match args.key {
            ConfigKey::BaseUrl => {
                // validate before persisting
                crate::config::Endpoint::new(&args.value, None)?;
                config.set_base_url(Some(args.value));
            }
            ConfigKey::Token => config.set_token(Some(args.value)),
        },
        ConfigCommand::Clear => config.clear(),
    }
    config.save_to(&path)?;
    info!(target: "rc::config", path = %path.display(), "config saved");
    println!("saved {}", path.display());
    Ok(())
}

fn create_request(args: CreateArgs) -> CreateSessionRequest {
    CreateSessionRequest {
        engine: args.engine,
        name: args.name,
        workspace_path: args.workspace,
        prompt: args.prompt,
        mode: args.mode,
        args: Default::default(),
    }
}

fn session_row(session: &SessionInfo) -> String {
    let state = match session.exit_code {
        Some(code) => format!("{} ({code})", session.state),
        None => session.state.clone(),
    };
    let last_seq = session
        .last_seq
        .map(|seq| seq.to_string())
        .unwrap_or_else(|| "-".into());
    format!(
        "{:<36}  {:<10}  {:<12}  {:>8}  {}",
        session.id, session.engine, state, last_seq, session.name
    )
}

fn mask_token(token: &str) -> String {
    let count = token.chars().count();
    if count <= 4 {
        return "****".into();
    }
    let tail: String = token.chars().skip(count - 4).collect();
    format!("****{tail}")
}
