use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "rc",
    about = "Follow and drive remote agent sessions over a resumable event stream",
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("BUILD_TIMESTAMP"))
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "RC_BASE_URL",
        value_name = "URL",
        help = "Server base URL; overrides the stored config"
    )]
    pub base_url: Option<String>,

    #[arg(
        long,
        global = true,
        env = "RC_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true,
        help = "Bearer credential; overrides the stored config"
    )]
    pub token: Option<String>,

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
        global = true,
        env = "RC_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "RC_LOG_FILE",
        help = "Append logs to this file instead of stderr"
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
    /// Inspect or change the stored endpoint and credential
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Check the server health endpoint
    Health,
    /// List engines the server can launch
    Engines,
    /// List sessions
    Sessions,
    /// Start a new session
    Create(CreateArgs),
    /// Terminate a session
    Terminate(TerminateArgs),
    /// Stream a session to this terminal and forward input to it
    Attach(AttachArgs),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the stored configuration
    Show,
    /// Store one configuration value
    Set(ConfigSetArgs),
    /// Remove all stored values
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    BaseUrl,
    Token,
}

#[derive(Args, Debug)]
pub struct ConfigSetArgs {
    #[arg(value_enum)]
    pub key: ConfigKey,
    pub value: String,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[arg(long, help = "Engine to run (see `rc engines`)")]
    pub engine: String,
    #[arg(long, default_value = "")]
    pub name: String,
    #[arg(long = "workspace", value_name = "PATH", default_value = "")]
    pub workspace: String,
    #[arg(long, default_value = "")]
    pub prompt: String,
    #[arg(long, default_value = "")]
    pub mode: String,
}

#[derive(Args, Debug)]
pub struct TerminateArgs {
    pub session_id: String,
}

#[derive(Args, Debug, Clone)]
pub struct AttachArgs {
    pub session_id: String,

    #[arg(long, help = "Forward every keystroke as typed; Ctrl-] detaches")]
    pub raw: bool,

    #[arg(long, help = "Ignore the stored cursor and replay the recent tail")]
    pub fresh: bool,

    #[arg(long, help = "Also print thinking and tool activity")]
    pub activity: bool,
}
