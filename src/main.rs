use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use voxkeep::cli::{
    handle_config_command, handle_consent_command, handle_convert_command, handle_inspect_command,
    handle_prune_command, handle_sessions_command, load_config, Cli, CliCommand,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if matches!(cli.command, CliCommand::Version) {
        println!("voxkeep {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        CliCommand::Sessions(args) => handle_sessions_command(args, &config),
        CliCommand::Prune(args) => handle_prune_command(args, &config),
        CliCommand::Convert(args) => handle_convert_command(args, &config).await,
        CliCommand::Inspect(args) => handle_inspect_command(args),
        CliCommand::Config(args) => handle_config_command(args, &config),
        CliCommand::Consent(args) => handle_consent_command(args, &config).await,
        CliCommand::Version => Ok(()),
    }
}
