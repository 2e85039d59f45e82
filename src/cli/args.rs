use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "voxkeep")]
#[command(about = "Per-speaker voice recordings: retention and conversion tools", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use this config file instead of the default location
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// List retained session directories
    Sessions(SessionsCliArgs),
    /// Delete the oldest session directories beyond the retention limit
    Prune(PruneCliArgs),
    /// Convert finished WAV recordings with FFmpeg
    Convert(ConvertCliArgs),
    /// Show the header of a WAV recording
    Inspect(InspectCliArgs),
    /// Print the effective configuration
    Config(ConfigCliArgs),
    /// Show the consent allow-list and check participants against it
    Consent(ConsentCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct SessionsCliArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct PruneCliArgs {
    /// Number of session directories to keep (default: recorder.keep_last_sessions)
    #[arg(short, long)]
    pub keep: Option<usize>,
    /// Only list what would be deleted
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ConvertCliArgs {
    /// WAV files to convert
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Output container (default: converter.format)
    #[arg(short, long)]
    pub format: Option<String>,
    /// Keep the source WAV after a successful conversion
    #[arg(long)]
    pub keep_source: bool,
    /// Maximum concurrent FFmpeg processes (default: converter.concurrent_limit)
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,
    /// Disable the progress spinner
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(ClapArgs, Debug)]
pub struct InspectCliArgs {
    /// WAV file to inspect
    pub file: PathBuf,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ConfigCliArgs {
    /// Only print the config file location
    #[arg(long)]
    pub path: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ConsentCliArgs {
    /// Participant ids to check
    pub participants: Vec<String>,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
