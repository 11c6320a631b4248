mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{run::RunArgs, settings::SettingsSubcommand};
use replic_core::settings::DEFAULT_SETTINGS_FILE;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "replic-loader",
    about = "Install pending replication packages: stop services, back up, install, recompile, restart, report",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Encrypted file holding saved arguments
    #[arg(long, global = true, env = "REPLIC_SETTINGS", default_value = DEFAULT_SETTINGS_FILE)]
    settings_file: PathBuf,

    /// Directory for run logs
    #[arg(long, global = true, env = "REPLIC_LOG_DIR", default_value = "log")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or remove saved arguments
    Settings {
        #[command(subcommand)]
        subcommand: SettingsSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Settings { subcommand }) => cmd::settings::run(&cli.settings_file, subcommand),
        None => cmd::run::run(&cli.run, &cli.settings_file, &cli.log_dir),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
