use std::path::PathBuf;

use clap::Parser;

/// Chat-driven desktop automation agent.
#[derive(Debug, Parser)]
#[command(name = "deskpilot", version, about)]
struct Cli {
    /// Path to config.toml (default: next to the executable, the working
    /// directory, then the user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Maximum reasoning steps per command
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    step_limit: Option<u32>,
}

fn main() {
    let cli = Cli::parse();
    let options = deskpilot_lib::HostOptions {
        config_path: cli.config,
        step_limit: cli.step_limit,
    };
    if let Err(e) = deskpilot_lib::run(options) {
        eprintln!("deskpilot: {e}");
        std::process::exit(1);
    }
}
