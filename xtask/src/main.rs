use clap::{Parser, Subcommand};
#[cfg(not(test))]
use xtask::*;

#[derive(Parser)]
#[command(author, version, about = "Development tasks for stockham-cl")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Build,
    Test,
    Clippy,
    Fmt,
    /// Run the size sweep in release mode
    Sweep {
        /// Arguments forwarded to `stockham-sweep`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[cfg(not(test))]
fn main() -> anyhow::Result<()> {
    use anyhow::Context;

    let cli = Cli::parse();
    let cfg = detect_config();

    let status = match cli.command {
        Commands::Build => build_command(&cfg).status(),
        Commands::Test => test_command(&cfg).status(),
        Commands::Clippy => clippy_command().status(),
        Commands::Fmt => fmt_command().status(),
        Commands::Sweep { args } => sweep_command(&cfg, &args).status(),
    }
    .context("failed to spawn cargo")?;

    std::process::exit(status.code().unwrap_or(1));
}
