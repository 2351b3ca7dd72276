use std::path::PathBuf;

use clap::{Parser, Subcommand};

use scalerd::daemon::{self, RunOptions};

#[derive(Parser)]
#[command(name = "scalerd", about = "Metric-driven autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scalers defined in a configuration file.
    Run {
        /// Path to scalerd.toml.
        #[arg(long, default_value = "/etc/scaler/scalerd.toml")]
        config: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/scaler")]
        data_dir: PathBuf,

        /// Status API listen address (overrides `http.listen`).
        #[arg(long)]
        listen: Option<String>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Validate a configuration file and exit.
    Check {
        /// Path to scalerd.toml.
        #[arg(long, default_value = "/etc/scaler/scalerd.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            listen,
            log_json,
        } => {
            daemon::init_tracing(log_json);
            daemon::run(RunOptions {
                config,
                data_dir,
                listen,
            })
            .await
        }
        Command::Check { config } => daemon::check(&config),
    }
}
