//! Viewtrace CLI - Main Entry Point

use clap::{Parser, Subcommand};

use viewtrace_cli::client::ApiClient;
use viewtrace_cli::commands::{account, compare, diff, observation};
use viewtrace_cli::output::{self, print_error};

/// Viewtrace CLI - regional page-render observations
#[derive(Parser)]
#[command(name = "viewtrace")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Server address
    #[arg(long, env = "VIEWTRACE_SERVER", default_value = "http://127.0.0.1:8080", global = true)]
    server: String,

    /// API token
    #[arg(long, env = "VIEWTRACE_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and print its API token
    Signup(account::SignupArgs),

    /// Show the current account and remaining quota
    Whoami,

    /// Request observations of a URL in one or more regions
    Observe(observation::ObserveArgs),

    /// List recent observations
    List,

    /// Show an observation with its other regions and history
    Show {
        /// Observation ID
        id: String,
    },

    /// Cancel a pending or running observation
    Cancel {
        /// Observation ID
        id: String,
    },

    /// Retry a failed or cancelled observation
    Retry {
        /// Observation ID
        id: String,
    },

    /// Compare two observations on the server
    Compare(compare::CompareArgs),

    /// Compare local files without a server
    #[command(subcommand)]
    Diff(diff::DiffCommands),

    /// Check server status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let client = ApiClient::new(&cli.server, cli.token.clone())?;
    let format = cli.format;

    match cli.command {
        Commands::Signup(args) => account::signup(args, &client, format).await?,
        Commands::Whoami => account::whoami(&client, format).await?,
        Commands::Observe(args) => observation::observe(args, &client, format).await?,
        Commands::List => observation::list(&client, format).await?,
        Commands::Show { id } => observation::show(&id, &client, format).await?,
        Commands::Cancel { id } => observation::cancel(&id, &client, format).await?,
        Commands::Retry { id } => observation::retry(&id, &client, format).await?,
        Commands::Compare(args) => compare::execute(args, &client, format).await?,
        Commands::Diff(cmd) => diff::execute(cmd, format).await?,
        Commands::Status => match client.health().await {
            Ok(health) => {
                println!(
                    "✅ Viewtrace {} is running at {}",
                    health.version,
                    client.base_url()
                );
            }
            Err(e) => {
                print_error(&format!("Cannot reach server at {}: {}", client.base_url(), e));
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
