use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use maplink_agent::MaplinkError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;
mod context;
mod settings;

use context::AppContext;
use settings::Settings;

#[derive(Parser)]
#[command(name = "maplink", about = "Maplink CLI - Deploy, link and verify the maps assistant")]
#[command(version, propagate_version = true)]
struct Cli {
    /// Env file holding project settings and the integration record
    #[arg(long, global = true, default_value = ".env", env = "MAPLINK_ENV_FILE")]
    env_file: PathBuf,

    /// Settings file (default: ~/.maplink/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package and deploy the agent to Agent Engine
    Deploy {
        /// Delete the deployment again once it is ready
        #[arg(long)]
        delete_after: bool,

        /// Send a sample question once the deployment is ready
        #[arg(long)]
        smoke: bool,
    },

    /// Delete the deployed agent
    Undeploy {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Send one message to the deployed agent
    TestQuery {
        /// Message to send (default: the configured smoke query)
        #[arg(short, long)]
        message: Option<String>,

        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// Register the deployed agent with the chat UI
    Link {
        /// Name shown in the chat UI
        #[arg(long)]
        display_name: Option<String>,

        /// Agent description
        #[arg(long)]
        description: Option<String>,

        /// Description of the agent's tool for the chat UI planner
        #[arg(long)]
        tool_description: Option<String>,

        /// Replace a registration made with different settings
        #[arg(long)]
        overwrite: bool,
    },

    /// Remove the chat-UI registration
    Unlink {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Check the chat-UI registration against the local record
    Verify,

    /// Print the chat-UI address of the agent
    Url,

    /// Show the deployment and link record
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref());
    let default_level = settings
        .as_ref()
        .map(|s| s.log_level.as_str())
        .unwrap_or("warn");
    init_logging(cli.verbose, default_level);

    let result = match settings {
        Ok(settings) => run(cli, settings).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}

fn init_logging(verbose: bool, default_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .finish();
    // Only fails when a subscriber is already installed
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let ctx = AppContext::new(settings, cli.env_file);

    match cli.command {
        Commands::Deploy {
            delete_after,
            smoke,
        } => commands::deploy::run(&ctx, smoke, delete_after).await,
        Commands::Undeploy { force } => commands::undeploy::run(&ctx, force).await,
        Commands::TestQuery { message, no_stream } => {
            commands::query::run(&ctx, message, no_stream).await
        }
        Commands::Link {
            display_name,
            description,
            tool_description,
            overwrite,
        } => {
            let options = commands::link::LinkOptions {
                display_name,
                description,
                tool_description,
                overwrite,
            };
            commands::link::run(&ctx, options).await
        }
        Commands::Unlink { force } => commands::unlink::run(&ctx, force).await,
        Commands::Verify => commands::verify::run(&ctx).await,
        Commands::Url => commands::url::run(&ctx).await,
        Commands::Status => commands::status::run(&ctx).await,
    }
}

/// Print `err` for the operator and pick the exit code for its kind
fn report(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<MaplinkError>() {
        Some(e) => {
            eprintln!("{}[{}]: {}", "error".red().bold(), e.kind(), e);
            eprintln!("{}: {}", "hint".yellow().bold(), e.remediation());
        }
        None => eprintln!("{}: {:#}", "error".red().bold(), err),
    }
    ExitCode::from(exit_status(err))
}

fn exit_status(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<MaplinkError>()
        .map(MaplinkError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "maplink",
            "link",
            "--display-name",
            "Maps Assistant",
            "--env-file",
            "prod.env",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.env_file, PathBuf::from("prod.env"));
        assert!(cli.verbose);
        let Commands::Link { display_name, overwrite, .. } = cli.command else {
            panic!("expected link");
        };
        assert_eq!(display_name.as_deref(), Some("Maps Assistant"));
        assert!(!overwrite);
    }

    #[test]
    fn test_test_query_flags() {
        let cli = Cli::try_parse_from(["maplink", "test-query", "-m", "Coffee nearby", "--no-stream"])
            .unwrap();
        let Commands::TestQuery { message, no_stream } = cli.command else {
            panic!("expected test-query");
        };
        assert_eq!(message.as_deref(), Some("Coffee nearby"));
        assert!(no_stream);
    }

    #[test]
    fn test_taxonomy_errors_map_to_their_exit_code() {
        let err = anyhow::Error::new(MaplinkError::MissingConfig {
            keys: vec!["AGENTSPACE_APP_ID".to_string()],
        });
        assert_eq!(exit_status(&err), 11);
        assert_eq!(exit_status(&err.context("while linking")), 11);
        assert_eq!(exit_status(&anyhow::anyhow!("boom")), 1);
    }
}
