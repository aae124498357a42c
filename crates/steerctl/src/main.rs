//! steerctl — operator CLI for steer.
//!
//! Every command opens the embedded coordination store named by the
//! config file (`--config`, defaults otherwise) and runs one operation
//! against it.
//!
//! ```text
//! steerctl register notify 10.0.0.1:80 --group east --read-weight 3
//! steerctl register notify 10.0.0.3:80 --hold
//! steerctl pick notify --count 100 --group east
//! steerctl failover notify 10.0.0.1:80 --group east
//! steerctl takeover notify 10.0.0.1:80 10.0.0.2:80 --group east
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::{InstanceArgs, RegisterArgs};

#[derive(Parser)]
#[command(
    name = "steerctl",
    about = "steer — client-side traffic steering",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to steer.toml. Built-in defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish an instance in the registry
    Register(RegisterArgs),
    /// Remove an instance from the registry
    Unregister {
        service: String,
        address: String,
    },
    /// List the registered instances of a service
    List {
        service: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Mark an instance as failed
    Failover(InstanceArgs),
    /// Clear an instance's failover marker
    Recover(InstanceArgs),
    /// Claim a failed instance on behalf of a candidate
    Takeover {
        #[command(flatten)]
        failed: InstanceArgs,
        /// Address of the candidate taking over (same service and group)
        candidate: String,
    },
    /// Show who has taken over a failed instance
    Claimant(InstanceArgs),
    /// Print takeover claims as they happen, until Ctrl-C
    WatchFailover,
    /// Resolve a service and print the picker's selection distribution
    Pick {
        service: String,
        /// Number of picks to run
        #[arg(short = 'n', long, default_value = "100")]
        count: usize,
        /// Use write weights instead of read weights
        #[arg(long)]
        write: bool,
        /// Group affinity of the simulated calls
        #[arg(long)]
        group: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,steer=debug"))?;
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Register(args) => commands::registry::register(&config, args).await,
        Commands::Unregister { service, address } => {
            commands::registry::unregister(&config, &service, &address).await
        }
        Commands::List { service, format } => {
            commands::registry::list(&config, &service, &format).await
        }
        Commands::Failover(instance) => commands::failover::failover(&config, instance).await,
        Commands::Recover(instance) => commands::failover::recover(&config, instance).await,
        Commands::Takeover { failed, candidate } => {
            commands::failover::takeover(&config, failed, &candidate).await
        }
        Commands::Claimant(instance) => commands::failover::claimant(&config, instance).await,
        Commands::WatchFailover => commands::failover::watch(&config).await,
        Commands::Pick {
            service,
            count,
            write,
            group,
        } => commands::pick::pick(&config, &service, count, write, group).await,
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
