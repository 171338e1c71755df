use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use sfd_client::{request_password_grant, PasswordGrant};
use sfd_daemon::{build_scheduler, DaemonConfig, DEFAULT_FORUM_URL};

#[derive(Debug, Parser)]
#[command(name = "sfd")]
#[command(about = "Post-sale feedback daemon for marketplace sellers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the daemon loop (default).
    Run,
    /// Run a single seeding pass over the recency window and exit.
    Backfill,
    /// Run a single incremental poll and exit.
    Check,
    /// Obtain an API token via the OAuth password grant.
    Token(TokenArgs),
}

#[derive(Debug, Args)]
struct TokenArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    client_id: String,
    #[arg(long)]
    client_secret: String,
    #[arg(long, default_value = "basic read post conversate")]
    scope: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = DaemonConfig::from_env()?;
            let mut scheduler = build_scheduler(config).await?;
            scheduler.run().await;
            Ok(())
        }
        Commands::Backfill => {
            let config = DaemonConfig::from_env()?;
            let mut scheduler = build_scheduler(config).await?;
            let summary = scheduler.run_backfill().await;
            println!(
                "backfill complete: run_id={} items={} seeded={} known={} lookup_failures={}",
                summary.run_id,
                summary.items_seen,
                summary.buyers_seeded,
                summary.known_buyers,
                summary.lookup_failures
            );
            Ok(())
        }
        Commands::Check => {
            let config = DaemonConfig::from_env()?;
            let mut scheduler = build_scheduler(config).await?;
            let summary = scheduler.run_poll().await;
            println!(
                "poll complete: run_id={} sales={} sent={} known={} send_failures={} lookup_failures={}",
                summary.run_id,
                summary.sales_seen,
                summary.sent,
                summary.skipped_known,
                summary.send_failures,
                summary.lookup_failures
            );
            Ok(())
        }
        Commands::Token(args) => {
            let forum_url =
                std::env::var("SFD_FORUM_URL").unwrap_or_else(|_| DEFAULT_FORUM_URL.to_string());
            let grant = PasswordGrant {
                username: args.username,
                password: args.password,
                client_id: args.client_id,
                client_secret: args.client_secret,
                scope: args.scope,
            };
            let (status, body) =
                request_password_grant(&forum_url, Duration::from_secs(30), &grant).await?;
            println!("{status}");
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
    }
}
