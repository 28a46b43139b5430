use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use gator::commands::Command;
use gator::context::AppContext;
use gator::storage::DatabaseError;

#[derive(Parser, Debug)]
#[command(name = "gator", version, about = "Command-line RSS aggregator")]
struct Args {
    /// Config file (default: $GATOR_CONFIG or ~/.config/gator/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gator=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut ctx = match AppContext::init(args.config).await {
        Ok(ctx) => ctx,
        Err(e) if matches!(
            e.downcast_ref::<DatabaseError>(),
            Some(DatabaseError::InstanceLocked)
        ) => {
            eprintln!("Error: the gator database is locked by another process. Try again shortly.");
            std::process::exit(1);
        }
        Err(e) => return Err(e),
    };

    let result = args.command.run(&mut ctx).await;
    ctx.close().await;
    result
}
