use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flowcast::app::AppContext;
use flowcast::cli::{commands, Cli, Commands};
use flowcast::config::Config;
use flowcast::domain::AccountId;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.scheduler.concurrency = workers.max(1);
    }

    let ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Serve => {
            commands::serve(&ctx).await?;
        }
        Commands::Add { url, account } => {
            commands::add_source(&ctx, AccountId(account), &url).await?;
        }
        Commands::Remove { url, account } => {
            commands::remove_source(&ctx, AccountId(account), &url)?;
        }
        Commands::List { items } => {
            if items {
                commands::list_items(&ctx)?;
            } else {
                commands::list_sources(&ctx)?;
            }
        }
        Commands::Refresh { source_id } => {
            commands::refresh_source(&ctx, source_id).await?;
        }
        Commands::Update => {
            commands::update_sources(&ctx).await?;
        }
        Commands::Prune => {
            commands::prune(&ctx)?;
        }
    }

    Ok(())
}
