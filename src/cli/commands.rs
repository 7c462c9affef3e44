use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::app::{AppContext, FlowError, Result};
use crate::domain::{AccountId, Source};
use crate::hub::{DistributionHub, HubHandle};
use crate::ingest::{IngestionScheduler, Notifier, NullNotifier, RetentionSweeper};
use crate::server::{self, HeaderAuthenticator, ServerState};
use crate::store::{ContentStore, SourceStore, SqliteStore};

/// Runs until SIGINT/SIGTERM, then stops the background workers and the hub.
pub async fn serve(ctx: &AppContext) -> Result<()> {
    let config = &ctx.config;

    let (hub, hub_task) =
        DistributionHub::spawn(config.hub.queue_capacity, config.hub.mailbox_capacity);
    let notifier: Arc<dyn Notifier + Send + Sync> = Arc::new(hub.clone());

    let mut scheduler = ctx.scheduler(notifier);
    let mut sweeper = ctx.sweeper();
    scheduler.start();
    sweeper.start();

    let auth = HeaderAuthenticator::new(&config.server.account_header)?;
    let app = server::router(ServerState::new(hub.clone(), Arc::new(auth)));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "Listening");

    let closing = hub.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            server::shutdown_signal().await;
            tracing::info!("Shutting down");
            // Closing every mailbox ends the open websockets.
            if let Err(e) = closing.shutdown().await {
                tracing::warn!(error = %e, "Hub already stopped");
            }
        })
        .await;

    wind_down(hub, hub_task, &mut scheduler, &mut sweeper).await;

    served?;
    Ok(())
}

/// Stops the background workers, then the hub. The hub is told to shut down
/// even when the server exited without a signal, since the scheduler's
/// notifier keeps it alive otherwise.
async fn wind_down(
    hub: HubHandle,
    hub_task: JoinHandle<()>,
    scheduler: &mut IngestionScheduler<SqliteStore>,
    sweeper: &mut RetentionSweeper<SqliteStore>,
) {
    scheduler.stop().await;
    sweeper.stop().await;
    if hub.shutdown().await.is_err() {
        tracing::debug!("Hub already stopped");
    }
    drop(hub);
    if let Err(e) = hub_task.await {
        tracing::error!(error = %e, "Hub task panicked");
    }
}

pub async fn add_source(ctx: &AppContext, account: AccountId, url: &str) -> Result<()> {
    url::Url::parse(url)?;

    if ctx.store.get_source_by_url(account, url)?.is_some() {
        println!("Source already exists: {}", url);
        return Ok(());
    }

    let source_id = ctx.store.add_source(&Source::new(account, url.to_string()))?;
    println!("Added source: {}", url);

    match ctx.worker(Arc::new(NullNotifier)).run(source_id).await {
        Ok(outcome) => {
            if let Some(source) = ctx.store.get_source(source_id)? {
                println!("Source title: {}", source.title);
            }
            println!("Fetched {} items", outcome.new_items);
        }
        Err(e) => {
            eprintln!("Fetch failed: {} (will retry on the next cycle)", e);
        }
    }

    Ok(())
}

pub fn remove_source(ctx: &AppContext, account: AccountId, url: &str) -> Result<()> {
    let source = ctx
        .store
        .get_source_by_url(account, url)?
        .ok_or_else(|| FlowError::SourceUrlNotFound(url.to_string()))?;

    ctx.store.delete_source(source.id)?;
    println!("Removed source: {}", url);
    Ok(())
}

pub async fn refresh_source(ctx: &AppContext, source_id: i64) -> Result<()> {
    let outcome = ctx.worker(Arc::new(NullNotifier)).run(source_id).await?;
    println!(
        "Refreshed source {}: {} items, {} new",
        source_id, outcome.fetched, outcome.new_items
    );
    Ok(())
}

pub async fn update_sources(ctx: &AppContext) -> Result<()> {
    let scheduler = ctx.scheduler(Arc::new(NullNotifier));
    let report = scheduler.run_once().await?;

    if report.due == 0 {
        println!("No sources due");
        return Ok(());
    }

    println!(
        "Update complete: {} sources, {} new items, {} errors",
        report.due, report.new_items, report.failed
    );
    if !report.completed {
        eprintln!("Cycle deadline reached before every source finished");
    }
    Ok(())
}

pub fn prune(ctx: &AppContext) -> Result<()> {
    let deleted = ctx.sweeper().run_once()?;
    println!("Deleted {} old items", deleted);
    Ok(())
}

pub fn list_sources(ctx: &AppContext) -> Result<()> {
    let sources = ctx.store.list_sources()?;

    if sources.is_empty() {
        println!("No sources");
        return Ok(());
    }

    for source in sources {
        let unread = ctx.store.count_unread(source.id)?;
        println!(
            "[{}] {} ({} unread)\n  {}",
            source.id, source.title, unread, source.url
        );
        if let Some(error) = &source.fetch_error {
            println!("  last error: {}", error);
        }
    }

    Ok(())
}

pub fn list_items(ctx: &AppContext) -> Result<()> {
    let sources = ctx.store.list_sources()?;
    let mut printed = 0;

    for source in sources {
        for item in ctx.store.list_by_source(source.id, 50, 0)? {
            let read_marker = if item.is_read { " " } else { "●" };
            let date = item
                .published_at
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "          ".to_string());

            println!("{} {} {}", read_marker, date, item.display_title());
            printed += 1;
        }
    }

    if printed == 0 {
        println!("No items");
    }

    Ok(())
}
