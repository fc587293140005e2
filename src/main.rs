use std::sync::Arc;
use std::time::Duration;

use clyp::chat::{ChatController, SyncService};
use clyp::cli::Command;
use clyp::config::{Configuration, init_logger, verbose};
use clyp::driver::Driver;
use clyp::generator::new_generator;
use clyp::models::{ArcEventTx, Event};
use clyp::store::new_store;
use clyp::youtube::{MetadataClient, TranscriptClient};
use eyre::{Context, Result};
use tokio::{sync::mpsc, task};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Command::new();
    if cmd.version() {
        cmd.print_version();
        return Ok(());
    }

    let config = cmd.get_config()?;
    Configuration::init(config.clone())?;

    init_logger(&config.log)?;
    verbose!("[+] Logger initialized");

    verbose!("[+] Initializing store...");
    let store = new_store(&config.store)
        .await
        .wrap_err("initializing store")?;

    let generator = new_generator(&config.generator).wrap_err("initializing generator")?;
    verbose!("[+] Generator initialized: {}", generator.name());

    let transcripts = Arc::new(TranscriptClient::from_config(&config.transcript));
    let metadata = Arc::new(MetadataClient::from_config(&config.metadata));

    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    let sender: ArcEventTx = Arc::new(event_tx);

    let token = CancellationToken::new();
    let controller = Arc::new(ChatController::new(
        &config.general.user,
        store.clone(),
        generator,
        Arc::clone(&sender),
        token.clone(),
    ));

    verbose!("[+] Fetching conversations...");
    controller
        .bootstrap()
        .await
        .wrap_err("loading conversations")?;

    let mut task_set = task::JoinSet::new();
    if config.sync.enabled {
        let sync = SyncService::new(
            &config.general.user,
            store.clone(),
            Arc::clone(&controller),
            Arc::clone(&sender),
            token.clone(),
            Duration::from_secs(config.sync.poll_interval_secs),
        );
        task_set.spawn(sync.run());
    }

    let driver = Driver::new(
        &config.general.user,
        Arc::clone(&controller),
        transcripts,
        metadata,
        event_rx,
        token.clone(),
    );

    if let Err(err) = driver.run().await {
        eprintln!("Error: {}", err);
    }

    token.cancel();
    while let Some(res) = task_set.join_next().await {
        match res {
            Ok(_) => {}
            Err(err) => log::error!("Task error: {}", err),
        }
    }

    Ok(())
}
