// erpload/src/restore/mod.rs
pub(crate) mod cleanup;
pub(crate) mod logic;
pub(crate) mod sanitize;
pub(crate) mod transaction;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, OperationConfig, RestoreSource};
use crate::engine::{Engine, PgEngine};
use crate::store;
use crate::sync::SyncSource;
use crate::utils::progress::Reporter;

/// Entry point for `list-backups`. Returns the exit status.
pub async fn run_list_flow(
    app_config: &AppConfig,
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> Result<u8> {
    let list_config = match &app_config.operation {
        Some(OperationConfig::ListBackups(cfg)) => cfg,
        _ => anyhow::bail!("List operation selected but no list configuration found."),
    };

    let store = store::from_config(&list_config.catalog.store)
        .await
        .context("Failed to set up the remote store")?;
    let report = logic::perform_listing(&store, &list_config.catalog, false, reporter, cancel).await?;

    if let Some(e) = &report.discovery_error {
        reporter.say(format!("❌ Backup discovery failed: {}", e));
    }
    if report.backups.is_empty() {
        reporter.say("No usable backups found.");
    }
    for backup in &report.backups {
        println!("{}: {} ({})", backup.instance, backup.file, backup.payload);
    }
    Ok(report.exit_code())
}

/// Entry point for `restore`. Returns the exit status.
pub async fn run_restore_flow(
    app_config: &AppConfig,
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> Result<u8> {
    let restore_config = match &app_config.operation {
        Some(OperationConfig::Restore(cfg)) => cfg,
        _ => anyhow::bail!("Restore operation selected but no restore configuration found."),
    };

    let engine = PgEngine::connect(&restore_config.engine)
        .await
        .context("Failed to connect to the database server")?;
    let version = engine.server_version().await?;
    tracing::info!("connected to {}", version);

    let store = match &restore_config.source {
        RestoreSource::Catalog(catalog) => Some(
            store::from_config(&catalog.store)
                .await
                .context("Failed to set up the remote store")?,
        ),
        RestoreSource::File { .. } => None,
    };
    let sync_source = if restore_config.load_sync_server {
        SyncSource::from_config(&restore_config.sync)?
    } else {
        None
    };

    let report = logic::perform_restore(
        &engine,
        store,
        sync_source,
        restore_config,
        reporter,
        cancel,
    )
    .await?;
    report.print_summary(reporter);
    Ok(report.exit_code())
}

/// Entry point for `clean-stale-databases`. Returns the exit status.
pub async fn run_clean_flow(app_config: &AppConfig, reporter: &Reporter) -> Result<u8> {
    let clean_config = match &app_config.operation {
        Some(OperationConfig::CleanStale(cfg)) => cfg,
        _ => anyhow::bail!("Clean operation selected but no clean configuration found."),
    };

    let engine = PgEngine::connect(&clean_config.engine)
        .await
        .context("Failed to connect to the database server")?;
    Ok(logic::perform_clean(&engine, clean_config, reporter).await?)
}
