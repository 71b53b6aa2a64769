// erpload/src/sync/mod.rs
pub(crate) mod hwid;
pub(crate) mod linker;
pub(crate) mod logic;
pub(crate) mod rpc;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{SyncServerConfig, WebDavConfig};
use crate::engine::Engine;
use crate::errors::{AppError, Result};
use crate::store::RemoteStore;
use crate::store::webdav::WebDavStore;
use crate::utils::naming::db_to_instance;
use crate::utils::progress::Reporter;
use hwid::CachedHardwareId;
use linker::LinkReport;
use logic::SyncLoad;

/// Where the sync server dump is fetched from.
pub struct SyncSource {
    pub store: Arc<dyn RemoteStore>,
    pub dump_path: String,
}

impl SyncSource {
    /// Splits `dump_url` into a WebDAV endpoint and the dump file name.
    pub fn from_config(config: &SyncServerConfig) -> Result<Option<SyncSource>> {
        let Some(dump_url) = config.dump_url.as_deref() else {
            return Ok(None);
        };
        let (endpoint, file) = dump_url
            .trim_end_matches('/')
            .rsplit_once('/')
            .filter(|(_, file)| !file.is_empty())
            .ok_or_else(|| AppError::Config(format!("invalid sync server dump URL: {}", dump_url)))?;
        let store = WebDavStore::new(&WebDavConfig {
            endpoint: endpoint.to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })?;
        Ok(Some(SyncSource {
            store: Arc::new(store),
            dump_path: file.to_string(),
        }))
    }
}

#[derive(Debug)]
pub struct SyncSummary {
    pub loaded: SyncLoad,
    pub link: LinkReport,
    pub rpc_failures: Vec<(String, AppError)>,
}

impl SyncSummary {
    /// Summary lines for the run log. None of these change the exit status.
    pub fn report(&self, reporter: &Reporter) {
        match self.loaded {
            SyncLoad::Loaded => reporter.say("✅ Sync server loaded"),
            SyncLoad::UpToDate => reporter.say("➖ Sync server already up to date"),
        }
        if let Some(reason) = &self.link.skipped {
            reporter.say(format!("Linking skipped: {}", reason));
        } else {
            reporter.say(format!(
                "Linked {} instance(s), {} failed",
                self.link.linked.len(),
                self.link.failed.len()
            ));
        }
        for (instance, reason) in &self.link.failed {
            reporter.say(format!("❌ link {}: {}", instance, reason));
        }
        for (database, e) in &self.rpc_failures {
            reporter.say(format!("❌ connect {}: {}", database, e));
        }
    }
}

/// Loads the sync server, links the restored instances to this host and
/// asks each of them to connect. Only loading can fail the flow.
pub async fn run_sync_flow(
    engine: &dyn Engine,
    source: &SyncSource,
    config: &SyncServerConfig,
    prefix: Option<&str>,
    restored_dbs: &[String],
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> Result<SyncSummary> {
    let hardware_id = CachedHardwareId::for_this_host();
    run_with_hardware_id(
        engine,
        source,
        config,
        prefix,
        restored_dbs,
        hardware_id.get(),
        reporter,
        cancel,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn run_with_hardware_id(
    engine: &dyn Engine,
    source: &SyncSource,
    config: &SyncServerConfig,
    prefix: Option<&str>,
    restored_dbs: &[String],
    hardware_id: Option<&str>,
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> Result<SyncSummary> {
    reporter.say(format!("🔄 Loading sync server {}", config.database));
    let loaded = logic::load_sync_server(
        engine,
        source.store.as_ref(),
        &source.dump_path,
        &config.database,
        reporter,
        cancel,
    )
    .await?;

    let instances: Vec<String> = restored_dbs
        .iter()
        .filter_map(|db| db_to_instance(prefix, db))
        .collect();
    let link = linker::link(
        engine,
        hardware_id,
        &instances,
        &config.database,
        loaded == SyncLoad::Loaded,
        reporter,
    )
    .await;

    let rpc_failures = match &config.rpc {
        Some(rpc) if !restored_dbs.is_empty() => rpc::follow_up(rpc, restored_dbs, reporter).await,
        _ => Vec::new(),
    };
    Ok(SyncSummary {
        loaded,
        link,
        rpc_failures,
    })
}
