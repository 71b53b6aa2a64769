// erpload/src/restore/logic.rs
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::cleanup::{CleanupReport, clean_stale, cleanup, newest_per_instance, stale_databases};
use super::sanitize::Sanitizer;
use super::transaction::SwapTransaction;
use crate::archive::{self, ArchiveKind, Payload, PayloadInfo};
use crate::catalog::{self, NameMatcher};
use crate::config::{CatalogConfig, CleanConfig, RestoreConfig, RestoreSource};
use crate::engine::{CreateOptions, Engine};
use crate::errors::{AppError, Result};
use crate::store::{self, RemoteFile, RemoteStore};
use crate::sync::{self, SyncSource};
use crate::utils::naming::{db_to_instance, file_to_db};
use crate::utils::progress::Reporter;

#[derive(Debug)]
pub enum InstanceStatus {
    Restored {
        database: String,
        cleanup: Option<CleanupReport>,
    },
    AlreadyPresent {
        database: String,
    },
    /// Dry run: what a real run would restore and clean up.
    Planned {
        database: String,
        would_drop: Vec<String>,
    },
    Failed(AppError),
}

#[derive(Debug)]
pub struct InstanceOutcome {
    pub instance: String,
    pub status: InstanceStatus,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<InstanceOutcome>,
    pub discovery_error: Option<String>,
}

impl BatchReport {
    fn push(&mut self, instance: impl Into<String>, status: InstanceStatus) {
        self.outcomes.push(InstanceOutcome {
            instance: instance.into(),
            status,
        });
    }

    /// 0 when every instance was restored, present or planned; otherwise the
    /// code of the first failure. An interrupt always wins.
    pub fn exit_code(&self) -> u8 {
        let failures: Vec<&AppError> = self
            .outcomes
            .iter()
            .filter_map(|o| match &o.status {
                InstanceStatus::Failed(e) => Some(e),
                _ => None,
            })
            .collect();
        if failures.iter().any(|e| e.is_interrupted()) {
            return AppError::Interrupted.exit_code();
        }
        if let Some(first) = failures.first() {
            return first.exit_code();
        }
        if self.outcomes.is_empty() {
            return match &self.discovery_error {
                Some(e) => AppError::Discovery(e.clone()).exit_code(),
                None => AppError::Validation("no candidates".into()).exit_code(),
            };
        }
        0
    }

    pub fn restored_databases(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.status {
                InstanceStatus::Restored { database, .. } => Some(database.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn print_summary(&self, reporter: &Reporter) {
        if let Some(e) = &self.discovery_error {
            reporter.say(format!("❌ Backup discovery failed: {}", e));
        }
        if self.outcomes.is_empty() {
            reporter.say("No instances to restore.");
        }
        for outcome in &self.outcomes {
            let line = match &outcome.status {
                InstanceStatus::Restored { database, cleanup } => {
                    let mut line = format!("✅ {}: restored as {}", outcome.instance, database);
                    if let Some(report) = cleanup.as_ref().filter(|r| !r.is_clean()) {
                        line.push_str(&format!(" ({} stale database(s) left)", report.failed.len()));
                    }
                    line
                }
                InstanceStatus::AlreadyPresent { database } => {
                    format!("➖ {}: {} already present", outcome.instance, database)
                }
                InstanceStatus::Planned { database, would_drop } => {
                    let mut line = format!("📝 {}: would restore as {}", outcome.instance, database);
                    if !would_drop.is_empty() {
                        line.push_str(&format!(" and drop {}", would_drop.join(", ")));
                    }
                    line
                }
                InstanceStatus::Failed(e) => format!("❌ {}: {}", outcome.instance, e),
            };
            reporter.say(line);
        }
    }
}

/// A validated payload, with the scratch directory it may live in.
pub struct PreparedCandidate {
    pub info: PayloadInfo,
    pub payload: Payload,
    _scratch: Option<TempDir>,
}

/// Validates one remote archive. Zip archives are inspected in place through
/// range reads unless `local_staging` is set; tarballs are always downloaded.
/// `Ok(None)` means the archive is not usable.
pub async fn prepare_candidate(
    store: &Arc<dyn RemoteStore>,
    candidate: &RemoteFile,
    local_staging: bool,
    reporter: &Reporter,
) -> Result<Option<PreparedCandidate>> {
    let Some(kind) = ArchiveKind::from_name(&candidate.name) else {
        return Ok(None);
    };
    let label = candidate.name.clone();

    if kind.supports_streaming() && !local_staging {
        match store::open_for_streaming_read(store.clone(), candidate).await? {
            Some(reader) => {
                let validated =
                    tokio::task::spawn_blocking(move || archive::validate_zip(reader, &label))
                        .await
                        .map_err(|e| AppError::Validation(e.to_string()))?;
                return Ok(validated.map(|v| PreparedCandidate {
                    info: v.info.clone(),
                    payload: v.into_payload(),
                    _scratch: None,
                }));
            }
            None => reporter.say(format!(
                "{} cannot be read in place; downloading it first",
                candidate.name
            )),
        }
    }

    let scratch = tempfile::tempdir()?;
    let local = scratch.path().join(&candidate.name);
    reporter.say(format!("Downloading {}", candidate.name));
    store.download(&candidate.path, &local, reporter).await?;
    let validated = tokio::task::spawn_blocking(move || archive::validate_local(&local, kind))
        .await
        .map_err(|e| AppError::Validation(e.to_string()))?;
    Ok(validated.map(|v| PreparedCandidate {
        info: v.info.clone(),
        payload: v.into_payload(),
        _scratch: Some(scratch),
    }))
}

struct RestoreContext<'a> {
    engine: &'a dyn Engine,
    config: &'a RestoreConfig,
    sanitizer: Sanitizer,
    reporter: &'a Reporter,
    cancel: &'a CancellationToken,
}

impl RestoreContext<'_> {
    fn prefix(&self) -> Option<&str> {
        self.config.db_prefix.as_deref()
    }

    /// Reports what `install` would do without touching the server.
    async fn plan(&self, database: &str, payload: &Payload) -> InstanceStatus {
        self.reporter.say(format!("Would restore {} as {}", payload.name, database));
        let mut would_drop = Vec::new();
        if !self.config.no_clean {
            if let Some(instance) = db_to_instance(self.prefix(), database) {
                match stale_databases(self.engine, self.prefix(), &instance, database).await {
                    Ok(stale) => would_drop = stale,
                    Err(e) => return InstanceStatus::Failed(e),
                }
            }
        }
        for db in &would_drop {
            self.reporter.say(format!("Would drop {}", db));
        }
        InstanceStatus::Planned {
            database: database.to_string(),
            would_drop,
        }
    }

    /// Swaps the payload in, then cleans up and notifies.
    async fn install(&self, database: &str, payload: Payload) -> InstanceStatus {
        if self.config.dry_run {
            return self.plan(database, &payload).await;
        }
        let mut tx = SwapTransaction::new(self.engine, database, self.reporter, self.cancel)
            .with_sanitizer(&self.sanitizer)
            .with_create_options(CreateOptions {
                owner: self.config.database_owner.clone(),
            });
        if let Err(e) = tx.run(payload).await {
            return InstanceStatus::Failed(e);
        }

        let mut cleanup_report = None;
        if !self.config.no_clean {
            if let Some(instance) = db_to_instance(self.prefix(), database) {
                match cleanup(self.engine, self.prefix(), &instance, database, self.reporter).await {
                    Ok(report) => cleanup_report = Some(report),
                    Err(e) => {
                        tracing::warn!("cleanup after {} failed: {}", database, e);
                        self.reporter.say(format!("Cleanup skipped: {}", e));
                    }
                }
            }
        }
        if let Some(command) = &self.config.notify {
            notify(command, database, self.reporter).await;
        }
        InstanceStatus::Restored {
            database: database.to_string(),
            cleanup: cleanup_report,
        }
    }

    /// Tries candidates newest first until one is restored or found present.
    async fn restore_instance(
        &self,
        store: &Arc<dyn RemoteStore>,
        instance: &str,
        candidates: &[RemoteFile],
    ) -> InstanceStatus {
        let mut last_error = AppError::Validation(format!("no valid backup for {}", instance));
        for candidate in candidates {
            if self.cancel.is_cancelled() {
                return InstanceStatus::Failed(AppError::Interrupted);
            }
            self.reporter.say(format!("{}: trying {}", instance, candidate.name));
            let prepared = match prepare_candidate(
                store,
                candidate,
                self.config.local_staging,
                self.reporter,
            )
            .await
            {
                Ok(Some(prepared)) => prepared,
                Ok(None) => {
                    last_error = AppError::Validation(format!("{} is not usable", candidate.name));
                    continue;
                }
                Err(e) => {
                    tracing::warn!("{}: {}", candidate.name, e);
                    self.reporter.say(format!("{}: {}", candidate.name, e));
                    last_error = e;
                    continue;
                }
            };

            let Some(database) = file_to_db(self.prefix(), &prepared.info.name) else {
                self.reporter.say(format!(
                    "{}: cannot determine the database name from {}",
                    instance, prepared.info.name
                ));
                last_error = AppError::UnknownInstance(prepared.info.name.clone());
                continue;
            };
            match self.engine.database_exists(&database).await {
                Ok(true) => {
                    self.reporter.say(format!("{}: {} already exists", instance, database));
                    return InstanceStatus::AlreadyPresent { database };
                }
                Ok(false) => {}
                Err(e) => return InstanceStatus::Failed(e),
            }
            // The scratch directory must outlive the restore.
            return self.install(&database, prepared.payload).await;
        }
        InstanceStatus::Failed(last_error)
    }

    async fn restore_file(&self, path: &Path, target: Option<&str>) -> InstanceOutcome {
        let label = path.display().to_string();
        let status = match self.restore_file_inner(path, target).await {
            Ok(status) => status,
            Err(e) => InstanceStatus::Failed(e),
        };
        let instance = match &status {
            InstanceStatus::Restored { database, .. }
            | InstanceStatus::AlreadyPresent { database }
            | InstanceStatus::Planned { database, .. } => {
                db_to_instance(self.prefix(), database).unwrap_or_else(|| database.clone())
            }
            InstanceStatus::Failed(_) => label,
        };
        InstanceOutcome { instance, status }
    }

    async fn restore_file_inner(&self, path: &Path, target: Option<&str>) -> Result<InstanceStatus> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::InvalidInput(format!("not a file: {}", path.display())))?;
        let payload = match ArchiveKind::from_name(&file_name) {
            Some(kind) => {
                let local = path.to_path_buf();
                tokio::task::spawn_blocking(move || archive::validate_local(&local, kind))
                    .await
                    .map_err(|e| AppError::Validation(e.to_string()))?
                    .ok_or_else(|| AppError::Validation(format!("{} is not usable", file_name)))?
                    .into_payload()
            }
            None => Payload::plain_file(path)?,
        };

        let database = match target {
            Some(name) => name.to_string(),
            None => file_to_db(self.prefix(), &payload.name)
                .or_else(|| file_to_db(self.prefix(), &file_name))
                .ok_or_else(|| AppError::UnknownInstance(payload.name.clone()))?,
        };
        Ok(self.install(&database, payload).await)
    }
}

/// Runs the notify hook with the restored database name; failures are only
/// reported.
async fn notify(command: &str, database: &str, reporter: &Reporter) {
    match tokio::process::Command::new(command).arg(database).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => reporter.say(format!("Notify command {} exited with {}", command, status)),
        Err(e) => reporter.say(format!("Notify command {} failed: {}", command, e)),
    }
}

async fn restore_catalog(
    ctx: &RestoreContext<'_>,
    store: &Arc<dyn RemoteStore>,
    catalog_config: &CatalogConfig,
    report: &mut BatchReport,
) -> Result<()> {
    let matcher = NameMatcher::new(&catalog_config.instances, catalog_config.case_insensitive)?;
    let catalog = catalog::list_candidates(
        store.as_ref(),
        &catalog_config.directory,
        &matcher,
        Utc::now(),
        ctx.reporter,
    )
    .await;
    report.discovery_error = catalog.discovery_error.clone();

    for (instance, candidates) in &catalog.groups {
        ctx.reporter.say(format!("🔄 Restoring instance {}", instance));
        let status = ctx.restore_instance(store, instance, candidates).await;
        let interrupted = matches!(&status, InstanceStatus::Failed(e) if e.is_interrupted());
        report.push(instance.clone(), status);
        if interrupted {
            break;
        }
    }
    Ok(())
}

/// Restores every requested instance, then loads and links the sync server
/// when asked to.
pub async fn perform_restore(
    engine: &dyn Engine,
    store: Option<Arc<dyn RemoteStore>>,
    sync_source: Option<SyncSource>,
    config: &RestoreConfig,
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> Result<BatchReport> {
    let ctx = RestoreContext {
        engine,
        config,
        sanitizer: Sanitizer::new(config.sanitize.clone()),
        reporter,
        cancel,
    };
    let mut report = BatchReport::default();

    match &config.source {
        RestoreSource::File { path, target } => {
            let outcome = ctx.restore_file(path, target.as_deref()).await;
            report.outcomes.push(outcome);
        }
        RestoreSource::Catalog(catalog_config) => {
            let store = store.ok_or_else(|| {
                AppError::Config("no remote store configured for catalog restore".into())
            })?;
            restore_catalog(&ctx, &store, catalog_config, &mut report).await?;
        }
    }

    if config.load_sync_server && config.dry_run {
        reporter.say(format!("Would load the sync server {}", config.sync.database));
    } else if config.load_sync_server && !cancel.is_cancelled() {
        let source = sync_source.ok_or_else(|| {
            AppError::Config("sync_server.dump_url is required to load the sync server".into())
        })?;
        let restored = report.restored_databases();
        let flow = sync::run_sync_flow(
            engine,
            &source,
            &config.sync,
            config.db_prefix.as_deref(),
            &restored,
            reporter,
            cancel,
        );
        match flow.await {
            Ok(summary) => summary.report(reporter),
            Err(e) => report.push(config.sync.database.clone(), InstanceStatus::Failed(e)),
        }
    }
    Ok(report)
}

/// The newest usable backup of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedBackup {
    pub instance: String,
    pub file: String,
    pub payload: String,
}

#[derive(Debug, Default)]
pub struct ListReport {
    pub backups: Vec<ListedBackup>,
    pub discovery_error: Option<String>,
}

impl ListReport {
    pub fn exit_code(&self) -> u8 {
        if !self.backups.is_empty() {
            return 0;
        }
        match &self.discovery_error {
            Some(e) => AppError::Discovery(e.clone()).exit_code(),
            None => AppError::Validation("no candidates".into()).exit_code(),
        }
    }
}

/// Finds, per instance, the newest candidate that validates.
pub async fn perform_listing(
    store: &Arc<dyn RemoteStore>,
    catalog_config: &CatalogConfig,
    local_staging: bool,
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> Result<ListReport> {
    let matcher = NameMatcher::new(&catalog_config.instances, catalog_config.case_insensitive)?;
    let catalog = catalog::list_candidates(
        store.as_ref(),
        &catalog_config.directory,
        &matcher,
        Utc::now(),
        reporter,
    )
    .await;
    let mut report = ListReport {
        backups: Vec::new(),
        discovery_error: catalog.discovery_error.clone(),
    };

    for (instance, candidates) in &catalog.groups {
        for candidate in candidates {
            if cancel.is_cancelled() {
                return Err(AppError::Interrupted);
            }
            match prepare_candidate(store, candidate, local_staging, reporter).await {
                Ok(Some(prepared)) => {
                    report.backups.push(ListedBackup {
                        instance: instance.clone(),
                        file: candidate.name.clone(),
                        payload: prepared.info.name,
                    });
                    break;
                }
                Ok(None) => {}
                Err(e) => reporter.say(format!("{}: {}", candidate.name, e)),
            }
        }
    }
    Ok(report)
}

/// Keeps the newest database of every matching instance and drops the rest.
/// Returns the exit status.
pub async fn perform_clean(
    engine: &dyn Engine,
    config: &CleanConfig,
    reporter: &Reporter,
) -> Result<u8> {
    let matcher = NameMatcher::new(&config.instances, config.case_insensitive)?;
    let prefix = config.db_prefix.as_deref();
    if config.dry_run {
        for (instance, keep) in newest_per_instance(engine, prefix, &matcher, reporter).await? {
            for db in stale_databases(engine, prefix, &instance, &keep).await? {
                reporter.say(format!("{}: would drop {} (keeping {})", instance, db, keep));
            }
        }
        return Ok(0);
    }
    let reports = clean_stale(engine, prefix, &matcher, reporter).await?;
    let mut code = 0;
    for (instance, report) in &reports {
        if report.dropped.is_empty() && report.is_clean() {
            continue;
        }
        reporter.say(format!(
            "{}: dropped {}, {} failed",
            instance,
            report.dropped.len(),
            report.failed.len()
        ));
        if !report.is_clean() {
            code = 1;
        }
    }
    Ok(code)
}
