// erpload/src/sync/logic.rs
use tokio_util::sync::CancellationToken;

use crate::archive::Payload;
use crate::engine::{Engine, Statement};
use crate::errors::{AppError, Result};
use crate::restore::transaction::SwapTransaction;
use crate::store::RemoteStore;
use crate::utils::progress::Reporter;

pub const SIZE_COMMENT_PREFIX: &str = "erpload:size=";
pub const COMMENT_QUERY: &str =
    "SELECT shobj_description(oid, 'pg_database') FROM pg_database WHERE datname = $1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncLoad {
    /// A new dump was restored; nothing else can be attached to it yet.
    Loaded,
    UpToDate,
}

pub fn parse_size_comment(comment: &str) -> Option<u64> {
    comment.trim().strip_prefix(SIZE_COMMENT_PREFIX)?.parse().ok()
}

/// Dump size recorded when the sync server database was last loaded.
pub async fn stored_dump_size(engine: &dyn Engine, database: &str) -> Result<Option<u64>> {
    let rows = engine
        .fetch_text(
            engine.maintenance_database(),
            &Statement::new(COMMENT_QUERY).bind(database),
        )
        .await?;
    Ok(rows
        .into_iter()
        .flatten()
        .next()
        .and_then(|comment| parse_size_comment(&comment)))
}

/// Loads the sync server dump at `dump_path` into `database` unless the
/// database already holds a dump of the same size.
pub async fn load_sync_server(
    engine: &dyn Engine,
    store: &dyn RemoteStore,
    dump_path: &str,
    database: &str,
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> Result<SyncLoad> {
    let remote_size = store.size(dump_path).await?.filter(|size| *size > 0);
    let local_size = if engine.database_exists(database).await? {
        stored_dump_size(engine, database).await?
    } else {
        None
    };
    if remote_size.is_some() && remote_size == local_size {
        reporter.say(format!("Sync server {} is up to date", database));
        return Ok(SyncLoad::UpToDate);
    }

    reporter.say(format!("Downloading sync server dump {}", dump_path));
    let staging_dir = tempfile::tempdir()?;
    let local = staging_dir.path().join("sync_server.dump");
    store.download(dump_path, &local, reporter).await?;
    if cancel.is_cancelled() {
        return Err(AppError::Interrupted);
    }

    let payload = Payload::plain_file(&local)?;
    let size = payload.size;
    SwapTransaction::new(engine, database, reporter, cancel)
        .run(payload)
        .await?;

    if let Some(size) = remote_size.or(size) {
        let comment = Statement::comment_on_database(
            database,
            &format!("{}{}", SIZE_COMMENT_PREFIX, size),
        );
        if let Err(e) = engine.execute(engine.maintenance_database(), &comment).await {
            tracing::warn!("could not record the sync server dump size: {}", e);
        }
    }
    Ok(SyncLoad::Loaded)
}
