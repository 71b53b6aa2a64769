// erpload/src/engine/mod.rs
pub(crate) mod postgres;
pub(crate) mod sql;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::archive::Payload;
use crate::errors::Result;
use crate::utils::progress::Reporter;

pub use postgres::PgEngine;
pub use sql::Statement;

/// Options for `CREATE DATABASE`.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub owner: Option<String>,
}

/// The relational engine operations the restore engine relies on.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Database used for catalog queries and DDL.
    fn maintenance_database(&self) -> &str;

    async fn server_version(&self) -> Result<String>;

    /// Non-template databases, sorted by name.
    async fn list_databases(&self) -> Result<Vec<String>>;

    async fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_databases().await?.iter().any(|db| db == name))
    }

    async fn create_database(&self, name: &str, options: &CreateOptions) -> Result<()>;

    /// Drops `name` if it exists.
    async fn drop_database(&self, name: &str) -> Result<()>;

    async fn rename_database(&self, old: &str, new: &str) -> Result<()>;

    /// Backend session ids connected to `database`, excluding our own.
    async fn list_active_connections(&self, database: &str) -> Result<Vec<i32>>;

    async fn terminate_connection(&self, session: i32) -> Result<()>;

    /// Runs one statement in `database`; returns the affected row count.
    async fn execute(&self, database: &str, statement: &Statement) -> Result<u64>;

    /// Runs a query in `database` and returns its first column as text.
    async fn fetch_text(&self, database: &str, statement: &Statement) -> Result<Vec<Option<String>>>;

    /// Streams `payload` into `database` with the engine's restore tool.
    async fn restore_from_dump(
        &self,
        database: &str,
        payload: Payload,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Terminates every session on `database`; structural changes are refused
/// while sessions are open.
pub async fn terminate_connections(engine: &dyn Engine, database: &str) -> Result<usize> {
    let sessions = engine.list_active_connections(database).await?;
    for session in &sessions {
        engine.terminate_connection(*session).await?;
    }
    if !sessions.is_empty() {
        tracing::info!("terminated {} connection(s) to {}", sessions.len(), database);
    }
    Ok(sessions.len())
}
