// erpload/src/engine/fake.rs
//! In-memory engine for tests. Databases hold their restored payload as text;
//! every operation is appended to `ops`.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::sql::{SqlValue, Statement};
use super::{CreateOptions, Engine};
use crate::archive::Payload;
use crate::errors::{AppError, Result};
use crate::sync::linker::{INSERT_ENTITY_SQL, UPDATE_ALL_ENTITIES_SQL, UPDATE_ENTITY_SQL};
use crate::utils::progress::Reporter;

#[derive(Debug, Default)]
pub struct FakeState {
    pub databases: BTreeMap<String, String>,
    pub sessions: BTreeMap<i32, String>,
    pub ops: Vec<String>,
    pub executed: Vec<(String, Statement)>,
    /// Sync entity rows per database: name -> hardware id.
    pub entities: BTreeMap<String, BTreeMap<String, Option<String>>>,
    /// Canned `fetch_text` results keyed by SQL text.
    pub query_results: BTreeMap<String, Vec<Option<String>>>,
    pub fail_create: bool,
    pub fail_restore: bool,
    pub cancel_during_restore: bool,
    pub fail_rename: bool,
    pub fail_drop: BTreeSet<String>,
    pub fail_sql_containing: Option<String>,
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(self, name: &str, content: &str) -> Self {
        self.state()
            .databases
            .insert(name.to_string(), content.to_string());
        self
    }

    pub fn with_session(self, session: i32, database: &str) -> Self {
        self.state().sessions.insert(session, database.to_string());
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn databases(&self) -> Vec<String> {
        self.state().databases.keys().cloned().collect()
    }

    pub fn content(&self, database: &str) -> Option<String> {
        self.state().databases.get(database).cloned()
    }

    pub fn ops(&self) -> Vec<String> {
        self.state().ops.clone()
    }

    pub fn executed_sql(&self, database: &str) -> Vec<String> {
        self.state()
            .executed
            .iter()
            .filter(|(db, _)| db == database)
            .map(|(_, stmt)| stmt.sql.clone())
            .collect()
    }
}

fn busy(state: &FakeState, database: &str) -> bool {
    state.sessions.values().any(|db| db == database)
}

fn text_bind(statement: &Statement, index: usize) -> Option<String> {
    match statement.binds.get(index) {
        Some(SqlValue::Text(v)) => Some(v.clone()),
        _ => None,
    }
}

#[async_trait]
impl Engine for FakeEngine {
    fn maintenance_database(&self) -> &str {
        "postgres"
    }

    async fn server_version(&self) -> Result<String> {
        Ok("fake 14.0".to_string())
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self.databases())
    }

    async fn create_database(&self, name: &str, _options: &CreateOptions) -> Result<()> {
        let mut state = self.state();
        state.ops.push(format!("create {}", name));
        if state.fail_create || state.databases.contains_key(name) {
            return Err(AppError::engine("create database", name, "cannot create"));
        }
        state.databases.insert(name.to_string(), String::new());
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.ops.push(format!("drop {}", name));
        if state.fail_drop.contains(name) {
            return Err(AppError::engine("drop database", name, "permission denied"));
        }
        if busy(&state, name) {
            return Err(AppError::engine(
                "drop database",
                name,
                "database is being accessed by other users",
            ));
        }
        state.databases.remove(name);
        Ok(())
    }

    async fn rename_database(&self, old: &str, new: &str) -> Result<()> {
        let mut state = self.state();
        state.ops.push(format!("rename {} {}", old, new));
        if state.fail_rename || busy(&state, old) || state.databases.contains_key(new) {
            return Err(AppError::engine("rename database", old, "cannot rename"));
        }
        let content = state
            .databases
            .remove(old)
            .ok_or_else(|| AppError::engine("rename database", old, "does not exist"))?;
        state.databases.insert(new.to_string(), content);
        Ok(())
    }

    async fn list_active_connections(&self, database: &str) -> Result<Vec<i32>> {
        Ok(self
            .state()
            .sessions
            .iter()
            .filter(|(_, db)| db.as_str() == database)
            .map(|(pid, _)| *pid)
            .collect())
    }

    async fn terminate_connection(&self, session: i32) -> Result<()> {
        let mut state = self.state();
        state.ops.push(format!("terminate {}", session));
        state.sessions.remove(&session);
        Ok(())
    }

    async fn execute(&self, database: &str, statement: &Statement) -> Result<u64> {
        let mut state = self.state();
        if !state.databases.contains_key(database) {
            return Err(AppError::engine("execute", database, "database does not exist"));
        }
        if let Some(needle) = &state.fail_sql_containing {
            if statement.sql.contains(needle.as_str()) {
                return Err(AppError::engine("execute", database, "statement failed"));
            }
        }
        state
            .executed
            .push((database.to_string(), statement.clone()));

        let rows = state.entities.entry(database.to_string()).or_default();
        let affected = if statement.sql == INSERT_ENTITY_SQL {
            let name = text_bind(statement, 0).unwrap_or_default();
            if rows.contains_key(&name) {
                0
            } else {
                rows.insert(name, None);
                1
            }
        } else if statement.sql == UPDATE_ENTITY_SQL {
            let hwid = text_bind(statement, 0);
            let name = text_bind(statement, 1).unwrap_or_default();
            match rows.get_mut(&name) {
                Some(slot) => {
                    *slot = hwid;
                    1
                }
                None => 0,
            }
        } else if statement.sql == UPDATE_ALL_ENTITIES_SQL {
            let hwid = text_bind(statement, 0);
            for slot in rows.values_mut() {
                *slot = hwid.clone();
            }
            rows.len() as u64
        } else {
            1
        };
        Ok(affected)
    }

    async fn fetch_text(&self, database: &str, statement: &Statement) -> Result<Vec<Option<String>>> {
        let state = self.state();
        if !state.databases.contains_key(database) {
            return Err(AppError::engine("query", database, "database does not exist"));
        }
        Ok(state
            .query_results
            .get(&statement.sql)
            .cloned()
            .unwrap_or_default())
    }

    async fn restore_from_dump(
        &self,
        database: &str,
        mut payload: Payload,
        _reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // Payload readers may block on the runtime, as they do under pg_restore.
        let content = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut content = String::new();
            payload.open()?.read_to_string(&mut content)?;
            Ok(content)
        })
        .await
        .map_err(|e| AppError::engine("pg_restore", database, e))??;

        let mut state = self.state();
        state.ops.push(format!("restore {}", database));
        if state.cancel_during_restore {
            cancel.cancel();
            return Err(AppError::Interrupted);
        }
        if state.fail_restore {
            return Err(AppError::engine("pg_restore", database, "exit status: 1"));
        }
        match state.databases.get_mut(database) {
            Some(slot) => {
                *slot = content;
                Ok(())
            }
            None => Err(AppError::engine("pg_restore", database, "database does not exist")),
        }
    }
}
