// erpload/src/sync/linker.rs
//! Associates restored instances with this host in the sync server database.

use crate::engine::{Engine, Statement};
use crate::errors::{AppError, Result};
use crate::utils::progress::Reporter;

pub const INSERT_ENTITY_SQL: &str = "INSERT INTO sync_server_entity (name, state) \
     SELECT $1, 'validated' \
     WHERE NOT EXISTS (SELECT 1 FROM sync_server_entity WHERE name = $1)";
pub const UPDATE_ENTITY_SQL: &str = "UPDATE sync_server_entity SET hardware_id = $1 WHERE name = $2";
pub const UPDATE_ALL_ENTITIES_SQL: &str = "UPDATE sync_server_entity SET hardware_id = $1";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub linked: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Set when linking was skipped altogether.
    pub skipped: Option<String>,
}

async fn link_one(engine: &dyn Engine, sync_db: &str, instance: &str, hardware_id: &str) -> Result<()> {
    engine
        .execute(sync_db, &Statement::new(INSERT_ENTITY_SQL).bind(instance))
        .await?;
    let updated = engine
        .execute(
            sync_db,
            &Statement::new(UPDATE_ENTITY_SQL)
                .bind(hardware_id)
                .bind(instance),
        )
        .await?;
    if updated == 0 {
        return Err(AppError::Linking(format!("no entity row for {}", instance)));
    }
    Ok(())
}

/// Links `instances` to `hardware_id`. With `update_all` every entity in the
/// sync server is claimed, which is only right for a freshly loaded server.
///
/// Never fails the caller: problems end up in the report.
pub async fn link(
    engine: &dyn Engine,
    hardware_id: Option<&str>,
    instances: &[String],
    sync_db: &str,
    update_all: bool,
    reporter: &Reporter,
) -> LinkReport {
    let mut report = LinkReport::default();
    let Some(hardware_id) = hardware_id else {
        reporter.say("Hardware id could not be determined on this host; link instances to the sync server manually.");
        report.skipped = Some("no hardware id".to_string());
        return report;
    };

    for instance in instances {
        match link_one(engine, sync_db, instance, hardware_id).await {
            Ok(()) => {
                reporter.say(format!("Linked {} to this host in {}", instance, sync_db));
                report.linked.push(instance.clone());
            }
            Err(e) => {
                tracing::warn!("linking {} failed: {}", instance, e);
                reporter.say(format!("Could not link {}: {}", instance, e));
                report.failed.push((instance.clone(), e.to_string()));
            }
        }
    }

    if update_all {
        let all = Statement::new(UPDATE_ALL_ENTITIES_SQL).bind(hardware_id);
        match engine.execute(sync_db, &all).await {
            Ok(n) => reporter.say(format!("Claimed all {} sync entities for this host", n)),
            Err(e) => {
                tracing::warn!("claiming all sync entities failed: {}", e);
                report.failed.push(("*".to_string(), e.to_string()));
            }
        }
    }
    report
}
