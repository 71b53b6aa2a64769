// erpload/src/restore/cleanup.rs
use std::collections::BTreeMap;

use crate::catalog::NameMatcher;
use crate::engine::{Engine, terminate_connections};
use crate::errors::Result;
use crate::utils::naming::{db_to_instance, is_staging_name};
use crate::utils::progress::Reporter;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub dropped: Vec<String>,
    /// Databases that could not be dropped, with the reason.
    pub failed: Vec<(String, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Databases of `instance` other than `keep`, in name order.
pub async fn stale_databases(
    engine: &dyn Engine,
    prefix: Option<&str>,
    instance: &str,
    keep: &str,
) -> Result<Vec<String>> {
    Ok(engine
        .list_databases()
        .await?
        .into_iter()
        .filter(|db| db != keep && db_to_instance(prefix, db).as_deref() == Some(instance))
        .collect())
}

/// Drops every database of `instance` except `keep`.
///
/// Only the listing can fail the call; a failed drop is recorded and the
/// remaining databases are still attempted.
pub async fn cleanup(
    engine: &dyn Engine,
    prefix: Option<&str>,
    instance: &str,
    keep: &str,
    reporter: &Reporter,
) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    for db in stale_databases(engine, prefix, instance, keep).await? {
        reporter.say(format!("Cleanup: dropping {}", db));
        let dropped = match terminate_connections(engine, &db).await {
            Ok(_) => engine.drop_database(&db).await,
            Err(e) => Err(e),
        };
        match dropped {
            Ok(()) => report.dropped.push(db),
            Err(e) => {
                tracing::warn!("cleanup of {} failed: {}", db, e);
                reporter.say(format!("Cleanup: could not drop {}: {}", db, e));
                report.failed.push((db, e.to_string()));
            }
        }
    }
    Ok(report)
}

/// The database to keep for each matching instance: its newest non-staging
/// copy. Instances with only staging copies are left out.
pub async fn newest_per_instance(
    engine: &dyn Engine,
    prefix: Option<&str>,
    matcher: &NameMatcher,
    reporter: &Reporter,
) -> Result<BTreeMap<String, String>> {
    let mut newest: BTreeMap<String, Option<String>> = BTreeMap::new();
    for db in engine.list_databases().await? {
        let Some(instance) = db_to_instance(prefix, &db) else {
            continue;
        };
        if !matcher.matches_any(&instance) {
            continue;
        }
        let slot = newest.entry(instance).or_insert(None);
        if is_staging_name(prefix, &db) {
            continue;
        }
        // Date and time are zero-padded, so the lexical maximum is the newest.
        if slot.as_deref().is_none_or(|current| db.as_str() > current) {
            *slot = Some(db);
        }
    }

    let mut kept = BTreeMap::new();
    for (instance, keep) in newest {
        match keep {
            Some(keep) => {
                kept.insert(instance, keep);
            }
            None => reporter.say(format!("Skipping {}: only staging copies exist", instance)),
        }
    }
    Ok(kept)
}

/// Keeps the newest non-staging database of each matching instance and
/// cleans up the rest.
pub async fn clean_stale(
    engine: &dyn Engine,
    prefix: Option<&str>,
    matcher: &NameMatcher,
    reporter: &Reporter,
) -> Result<BTreeMap<String, CleanupReport>> {
    let mut reports = BTreeMap::new();
    for (instance, keep) in newest_per_instance(engine, prefix, matcher, reporter).await? {
        let report = cleanup(engine, prefix, &instance, &keep, reporter).await?;
        reports.insert(instance, report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;

    fn engine() -> FakeEngine {
        FakeEngine::new()
            .with_database("HQ_OCA_20161115_0102", "")
            .with_database("HQ_OCA_20161116_0102", "")
            .with_database("HQ_OCA_20161116_0102_4242", "")
            .with_database("HQ_OCB_20161116_0102", "")
            .with_database("SYNC_SERVER_LOCAL", "")
            .with_database("postgres", "")
    }

    #[tokio::test]
    async fn drops_only_same_instance_except_kept() {
        let engine = engine().with_session(5, "HQ_OCA_20161115_0102");
        let report = cleanup(
            &engine,
            None,
            "HQ_OCA",
            "HQ_OCA_20161116_0102",
            &Reporter::silent(),
        )
        .await
        .unwrap();

        assert_eq!(
            report.dropped,
            vec!["HQ_OCA_20161115_0102".to_string(), "HQ_OCA_20161116_0102_4242".to_string()]
        );
        assert!(report.is_clean());
        assert_eq!(
            engine.databases(),
            vec!["HQ_OCA_20161116_0102", "HQ_OCB_20161116_0102", "SYNC_SERVER_LOCAL", "postgres"]
        );
        assert!(engine.ops().contains(&"terminate 5".to_string()));
    }

    #[tokio::test]
    async fn one_failed_drop_does_not_stop_the_rest() {
        let engine = engine();
        engine
            .state()
            .fail_drop
            .insert("HQ_OCA_20161115_0102".to_string());
        let report = cleanup(
            &engine,
            None,
            "HQ_OCA",
            "HQ_OCA_20161116_0102",
            &Reporter::silent(),
        )
        .await
        .unwrap();
        assert_eq!(report.dropped, vec!["HQ_OCA_20161116_0102_4242".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "HQ_OCA_20161115_0102");
    }

    #[tokio::test]
    async fn prefix_limits_cleanup_to_own_databases() {
        let engine = FakeEngine::new()
            .with_database("dev_HQ_OCA_20161115_0102", "")
            .with_database("dev_HQ_OCA_20161116_0102", "")
            .with_database("HQ_OCA_20161115_0102", "");
        let report = cleanup(
            &engine,
            Some("dev"),
            "HQ_OCA",
            "dev_HQ_OCA_20161116_0102",
            &Reporter::silent(),
        )
        .await
        .unwrap();
        assert_eq!(report.dropped, vec!["dev_HQ_OCA_20161115_0102".to_string()]);
        assert!(engine.databases().contains(&"HQ_OCA_20161115_0102".to_string()));
    }

    #[tokio::test]
    async fn clean_stale_keeps_newest_per_instance() {
        let engine = engine().with_database("HQ_OCC_20161116_0102_99", "");
        let reports = clean_stale(&engine, None, &NameMatcher::accept_all(), &Reporter::silent())
            .await
            .unwrap();

        assert_eq!(reports.keys().collect::<Vec<_>>(), vec!["HQ_OCA", "HQ_OCB"]);
        assert_eq!(reports["HQ_OCA"].dropped.len(), 2);
        assert!(reports["HQ_OCB"].dropped.is_empty());
        assert!(engine.databases().contains(&"HQ_OCA_20161116_0102".to_string()));
        assert!(engine.databases().contains(&"HQ_OCC_20161116_0102_99".to_string()));
    }

    #[tokio::test]
    async fn newest_copy_is_kept_and_staging_only_instances_skipped() {
        let engine = engine().with_database("HQ_OCC_20161116_0102_99", "");
        let kept = newest_per_instance(&engine, None, &NameMatcher::accept_all(), &Reporter::silent())
            .await
            .unwrap();
        assert_eq!(kept["HQ_OCA"], "HQ_OCA_20161116_0102");
        assert!(!kept.contains_key("HQ_OCC"));

        let stale = stale_databases(&engine, None, "HQ_OCA", &kept["HQ_OCA"])
            .await
            .unwrap();
        assert_eq!(stale, vec!["HQ_OCA_20161115_0102", "HQ_OCA_20161116_0102_4242"]);
        assert!(engine.ops().is_empty());
    }

    #[tokio::test]
    async fn clean_stale_honours_filters() {
        let engine = engine();
        let matcher = NameMatcher::new(&["OCB"], false).unwrap();
        let reports = clean_stale(&engine, None, &matcher, &Reporter::silent())
            .await
            .unwrap();
        assert_eq!(reports.keys().collect::<Vec<_>>(), vec!["HQ_OCB"]);
        assert_eq!(engine.databases().len(), 6);
    }
}
