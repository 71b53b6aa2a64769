// erpload/src/catalog/mod.rs
pub(crate) mod matcher;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::archive::ArchiveKind;
use crate::store::{RemoteFile, RemoteStore};
use crate::utils::naming::archive_instance_key;
use crate::utils::progress::Reporter;

pub use matcher::NameMatcher;

/// Archives modified more recently than this may still be uploading.
pub const MIN_AGE_SECONDS: i64 = 900;

/// Candidates per instance key, newest first.
pub type InstanceGroups = BTreeMap<String, Vec<RemoteFile>>;

/// Outcome of listing one remote directory.
#[derive(Debug, Default)]
pub struct Catalog {
    pub groups: InstanceGroups,
    /// Set when the directory could not be listed at all; `groups` is then
    /// empty, which is not the same as "no candidates".
    pub discovery_error: Option<String>,
}

/// Lists `directory` and groups its usable archives per instance.
pub async fn list_candidates(
    store: &dyn RemoteStore,
    directory: &str,
    matcher: &NameMatcher,
    now: DateTime<Utc>,
    reporter: &Reporter,
) -> Catalog {
    let entries = match store.list(directory).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("listing {} failed: {}", directory, e);
            reporter.say(format!("Could not list {}: {}", directory, e));
            return Catalog {
                groups: InstanceGroups::new(),
                discovery_error: Some(e.to_string()),
            };
        }
    };
    Catalog {
        groups: group_candidates(entries, matcher, now),
        discovery_error: None,
    }
}

/// Filters, groups and orders a raw listing.
pub fn group_candidates(
    entries: Vec<RemoteFile>,
    matcher: &NameMatcher,
    now: DateTime<Utc>,
) -> InstanceGroups {
    let mut groups = InstanceGroups::new();
    for entry in entries {
        if ArchiveKind::from_name(&entry.name).is_none() {
            tracing::warn!("ignoring non-archive file: {}", entry.path);
            continue;
        }
        if (now - entry.last_modified).num_seconds().abs() < MIN_AGE_SECONDS {
            tracing::debug!("skipping {} (too recent)", entry.path);
            continue;
        }
        let Some(key) = archive_instance_key(&entry.name) else {
            tracing::warn!("unexpected archive name: {}", entry.name);
            continue;
        };
        groups.entry(key).or_insert_with(Vec::new).push(entry);
    }

    groups.retain(|key, _| matcher.matches_any(key));
    for candidates in groups.values_mut() {
        candidates.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| b.name.cmp(&a.name))
        });
    }
    groups
}
