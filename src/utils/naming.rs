// erpload/src/utils/naming.rs
//! Instance and database naming rules.
//!
//! Payload files are named `<INSTANCE>-<YYYYMMDD>-<HHMMSS>-<...>.dump`. The
//! database restored from such a file is `<INSTANCE>_<YYYYMMDD>_<HHMM>`,
//! optionally prefixed with `<prefix>_`. A staging copy appends `_<pid>`.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn db_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<instance>.+?)_(?P<date>\d{8})_(?P<time>\d{4})(?:_(?P<pid>\d+))?$")
            .expect("static regex is valid")
    })
}

/// Database name for a payload file, or `None` when the name does not carry
/// an instance, a date and a time token.
///
/// `OCG_MM1_WA-20160831-220427-A-UF2.1-2p3.dump` becomes `OCG_MM1_WA_20160831_2204`.
pub fn file_to_db(prefix: Option<&str>, file_name: &str) -> Option<String> {
    let base = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let tokens: Vec<&str> = base.split('-').collect();
    if tokens.len() < 3 || tokens[2].len() != 6 || !tokens[2].is_ascii() {
        return None;
    }
    if tokens[0].is_empty() || tokens[1].is_empty() {
        return None;
    }
    let db = format!("{}_{}_{}", tokens[0], tokens[1], &tokens[2][0..4]);
    Some(with_prefix(prefix, db))
}

/// Instance key a database belongs to: the prefix and the date/time (and
/// optional staging pid) suffix removed.
pub fn db_to_instance(prefix: Option<&str>, db_name: &str) -> Option<String> {
    let unprefixed = match prefix.filter(|p| !p.is_empty()) {
        Some(p) => db_name.strip_prefix(p)?.strip_prefix('_')?,
        None => db_name,
    };
    db_suffix_regex()
        .captures(unprefixed)
        .and_then(|caps| caps.name("instance"))
        .map(|m| m.as_str().to_string())
}

/// True when the database name carries a staging pid suffix.
pub fn is_staging_name(prefix: Option<&str>, db_name: &str) -> bool {
    let unprefixed = match prefix.filter(|p| !p.is_empty()) {
        Some(p) => match db_name.strip_prefix(p).and_then(|n| n.strip_prefix('_')) {
            Some(rest) => rest,
            None => return false,
        },
        None => db_name,
    };
    db_suffix_regex()
        .captures(unprefixed)
        .is_some_and(|caps| caps.name("pid").is_some())
}

/// Catalog grouping key of a remote archive: the file name with its last
/// dash-delimited token removed.
pub fn archive_instance_key(file_name: &str) -> Option<String> {
    let (key, _) = file_name.rsplit_once('-')?;
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

pub fn staging_name(target: &str, pid: u32) -> String {
    format!("{}_{}", target, pid)
}

pub fn with_prefix(prefix: Option<&str>, name: String) -> String {
    match prefix.filter(|p| !p.is_empty()) {
        Some(p) => format!("{}_{}", p, name),
        None => name,
    }
}
