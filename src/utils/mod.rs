pub mod naming;
pub mod progress;
pub mod retry;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use which::which;

/// Install roots that hold one `<version>/bin` directory per server version.
fn versioned_install_roots() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![
            PathBuf::from(r"C:\Program Files\PostgreSQL"),
            PathBuf::from(r"C:\Program Files (x86)\PostgreSQL"),
        ]
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from("/Applications/Postgres.app/Contents/Versions")]
    } else {
        vec![PathBuf::from("/usr/lib/postgresql")]
    }
}

fn executable_file_name(tool: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", tool)
    } else {
        tool.to_string()
    }
}

/// Newest `<root>/<version>/bin/<tool>` found under the platform install roots.
fn find_in_install_roots(tool: &str) -> Option<PathBuf> {
    let file_name = executable_file_name(tool);
    let mut found: Vec<(u32, PathBuf)> = Vec::new();
    for root in versioned_install_roots() {
        let Ok(versions) = std::fs::read_dir(&root) else {
            continue;
        };
        for version in versions.flatten() {
            let candidate = version.path().join("bin").join(&file_name);
            if candidate.is_file() {
                let major = version
                    .file_name()
                    .to_string_lossy()
                    .split('.')
                    .next()
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(0);
                found.push((major, candidate));
            }
        }
    }
    found.sort();
    found.pop().map(|(_, path)| path)
}

/// Finds a PostgreSQL client tool: the configured bin directory first, then
/// the PATH, then the platform's usual install locations.
pub fn find_pg_executable(tool: &str, bin_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = bin_dir {
        let candidate = dir.join(executable_file_name(tool));
        if candidate.is_file() {
            return Ok(candidate);
        }
        tracing::warn!("{} not found in configured postgres_bin_dir {}", tool, dir.display());
    }
    if let Ok(path) = which(tool) {
        return Ok(path);
    }
    find_in_install_roots(tool).with_context(|| {
        format!(
            "{} executable not found in PATH. Please ensure PostgreSQL client tools are installed and in your PATH, or set postgres_bin_dir.",
            tool
        )
    })
}

/// Name of this host, used to tag posted logs.
pub fn hostname() -> String {
    for var in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(name) = std::env::var(var) {
            if !name.trim().is_empty() {
                return name.trim().to_string();
            }
        }
    }
    Command::new("hostname")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
