// erpload/src/sync/hwid.rs
//! Per-host hardware identity, derived from the network interface addresses.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

pub trait HardwareIdProvider: Send + Sync {
    /// Hardware addresses of this host, or `None` when they cannot be read.
    fn mac_addresses(&self) -> Option<Vec<String>>;
}

fn mac_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b([0-9a-f]{2}[:-]){5}[0-9a-f]{2}\b").expect("static regex is valid")
    })
}

/// MAC addresses found in tool output, normalised to lower-case `aa:bb:..`,
/// with the all-zero address dropped.
pub fn extract_macs(text: &str) -> Vec<String> {
    mac_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase().replace('-', ":"))
        .filter(|mac| mac != "00:00:00:00:00:00")
        .collect()
}

/// Reads `/sys/class/net/<iface>/address`.
pub struct SysfsInterfaces {
    root: PathBuf,
}

impl SysfsInterfaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl HardwareIdProvider for SysfsInterfaces {
    fn mac_addresses(&self) -> Option<Vec<String>> {
        let entries = std::fs::read_dir(&self.root).ok()?;
        let mut macs = Vec::new();
        for entry in entries.flatten() {
            if entry.file_name() == "lo" {
                continue;
            }
            if let Ok(address) = std::fs::read_to_string(entry.path().join("address")) {
                macs.extend(extract_macs(&address));
            }
        }
        Some(macs)
    }
}

/// Parses the output of a command that lists interface addresses
/// (`ifconfig` on macOS, `getmac` on Windows).
pub struct CommandInterfaces {
    program: &'static str,
    args: &'static [&'static str],
}

impl CommandInterfaces {
    pub fn ifconfig() -> Self {
        Self {
            program: "ifconfig",
            args: &["-a"],
        }
    }

    pub fn getmac() -> Self {
        Self {
            program: "getmac",
            args: &["/fo", "csv", "/nh"],
        }
    }
}

impl HardwareIdProvider for CommandInterfaces {
    fn mac_addresses(&self) -> Option<Vec<String>> {
        let output = Command::new(self.program).args(self.args).output().ok()?;
        if !output.status.success() {
            tracing::warn!("{} exited with {}", self.program, output.status);
            return None;
        }
        Some(extract_macs(&String::from_utf8_lossy(&output.stdout)))
    }
}

pub fn platform_provider() -> Box<dyn HardwareIdProvider> {
    if cfg!(windows) {
        Box::new(CommandInterfaces::getmac())
    } else if cfg!(target_os = "macos") {
        Box::new(CommandInterfaces::ifconfig())
    } else {
        Box::new(SysfsInterfaces::new("/sys/class/net"))
    }
}

/// Hex SHA-256 over the sorted, de-duplicated addresses; `None` if there are none.
pub fn hardware_id_from(mut macs: Vec<String>) -> Option<String> {
    macs.sort();
    macs.dedup();
    if macs.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    for mac in &macs {
        hasher.update(mac.as_bytes());
    }
    Some(hex::encode(hasher.finalize()))
}

/// Computes the hardware id on first use and keeps it for the process lifetime.
pub struct CachedHardwareId {
    provider: Box<dyn HardwareIdProvider>,
    value: OnceLock<Option<String>>,
}

impl CachedHardwareId {
    pub fn new(provider: Box<dyn HardwareIdProvider>) -> Self {
        Self {
            provider,
            value: OnceLock::new(),
        }
    }

    pub fn for_this_host() -> Self {
        Self::new(platform_provider())
    }

    pub fn get(&self) -> Option<&str> {
        self.value
            .get_or_init(|| self.provider.mac_addresses().and_then(hardware_id_from))
            .as_deref()
    }
}
