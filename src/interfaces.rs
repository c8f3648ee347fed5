use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sysinfo::Networks;
use thiserror::Error;

const SYSFS_NET: &str = "/sys/class/net";

// ARPHRD_* values from linux/if_arp.h
const ARPHRD_ETHER: u32 = 1;
const ARPHRD_LOOPBACK: u32 = 772;
const ARPHRD_TUNNEL_TYPES: [u32; 6] = [768, 769, 776, 778, 823, 65534];

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("reading {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperState {
    Up,
    Down,
    Unknown,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Ethernet,
    Wireless,
    Loopback,
    Tunnel,
    Other,
}

/// An OS network interface as seen during one resolution cycle.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct InterfaceHandle {
    pub id: String,
    pub name: String,
    pub kind: InterfaceKind,
    pub oper_state: OperState,
    /// Nominal link speed in bits per second, when the driver reports one.
    pub link_speed: Option<u64>,
}

impl InterfaceHandle {
    pub fn is_up(&self) -> bool {
        self.oper_state == OperState::Up
    }

    /// Whether this interface may be picked for measurement.
    pub fn is_eligible(&self) -> bool {
        self.is_up() && !matches!(self.kind, InterfaceKind::Loopback | InterfaceKind::Tunnel)
    }
}

/// Cumulative byte counters of one interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ByteCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Source of interface metadata and byte counters.
pub trait InterfaceProvider: Send {
    /// Every interface the OS reports, eligible or not.
    fn list(&mut self) -> Result<Vec<InterfaceHandle>, ProbeError>;

    /// Fresh state of a single interface, `None` once it has vanished.
    fn lookup(&mut self, id: &str) -> Result<Option<InterfaceHandle>, ProbeError> {
        Ok(self.list()?.into_iter().find(|i| i.id == id))
    }

    fn counters(&mut self, id: &str) -> Result<Option<ByteCounters>, ProbeError>;
}

/// Interfaces that may be measured, in enumeration order.
pub fn eligible(all: Vec<InterfaceHandle>) -> Vec<InterfaceHandle> {
    all.into_iter().filter(InterfaceHandle::is_eligible).collect()
}

/// Provider backed by `sysinfo`, enriched from sysfs on Linux.
pub struct SystemProvider {
    networks: Networks,
    sysfs_root: PathBuf,
}

impl SystemProvider {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            sysfs_root: PathBuf::from(SYSFS_NET),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_sysfs_root(root: impl Into<PathBuf>) -> Self {
        Self {
            networks: Networks::new(),
            sysfs_root: root.into(),
        }
    }

    /// Handle for an interface sysinfo reports, without sysfs metadata.
    fn describe_reported(name: &str) -> InterfaceHandle {
        InterfaceHandle {
            id: name.to_string(),
            name: name.to_string(),
            kind: guess_kind(name),
            oper_state: OperState::Up,
            link_speed: None,
        }
    }
}

impl Default for SystemProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceProvider for SystemProvider {
    fn list(&mut self) -> Result<Vec<InterfaceHandle>, ProbeError> {
        if cfg!(target_os = "linux") {
            let mut names = list_sysfs_names(&self.sysfs_root)?;
            names.sort();
            // entries that are not interface directories (bonding_masters) are skipped
            return Ok(names
                .iter()
                .filter_map(|n| read_sysfs_interface(&self.sysfs_root, n))
                .collect());
        }
        self.networks.refresh_list();
        let mut names: Vec<String> = self.networks.keys().cloned().collect();
        names.sort();
        Ok(names.iter().map(|n| Self::describe_reported(n)).collect())
    }

    fn lookup(&mut self, id: &str) -> Result<Option<InterfaceHandle>, ProbeError> {
        if cfg!(target_os = "linux") {
            return Ok(read_sysfs_interface(&self.sysfs_root, id));
        }
        self.networks.refresh();
        Ok(self.networks.contains_key(id).then(|| Self::describe_reported(id)))
    }

    fn counters(&mut self, id: &str) -> Result<Option<ByteCounters>, ProbeError> {
        self.networks.refresh();
        if !self.networks.contains_key(id) {
            // Interface may have appeared after the last list refresh.
            self.networks.refresh_list();
        }
        Ok(self.networks.get(id).map(|data| ByteCounters {
            rx_bytes: data.total_received(),
            tx_bytes: data.total_transmitted(),
        }))
    }
}

fn guess_kind(name: &str) -> InterfaceKind {
    if name == "lo" || name.starts_with("lo0") || name.starts_with("Loopback") {
        InterfaceKind::Loopback
    } else if ["tun", "utun", "tap", "wg", "gif", "stf", "ipsec"]
        .iter()
        .any(|p| name.starts_with(p))
    {
        InterfaceKind::Tunnel
    } else if ["wl", "wlan", "wifi"].iter().any(|p| name.starts_with(p)) {
        InterfaceKind::Wireless
    } else if ["eth", "en", "em"].iter().any(|p| name.starts_with(p)) {
        InterfaceKind::Ethernet
    } else {
        InterfaceKind::Other
    }
}

fn list_sysfs_names(root: &Path) -> Result<Vec<String>, ProbeError> {
    let io_err = |source| ProbeError::Io {
        path: root.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(root).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    fs::read_to_string(dir.join(attr))
        .ok()
        .map(|s| s.trim().to_string())
}

/// Reads the attributes of `root/<name>` the way `/sys/class/net` lays them out.
pub(crate) fn read_sysfs_interface(root: &Path, name: &str) -> Option<InterfaceHandle> {
    let dir = root.join(name);
    if !dir.is_dir() {
        return None;
    }

    let arp_type = read_attr(&dir, "type").and_then(|t| t.parse::<u32>().ok());
    let kind = match arp_type {
        Some(ARPHRD_LOOPBACK) => InterfaceKind::Loopback,
        Some(t) if ARPHRD_TUNNEL_TYPES.contains(&t) => InterfaceKind::Tunnel,
        Some(ARPHRD_ETHER) if dir.join("wireless").exists() => InterfaceKind::Wireless,
        Some(ARPHRD_ETHER) => InterfaceKind::Ethernet,
        Some(_) => InterfaceKind::Other,
        None => guess_kind(name),
    };

    let carrier = read_attr(&dir, "carrier").as_deref() == Some("1");
    let oper_state = match read_attr(&dir, "operstate").as_deref() {
        Some("up") => OperState::Up,
        Some("unknown") | None if carrier => OperState::Up,
        Some("unknown") | None => OperState::Unknown,
        Some(_) => OperState::Down,
    };

    // speed is in Mbit/s; -1 or a read error means the driver does not know
    let link_speed = read_attr(&dir, "speed")
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|mbit| *mbit > 0)
        .map(|mbit| mbit as u64 * 1_000_000);

    let display = read_attr(&dir, "ifalias")
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| name.to_string());

    Some(InterfaceHandle {
        id: name.to_string(),
        name: display,
        kind,
        oper_state,
        link_speed,
    })
}
