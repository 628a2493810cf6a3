//! Local address discovery for relay names.
//!
//! Interfaces are read into plain descriptors first, then filtered by an
//! [`AddressPolicy`]. Only the live [`SystemInterfaces`] source touches the OS.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::utils::command::{ToolCommand, ToolRun};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInfo {
    pub name: String,
    pub address: IpAddr,
    /// The OS flagged the interface as loopback.
    pub loopback: bool,
}

impl InterfaceInfo {
    pub fn new(name: impl Into<String>, address: IpAddr, loopback: bool) -> Self {
        Self {
            name: name.into(),
            address,
            loopback,
        }
    }
}

pub trait InterfaceSource {
    /// Interfaces in enumeration order, one entry per assigned address.
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum Exclusion {
    Loopback,
    VirtualBridge(String),
    LinkLocal,
    NotIpv4,
    OutsideSubnet(String),
}

impl std::fmt::Display for Exclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exclusion::Loopback => write!(f, "loopback"),
            Exclusion::VirtualBridge(prefix) => write!(f, "virtual interface ({}*)", prefix),
            Exclusion::LinkLocal => write!(f, "link-local"),
            Exclusion::NotIpv4 => write!(f, "not IPv4"),
            Exclusion::OutsideSubnet(subnet) => write!(f, "outside {}.0/24", subnet),
        }
    }
}

/// Which addresses may be embedded in relay names.
#[derive(Debug, Clone)]
pub struct AddressPolicy {
    pub excluded_prefixes: Vec<String>,
    /// First three octets the address must share with the target (subnet-affinity mode).
    pub subnet: Option<[u8; 3]>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub interface: InterfaceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded: Option<Exclusion>,
}

impl AddressPolicy {
    pub fn new(excluded_prefixes: Vec<String>) -> Self {
        Self {
            excluded_prefixes,
            subnet: None,
        }
    }

    pub fn with_subnet(mut self, subnet: Option<[u8; 3]>) -> Self {
        self.subnet = subnet;
        self
    }

    /// `None` means the interface is eligible.
    pub fn exclusion(&self, iface: &InterfaceInfo) -> Option<Exclusion> {
        if iface.loopback || iface.address.is_loopback() || iface.name == "lo" {
            return Some(Exclusion::Loopback);
        }

        if let Some(prefix) = self
            .excluded_prefixes
            .iter()
            .find(|p| !p.is_empty() && iface.name.starts_with(p.as_str()))
        {
            return Some(Exclusion::VirtualBridge(prefix.clone()));
        }

        let v4 = match iface.address {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => {
                if (v6.segments()[0] & 0xffc0) == 0xfe80 {
                    return Some(Exclusion::LinkLocal);
                }
                return Some(Exclusion::NotIpv4);
            }
        };

        if v4.is_link_local() {
            return Some(Exclusion::LinkLocal);
        }

        if let Some(subnet) = self.subnet {
            let octets = v4.octets();
            if octets[..3] != subnet {
                return Some(Exclusion::OutsideSubnet(format!(
                    "{}.{}.{}",
                    subnet[0], subnet[1], subnet[2]
                )));
            }
        }

        None
    }

    pub fn evaluate(&self, interfaces: &[InterfaceInfo]) -> Vec<Candidate> {
        interfaces
            .iter()
            .map(|iface| Candidate {
                interface: iface.clone(),
                excluded: self.exclusion(iface),
            })
            .collect()
    }

    /// First eligible address in enumeration order.
    pub fn select(&self, interfaces: &[InterfaceInfo]) -> Result<Ipv4Addr> {
        for iface in interfaces {
            if self.exclusion(iface).is_none() {
                if let IpAddr::V4(v4) = iface.address {
                    return Ok(v4);
                }
            }
        }

        let considered = interfaces
            .iter()
            .map(|i| format!("{} {}", i.name, i.address))
            .collect();
        let subnet = self
            .subnet
            .map(|s| format!("{}.{}.{}.0/24", s[0], s[1], s[2]));
        Err(Error::address_not_found(considered, subnet))
    }
}

/// Pick the address to embed in relay names.
pub fn discover(source: &dyn InterfaceSource, policy: &AddressPolicy) -> Result<Ipv4Addr> {
    let interfaces = source.interfaces()?;
    let address = policy.select(&interfaces)?;
    log_debug!("address", "Selected local address {}", address);
    Ok(address)
}

/// First three octets of the target's IPv4 address, resolving hostnames.
pub fn target_subnet(host: &str) -> Result<[u8; 3]> {
    let v4 = match host.parse::<Ipv4Addr>() {
        Ok(v4) => v4,
        Err(_) => (host, 0)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| {
                addrs.find_map(|a| match a.ip() {
                    IpAddr::V4(v4) => Some(v4),
                    IpAddr::V6(_) => None,
                })
            })
            .ok_or_else(|| {
                Error::address_not_found(Vec::new(), None).with_detail(
                    "problem",
                    serde_json::json!(format!("Could not resolve '{}' to an IPv4 address", host)),
                )
            })?,
    };
    let o = v4.octets();
    Ok([o[0], o[1], o[2]])
}

// ============================================================================
// Live enumeration
// ============================================================================

/// Reads interfaces from `ip -j addr show`, falling back to `ifconfig`.
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        if let ToolRun::Completed(out) = ToolCommand::new("ip").args(["-j", "addr", "show"]).run() {
            if out.success {
                return parse_ip_json(&out.stdout);
            }
        }

        match ToolCommand::new("ifconfig").run() {
            ToolRun::Completed(out) if out.success => Ok(parse_ifconfig(&out.stdout)),
            ToolRun::Completed(out) => Err(Error::internal_io(
                out.error_text(),
                Some("enumerate network interfaces".to_string()),
            )),
            ToolRun::Unavailable(error) => Err(Error::internal_io(
                format!("neither 'ip' nor 'ifconfig' is available: {}", error),
                Some("enumerate network interfaces".to_string()),
            )),
        }
    }
}

#[derive(Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Deserialize)]
struct IpAddrInfo {
    #[serde(default)]
    local: Option<String>,
}

pub fn parse_ip_json(json: &str) -> Result<Vec<InterfaceInfo>> {
    let links: Vec<IpLink> = serde_json::from_str(json).map_err(|e| {
        Error::internal_json(e.to_string(), Some("parse 'ip -j addr show'".to_string()))
    })?;

    let mut out = Vec::new();
    for link in links {
        let loopback = link.flags.iter().any(|f| f == "LOOPBACK");
        for info in link.addr_info {
            if let Some(address) = info.local.and_then(|l| l.parse::<IpAddr>().ok()) {
                out.push(InterfaceInfo::new(link.ifname.clone(), address, loopback));
            }
        }
    }
    Ok(out)
}

// `en0: flags=8863<UP,...>` (BSD and net-tools) or `eth0  Link encap:Ethernet` (old net-tools)
static IFCONFIG_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_.\-]+):?\s+(?:flags=\d+<([^>]*)>|Link encap:(\S+))").unwrap()
});

static IFCONFIG_INET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+inet6?\s+(?:addr:\s*)?([0-9A-Fa-f.:%a-z0-9]+)").unwrap());

pub fn parse_ifconfig(text: &str) -> Vec<InterfaceInfo> {
    let header = &*IFCONFIG_HEADER;
    let inet = &*IFCONFIG_INET;

    let mut out = Vec::new();
    let mut current: Option<(String, bool)> = None;

    for line in text.lines() {
        if let Some(caps) = header.captures(line) {
            let name = caps[1].trim_end_matches(':').to_string();
            let loopback = caps
                .get(2)
                .map(|f| f.as_str().split(',').any(|flag| flag == "LOOPBACK"))
                .unwrap_or(false)
                || caps.get(3).map(|e| e.as_str() == "Local").unwrap_or(false);
            current = Some((name, loopback));
            continue;
        }

        if let (Some((name, loopback)), Some(caps)) = (&current, inet.captures(line)) {
            let raw = caps[1].split('%').next().unwrap_or_default();
            if let Ok(address) = raw.parse::<IpAddr>() {
                out.push(InterfaceInfo::new(name.clone(), address, *loopback));
            }
        }
    }

    out
}
