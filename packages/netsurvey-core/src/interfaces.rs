//! Interface inventory collection.
//!
//! Turns decoded OpenConfig interface updates into per-device
//! [`InterfaceRecord`]s. Two modes:
//! - brief: every interface with summary fields, plus summary statistics
//! - detailed: one named interface with MTU, Ethernet and counter data

use crate::decoder::UpdateRecord;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::net::Ipv4Addr;

/// Name prefixes (lowercase) of out-of-band management ports
const MANAGEMENT_PREFIXES: &[&str] = &["mgmteth", "management", "mgmt", "fxp0", "em0"];

/// Container keys that may wrap the interface list
const INTERFACES_KEYS: &[&str] = &["openconfig-interfaces:interfaces", "interfaces"];
const INTERFACE_LIST_KEYS: &[&str] = &["interface", "openconfig-interfaces:interface"];

/// Check if an interface name follows a management-port naming convention.
pub fn is_management_interface(name: &str) -> bool {
    let name = name.to_lowercase();
    MANAGEMENT_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Check if an interface name looks like a device loopback ("Loopback0", "lo", "lo0").
pub fn is_loopback_interface(name: &str) -> bool {
    let name = name.to_lowercase();
    if name.starts_with("loopback") {
        return true;
    }
    match name.strip_prefix("lo") {
        Some(rest) => rest.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMode {
    Brief,
    Detailed,
}

/// Status flag surfaced on detailed interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterfaceStatus {
    /// Exists but has no IP address, description or VRF
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceCounters {
    pub in_packets: Option<u64>,
    pub out_packets: Option<u64>,
    pub in_errors: Option<u64>,
    pub out_errors: Option<u64>,
}

/// Fields only reported in detailed mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceDetails {
    pub mtu: Option<u32>,
    pub mac_address: Option<String>,
    pub speed: Option<String>,
    pub duplex: Option<String>,
    pub counters: InterfaceCounters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceRecord {
    pub device: String,
    pub name: String,
    pub admin_state: Option<String>,
    pub oper_state: Option<String>,
    pub ip_address: Option<Ipv4Addr>,
    pub prefix_length: Option<u8>,
    pub vrf: Option<String>,
    pub description: Option<String>,
    pub is_management: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<InterfaceDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<InterfaceStatus>,
}

impl InterfaceRecord {
    /// True when nothing is configured: no IP, no description, no VRF.
    pub fn is_unconfigured(&self) -> bool {
        self.ip_address.is_none()
            && self.description.as_deref().is_none_or(str::is_empty)
            && self.vrf.is_none()
    }
}

/// Counts reported alongside a brief inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceSummary {
    pub total_interfaces: usize,
    pub admin_up: usize,
    pub admin_down: usize,
    pub oper_up: usize,
    pub oper_down: usize,
    pub with_ip: usize,
    pub with_vrf: usize,
}

impl InterfaceSummary {
    pub fn from_interfaces(interfaces: &[InterfaceRecord]) -> Self {
        let is_up = |state: &Option<String>| {
            state.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("UP"))
        };

        let total = interfaces.len();
        let admin_up = interfaces.iter().filter(|i| is_up(&i.admin_state)).count();
        let oper_up = interfaces.iter().filter(|i| is_up(&i.oper_state)).count();

        Self {
            total_interfaces: total,
            admin_up,
            admin_down: total - admin_up,
            oper_up,
            oper_down: total - oper_up,
            with_ip: interfaces.iter().filter(|i| i.ip_address.is_some()).count(),
            with_vrf: interfaces.iter().filter(|i| i.vrf.is_some()).count(),
        }
    }
}

/// Interfaces collected from one device in one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceInventory {
    pub device: String,
    pub mode: CollectionMode,
    pub interfaces: Vec<InterfaceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<InterfaceSummary>,
}

/// Build the interface inventory of `device` from decoded updates.
///
/// With `interface_filter` set, only the named interface is returned in
/// detailed form; an empty list means the device did not report it.
pub fn collect(
    device: &str,
    records: &[UpdateRecord],
    interface_filter: Option<&str>,
) -> InterfaceInventory {
    let decoded = decode_interfaces(records);

    match interface_filter {
        None => {
            let interfaces: Vec<InterfaceRecord> = decoded
                .iter()
                .filter_map(|oc| to_record(device, oc, false))
                .collect();
            let summary = InterfaceSummary::from_interfaces(&interfaces);

            if interfaces.is_empty() {
                tracing::warn!(
                    "No interfaces found on device {} - check device connectivity or interface collection",
                    device
                );
            } else {
                tracing::debug!("Collected {} interfaces from {}", interfaces.len(), device);
            }

            InterfaceInventory {
                device: device.to_string(),
                mode: CollectionMode::Brief,
                interfaces,
                summary: Some(summary),
            }
        }
        Some(wanted) => {
            let interfaces: Vec<InterfaceRecord> = decoded
                .iter()
                .filter(|oc| {
                    oc.name
                        .as_deref()
                        .is_some_and(|n| n.eq_ignore_ascii_case(wanted))
                })
                .take(1)
                .filter_map(|oc| to_record(device, oc, true))
                .map(|mut record| {
                    if record.is_unconfigured() {
                        tracing::info!(
                            "Interface {} on {} exists but appears to be empty/unconfigured",
                            record.name,
                            device
                        );
                        record.status = Some(InterfaceStatus::Empty);
                    }
                    record
                })
                .collect();

            InterfaceInventory {
                device: device.to_string(),
                mode: CollectionMode::Detailed,
                interfaces,
                summary: None,
            }
        }
    }
}

/// Locate interface objects in the update values and decode each on its own,
/// so one malformed entry does not hide the others.
fn decode_interfaces(records: &[UpdateRecord]) -> Vec<OcInterface> {
    let mut raw: Vec<(&Value, &str)> = Vec::new();

    for record in records {
        let mut value = &record.value;
        if let Some(inner) = INTERFACES_KEYS.iter().find_map(|k| value.get(k)) {
            value = inner;
        }

        match INTERFACE_LIST_KEYS.iter().find_map(|k| value.get(k)) {
            Some(Value::Array(list)) => raw.extend(list.iter().map(|v| (v, ""))),
            Some(single @ Value::Object(_)) => raw.push((single, "")),
            _ if value.is_object() => raw.push((value, record.path.as_str())),
            _ => tracing::debug!("Skipping non-interface update at '{}'", record.path),
        }
    }

    raw.into_iter()
        .filter_map(|(value, path)| match OcInterface::deserialize(value) {
            Ok(mut interface) => {
                if interface.name.is_none() {
                    interface.name = name_from_path(path);
                }
                Some(interface)
            }
            Err(e) => {
                tracing::warn!("Malformed interface entry, skipping: {}", e);
                None
            }
        })
        .collect()
}

/// `.../interface[name=Gi0/0/0/0]/...` -> `Gi0/0/0/0`
fn name_from_path(path: &str) -> Option<String> {
    const KEY: &str = "interface[name=";
    let start = path.rfind(KEY)? + KEY.len();
    let end = path[start..].find(']')?;
    Some(path[start..start + end].to_string()).filter(|n| !n.is_empty())
}

fn to_record(device: &str, oc: &OcInterface, detailed: bool) -> Option<InterfaceRecord> {
    let name = oc.name.clone()?;
    let state = oc.state.as_ref();

    let primary = oc
        .subinterfaces
        .as_ref()
        .and_then(|s| s.subinterface.iter().find(|sub| sub.index == Some(0)));

    let (ip_address, prefix_length) = primary
        .and_then(|sub| sub.ipv4.as_ref())
        .and_then(|ipv4| ipv4.addresses.as_ref())
        .and_then(|addrs| addrs.address.first())
        .map(|addr| primary_address(&name, addr))
        .unwrap_or((None, None));

    let vrf = primary.and_then(|sub| {
        sub.vrf_instance
            .clone()
            .or_else(|| sub.network_instance.first().and_then(|ni| ni.name.clone()))
    });

    let details = detailed.then(|| {
        let ethernet = oc.ethernet.as_ref().and_then(|e| e.state.as_ref());
        let counters = state.and_then(|s| s.counters.as_ref());
        InterfaceDetails {
            mtu: state.and_then(|s| s.mtu),
            mac_address: ethernet.and_then(|e| e.mac_address.clone()),
            speed: ethernet.and_then(|e| e.port_speed.clone()),
            duplex: ethernet.and_then(|e| e.duplex_mode.clone()),
            counters: InterfaceCounters {
                in_packets: counters.and_then(|c| c.in_pkts),
                out_packets: counters.and_then(|c| c.out_pkts),
                in_errors: counters.and_then(|c| c.in_errors),
                out_errors: counters.and_then(|c| c.out_errors),
            },
        }
    });

    Some(InterfaceRecord {
        device: device.to_string(),
        is_management: is_management_interface(&name),
        admin_state: state.and_then(|s| s.admin_status.clone()),
        oper_state: state.and_then(|s| s.oper_status.clone()),
        description: state.and_then(|s| s.description.clone()),
        ip_address,
        prefix_length,
        vrf,
        details,
        status: None,
        name,
    })
}

fn primary_address(interface: &str, addr: &OcAddress) -> (Option<Ipv4Addr>, Option<u8>) {
    let ip = addr.ip.as_deref().and_then(|ip| match ip.parse::<Ipv4Addr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            tracing::debug!("Ignoring non-IPv4 address '{}' on {}", ip, interface);
            None
        }
    });
    let prefix = addr
        .state
        .as_ref()
        .and_then(|s| s.prefix_length)
        .filter(|p| *p <= 32);
    (ip, prefix)
}

// OpenConfig interface model, reduced to the fields collected above.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OcInterface {
    name: Option<String>,
    state: Option<OcInterfaceState>,
    #[serde(rename = "openconfig-if-ethernet:ethernet", alias = "ethernet")]
    ethernet: Option<OcEthernet>,
    subinterfaces: Option<OcSubinterfaces>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct OcInterfaceState {
    admin_status: Option<String>,
    oper_status: Option<String>,
    description: Option<String>,
    #[serde(deserialize_with = "lenient_u32")]
    mtu: Option<u32>,
    counters: Option<OcCounters>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct OcCounters {
    #[serde(deserialize_with = "lenient_u64")]
    in_pkts: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    out_pkts: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    in_errors: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    out_errors: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OcEthernet {
    state: Option<OcEthernetState>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct OcEthernetState {
    mac_address: Option<String>,
    port_speed: Option<String>,
    duplex_mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OcSubinterfaces {
    subinterface: Vec<OcSubinterface>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OcSubinterface {
    #[serde(deserialize_with = "lenient_u32")]
    index: Option<u32>,
    #[serde(rename = "openconfig-if-ip:ipv4", alias = "ipv4")]
    ipv4: Option<OcIpv4>,
    #[serde(rename = "openconfig-network-instance:network-instance")]
    network_instance: Vec<OcNamed>,
    #[serde(rename = "vrf-instance")]
    vrf_instance: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OcIpv4 {
    addresses: Option<OcAddresses>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OcAddresses {
    address: Vec<OcAddress>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OcAddress {
    ip: Option<String>,
    state: Option<OcAddressState>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct OcAddressState {
    #[serde(deserialize_with = "lenient_u8")]
    prefix_length: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OcNamed {
    name: Option<String>,
}

/// Devices encode 64-bit counters as JSON strings; accept either form and
/// treat anything else as absent.
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    Ok(lenient_u64(deserializer)?.and_then(|v| u32::try_from(v).ok()))
}

fn lenient_u8<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u8>, D::Error> {
    Ok(lenient_u64(deserializer)?.and_then(|v| u8::try_from(v).ok()))
}
