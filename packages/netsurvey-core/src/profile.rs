//! Device role classification.
//!
//! A device's role is derived from a handful of feature flags, each read
//! from the profile query's update records. Record paths are normalized to
//! bare segments (module prefixes and list keys removed) and matched against
//! [`FEATURE_RULES`]; the first rule whose pattern occurs in a path decides
//! what is read from the record's value.

use crate::decoder::UpdateRecord;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Network-instance names that are never customer VRFs
const INTERNAL_VRFS: &[&str] = &["default", "**iid"];

const L3VPN_IPV4_UNICAST: &str = "L3VPN_IPV4_UNICAST";
const IPV4_UNICAST: &str = "IPV4_UNICAST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    #[serde(rename = "PE")]
    ProviderEdge,
    #[serde(rename = "P")]
    Provider,
    #[serde(rename = "RR")]
    RouteReflector,
    #[serde(rename = "IGP-only")]
    IgpOnly,
    #[serde(rename = "CE")]
    CustomerEdge,
    Unknown,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::ProviderEdge => "PE",
            Role::Provider => "P",
            Role::RouteReflector => "RR",
            Role::IgpOnly => "IGP-only",
            Role::CustomerEdge => "CE",
            Role::Unknown => "Unknown",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureSet {
    #[serde(rename = "is_mpls_enabled")]
    pub mpls_enabled: bool,
    #[serde(rename = "is_isis_enabled")]
    pub isis_enabled: bool,
    #[serde(rename = "is_bgp_l3vpn_enabled")]
    pub bgp_l3vpn_enabled: bool,
    #[serde(rename = "is_route_reflector")]
    pub route_reflector: bool,
    #[serde(rename = "has_vpn_ipv4_unicast_bgp")]
    pub vpn_ipv4_unicast_bgp: bool,
}

impl FeatureSet {
    /// Decide the role. Checked in order, first match wins.
    pub fn role(&self) -> Role {
        if self.route_reflector {
            Role::RouteReflector
        } else if self.bgp_l3vpn_enabled
            && self.mpls_enabled
            && self.isis_enabled
            && self.vpn_ipv4_unicast_bgp
        {
            Role::ProviderEdge
        } else if self.mpls_enabled && self.isis_enabled {
            Role::Provider
        } else if self.isis_enabled {
            Role::IgpOnly
        } else if !self.mpls_enabled
            && !self.isis_enabled
            && !self.bgp_l3vpn_enabled
            && !self.route_reflector
        {
            Role::CustomerEdge
        } else {
            Role::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceProfile {
    #[serde(flatten)]
    pub features: FeatureSet,
    pub role: Role,
}

type Extractor = fn(&Value, &mut FeatureSet);

struct FeatureRule {
    pattern: &'static [&'static str],
    extract: Extractor,
}

/// Segment patterns of the profile query and what each contributes.
static FEATURE_RULES: &[FeatureRule] = &[
    FeatureRule {
        pattern: &["mpls", "global", "interface-attributes", "interface"],
        extract: |value, features| {
            features.mpls_enabled |= field(value, "mpls-enabled").is_some_and(truthy);
        },
    },
    FeatureRule {
        pattern: &["isis", "global", "state"],
        extract: |_, features| features.isis_enabled = true,
    },
    FeatureRule {
        pattern: &["route-reflector", "state"],
        extract: |value, features| {
            features.route_reflector |= field(value, "route-reflector-client").is_some_and(truthy)
                && field(value, "route-reflector-cluster-id").is_some_and(truthy);
        },
    },
    FeatureRule {
        pattern: &["afi-safi"],
        extract: |value, features| {
            features.bgp_l3vpn_enabled |= names_afi_safi(value, L3VPN_IPV4_UNICAST)
                && field(value, "enabled").is_some_and(truthy);
        },
    },
];

/// Classify a device from its profile records and the BGP AFI/SAFI records
/// collected inside its non-default VRFs.
pub fn classify(records: &[UpdateRecord], vpn_records: &[UpdateRecord]) -> DeviceProfile {
    let mut features = FeatureSet::default();

    for record in records {
        let segments = normalize_path(&record.path);
        if let Some(rule) = FEATURE_RULES
            .iter()
            .find(|rule| contains_run(&segments, rule.pattern))
        {
            (rule.extract)(&record.value, &mut features);
        }
    }

    features.vpn_ipv4_unicast_bgp = vpn_records.iter().any(|record| {
        names_afi_safi(&record.value, IPV4_UNICAST)
            && field(&record.value, "enabled") == Some(&Value::Bool(true))
    });

    let role = features.role();
    tracing::debug!("Classified device as {} ({:?})", role, features);

    DeviceProfile { features, role }
}

/// Names of customer VRFs found in network-instance records.
///
/// Internal instances (`default`, `**iid`) are excluded case-insensitively;
/// names are returned once each, in first-seen order.
pub fn non_default_vrf_names(records: &[UpdateRecord]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();

    for record in records {
        let found = match &record.value {
            Value::String(name) => Some(name.as_str()),
            other => field(other, "name").and_then(Value::as_str),
        };

        let Some(name) = found.map(str::trim).filter(|n| !n.is_empty()) else {
            continue;
        };
        if INTERNAL_VRFS.iter().any(|v| v.eq_ignore_ascii_case(name)) {
            continue;
        }
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    names
}

/// Split a path into bare segments.
///
/// `/openconfig-network-instance:network-instances/network-instance[name=default]/protocols`
/// becomes `["network-instances", "network-instance", "protocols"]`. Slashes
/// inside list keys do not split.
fn normalize_path(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in path.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                push_segment(&mut segments, &path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    push_segment(&mut segments, &path[start..]);

    segments
}

fn push_segment<'a>(segments: &mut Vec<&'a str>, raw: &'a str) {
    let bare = raw.split('[').next().unwrap_or(raw);
    let bare = local_name(bare).trim();
    if !bare.is_empty() {
        segments.push(bare);
    }
}

fn contains_run(segments: &[&str], pattern: &[&str]) -> bool {
    !pattern.is_empty()
        && segments
            .windows(pattern.len())
            .any(|window| window == pattern)
}

/// Strip a YANG module prefix (`openconfig-bgp-types:IPV4_UNICAST` -> `IPV4_UNICAST`).
fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

/// Look up `key` in an object, also accepting a module-prefixed key.
fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let object = value.as_object()?;
    object.get(key).or_else(|| {
        object
            .iter()
            .find(|(k, _)| local_name(k) == key)
            .map(|(_, v)| v)
    })
}

fn names_afi_safi(value: &Value, identity: &str) -> bool {
    field(value, "afi-safi-name")
        .and_then(Value::as_str)
        .is_some_and(|name| local_name(name) == identity)
}

/// Null, false, zero, empty strings and empty containers are false.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NI: &str = "/openconfig-network-instance:network-instances/network-instance[name=default]";

    fn mpls() -> UpdateRecord {
        UpdateRecord::new(
            format!("{NI}/mpls/global/interface-attributes/interface[interface-id=Gi0/0/0/0]"),
            json!({"interface-id": "Gi0/0/0/0", "mpls-enabled": true}),
        )
    }

    fn isis() -> UpdateRecord {
        UpdateRecord::new(
            format!("{NI}/protocols/protocol[identifier=ISIS][name=CORE]/isis/global/state"),
            json!({}),
        )
    }

    fn l3vpn() -> UpdateRecord {
        UpdateRecord::new(
            format!("{NI}/protocols/protocol[identifier=BGP][name=default]/bgp/global/afi-safis/afi-safi[afi-safi-name=L3VPN_IPV4_UNICAST]/state"),
            json!({"afi-safi-name": "openconfig-bgp-types:L3VPN_IPV4_UNICAST", "enabled": true}),
        )
    }

    fn route_reflector() -> UpdateRecord {
        UpdateRecord::new(
            format!("{NI}/protocols/protocol[identifier=BGP][name=default]/bgp/neighbors/neighbor[neighbor-address=10.0.0.2]/route-reflector/state"),
            json!({"route-reflector-client": true, "route-reflector-cluster-id": "10.255.0.1"}),
        )
    }

    fn vpn_ipv4(enabled: Value) -> UpdateRecord {
        UpdateRecord::new(
            "/network-instances/network-instance[name=CUSTOMER_A]/protocols/protocol/bgp/global/afi-safis/afi-safi[afi-safi-name=*]/state",
            json!({"afi-safi-name": "openconfig-bgp-types:IPV4_UNICAST", "enabled": enabled}),
        )
    }

    #[test]
    fn test_normalize_path_strips_prefixes_and_keys() {
        assert_eq!(
            normalize_path("/oc-ni:network-instances/network-instance[name=a/b]/protocols/"),
            vec!["network-instances", "network-instance", "protocols"]
        );
    }

    #[test]
    fn test_provider_edge_requires_every_flag() {
        let profile = classify(&[mpls(), isis(), l3vpn()], &[vpn_ipv4(json!(true))]);
        assert_eq!(profile.role, Role::ProviderEdge);

        // drop each conjunct in turn
        assert_ne!(
            classify(&[isis(), l3vpn()], &[vpn_ipv4(json!(true))]).role,
            Role::ProviderEdge
        );
        assert_ne!(
            classify(&[mpls(), l3vpn()], &[vpn_ipv4(json!(true))]).role,
            Role::ProviderEdge
        );
        assert_eq!(
            classify(&[mpls(), isis()], &[vpn_ipv4(json!(true))]).role,
            Role::Provider
        );
        assert_eq!(
            classify(&[mpls(), isis(), l3vpn()], &[]).role,
            Role::Provider
        );
    }

    #[test]
    fn test_vpn_ipv4_requires_literal_true() {
        let profile = classify(&[], &[vpn_ipv4(json!("true"))]);
        assert!(!profile.features.vpn_ipv4_unicast_bgp);

        // VPN-scoped records never feed the other flags
        let profile = classify(&[], &[l3vpn(), isis()]);
        assert_eq!(profile.features, FeatureSet::default());
    }

    #[test]
    fn test_route_reflector_dominates() {
        let profile = classify(
            &[route_reflector(), mpls(), isis(), l3vpn()],
            &[vpn_ipv4(json!(true))],
        );
        assert_eq!(profile.role, Role::RouteReflector);
    }

    #[test]
    fn test_route_reflector_needs_cluster_id() {
        let record = UpdateRecord::new(
            "/bgp/neighbors/neighbor/route-reflector/state",
            json!({"route-reflector-client": true, "route-reflector-cluster-id": ""}),
        );
        assert_eq!(classify(&[record], &[]).role, Role::CustomerEdge);
    }

    #[test]
    fn test_isis_presence_alone_counts() {
        let profile = classify(&[isis()], &[]);
        assert!(profile.features.isis_enabled);
        assert_eq!(profile.role, Role::IgpOnly);
    }

    #[test]
    fn test_unknown_and_customer_edge() {
        assert_eq!(classify(&[], &[]).role, Role::CustomerEdge);
        assert_eq!(classify(&[mpls()], &[]).role, Role::Unknown);
        assert_eq!(classify(&[l3vpn()], &[]).role, Role::Unknown);
    }

    #[test]
    fn test_classify_is_pure() {
        let records = vec![mpls(), isis(), l3vpn()];
        let vpn = vec![vpn_ipv4(json!(true))];
        assert_eq!(classify(&records, &vpn), classify(&records, &vpn));
    }

    #[test]
    fn test_profile_serializes_flat() {
        let profile = classify(&[isis()], &[]);
        let value = serde_json::to_value(profile).unwrap();
        assert_eq!(value["is_isis_enabled"], json!(true));
        assert_eq!(value["has_vpn_ipv4_unicast_bgp"], json!(false));
        assert_eq!(value["role"], json!("IGP-only"));
    }

    #[test]
    fn test_non_default_vrf_names() {
        let ni = "network-instances/network-instance";
        let records = vec![
            UpdateRecord::new(format!("{ni}[name=default]/state/name"), json!("default")),
            UpdateRecord::new(format!("{ni}[name=**iid]/state/name"), json!("**IID")),
            UpdateRecord::new(format!("{ni}[name=A]/state"), json!({"name": "CUSTOMER_A"})),
            UpdateRecord::new(format!("{ni}[name=A]/state/name"), json!("CUSTOMER_A")),
            UpdateRecord::new(
                format!("{ni}[name=B]/state"),
                json!({"openconfig-network-instance:name": "CUSTOMER_B"}),
            ),
        ];

        assert_eq!(non_default_vrf_names(&records), vec!["CUSTOMER_A", "CUSTOMER_B"]);
    }
}
