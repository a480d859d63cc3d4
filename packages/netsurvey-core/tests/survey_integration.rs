use netsurvey_core::batch::DeviceOutcome;
use netsurvey_core::{
    Device, QueryClient, QueryError, QueryRequest, RetryPolicy, Role, SurveyConfig, Surveyor,
};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Answers from scripted responses keyed by (device, request name).
/// The last scripted response for a key repeats; unknown keys report a
/// missing feature.
#[derive(Default)]
struct FakeClient {
    responses: Mutex<HashMap<(String, String), VecDeque<Result<Value, QueryError>>>>,
}

impl FakeClient {
    fn respond(self, device: &str, request: &str, response: Result<Value, QueryError>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry((device.to_string(), request.to_string()))
            .or_default()
            .push_back(response);
        self
    }
}

impl QueryClient for FakeClient {
    async fn send(&self, device: &Device, request: &QueryRequest) -> Result<Value, QueryError> {
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(&(device.name.clone(), request.name.clone())) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap(),
            None => Err(QueryError::FeatureNotAvailable {
                feature: request.name.clone(),
                message: format!("no scripted {} response for {}", request.name, device.name),
            }),
        }
    }
}

fn fast_config() -> SurveyConfig {
    SurveyConfig {
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: (Duration::ZERO, Duration::ZERO),
        },
        ..SurveyConfig::default()
    }
}

fn notification(updates: Vec<(&str, Value)>) -> Value {
    let updates: Vec<Value> = updates
        .into_iter()
        .map(|(path, val)| json!({"path": path, "val": val}))
        .collect();
    json!({"notification": [{"timestamp": 1700000000, "update": updates}]})
}

fn interfaces(entries: &[(&str, &str, u8)]) -> Value {
    let list: Vec<Value> = entries
        .iter()
        .map(|(name, ip, prefix)| {
            json!({
                "name": name,
                "state": {"admin-status": "UP", "oper-status": "UP"},
                "subinterfaces": {"subinterface": [{
                    "index": 0,
                    "openconfig-if-ip:ipv4": {"addresses": {"address": [
                        {"ip": ip, "state": {"prefix-length": prefix}}
                    ]}}
                }]}
            })
        })
        .collect();
    notification(vec![("openconfig-interfaces:interfaces", json!({"interface": list}))])
}

fn lab_devices() -> Vec<Device> {
    vec![
        Device::new("xrd-1", "10.10.20.101"),
        Device::new("xrd-2", "10.10.20.102"),
        Device::new("xrd-3", "10.10.20.103"),
    ]
}

#[tokio::test]
async fn test_topology_skips_failed_devices() {
    let client = FakeClient::default()
        .respond(
            "xrd-1",
            "interfaces",
            Ok(interfaces(&[
                ("GigabitEthernet0/0/0/0", "10.0.0.1", 30),
                ("MgmtEth0/RP0/CPU0/0", "192.168.0.11", 24),
            ])),
        )
        .respond(
            "xrd-2",
            "interfaces",
            Ok(interfaces(&[
                ("GigabitEthernet0/0/0/0", "10.0.0.2", 30),
                ("MgmtEth0/RP0/CPU0/0", "192.168.0.12", 24),
            ])),
        )
        .respond(
            "xrd-3",
            "interfaces",
            Err(QueryError::transport("xrd-3", "CONNECTION_REFUSED", "connection refused")),
        );

    let surveyor = Surveyor::new(client, fast_config());
    let survey = surveyor.topology(&lab_devices()).await;

    assert_eq!(survey.collection.total_devices, 3);
    assert_eq!(survey.collection.successful, 2);
    assert_eq!(survey.collection.failed, 1);
    assert_eq!(survey.missing_devices, vec!["xrd-3"]);

    assert_eq!(survey.graph.nodes, vec!["xrd-1", "xrd-2"]);
    assert_eq!(survey.graph.edge_count(), 1);
    let edge = &survey.graph.edges[0];
    assert_eq!((edge.source.as_str(), edge.target.as_str()), ("xrd-1", "xrd-2"));
    assert_eq!(edge.attributes.network.to_string(), "10.0.0.0/30");

    let value = serde_json::to_value(&survey).unwrap();
    assert_eq!(value["direct_connections"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rate_limited_query_is_retried() {
    let throttled = QueryError::Transport {
        device: "xrd-1".to_string(),
        kind: "GRPC_ERROR".to_string(),
        message: "RESOURCE_EXHAUSTED".to_string(),
        details: Some("exceeded requests limit".to_string()),
    };
    let client = FakeClient::default()
        .respond("xrd-1", "interfaces", Err(throttled))
        .respond(
            "xrd-1",
            "interfaces",
            Ok(interfaces(&[("Loopback0", "10.255.0.1", 32)])),
        );

    let surveyor = Surveyor::new(client, fast_config());
    let inventory = surveyor
        .interfaces(&lab_devices()[0], None)
        .await
        .unwrap();

    assert_eq!(inventory.interfaces.len(), 1);
    assert_eq!(inventory.summary.unwrap().with_ip, 1);
}

#[tokio::test]
async fn test_detailed_lookup_of_missing_interface() {
    let client = FakeClient::default().respond(
        "xrd-1",
        "interface-detail",
        Ok(json!({"notification": []})),
    );

    let surveyor = Surveyor::new(client, fast_config());
    let err = surveyor
        .interfaces(&lab_devices()[0], Some("Bundle-Ether9"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        QueryError::InterfaceNotFound {
            device: "xrd-1".to_string(),
            interface: "Bundle-Ether9".to_string(),
        }
    );
}

#[tokio::test]
async fn test_undecodable_response_is_empty_not_error() {
    let client =
        FakeClient::default().respond("xrd-1", "interfaces", Ok(json!({"unexpected": true})));

    let surveyor = Surveyor::new(client, fast_config());
    let inventory = surveyor
        .interfaces(&lab_devices()[0], None)
        .await
        .unwrap();
    assert!(inventory.interfaces.is_empty());
}

#[tokio::test]
async fn test_profile_uses_vrf_scoped_bgp_state() {
    let ni = "openconfig-network-instance:network-instances/network-instance[name=default]";
    let profile = notification(vec![
        (
            format!("{ni}/mpls/global/interface-attributes/interface[interface-id=Gi0/0/0/0]/state").as_str(),
            json!({"mpls-enabled": true}),
        ),
        (
            format!("{ni}/protocols/protocol/isis/global/state").as_str(),
            json!({"authentication-check": true}),
        ),
        (
            format!("{ni}/protocols/protocol/bgp/global/afi-safis/afi-safi[afi-safi-name=L3VPN_IPV4_UNICAST]/state").as_str(),
            json!({"afi-safi-name": "openconfig-bgp-types:L3VPN_IPV4_UNICAST", "enabled": true}),
        ),
    ]);
    let vrfs = notification(vec![
        ("network-instances/network-instance[name=default]/state/name", json!("default")),
        ("network-instances/network-instance[name=CUSTOMER_A]/state/name", json!("CUSTOMER_A")),
        ("network-instances/network-instance[name=CUSTOMER_B]/state/name", json!("CUSTOMER_B")),
    ]);
    let customer_a = notification(vec![(
        "network-instances/network-instance[name=CUSTOMER_A]/protocols/protocol/bgp/global/afi-safis/afi-safi[afi-safi-name=IPV4_UNICAST]/state",
        json!({"afi-safi-name": "openconfig-bgp-types:IPV4_UNICAST", "enabled": true}),
    )]);

    let client = FakeClient::default()
        .respond("xrd-1", "device-profile", Ok(profile))
        .respond("xrd-1", "vrf-names", Ok(vrfs))
        .respond("xrd-1", "vpn-bgp-CUSTOMER_A", Ok(customer_a))
        .respond(
            "xrd-1",
            "vpn-bgp-CUSTOMER_B",
            Err(QueryError::transport("xrd-1", "GRPC_ERROR", "internal error")),
        );

    let surveyor = Surveyor::new(client, fast_config());
    let profile = surveyor.device_profile(&lab_devices()[0]).await.unwrap();

    assert!(profile.features.vpn_ipv4_unicast_bgp);
    assert_eq!(profile.role, Role::ProviderEdge);
}

#[tokio::test]
async fn test_profile_batch_reports_missing_features() {
    let client = FakeClient::default().respond(
        "xrd-1",
        "device-profile",
        Ok(notification(vec![(
            "network-instances/network-instance[name=default]/protocols/protocol/isis/global/state",
            json!({}),
        )])),
    );

    let surveyor = Surveyor::new(client, fast_config());
    let batch = surveyor.profile_batch(&lab_devices()[..2]).await;

    assert_eq!(batch.summary.successful, 1);
    assert_eq!(batch.summary.feature_not_available, 1);
    assert_eq!(batch.results[0].data().map(|p| p.role), Some(Role::IgpOnly));
    assert!(matches!(
        batch.results[1].outcome,
        DeviceOutcome::FeatureNotAvailable { .. }
    ));
}
