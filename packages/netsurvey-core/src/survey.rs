//! Per-device survey operations wired to a [`QueryClient`].
//!
//! Each operation issues its queries through the retry layer, decodes the
//! responses and hands the records to the matching collector. The batch
//! variants fan an operation out over an inventory.

use crate::batch::{BatchResult, BatchSummary, run_batch};
use crate::client::{Device, QueryClient, QueryError, QueryRequest, execute_with_retry};
use crate::config::SurveyConfig;
use crate::decoder::{UpdateRecord, decode};
use crate::interfaces::{self, InterfaceInventory};
use crate::profile::{self, DeviceProfile};
use crate::topology::{self, TopologyGraph};
use serde::Serialize;
use std::sync::Arc;

const INTERFACES_PATH: &str = "openconfig-interfaces:interfaces";
const NETWORK_INSTANCES: &str = "openconfig-network-instance:network-instances";

/// Paths read to classify a device
const PROFILE_PATHS: &[&str] = &[
    "network-instance[name=*]/protocols/protocol/bgp/global/afi-safis/afi-safi[afi-safi-name=*]/state",
    "network-instance[name=*]/mpls/global/interface-attributes/interface[interface-id=*]/state",
    "network-instance[name=*]/protocols/protocol/isis/global/state",
    "network-instance[name=*]/protocols/protocol/bgp/neighbors/neighbor[neighbor-address=*]/route-reflector/state",
    "network-instance[name=*]/protocols/protocol/isis/global/segment-routing/state/enabled",
];

/// Request for every interface on a device.
pub fn interfaces_request() -> QueryRequest {
    QueryRequest::new("interfaces", [INTERFACES_PATH])
}

/// Request for one named interface.
pub fn interface_detail_request(interface: &str) -> QueryRequest {
    QueryRequest::new(
        "interface-detail",
        [format!("{}/interface[name={}]", INTERFACES_PATH, interface)],
    )
}

pub fn profile_request() -> QueryRequest {
    QueryRequest::new(
        "device-profile",
        PROFILE_PATHS
            .iter()
            .map(|p| format!("{}/{}", NETWORK_INSTANCES, p)),
    )
}

pub fn vrf_names_request() -> QueryRequest {
    QueryRequest::new(
        "vrf-names",
        [format!("{}/network-instance[name=*]/state/name", NETWORK_INSTANCES)],
    )
}

/// BGP AFI/SAFI state inside one VRF.
pub fn vpn_bgp_request(vrf: &str) -> QueryRequest {
    QueryRequest::new(
        format!("vpn-bgp-{}", vrf),
        [format!(
            "{}/network-instance[name={}]/protocols/protocol/bgp/global/afi-safis/afi-safi[afi-safi-name=*]/state",
            NETWORK_INSTANCES, vrf
        )],
    )
}

/// Topology plus the collection run it was built from.
#[derive(Debug, Clone, Serialize)]
pub struct TopologySurvey {
    #[serde(flatten)]
    pub graph: TopologyGraph,
    pub collection: BatchSummary,
    /// Devices whose interfaces could not be collected
    pub missing_devices: Vec<String>,
}

pub struct Surveyor<C> {
    client: Arc<C>,
    config: Arc<SurveyConfig>,
}

impl<C> Clone for Surveyor<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: QueryClient + 'static> Surveyor<C> {
    pub fn new(client: C, config: SurveyConfig) -> Self {
        Self {
            client: Arc::new(client),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SurveyConfig {
        &self.config
    }

    /// Send one request with rate-limit retries and decode the response.
    ///
    /// A response that does not decode yields no records rather than an
    /// error.
    pub async fn query(
        &self,
        device: &Device,
        request: &QueryRequest,
    ) -> Result<Vec<UpdateRecord>, QueryError> {
        tracing::debug!("Querying {} on {}", request.name, device.name);

        let raw = execute_with_retry(device, &request.name, &self.config.retry, || {
            self.client.send(device, request)
        })
        .await?;

        match decode(&raw) {
            Some(parsed) => Ok(parsed.into_records()),
            None => {
                tracing::warn!(
                    "Unusable {} response from {}, treating as empty",
                    request.name,
                    device.name
                );
                Ok(Vec::new())
            }
        }
    }

    /// Interface inventory of one device; with `interface` set, that
    /// interface in detail.
    pub async fn interfaces(
        &self,
        device: &Device,
        interface: Option<&str>,
    ) -> Result<InterfaceInventory, QueryError> {
        let request = match interface {
            Some(name) => interface_detail_request(name),
            None => interfaces_request(),
        };

        let records = self.query(device, &request).await?;
        let inventory = interfaces::collect(&device.name, &records, interface);

        match interface {
            Some(name) if inventory.interfaces.is_empty() => Err(QueryError::InterfaceNotFound {
                device: device.name.clone(),
                interface: name.to_string(),
            }),
            _ => Ok(inventory),
        }
    }

    /// Feature flags and role of one device.
    pub async fn device_profile(&self, device: &Device) -> Result<DeviceProfile, QueryError> {
        let records = self.query(device, &profile_request()).await?;

        let vrfs = match self.query(device, &vrf_names_request()).await {
            Ok(records) => profile::non_default_vrf_names(&records),
            Err(e) => {
                tracing::warn!("Could not list VRFs on {}: {}", device.name, e);
                Vec::new()
            }
        };

        let mut vpn_records = Vec::new();
        for vrf in &vrfs {
            match self.query(device, &vpn_bgp_request(vrf)).await {
                Ok(records) => vpn_records.extend(records),
                Err(e) => {
                    tracing::warn!(
                        "Skipping BGP state of VRF {} on {}: {}",
                        vrf,
                        device.name,
                        e
                    );
                }
            }
        }

        let profile = profile::classify(&records, &vpn_records);
        tracing::info!(
            "Device {} classified as {} ({} VRFs checked)",
            device.name,
            profile.role,
            vrfs.len()
        );
        Ok(profile)
    }

    pub async fn interfaces_batch(
        &self,
        devices: &[Device],
        interface: Option<String>,
    ) -> BatchResult<InterfaceInventory> {
        let surveyor = self.clone();
        run_batch(devices, "interfaces", &self.config.batch, move |device| {
            let surveyor = surveyor.clone();
            let interface = interface.clone();
            async move { surveyor.interfaces(&device, interface.as_deref()).await }
        })
        .await
    }

    pub async fn profile_batch(&self, devices: &[Device]) -> BatchResult<DeviceProfile> {
        let surveyor = self.clone();
        run_batch(devices, "device-profile", &self.config.batch, move |device| {
            let surveyor = surveyor.clone();
            async move { surveyor.device_profile(&device).await }
        })
        .await
    }

    /// Collect interfaces from every device, then build the topology from
    /// the devices that answered.
    pub async fn topology(&self, devices: &[Device]) -> TopologySurvey {
        let batch = self.interfaces_batch(devices, None).await;
        let graph = topology::build_from_batch(&batch);

        let missing_devices = batch
            .results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.device_name.clone())
            .collect();

        TopologySurvey {
            graph,
            collection: batch.summary,
            missing_devices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_names_and_paths() {
        assert_eq!(interfaces_request().paths, vec!["openconfig-interfaces:interfaces"]);
        assert_eq!(
            interface_detail_request("Gi0/0/0/1").paths,
            vec!["openconfig-interfaces:interfaces/interface[name=Gi0/0/0/1]"]
        );

        let profile = profile_request();
        assert_eq!(profile.name, "device-profile");
        assert_eq!(profile.paths.len(), 5);
        assert!(profile.paths.iter().all(|p| p.starts_with(NETWORK_INSTANCES)));

        let vpn = vpn_bgp_request("CUSTOMER_A");
        assert_eq!(vpn.name, "vpn-bgp-CUSTOMER_A");
        assert!(vpn.paths[0].contains("network-instance[name=CUSTOMER_A]"));
    }
}
