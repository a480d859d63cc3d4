//! netsurvey Core Library
//!
//! Collects state from a fleet of network devices over a model-driven
//! management protocol and derives network-wide views from it:
//! - Interface inventory (brief per device, or one interface in detail)
//! - Device role classification (PE, P, RR, IGP-only, CE)
//! - L3 topology built by correlating interface subnets across devices
//!
//! The wire transport is not part of this crate. Callers supply a
//! [`QueryClient`]; every query goes through rate-limit aware retries and a
//! tolerant response decoder before reaching the collectors, and whole
//! inventories are processed by a bounded worker pool.
//!
//! # Example
//!
//! ```no_run
//! use netsurvey_core::{Device, QueryClient, QueryError, QueryRequest, Surveyor};
//! use serde_json::Value;
//!
//! struct Offline;
//!
//! impl QueryClient for Offline {
//!     async fn send(&self, device: &Device, request: &QueryRequest) -> Result<Value, QueryError> {
//!         let message = format!("cannot send {}", request.name);
//!         Err(QueryError::transport(&device.name, "OFFLINE", message))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let surveyor = Surveyor::new(Offline, netsurvey_core::load_survey_config());
//!     let devices = vec![
//!         Device::new("xrd-1", "10.10.20.101"),
//!         Device::new("xrd-2", "10.10.20.102"),
//!     ];
//!
//!     let survey = surveyor.topology(&devices).await;
//!     println!(
//!         "{} links across {} devices",
//!         survey.graph.edge_count(),
//!         survey.graph.node_count()
//!     );
//! }
//! ```

pub mod batch;
pub mod client;
pub mod config;
pub mod decoder;
pub mod interfaces;
pub mod profile;
pub mod survey;
pub mod topology;

// Re-export commonly used types
pub use batch::{BatchOptions, BatchResult, BatchSummary, DeviceOutcome, DeviceResult, run_batch};
pub use client::{Device, QueryClient, QueryError, QueryRequest, RetryPolicy, TransportFault};
pub use config::{ConfigSource, SurveyConfig, load_survey_config, load_survey_config_from};
pub use decoder::{ParsedResponse, UpdateRecord, decode};
pub use interfaces::{InterfaceInventory, InterfaceRecord, InterfaceSummary};
pub use profile::{DeviceProfile, FeatureSet, Role};
pub use survey::{Surveyor, TopologySurvey};
pub use topology::{Edge, SubnetKey, TopologyGraph, build_topology};
