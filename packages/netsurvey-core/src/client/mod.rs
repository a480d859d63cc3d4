//! Device query boundary.
//!
//! The transport that actually talks to a device is supplied by the caller
//! through [`QueryClient`]. This module defines:
//! - the device descriptor and request types
//! - the error taxonomy every query resolves to
//! - the retry layer wrapped around each call (see [`retry`])

pub mod retry;

pub use retry::{RateLimitDetector, RetryPolicy, calculate_delay, execute_with_retry};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default management port when the inventory omits one
const DEFAULT_PORT: u16 = 830;

/// A device as described by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    #[serde(alias = "ip_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Network OS / platform tag (e.g. "iosxr")
    #[serde(default, alias = "nos")]
    pub platform: String,
    /// Reference to the credentials the transport should use
    #[serde(default)]
    pub credential_ref: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Device {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: DEFAULT_PORT,
            platform: String::new(),
            credential_ref: None,
        }
    }
}

/// A named set of paths queried in one round trip.
///
/// The name identifies the query kind ("interfaces", "device-profile", ...)
/// and is what logs and recorded snapshots refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub name: String,
    pub paths: Vec<String>,
}

impl QueryRequest {
    pub fn new<I, S>(name: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// Capability to send one request to one device.
///
/// Implementations own the wire protocol. A successful call returns the raw,
/// loosely structured response which is later run through
/// [`crate::decoder::decode`].
pub trait QueryClient: Send + Sync {
    fn send(
        &self,
        device: &Device,
        request: &QueryRequest,
    ) -> impl Future<Output = Result<Value, QueryError>> + Send;
}

/// Errors that can carry transport-level detail text next to their message.
pub trait TransportFault: std::error::Error {
    /// Detail text reported by the transport, if any
    fn details(&self) -> Option<&str> {
        None
    }
}

/// Every way a device query can fail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// The transport reported an error (connection, RPC status, throttling)
    #[error("{kind} error on {device}: {message}")]
    Transport {
        device: String,
        kind: String,
        message: String,
        details: Option<String>,
    },

    /// The device does not support the requested data model or path
    #[error("Feature '{feature}' not available: {message}")]
    FeatureNotAvailable { feature: String, message: String },

    /// The device is not part of the inventory
    #[error("Device '{0}' not found in inventory")]
    DeviceNotFound(String),

    /// A single interface lookup matched nothing
    #[error("Interface '{interface}' not found on {device}")]
    InterfaceNotFound { device: String, interface: String },

    /// The per-device operation exceeded its time budget
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

impl QueryError {
    /// Build a transport error without detail text.
    pub fn transport(device: &str, kind: &str, message: impl Into<String>) -> Self {
        QueryError::Transport {
            device: device.to_string(),
            kind: kind.to_string(),
            message: message.into(),
            details: None,
        }
    }

    /// Classify a transport failure.
    ///
    /// Transports report unsupported paths as ordinary errors whose text names
    /// the missing element; those become [`QueryError::FeatureNotAvailable`].
    pub fn from_transport(
        device: &str,
        kind: &str,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        let message = message.into();
        let text = details.as_deref().unwrap_or(&message);

        if let Some(feature) = extract_feature_name(text) {
            tracing::info!("Feature '{}' not found on device {}", feature, device);
            return QueryError::FeatureNotAvailable {
                message: format!("Feature '{}' not found on device {}", feature, device),
                feature,
            };
        }

        QueryError::Transport {
            device: device.to_string(),
            kind: kind.to_string(),
            message,
            details,
        }
    }

    pub fn is_feature_not_available(&self) -> bool {
        matches!(self, QueryError::FeatureNotAvailable { .. })
    }
}

impl TransportFault for QueryError {
    fn details(&self) -> Option<&str> {
        match self {
            QueryError::Transport { details, .. } => details.as_deref(),
            _ => None,
        }
    }
}

/// Pull the element name out of "... not found: '<element>'" messages.
fn extract_feature_name(text: &str) -> Option<String> {
    const MARKER: &str = "not found: '";

    let lower = text.to_lowercase();
    // Lowercasing can shift byte offsets for non-ASCII text; only trust
    // positions when the lengths agree.
    if lower.len() != text.len() {
        return None;
    }

    let start = lower.find(MARKER)? + MARKER.len();
    let rest = &text[start..];
    let end = rest.find('\'')?;
    let feature = rest[..end].trim();

    if feature.is_empty() {
        None
    } else {
        Some(feature.to_string())
    }
}
