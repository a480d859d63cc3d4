//! Device inventory files.
//!
//! An inventory is JSON: either a bare list of devices or an object with a
//! `devices` list.

use anyhow::{Context, Result, bail};
use netsurvey_core::{Device, QueryError};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum InventoryFile {
    List(Vec<Device>),
    Wrapped { devices: Vec<Device> },
}

pub fn parse_inventory(content: &str) -> Result<Vec<Device>> {
    let file: InventoryFile = serde_json::from_str(content).context("Invalid inventory JSON")?;
    let devices = match file {
        InventoryFile::List(devices) => devices,
        InventoryFile::Wrapped { devices } => devices,
    };

    for (i, device) in devices.iter().enumerate() {
        if device.name.trim().is_empty() {
            bail!("Inventory entry {} has an empty device name", i);
        }
        if devices[..i].iter().any(|d| d.name == device.name) {
            bail!("Device '{}' appears more than once in the inventory", device.name);
        }
    }

    Ok(devices)
}

pub fn load_inventory(path: &Path) -> Result<Vec<Device>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read inventory {}", path.display()))?;
    let devices = parse_inventory(&content)
        .with_context(|| format!("Failed to load inventory {}", path.display()))?;
    tracing::debug!("Loaded {} devices from {:?}", devices.len(), path);
    Ok(devices)
}

/// Pick devices by name, keeping the order given. No names selects the
/// whole inventory.
pub fn select_devices(inventory: &[Device], names: &[String]) -> Result<Vec<Device>, QueryError> {
    if names.is_empty() {
        return Ok(inventory.to_vec());
    }

    names
        .iter()
        .map(|name| {
            inventory
                .iter()
                .find(|d| d.name == *name)
                .cloned()
                .ok_or_else(|| QueryError::DeviceNotFound(name.clone()))
        })
        .collect()
}
