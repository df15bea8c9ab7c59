use std::collections::BTreeSet;

use mac_address::{MacAddress, MacAddressIterator};
use sysinfo::System;
use tracing::debug;

/// Sent when no hardware address can be found.
pub const UNKNOWN_MAC: &str = "ff:ff:ff:ff:ff:ff";

/// Descriptive fields attached to every ingest request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub host_name: String,
    pub mac: String,
}

impl HostInfo {
    pub fn detect() -> Self {
        Self {
            host_name: host_name(),
            mac: mac_address(),
        }
    }
}

pub fn host_name() -> String {
    System::host_name()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn mac_address() -> String {
    match MacAddressIterator::new() {
        Ok(addresses) => pick_mac(addresses),
        Err(err) => {
            debug!(error = %err, "cannot enumerate network interfaces");
            UNKNOWN_MAC.to_string()
        }
    }
}

/// Lowest non-zero address, so the choice does not depend on the order
/// interfaces are enumerated in.
pub fn pick_mac(addresses: impl IntoIterator<Item = MacAddress>) -> String {
    addresses
        .into_iter()
        .filter(|mac| mac.bytes() != [0; 6])
        .map(|mac| format_mac(mac.bytes()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .next()
        .unwrap_or_else(|| UNKNOWN_MAC.to_string())
}

fn format_mac(bytes: [u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
