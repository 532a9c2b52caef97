// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use std::collections::BTreeMap;

use mtp::{DeviceDescriptor, Result};

/// A change in the set of attached USB devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A device appeared
    Connected(DeviceDescriptor),
    /// A device was removed, identified by its
    /// [`device_id`](DeviceDescriptor::device_id)
    Disconnected(String),
}

/// Tracks attached USB devices between scans.
///
/// Callers scan periodically, typically every
/// [`USB_POLL_INTERVAL`](mtp::config::USB_POLL_INTERVAL), and act on the
/// returned events. The first scan reports every device as connected.
#[derive(Debug, Default)]
pub struct DeviceMonitor {
    known: BTreeMap<String, DeviceDescriptor>,
}

impl DeviceMonitor {
    /// Create a monitor with no known devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan attached USB devices, returning changes since the last scan
    pub fn poll(&mut self) -> Result<Vec<DeviceEvent>> {
        let current = crate::list_devices()?;
        Ok(self.update(current))
    }

    /// Replace the known set with `current`, returning the differences.
    ///
    /// Removals are reported before additions.
    pub fn update(
        &mut self,
        current: impl IntoIterator<Item = DeviceDescriptor>,
    ) -> Vec<DeviceEvent> {
        let current: BTreeMap<String, DeviceDescriptor> = current
            .into_iter()
            .map(|d| (d.device_id(), d))
            .collect();

        let mut events = Vec::new();
        for id in self.known.keys() {
            if !current.contains_key(id) {
                info!("USB device disconnected: {id}");
                events.push(DeviceEvent::Disconnected(id.clone()));
            }
        }
        for (id, d) in &current {
            if !self.known.contains_key(id) {
                info!("USB device connected: {d}");
                events.push(DeviceEvent::Connected(d.clone()));
            }
        }

        self.known = current;
        events
    }

    /// Currently known devices, ordered by device ID
    pub fn devices(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.known.values()
    }

    /// Look up a known device
    pub fn get(&self, device_id: &str) -> Option<&DeviceDescriptor> {
        self.known.get(device_id)
    }
}
