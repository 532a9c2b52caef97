// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

use core::fmt;

use crate::{Error, Result};

/// Identifies a USB device to connect to.
///
/// Only `vendor_id` and `product_id` are used to find the device; the other
/// fields are informational, filled in by device enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Platform bus identifier, if known
    pub bus: Option<String>,
    /// Device address on the bus, if known
    pub address: Option<u8>,
    /// Manufacturer string descriptor
    pub manufacturer: Option<String>,
    /// Product string descriptor
    pub product: Option<String>,
    /// Serial number string descriptor
    pub serial_number: Option<String>,
}

fn parse_hex_id(s: &str) -> Result<u16> {
    const HEX_PREFIX: &str = "0x";

    let t = s.trim();
    let t = if t.to_ascii_lowercase().starts_with(HEX_PREFIX) {
        &t[HEX_PREFIX.len()..]
    } else {
        t
    };
    u16::from_str_radix(t, 16)
        .map_err(|e| Error::InvalidDescriptor(format!("'{s}': {e}")))
}

impl DeviceDescriptor {
    /// Create a descriptor with just vendor and product IDs
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            ..Default::default()
        }
    }

    /// Create a descriptor from hex-string vendor and product IDs,
    /// as produced by device enumeration (`"2e3c"`, optionally `0x`-prefixed).
    pub fn from_hex(vendor_id: &str, product_id: &str) -> Result<Self> {
        Ok(Self::new(parse_hex_id(vendor_id)?, parse_hex_id(product_id)?))
    }

    /// Lowercase hex vendor ID, four digits
    pub fn vendor_id_hex(&self) -> String {
        format!("{:04x}", self.vendor_id)
    }

    /// Lowercase hex product ID, four digits
    pub fn product_id_hex(&self) -> String {
        format!("{:04x}", self.product_id)
    }

    /// A string identifying this device instance.
    ///
    /// `vvvv:pppp:bus:address` when the bus location is known, otherwise
    /// `vvvv:pppp`.
    pub fn device_id(&self) -> String {
        match (&self.bus, self.address) {
            (Some(bus), Some(addr)) => format!(
                "{:04x}:{:04x}:{bus}:{addr}",
                self.vendor_id, self.product_id
            ),
            _ => format!("{:04x}:{:04x}", self.vendor_id, self.product_id),
        }
    }

    /// Returns true if this descriptor has the given vendor and product.
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.device_id())?;
        if let Some(p) = &self.product {
            write!(f, " {p}")?;
        }
        Ok(())
    }
}

/// Parses `vvvv:pppp`, both fields hex.
impl std::str::FromStr for DeviceDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(v), Some(p), None) => Self::from_hex(v, p),
            _ => Err(Error::InvalidDescriptor(format!(
                "'{s}': expected <vendor>:<product>"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_hex() {
        let d = DeviceDescriptor::from_hex("2e3c", "0x5740").unwrap();
        assert_eq!(d.vendor_id, 0x2e3c);
        assert_eq!(d.product_id, 0x5740);
        assert_eq!(d.vendor_id_hex(), "2e3c");
        assert_eq!(d.device_id(), "2e3c:5740");

        let d = DeviceDescriptor::from_hex("0X1A", "ffff").unwrap();
        assert_eq!(d.vendor_id, 0x1a);
        assert_eq!(d.product_id_hex(), "ffff");
    }

    #[test]
    fn from_hex_invalid() {
        assert!(matches!(
            DeviceDescriptor::from_hex("xyz", "0001"),
            Err(Error::InvalidDescriptor(_))
        ));
        assert!(DeviceDescriptor::from_hex("10000", "0001").is_err());
        assert!(DeviceDescriptor::from_hex("", "0001").is_err());
    }

    #[test]
    fn parse_str() {
        let d: DeviceDescriptor = "1f3a:1002".parse().unwrap();
        assert!(d.matches(0x1f3a, 0x1002));
        assert!("1f3a".parse::<DeviceDescriptor>().is_err());
        assert!("1f3a:1002:3".parse::<DeviceDescriptor>().is_err());
    }

    #[test]
    fn device_id_with_location() {
        let d = DeviceDescriptor {
            bus: Some("3".into()),
            address: Some(12),
            product: Some("Electric Pass".into()),
            ..DeviceDescriptor::new(0x1f3a, 0x1002)
        };
        assert_eq!(d.device_id(), "1f3a:1002:3:12");
        assert_eq!(d.to_string(), "1f3a:1002:3:12 Electric Pass");
    }
}
