// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP transport over USB bulk endpoints
 *
 * Copyright (c) 2025 Code Construct
 */

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! USB transport for MTP devices, using [`nusb`].
//!
//! [`UsbTransport`] implements [`mtp::Transport`]: it finds a device by
//! vendor and product ID, claims its Still Image (MTP/PTP) interface, and
//! performs blocking bulk transfers with a timeout.
//!
//! ```no_run
//! use mtp::{DeviceDescriptor, MtpClient};
//! use mtp_usb::UsbTransport;
//!
//! let mut client = MtpClient::new(UsbTransport::new());
//! client.connect(&DeviceDescriptor::new(0x1f3a, 0x1002))?;
//! client.open_session()?;
//! # Ok::<(), mtp::Error>(())
//! ```
//!
//! [`list_devices`] and [`DeviceMonitor`] report attached USB devices.

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use std::fmt;
use std::io;
use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, In, Interrupt, Out};
use nusb::MaybeFuture;

use mtp::{config, proto_error, DeviceDescriptor, Result, TransportError};

mod monitor;
pub use monitor::{DeviceEvent, DeviceMonitor};

const DIR_IN: u8 = 0x80;
const TRANSFER_TYPE_MASK: u8 = 0x03;
const TRANSFER_BULK: u8 = 0x02;
const TRANSFER_INTERRUPT: u8 = 0x03;

// Time allowed for a cancelled transfer to be reaped
const CANCEL_TIMEOUT: Duration = Duration::from_millis(100);

fn usb_err(e: impl fmt::Display) -> mtp::Error {
    TransportError::Io(io::Error::other(e.to_string())).into()
}

fn descriptor_from_info(info: &nusb::DeviceInfo) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        bus: Some(info.bus_id().to_string()),
        address: Some(info.device_address()),
        manufacturer: info.manufacturer_string().map(str::to_string),
        product: info.product_string().map(str::to_string),
        serial_number: info.serial_number().map(str::to_string),
    }
}

/// List all attached USB devices.
///
/// Devices are not filtered by class; string descriptors are those cached
/// by the OS, and may be absent.
pub fn list_devices() -> Result<Vec<DeviceDescriptor>> {
    let devices = nusb::list_devices().wait().map_err(usb_err)?;
    Ok(devices.map(|info| descriptor_from_info(&info)).collect())
}

/// An interface alternate setting, as `(class, interface number, alt)`
type AltSetting = (u8, u8, u8);

/// Pick the MTP interface: the first Still Image class interface, otherwise
/// interface 0 alt setting 0.
fn select_interface(alts: &[AltSetting]) -> Option<(u8, u8)> {
    alts.iter()
        .find(|(class, _, _)| *class == config::STILL_IMAGE_CLASS)
        .or_else(|| alts.iter().find(|(_, num, alt)| *num == 0 && *alt == 0))
        .map(|&(_, num, alt)| (num, alt))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct EndpointSelection {
    // Address, and whether it is a bulk endpoint
    out: Option<(u8, bool)>,
    bulk_in: Option<u8>,
    interrupt_in: Option<u8>,
}

/// Select endpoints from `(address, transfer type)` pairs.
///
/// The first of each kind wins, except that a bulk OUT endpoint is
/// preferred over an earlier OUT of another type.
fn select_endpoints(
    eps: impl IntoIterator<Item = (u8, u8)>,
) -> EndpointSelection {
    let mut sel = EndpointSelection::default();
    for (addr, ttype) in eps {
        let ttype = ttype & TRANSFER_TYPE_MASK;
        if addr & DIR_IN == 0 {
            let bulk = ttype == TRANSFER_BULK;
            match sel.out {
                None => sel.out = Some((addr, bulk)),
                Some((_, false)) if bulk => sel.out = Some((addr, bulk)),
                _ => (),
            }
        } else if ttype == TRANSFER_BULK {
            sel.bulk_in.get_or_insert(addr);
        } else if ttype == TRANSFER_INTERRUPT {
            sel.interrupt_in.get_or_insert(addr);
        }
    }
    sel
}

/// Submit a buffer and wait for its completion, cancelling on timeout.
macro_rules! transfer {
    ($ep:expr, $buf:expr, $timeout:expr) => {{
        let ep = $ep;
        ep.submit($buf);
        match ep.wait_next_complete($timeout) {
            Some(c) => match c.status {
                Ok(()) => Ok(c),
                Err(e) => Err(usb_err(e)),
            },
            None => {
                ep.cancel_all();
                if ep.wait_next_complete(CANCEL_TIMEOUT).is_none() {
                    warn!("Cancelled transfer was not reaped");
                }
                Err(mtp::Error::from(TransportError::TimedOut))
            }
        }
    }};
}

enum OutPipe {
    Bulk(nusb::Endpoint<Bulk, Out>),
    Interrupt(nusb::Endpoint<Interrupt, Out>),
}

impl OutPipe {
    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<()> {
        let buf = Buffer::from(buf.to_vec());
        match self {
            Self::Bulk(ep) => transfer!(ep, buf, timeout).map(|_| ()),
            Self::Interrupt(ep) => transfer!(ep, buf, timeout).map(|_| ()),
        }
    }
}

struct Connection {
    descriptor: DeviceDescriptor,
    out: OutPipe,
    bulk_in: nusb::Endpoint<Bulk, In>,
    // Reserved for MTP events, which are not read.
    interrupt_in: Option<u8>,
    // Endpoints are dropped first, then the interface and device are
    // released.
    _interface: nusb::Interface,
    _device: nusb::Device,
}

/// A blocking MTP transport over USB bulk endpoints
pub struct UsbTransport {
    timeout: Duration,
    conn: Option<Connection>,
}

impl Default for UsbTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport {
    /// Create a transport using [`config::DEFAULT_TIMEOUT`]
    pub fn new() -> Self {
        Self::with_timeout(config::DEFAULT_TIMEOUT)
    }

    /// Create a transport with a per-transfer timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            conn: None,
        }
    }

    /// Returns the per-transfer timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the connected device, with bus location and strings
    /// filled in.
    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.conn.as_ref().map(|c| &c.descriptor)
    }

    /// Returns the interrupt IN endpoint address, if the interface has one
    pub fn interrupt_endpoint(&self) -> Option<u8> {
        self.conn.as_ref().and_then(|c| c.interrupt_in)
    }

    fn conn_mut(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or_else(|| proto_error!("not connected"))
    }

    fn open(device: &DeviceDescriptor) -> Result<Connection> {
        let info = nusb::list_devices()
            .wait()
            .map_err(usb_err)?
            .find(|d| device.matches(d.vendor_id(), d.product_id()))
            .ok_or(mtp::Error::DeviceNotFound {
                vendor_id: device.vendor_id,
                product_id: device.product_id,
            })?;
        let descriptor = descriptor_from_info(&info);
        debug!("Opening {descriptor}");

        let dev = info.open().wait().map_err(usb_err)?;

        let cfg = match dev.active_configuration() {
            Ok(c) => c,
            Err(e) => {
                debug!("No active configuration ({e}), setting the first");
                let value = dev
                    .configurations()
                    .next()
                    .map(|c| c.configuration_value())
                    .ok_or_else(|| {
                        proto_error!("device has no configurations")
                    })?;
                dev.set_configuration(value).wait().map_err(usb_err)?;
                dev.active_configuration().map_err(usb_err)?
            }
        };

        let alts: Vec<AltSetting> = cfg
            .interface_alt_settings()
            .map(|i| (i.class(), i.interface_number(), i.alternate_setting()))
            .collect();
        let (num, alt) = select_interface(&alts)
            .ok_or_else(|| proto_error!("no MTP interface"))?;

        let eps = cfg
            .interface_alt_settings()
            .find(|i| {
                i.interface_number() == num && i.alternate_setting() == alt
            })
            .map(|i| {
                select_endpoints(
                    i.endpoints()
                        .map(|e| (e.address(), e.transfer_type() as u8)),
                )
            })
            .unwrap_or_default();
        trace!("interface {num} alt {alt}: {eps:?}");

        let (Some((out_addr, out_bulk)), Some(in_addr)) = (eps.out, eps.bulk_in)
        else {
            return Err(proto_error!("missing bulk endpoints"));
        };

        // Best-effort: the interface may have no kernel driver bound
        #[cfg(target_os = "linux")]
        let _ = dev.detach_kernel_driver(num);

        let interface = dev.claim_interface(num).wait().map_err(usb_err)?;
        if alt != 0 {
            interface.set_alt_setting(alt).wait().map_err(usb_err)?;
        }

        let out = if out_bulk {
            OutPipe::Bulk(
                interface.endpoint::<Bulk, Out>(out_addr).map_err(usb_err)?,
            )
        } else {
            OutPipe::Interrupt(
                interface
                    .endpoint::<Interrupt, Out>(out_addr)
                    .map_err(usb_err)?,
            )
        };
        let bulk_in = interface.endpoint::<Bulk, In>(in_addr).map_err(usb_err)?;

        Ok(Connection {
            descriptor,
            out,
            bulk_in,
            interrupt_in: eps.interrupt_in,
            _interface: interface,
            _device: dev,
        })
    }
}

impl mtp::Transport for UsbTransport {
    fn connect(&mut self, device: &DeviceDescriptor) -> Result<()> {
        self.disconnect();
        let conn = Self::open(device)?;
        info!("USB device {} claimed", conn.descriptor.device_id());
        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("Releasing {}", conn.descriptor.device_id());
        }
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn send(&mut self, buf: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        self.conn_mut()?.out.write(buf, timeout)
    }

    fn receive(&mut self, max_size: usize) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        let conn = self.conn_mut()?;

        let mps = conn.bulk_in.max_packet_size().max(1);
        let len = max_size.max(1).div_ceil(mps) * mps;
        let mut buf = Buffer::new(len);
        buf.set_requested_len(len);

        let c = transfer!(&mut conn.bulk_in, buf, timeout)?;
        let mut v = c.buffer.to_vec();
        v.truncate(c.actual_len);
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_still_image() {
        let alts = [(0xff, 0, 0), (6, 1, 0), (6, 2, 0)];
        assert_eq!(select_interface(&alts), Some((1, 0)));
    }

    #[test]
    fn interface_fallback() {
        let alts = [(0xff, 0, 1), (0xff, 0, 0), (3, 1, 0)];
        assert_eq!(select_interface(&alts), Some((0, 0)));
        assert_eq!(select_interface(&[(3, 1, 0)]), None);
        assert_eq!(select_interface(&[]), None);
    }

    #[test]
    fn endpoints_mtp() {
        // typical MTP interface: bulk in, bulk out, interrupt in
        let sel = select_endpoints([(0x81, 0x02), (0x02, 0x02), (0x83, 0x03)]);
        assert_eq!(
            sel,
            EndpointSelection {
                out: Some((0x02, true)),
                bulk_in: Some(0x81),
                interrupt_in: Some(0x83),
            }
        );
    }

    #[test]
    fn endpoints_prefer_bulk_out() {
        let sel = select_endpoints([(0x01, 0x03), (0x02, 0x02), (0x03, 0x02)]);
        assert_eq!(sel.out, Some((0x02, true)));

        let sel = select_endpoints([(0x01, 0x03), (0x81, 0x02)]);
        assert_eq!(sel.out, Some((0x01, false)));
        assert_eq!(sel.interrupt_in, None);
    }

    #[test]
    fn endpoints_missing() {
        let sel = select_endpoints([(0x83, 0x03)]);
        assert_eq!(sel.out, None);
        assert_eq!(sel.bulk_in, None);
        assert_eq!(sel.interrupt_in, Some(0x83));
    }

    #[test]
    fn not_connected() {
        use mtp::Transport;

        let mut t = UsbTransport::with_timeout(Duration::from_millis(10));
        assert!(!t.is_connected());
        assert!(matches!(t.send(&[0; 12]), Err(mtp::Error::Protocol(_))));
        assert!(matches!(t.receive(512), Err(mtp::Error::Protocol(_))));
        t.disconnect();
        assert_eq!(t.timeout(), Duration::from_millis(10));
        assert!(t.device().is_none());
    }
}
