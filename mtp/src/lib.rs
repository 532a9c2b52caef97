// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP common types and traits.
 *
 * Copyright (c) 2025 Code Construct
 */

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Media Transfer Protocol (MTP)
//!
//! This crate provides the MTP container codec, common types, and a
//! session-oriented [`MtpClient`](client::MtpClient).
//!
//! The client is independent of the USB binding. Transport implementations
//! implement [`Transport`] to move containers to and from a device; the
//! `mtp-usb` crate provides one over USB bulk endpoints.
//!
//! ```no_run
//! # fn demo(transport: impl mtp::Transport) -> mtp::Result<()> {
//! use mtp::{client::MtpClient, DeviceDescriptor};
//!
//! let mut client = MtpClient::new(transport);
//! client.connect(&DeviceDescriptor::from_hex("1f3a", "1002")?)?;
//! client.open_session()?;
//! for storage in client.get_storage_ids()? {
//!     let handles = client.list_objects(storage)?;
//!     println!("{storage}: {} objects", handles.len());
//! }
//! client.close_session()?;
//! client.disconnect();
//! # Ok(())
//! # }
//! ```

use core::fmt;
use num_derive::FromPrimitive;

pub mod client;
pub mod container;
pub mod dataset;

mod device;
pub use device::DeviceDescriptor;

pub use client::{ClientConfig, MtpClient, State};
pub use container::{Container, ContainerType};

/// Default configuration values
pub mod config {
    use core::time::Duration;

    /// Session ID used for every OpenSession
    pub const DEFAULT_SESSION_ID: u32 = 1;

    /// Maximum size of a single container read, in bytes.
    pub const DEFAULT_RECEIVE_SIZE: usize = 64 * 1024;

    /// Timeout for each bulk transfer.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

    /// Interval between USB device scans when monitoring.
    pub const USB_POLL_INTERVAL: Duration = Duration::from_millis(2000);

    /// USB interface class for MTP/PTP devices ("Still Image")
    pub const STILL_IMAGE_CLASS: u8 = 6;
}

/// Size of the fixed container header
pub const CONTAINER_HEADER_LEN: usize = 12;

/// Raw MTP operation codes
#[allow(missing_docs)]
pub mod op {
    pub const GET_DEVICE_INFO: u16 = 0x1001;
    pub const OPEN_SESSION: u16 = 0x1002;
    pub const CLOSE_SESSION: u16 = 0x1003;
    pub const GET_STORAGE_IDS: u16 = 0x1004;
    pub const GET_STORAGE_INFO: u16 = 0x1005;
    pub const GET_NUM_OBJECTS: u16 = 0x1006;
    pub const GET_OBJECT_HANDLES: u16 = 0x1007;
    pub const GET_OBJECT_INFO: u16 = 0x1008;
    pub const GET_OBJECT: u16 = 0x1009;
    pub const DELETE_OBJECT: u16 = 0x100B;
    pub const SEND_OBJECT_INFO: u16 = 0x100C;
    pub const SEND_OBJECT: u16 = 0x100D;
}

/// Raw MTP response codes
#[allow(missing_docs)]
pub mod resp {
    pub const OK: u16 = 0x2001;
    pub const INVALID_OBJECT_HANDLE: u16 = 0x2009;
    pub const SESSION_ALREADY_OPEN: u16 = 0x201E;
}

/// MTP operations used by this crate
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum OperationCode {
    GetDeviceInfo = op::GET_DEVICE_INFO,
    OpenSession = op::OPEN_SESSION,
    CloseSession = op::CLOSE_SESSION,
    GetStorageIds = op::GET_STORAGE_IDS,
    GetStorageInfo = op::GET_STORAGE_INFO,
    GetNumObjects = op::GET_NUM_OBJECTS,
    GetObjectHandles = op::GET_OBJECT_HANDLES,
    GetObjectInfo = op::GET_OBJECT_INFO,
    GetObject = op::GET_OBJECT,
    DeleteObject = op::DELETE_OBJECT,
    SendObjectInfo = op::SEND_OBJECT_INFO,
    SendObject = op::SEND_OBJECT,
}

impl OperationCode {
    /// Returns the raw operation code
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// MTP response codes known to this crate
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum ResponseCode {
    Ok = resp::OK,
    InvalidObjectHandle = resp::INVALID_OBJECT_HANDLE,
    SessionAlreadyOpen = resp::SESSION_ALREADY_OPEN,
}

/// Formats a raw operation or response code, with its name when known.
pub(crate) struct CodeFmt(pub u16);

fn code_fmt(code: &u16) -> CodeFmt {
    CodeFmt(*code)
}

impl fmt::Display for CodeFmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use num_traits::FromPrimitive;

        write!(f, "0x{:04X}", self.0)?;
        if let Some(o) = OperationCode::from_u16(self.0) {
            write!(f, " ({o:?})")?;
        } else if let Some(r) = ResponseCode::from_u16(self.0) {
            write!(f, " ({r:?})")?;
        }
        Ok(())
    }
}

/// MTP storage identifier
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StorageId(pub u32);

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<u32> for StorageId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// MTP object handle
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObjectHandle(pub u32);

impl ObjectHandle {
    /// Root of a storage, as the parent when listing objects
    pub const ROOT_PARENT: ObjectHandle = ObjectHandle(0xFFFF_FFFF);
    /// Root of a storage, as the parent when sending an object
    pub const ROOT: ObjectHandle = ObjectHandle(0);
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<u32> for ObjectHandle {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Electric Pass custom storage slots.
///
/// These are fixed by the device firmware rather than discovered.
pub const ELECTRIC_PASS_STORAGE_IDS: [(&str, StorageId); 6] = [
    ("slot_1", StorageId(0xFFFF_0001)),
    ("slot_2", StorageId(0xFFFF_0002)),
    ("slot_3", StorageId(0xFFFF_0003)),
    ("slot_4", StorageId(0xFFFF_0004)),
    ("slot_5", StorageId(0xFFFF_0005)),
    ("slot_6", StorageId(0xFFFF_0006)),
];

/// Returns the Electric Pass slot table as a name to storage ID map.
pub fn electric_pass_storage_ids() -> std::collections::BTreeMap<String, u32> {
    ELECTRIC_PASS_STORAGE_IDS
        .iter()
        .map(|(name, id)| (name.to_string(), id.0))
        .collect()
}

/// Look up an Electric Pass slot by name, `slot_1` to `slot_6`.
pub fn slot_storage_id(name: &str) -> Option<StorageId> {
    ELECTRIC_PASS_STORAGE_IDS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, id)| *id)
}

/// Errors from the USB transport binding
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Timed out waiting for a transfer to complete
    #[error("transfer timed out")]
    TimedOut,
    /// IO error from the USB stack
    #[error("USB IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An error type for MTP
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No USB device matched at connect time
    #[error("USB device {vendor_id:04x}:{product_id:04x} not found")]
    DeviceNotFound {
        /// USB vendor ID
        vendor_id: u16,
        /// USB product ID
        product_id: u16,
    },
    /// Bulk transfer failure
    #[error("MTP transport error: {0}")]
    Transport(#[from] TransportError),
    /// Malformed container, unexpected container, or bad client state
    #[error("MTP protocol error: {0}")]
    Protocol(String),
    /// The device returned a failure response code
    #[error("MTP operation {} failed with response {}", code_fmt(.operation), code_fmt(.code))]
    Response {
        /// Operation that failed
        operation: u16,
        /// Response code returned by the device
        code: u16,
    },
    /// Device descriptor could not be parsed
    #[error("Invalid device descriptor: {0}")]
    InvalidDescriptor(String),
}

impl Error {
    /// Returns the device response code for `Response` errors
    pub fn response_code(&self) -> Option<u16> {
        match self {
            Self::Response { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the operation may succeed if retried.
    ///
    /// Nothing in this crate retries; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(TransportError::TimedOut))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(TransportError::Io(e))
    }
}

/// MTP result type
pub type Result<T> = core::result::Result<T, Error>;

/// Constructs a [`Error::Protocol`] from a format string.
#[macro_export]
macro_rules! proto_error {
    ($($arg:tt)*) => {
        $crate::Error::Protocol(format!($($arg)*))
    };
}

/// A blocking transport to an MTP device.
///
/// A transport owns the device handle between [`connect`](Self::connect)
/// and [`disconnect`](Self::disconnect). Each [`send`](Self::send) writes one
/// complete container; each [`receive`](Self::receive) returns the bytes of
/// one read from the device, which the client treats as one container.
pub trait Transport {
    /// Find and claim the device described by `device`.
    fn connect(&mut self, device: &DeviceDescriptor) -> Result<()>;

    /// Release the device. Safe to call when not connected.
    fn disconnect(&mut self);

    /// Returns `true` between a successful `connect` and `disconnect`.
    fn is_connected(&self) -> bool;

    /// Write a buffer to the device, blocking.
    fn send(&mut self, buf: &[u8]) -> Result<()>;

    /// Blocking read of at most `max_size` bytes.
    fn receive(&mut self, max_size: usize) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, device: &DeviceDescriptor) -> Result<()> {
        (**self).connect(device)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn send(&mut self, buf: &[u8]) -> Result<()> {
        (**self).send(buf)
    }

    fn receive(&mut self, max_size: usize) -> Result<Vec<u8>> {
        (**self).receive(max_size)
    }
}
