// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP session and operations.
 *
 * Copyright (c) 2025 Code Construct
 */

//! MTP client: session lifecycle and object operations
//!
//! Each operation is one MTP transaction: a Command container, an optional
//! Data phase, then a Response container, all tagged with the same
//! transaction ID. The client is strictly half-duplex; a transaction
//! completes before the next one starts.

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use std::collections::BTreeMap;

use crate::container::{build_container, parse_container, parse_uint32_array};
use crate::dataset::build_object_info;
use crate::{
    config, op, proto_error, resp, CodeFmt, Container, ContainerType,
    DeviceDescriptor, Error, ObjectHandle, Result, StorageId, Transport,
};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Session ID sent with OpenSession
    pub session_id: u32,
    /// Buffer size for each container read
    pub receive_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_id: config::DEFAULT_SESSION_ID,
            receive_size: config::DEFAULT_RECEIVE_SIZE,
        }
    }
}

/// Client connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No device
    Disconnected,
    /// Device claimed, no session
    Connected,
    /// Session open, object operations permitted
    SessionOpen,
}

#[derive(Debug, Default)]
struct Session {
    // Last transaction ID used. Pre-incremented, so the first is 1.
    transaction_id: u32,
    open: bool,
}

/// An MTP initiator over a [`Transport`].
///
/// All methods block until the transaction completes or the transport
/// times out. Callers sharing a client between threads must serialise
/// access, e.g. with a `Mutex`.
pub struct MtpClient<T: Transport> {
    transport: T,
    config: ClientConfig,
    session: Session,
}

impl<T: Transport> MtpClient<T> {
    /// Create a new client with the default configuration
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Create a new client
    pub fn with_config(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            session: Session::default(),
        }
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Returns the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the current connection state
    pub fn state(&self) -> State {
        if !self.transport.is_connected() {
            State::Disconnected
        } else if self.session.open {
            State::SessionOpen
        } else {
            State::Connected
        }
    }

    /// Returns `true` if a device is connected
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Returns `true` if a session is open
    pub fn is_session_open(&self) -> bool {
        self.session.open
    }

    /// Returns the most recently used transaction ID, 0 if none yet.
    pub fn last_transaction_id(&self) -> u32 {
        self.session.transaction_id
    }

    /// Connect to a device.
    ///
    /// Transaction IDs restart from 1 for the new connection.
    pub fn connect(&mut self, device: &DeviceDescriptor) -> Result<()> {
        self.session = Session::default();
        self.transport.connect(device)?;
        info!("MTP connected to {}", device.device_id());
        Ok(())
    }

    /// Release the device.
    ///
    /// Any session is considered closed, whether or not
    /// [`close_session`](Self::close_session) was called.
    pub fn disconnect(&mut self) {
        let was_connected = self.transport.is_connected();
        self.transport.disconnect();
        self.session.open = false;
        if was_connected {
            info!("MTP disconnected");
        }
    }

    /// Open a session.
    ///
    /// A device reporting that the session is already open is treated as
    /// success.
    pub fn open_session(&mut self) -> Result<()> {
        if !self.transport.is_connected() {
            return Err(proto_error!("not connected"));
        }

        let session_id = self.config.session_id;
        let rsp = self.send_command(op::OPEN_SESSION, &[session_id])?;
        if rsp.code == resp::SESSION_ALREADY_OPEN {
            debug!("session {session_id} was already open");
        }
        self.session.open = true;
        info!("MTP session opened (id={session_id})");
        Ok(())
    }

    /// Close the session.
    ///
    /// Does nothing if no session is open. The session is marked closed
    /// even if the device fails the request; only transport errors are
    /// returned.
    pub fn close_session(&mut self) -> Result<()> {
        if !self.session.open {
            return Ok(());
        }

        let r = self.send_command(op::CLOSE_SESSION, &[]);
        self.session.open = false;
        match r {
            Ok(_) => info!("MTP session closed"),
            // Best-effort: teardown continues regardless of the device's reply
            Err(e @ (Error::Response { .. } | Error::Protocol(_))) => {
                debug!("Ignoring CloseSession failure: {e}");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// List the storage IDs on the device
    pub fn get_storage_ids(&mut self) -> Result<Vec<StorageId>> {
        self.require_session()?;

        let c = self.send_command(op::GET_STORAGE_IDS, &[])?;
        Ok(parse_uint32_array(&c.payload)
            .into_iter()
            .map(StorageId)
            .collect())
    }

    /// List object handles in a storage.
    ///
    /// `object_format` 0 matches all formats. A `parent_handle` of
    /// [`ObjectHandle::ROOT_PARENT`] lists the root.
    pub fn get_object_handles(
        &mut self,
        storage_id: StorageId,
        object_format: u32,
        parent_handle: ObjectHandle,
    ) -> Result<Vec<ObjectHandle>> {
        self.require_session()?;

        let c = self.send_command(
            op::GET_OBJECT_HANDLES,
            &[storage_id.0, object_format, parent_handle.0],
        )?;
        Ok(parse_uint32_array(&c.payload)
            .into_iter()
            .map(ObjectHandle)
            .collect())
    }

    /// List all objects in the root of a storage
    pub fn list_objects(
        &mut self,
        storage_id: StorageId,
    ) -> Result<Vec<ObjectHandle>> {
        self.get_object_handles(storage_id, 0, ObjectHandle::ROOT_PARENT)
    }

    /// Count objects in a storage, with the same filters as
    /// [`get_object_handles`](Self::get_object_handles).
    pub fn get_num_objects(
        &mut self,
        storage_id: StorageId,
        object_format: u32,
        parent_handle: ObjectHandle,
    ) -> Result<u32> {
        self.require_session()?;

        let c = self.send_command(
            op::GET_NUM_OBJECTS,
            &[storage_id.0, object_format, parent_handle.0],
        )?;
        c.params()
            .first()
            .copied()
            .ok_or_else(|| proto_error!("GetNumObjects response has no count"))
    }

    /// Download an object. The data is returned as sent by the device.
    pub fn get_object(
        &mut self,
        object_handle: ObjectHandle,
    ) -> Result<Vec<u8>> {
        self.require_session()?;

        let c = self.send_command(op::GET_OBJECT, &[object_handle.0])?;
        Ok(c.payload)
    }

    /// Delete an object
    pub fn delete_object(&mut self, object_handle: ObjectHandle) -> Result<()> {
        self.require_session()?;

        // Second parameter is the format filter, unused for a single handle
        self.send_command(op::DELETE_OBJECT, &[object_handle.0, 0])?;
        info!("Object deleted: {object_handle}");
        Ok(())
    }

    /// Upload an object, returning the handle assigned by the device.
    ///
    /// This performs two transactions: SendObjectInfo describing the object,
    /// then SendObject with the contents. Each is checked separately.
    /// A `parent_handle` of [`ObjectHandle::ROOT`] places the object in the
    /// storage root.
    pub fn send_object(
        &mut self,
        storage_id: StorageId,
        filename: &str,
        data: &[u8],
        parent_handle: ObjectHandle,
    ) -> Result<ObjectHandle> {
        self.require_session()?;

        let info = build_object_info(storage_id, filename, data.len())?;

        // Info and data phases share a transaction ID
        let tid = self.next_transaction_id();
        self.send_container(
            ContainerType::Command,
            op::SEND_OBJECT_INFO,
            tid,
            &[storage_id.0, parent_handle.0],
            &[],
        )?;
        self.send_container(
            ContainerType::Data,
            op::SEND_OBJECT_INFO,
            tid,
            &[],
            &info,
        )?;
        let rsp = self.expect_response(op::SEND_OBJECT_INFO, tid)?;

        // Response parameters: storage, parent, new handle
        let handle = match rsp.params()[..] {
            [_, _, h, ..] => ObjectHandle(h),
            _ => {
                warn!(
                    "SendObjectInfo response has {} parameter bytes, no handle",
                    rsp.payload.len()
                );
                ObjectHandle(0)
            }
        };

        let tid = self.next_transaction_id();
        self.send_container(
            ContainerType::Command,
            op::SEND_OBJECT,
            tid,
            &[],
            &[],
        )?;
        self.send_container(
            ContainerType::Data,
            op::SEND_OBJECT,
            tid,
            &[],
            data,
        )?;
        self.expect_response(op::SEND_OBJECT, tid)?;

        info!("Object sent: {filename} (handle={handle})");
        Ok(handle)
    }

    /// Returns the Electric Pass storage slot table.
    ///
    /// This is fixed, the device is not queried.
    pub fn get_electric_pass_storage_ids(&self) -> BTreeMap<String, u32> {
        crate::electric_pass_storage_ids()
    }

    fn require_session(&self) -> Result<()> {
        if self.session.open {
            Ok(())
        } else {
            Err(proto_error!("session not open"))
        }
    }

    fn next_transaction_id(&mut self) -> u32 {
        let s = &mut self.session;
        s.transaction_id = s.transaction_id.wrapping_add(1);
        s.transaction_id
    }

    fn send_container(
        &mut self,
        typ: ContainerType,
        code: u16,
        tid: u32,
        params: &[u32],
        data: &[u8],
    ) -> Result<()> {
        let buf = build_container(typ, code, tid, params, data);
        debug!("tx {typ:?} {} tid {tid}, {} bytes", CodeFmt(code), buf.len());
        trace!("tx {:02x?}", &buf[..buf.len().min(64)]);
        self.transport.send(&buf)
    }

    fn receive_container(&mut self) -> Result<Container> {
        let raw = self.transport.receive(self.config.receive_size)?;
        trace!("rx {:02x?}", &raw[..raw.len().min(64)]);
        let c = parse_container(&raw)?;
        debug!(
            "rx {:?} {} tid {}, {} bytes",
            c.container_type,
            CodeFmt(c.code),
            c.transaction_id,
            raw.len()
        );
        Ok(c)
    }

    fn check_tid(c: &Container, tid: u32) {
        if c.transaction_id != tid {
            warn!(
                "Reply has transaction ID {}, expected {tid}",
                c.transaction_id
            );
        }
    }

    /// Reads the Response container that ends a transaction, failing
    /// on anything other than OK.
    fn expect_response(
        &mut self,
        operation: u16,
        tid: u32,
    ) -> Result<Container> {
        let rsp = self.receive_container()?;
        if rsp.container_type != ContainerType::Response {
            return Err(proto_error!(
                "unexpected container type {:?} for {}, expected Response",
                rsp.container_type,
                CodeFmt(operation)
            ));
        }
        Self::check_tid(&rsp, tid);
        if rsp.code != resp::OK {
            return Err(Error::Response {
                operation,
                code: rsp.code,
            });
        }
        Ok(rsp)
    }

    /// Performs a transaction without a host-to-device data phase.
    ///
    /// Returns the Data container if the device sent one, otherwise the
    /// Response container. A Data phase only succeeds once the following
    /// Response reports OK.
    fn send_command(
        &mut self,
        operation: u16,
        params: &[u32],
    ) -> Result<Container> {
        let tid = self.next_transaction_id();
        self.send_container(
            ContainerType::Command,
            operation,
            tid,
            params,
            &[],
        )?;

        let c = self.receive_container()?;
        match c.container_type {
            ContainerType::Data => {
                Self::check_tid(&c, tid);
                self.expect_response(operation, tid)?;
                Ok(c)
            }
            ContainerType::Response => {
                Self::check_tid(&c, tid);
                match c.code {
                    resp::OK | resp::SESSION_ALREADY_OPEN => Ok(c),
                    code => Err(Error::Response { operation, code }),
                }
            }
            typ => Err(proto_error!(
                "unexpected container type {typ:?} for {}",
                CodeFmt(operation)
            )),
        }
    }
}
