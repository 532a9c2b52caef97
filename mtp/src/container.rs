// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP container framing.
 *
 * Copyright (c) 2025 Code Construct
 */

//! MTP container encoding and decoding
//!
//! Every MTP message on the bulk pipe is a container: a 12-byte
//! little-endian header followed by a payload.
//!
//! ```text
//!   u32  length            header + payload
//!   u16  container type    Command, Data, Response, Event
//!   u16  code              operation or response code
//!   u32  transaction ID
//!   ...  payload           u32 parameters, or a data phase
//! ```

use deku::{DekuContainerRead, DekuRead};

use crate::{proto_error, Result, CONTAINER_HEADER_LEN};

/// MTP container type field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    /// Operation request, host to device
    Command,
    /// Data phase, either direction
    Data,
    /// Operation result, device to host
    Response,
    /// Asynchronous event, device to host
    Event,
    /// Any other value
    Unknown(u16),
}

impl ContainerType {
    /// Returns the wire value
    pub fn value(self) -> u16 {
        match self {
            Self::Command => 1,
            Self::Data => 2,
            Self::Response => 3,
            Self::Event => 4,
            Self::Unknown(v) => v,
        }
    }
}

impl From<u16> for ContainerType {
    fn from(v: u16) -> Self {
        match v {
            1 => Self::Command,
            2 => Self::Data,
            3 => Self::Response,
            4 => Self::Event,
            _ => Self::Unknown(v),
        }
    }
}

#[derive(Debug, DekuRead)]
#[deku(endian = "little")]
struct Header {
    length: u32,
    typ: u16,
    code: u16,
    transaction_id: u32,
}

/// A decoded MTP container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Length field as received, header included
    pub length: u32,
    /// Container type
    pub container_type: ContainerType,
    /// Operation code for Command and Data containers, response code for
    /// Response containers
    pub code: u16,
    /// Transaction ID
    pub transaction_id: u32,
    /// Payload following the header
    pub payload: Vec<u8>,
}

impl Container {
    /// Decode the payload as consecutive little-endian `u32` parameters.
    ///
    /// Used for Command and Response containers. A trailing partial
    /// parameter is ignored.
    pub fn params(&self) -> Vec<u32> {
        self.payload
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Build an encoded container.
///
/// `params` are written as little-endian `u32`s, followed by `data`.
/// Command containers carry `params`, Data containers carry `data`.
pub fn build_container(
    container_type: ContainerType,
    operation_code: u16,
    transaction_id: u32,
    params: &[u32],
    data: &[u8],
) -> Vec<u8> {
    let len = CONTAINER_HEADER_LEN + params.len() * 4 + data.len();
    // Saturates for payloads that can't be framed
    let length = u32::try_from(len).unwrap_or(u32::MAX);

    let mut buf = Vec::with_capacity(len);
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&container_type.value().to_le_bytes());
    buf.extend_from_slice(&operation_code.to_le_bytes());
    buf.extend_from_slice(&transaction_id.to_le_bytes());
    for p in params {
        buf.extend_from_slice(&p.to_le_bytes());
    }
    buf.extend_from_slice(data);
    buf
}

/// Decode a container from a bulk read.
///
/// The payload extends to the header's length field. Bytes past that
/// length are ignored, and a length beyond the end of `raw` is clamped.
pub fn parse_container(raw: &[u8]) -> Result<Container> {
    if raw.len() < CONTAINER_HEADER_LEN {
        return Err(proto_error!("container too short: {} bytes", raw.len()));
    }

    let (_, hdr) = Header::from_bytes((raw, 0))
        .map_err(|e| proto_error!("bad container header: {e}"))?;

    let end = (hdr.length as usize).min(raw.len());
    let payload = if end > CONTAINER_HEADER_LEN {
        raw[CONTAINER_HEADER_LEN..end].to_vec()
    } else {
        Vec::new()
    };

    Ok(Container {
        length: hdr.length,
        container_type: hdr.typ.into(),
        code: hdr.code,
        transaction_id: hdr.transaction_id,
        payload,
    })
}

/// Parse a count-prefixed array of little-endian `u32`s.
///
/// A buffer shorter than the count implies returns the values that were
/// present; this never fails.
pub fn parse_uint32_array(data: &[u8]) -> Vec<u32> {
    let Some((count, rest)) = data.split_first_chunk::<4>() else {
        return Vec::new();
    };
    let count = u32::from_le_bytes(*count) as usize;

    rest.chunks_exact(4)
        .take(count)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{op, resp, Error};
    use proptest::prelude::*;

    #[test]
    fn command_layout() {
        let b = build_container(
            ContainerType::Command,
            op::OPEN_SESSION,
            1,
            &[1],
            &[],
        );
        assert_eq!(
            b,
            [
                0x10, 0x00, 0x00, 0x00, // length 16
                0x01, 0x00, // command
                0x02, 0x10, // OpenSession
                0x01, 0x00, 0x00, 0x00, // tid 1
                0x01, 0x00, 0x00, 0x00, // session 1
            ]
        );
    }

    #[test]
    fn data_layout() {
        let b = build_container(
            ContainerType::Data,
            op::SEND_OBJECT,
            7,
            &[],
            &[0xaa, 0xbb, 0xcc],
        );
        assert_eq!(&b[..4], &15u32.to_le_bytes());
        assert_eq!(&b[4..6], &[0x02, 0x00]);
        assert_eq!(&b[6..8], &[0x0d, 0x10]);
        assert_eq!(&b[8..12], &[0x07, 0x00, 0x00, 0x00]);
        assert_eq!(&b[12..], &[0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn parse_response() {
        let raw = build_container(
            ContainerType::Response,
            resp::OK,
            3,
            &[0xFFFF0001, 0, 0x42],
            &[],
        );
        let c = parse_container(&raw).unwrap();
        assert_eq!(c.container_type, ContainerType::Response);
        assert_eq!(c.code, resp::OK);
        assert_eq!(c.transaction_id, 3);
        assert_eq!(c.length, 24);
        assert_eq!(c.params(), [0xFFFF0001, 0, 0x42]);
    }

    #[test]
    fn parse_ignores_padding() {
        let mut raw =
            build_container(ContainerType::Data, op::GET_OBJECT, 2, &[], b"abc");
        raw.extend_from_slice(&[0u8; 49]);
        let c = parse_container(&raw).unwrap();
        assert_eq!(c.payload, b"abc");
        assert_eq!(c.length, 15);
    }

    #[test]
    fn parse_clamps_long_length() {
        let mut raw =
            build_container(ContainerType::Data, op::GET_OBJECT, 2, &[], b"abcd");
        raw[0..4].copy_from_slice(&1000u32.to_le_bytes());
        let c = parse_container(&raw).unwrap();
        assert_eq!(c.payload, b"abcd");
        assert_eq!(c.length, 1000);
    }

    #[test]
    fn parse_header_only() {
        let mut raw =
            build_container(ContainerType::Response, resp::OK, 9, &[], &[]);
        // a length field below the header size gives no payload
        raw[0..4].copy_from_slice(&4u32.to_le_bytes());
        raw.extend_from_slice(&[1, 2, 3, 4]);
        let c = parse_container(&raw).unwrap();
        assert!(c.payload.is_empty());
    }

    #[test]
    fn parse_unknown_type() {
        let raw = build_container(ContainerType::Unknown(9), 0x1001, 1, &[], &[]);
        let c = parse_container(&raw).unwrap();
        assert_eq!(c.container_type, ContainerType::Unknown(9));
        assert_eq!(ContainerType::from(4), ContainerType::Event);
    }

    #[test]
    fn storage_id_array() {
        let data = [
            0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0xFF, 0xFF, 0x02, 0x00, 0xFF,
            0xFF,
        ];
        assert_eq!(parse_uint32_array(&data), [0xFFFF0001, 0xFFFF0002]);
    }

    #[test]
    fn array_extra_data_ignored() {
        let data = [1, 0, 0, 0, 5, 0, 0, 0, 6, 0, 0, 0];
        assert_eq!(parse_uint32_array(&data), [5]);
    }

    #[test]
    fn array_short() {
        assert!(parse_uint32_array(&[]).is_empty());
        assert!(parse_uint32_array(&[3, 0, 0]).is_empty());
        // count 3, one and a half values present
        let data = [3, 0, 0, 0, 9, 0, 0, 0, 1, 2];
        assert_eq!(parse_uint32_array(&data), [9]);
    }

    proptest! {
        #[test]
        fn roundtrip(
            typ in 1..5u16,
            code: u16,
            tid: u32,
            params in proptest::collection::vec(any::<u32>(), 0..6),
            data in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let b = build_container(typ.into(), code, tid, &params, &data);

            let len = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            prop_assert_eq!(len as usize, b.len());
            prop_assert_eq!(len as usize, 12 + params.len() * 4 + data.len());

            let c = parse_container(&b).unwrap();
            prop_assert_eq!(c.container_type.value(), typ);
            prop_assert_eq!(c.code, code);
            prop_assert_eq!(c.transaction_id, tid);
            prop_assert_eq!(&c.payload[..params.len() * 4], &b[12..12 + params.len() * 4]);
            prop_assert_eq!(&c.payload[params.len() * 4..], &data[..]);
        }

        #[test]
        fn short_rejected(raw in proptest::collection::vec(any::<u8>(), 0..12)) {
            let r = parse_container(&raw);
            prop_assert!(matches!(r, Err(Error::Protocol(_))));
        }

        #[test]
        fn array_truncation(
            values in proptest::collection::vec(any::<u32>(), 0..16),
            extra in 0..8u32,
        ) {
            // claims more values than are present
            let count = values.len() as u32 + extra;
            let mut data = count.to_le_bytes().to_vec();
            for v in &values {
                data.extend_from_slice(&v.to_le_bytes());
            }
            prop_assert_eq!(parse_uint32_array(&data), values);
        }
    }
}
