// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! MTP datasets sent in Data containers

use deku::{DekuContainerWrite, DekuRead, DekuWrite};

use crate::{proto_error, Result, StorageId};

/// "Undefined" object format
pub const FORMAT_UNDEFINED: u16 = 0x3000;

/// Minimal ObjectInfo dataset, as sent with SendObjectInfo.
///
/// This is the reduced layout accepted by Electric Pass firmware. Fields
/// after `image_pix_width` in the full MTP ObjectInfo (capture dates,
/// keywords, etc) are absent, and the filename length is 16 bits.
#[derive(Debug, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ObjectInfo {
    /// Target storage
    pub storage_id: u32,
    /// Object format code
    pub format: u16,
    /// Protection status
    pub protection: u16,
    /// Object size in bytes
    pub compressed_size: u32,
    /// Thumbnail format code
    pub thumb_format: u16,
    /// Thumbnail size in bytes
    pub thumb_compressed_size: u32,
    /// Thumbnail width
    pub thumb_pix_width: u32,
    /// Thumbnail height
    pub thumb_pix_height: u32,
    /// Image width
    pub image_pix_width: u32,
    /// Filename length in UTF-16 code units, including the terminator
    pub filename_len: u16,
    /// UTF-16 filename, including the null terminator
    #[deku(count = "filename_len")]
    pub filename: Vec<u16>,
}

impl ObjectInfo {
    /// Describe an undefined-format object of `size` bytes.
    ///
    /// Sizes beyond 32 bits saturate.
    pub fn new(
        storage_id: StorageId,
        filename: &str,
        size: usize,
    ) -> Result<Self> {
        let mut name: Vec<u16> = filename.encode_utf16().collect();
        name.push(0);
        let filename_len = u16::try_from(name.len()).map_err(|_| {
            proto_error!("filename too long: {} chars", name.len() - 1)
        })?;

        Ok(Self {
            storage_id: storage_id.0,
            format: FORMAT_UNDEFINED,
            protection: 0,
            compressed_size: u32::try_from(size).unwrap_or(u32::MAX),
            thumb_format: 0,
            thumb_compressed_size: 0,
            thumb_pix_width: 0,
            thumb_pix_height: 0,
            image_pix_width: 0,
            filename_len,
            filename: name,
        })
    }

    /// Returns the filename without its terminator
    pub fn filename(&self) -> String {
        let name = match self.filename.split_last() {
            Some((0, rest)) => rest,
            _ => &self.filename,
        };
        String::from_utf16_lossy(name)
    }
}

/// Encode the ObjectInfo dataset for an upload of `size` bytes
pub fn build_object_info(
    storage_id: StorageId,
    filename: &str,
    size: usize,
) -> Result<Vec<u8>> {
    ObjectInfo::new(storage_id, filename, size)?
        .to_bytes()
        .map_err(|e| proto_error!("ObjectInfo encoding failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use deku::DekuContainerRead;

    #[test]
    fn minimal_layout() {
        let b = build_object_info(StorageId(0xFFFF0001), "a.bin", 3).unwrap();
        #[rustfmt::skip]
        let expect = [
            0x01, 0x00, 0xFF, 0xFF, // storage
            0x00, 0x30, // format
            0x00, 0x00, // protection
            0x03, 0x00, 0x00, 0x00, // size
            0x00, 0x00, // thumb format
            0x00, 0x00, 0x00, 0x00, // thumb size
            0x00, 0x00, 0x00, 0x00, // thumb width
            0x00, 0x00, 0x00, 0x00, // thumb height
            0x00, 0x00, 0x00, 0x00, // image width
            0x06, 0x00, // filename length, with terminator
            b'a', 0, b'.', 0, b'b', 0, b'i', 0, b'n', 0,
            0x00, 0x00,
        ];
        assert_eq!(b, expect);
    }

    #[test]
    fn empty_name() {
        let b = build_object_info(StorageId(1), "", 0).unwrap();
        assert_eq!(b.len(), 32 + 2);
        assert_eq!(&b[30..], &[1, 0, 0, 0]);
    }

    #[test]
    fn non_ascii_name() {
        let b = build_object_info(StorageId(1), "干员.png", 10).unwrap();
        let ((rest, _), info) = ObjectInfo::from_bytes((&b[..], 0)).unwrap();
        assert!(rest.is_empty());
        assert_eq!(info.filename_len, 7);
        assert_eq!(info.filename(), "干员.png");
        assert_eq!(info.compressed_size, 10);
    }

    #[test]
    fn oversize_saturates() {
        let info = ObjectInfo::new(StorageId(1), "big", usize::MAX).unwrap();
        assert_eq!(info.compressed_size, u32::MAX);
    }

    #[test]
    fn long_name_rejected() {
        let name = "x".repeat(70000);
        assert!(build_object_info(StorageId(1), &name, 1).is_err());
    }
}
