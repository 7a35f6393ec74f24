//! VDI image decoding.
//!
//! This module decodes the two metadata structures a dynamically-allocated
//! VDI image needs for a raw copy: the fixed header and the block
//! allocation map.

pub mod header;
pub mod map;

pub use header::{ImageHeader, ImageType, BINARY_SIGNATURE, HEADER_SIZE, SIGNATURE_TEXT};
pub use map::{AllocationMap, BlockLocation, BLOCK_FREE, BLOCK_ZERO};

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Error, IoOp, Result};

/// A decoded VDI image: header plus allocation map.
///
/// Both parts are immutable once read.
#[derive(Debug, Clone)]
pub struct VdiImage {
    header: ImageHeader,
    map: AllocationMap,
}

impl VdiImage {
    /// Decode the header and allocation map from `reader`.
    ///
    /// The reader is rewound to offset 0 first; its position afterwards is
    /// unspecified.
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::io(IoOp::Seek, 0, e))?;
        let header = ImageHeader::read_from(reader)?;
        let block_count = header.block_count();

        tracing::debug!(
            image_type = %header.kind(),
            map_offset = header.map_offset,
            data_offset = header.data_offset,
            disk_size = header.disk_size,
            block_size = header.block_size,
            block_count,
            "decoded VDI header"
        );

        if header.kind() == ImageType::Differencing {
            tracing::warn!("differencing image: blocks held by the parent image read as zeros");
        }
        if header.blocks_in_image as u64 != block_count {
            tracing::warn!(
                blocks_in_image = header.blocks_in_image,
                block_count,
                "header block count disagrees with disk size / block size"
            );
        }

        let map = AllocationMap::read_from(reader, header.map_offset as u64, block_count)?;
        tracing::debug!(
            allocated = map.allocated_count(),
            holes = map.len() - map.allocated_count(),
            "decoded allocation map"
        );

        Ok(Self { header, map })
    }

    /// Open the file at `path` and decode it.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| Error::file(e, path))?;
        Self::read_from(&mut file)
    }

    /// Build an image from already-decoded parts.
    pub fn from_parts(header: ImageHeader, map: AllocationMap) -> Self {
        Self { header, map }
    }

    #[inline]
    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    #[inline]
    pub fn map(&self) -> &AllocationMap {
        &self.map
    }

    /// Source byte offset of physical slot `slot`.
    #[inline]
    pub fn slot_offset(&self, slot: u32) -> u64 {
        self.header.data_offset as u64 + slot as u64 * self.header.block_size as u64
    }
}
