//! VDI header decoding.
//!
//! The header is a fixed 512-byte preamble. Only the fields the copy needs
//! are validated; the remaining ones are decoded for the info report.

use std::fmt;
use std::io::Read;

use crate::error::{Error, IoOp, Result};

/// Size of the fixed preamble in bytes.
pub const HEADER_SIZE: usize = 0x200;

/// Text signature at offset 0.
pub const SIGNATURE_TEXT: &[u8; 40] = b"<<< Oracle VM VirtualBox Disk Image >>>\n";

/// Binary signature VirtualBox stores at offset 0x40.
pub const BINARY_SIGNATURE: u32 = 0xBEDA_107F;

const OFF_SIGNATURE: usize = 0x40;
const OFF_VERSION: usize = 0x44;
const OFF_HEADER_SIZE: usize = 0x48;
const OFF_IMAGE_TYPE: usize = 0x4c;
const OFF_IMAGE_FLAGS: usize = 0x50;
const OFF_DESCRIPTION: usize = 0x54;
const DESCRIPTION_LEN: usize = 0x100;
const OFF_MAP_OFFSET: usize = 0x154;
const OFF_DATA_OFFSET: usize = 0x158;
const OFF_SECTOR_SIZE: usize = 0x168;
const OFF_DISK_SIZE_LOW: usize = 0x170;
const OFF_DISK_SIZE_HIGH: usize = 0x174;
const OFF_BLOCK_SIZE: usize = 0x178;
const OFF_BLOCKS_IN_IMAGE: usize = 0x180;
const OFF_BLOCKS_ALLOCATED: usize = 0x184;

/// VDI image variants as recorded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Dynamic,
    Fixed,
    Undo,
    Differencing,
    Unknown(u32),
}

impl From<u32> for ImageType {
    fn from(value: u32) -> Self {
        match value {
            1 => ImageType::Dynamic,
            2 => ImageType::Fixed,
            3 => ImageType::Undo,
            4 => ImageType::Differencing,
            other => ImageType::Unknown(other),
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageType::Dynamic => write!(f, "dynamic"),
            ImageType::Fixed => write!(f, "fixed"),
            ImageType::Undo => write!(f, "undo"),
            ImageType::Differencing => write!(f, "differencing"),
            ImageType::Unknown(value) => write!(f, "unknown ({})", value),
        }
    }
}

/// Decoded VDI header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// Raw image type field (diagnostic only).
    pub image_type: u32,
    /// Byte offset of the allocation map.
    pub map_offset: u32,
    /// Byte offset of the first block payload.
    pub data_offset: u32,
    /// Logical disk size in bytes.
    pub disk_size: u64,
    /// Bytes per logical block, never zero.
    pub block_size: u32,

    /// Binary signature at 0x40.
    pub signature: u32,
    /// Format version, major in the high half.
    pub version: u32,
    /// Header size the image claims for itself.
    pub header_size: u32,
    pub image_flags: u32,
    /// Free-text description, NUL padding stripped.
    pub description: String,
    pub sector_size: u32,
    /// Block count as stored in the header; the copy uses [`Self::block_count`].
    pub blocks_in_image: u32,
    pub blocks_allocated: u32,
}

impl ImageHeader {
    /// Decode a header from the first [`HEADER_SIZE`] bytes of an image.
    ///
    /// # Errors
    ///
    /// - [`Error::Truncated`] if `bytes` is shorter than [`HEADER_SIZE`].
    /// - [`Error::Format`] if the text signature does not match or the block
    ///   size is zero.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::truncated(
                "header",
                HEADER_SIZE as u64,
                bytes.len() as u64,
            ));
        }

        if &bytes[..SIGNATURE_TEXT.len()] != SIGNATURE_TEXT {
            return Err(Error::format(
                "signature",
                format!(
                    "expected {:?}, found {:?}",
                    String::from_utf8_lossy(SIGNATURE_TEXT),
                    String::from_utf8_lossy(&bytes[..SIGNATURE_TEXT.len()])
                ),
            ));
        }

        let block_size = le_u32(bytes, OFF_BLOCK_SIZE)?;
        if block_size == 0 {
            return Err(Error::format("blockSize", "block size must be non-zero"));
        }

        let disk_size_low = le_u32(bytes, OFF_DISK_SIZE_LOW)? as u64;
        let disk_size_high = le_u32(bytes, OFF_DISK_SIZE_HIGH)? as u64;

        let description_bytes = &bytes[OFF_DESCRIPTION..OFF_DESCRIPTION + DESCRIPTION_LEN];
        let description_end = description_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DESCRIPTION_LEN);
        let description = String::from_utf8_lossy(&description_bytes[..description_end])
            .trim_end()
            .to_string();

        Ok(Self {
            image_type: le_u32(bytes, OFF_IMAGE_TYPE)?,
            map_offset: le_u32(bytes, OFF_MAP_OFFSET)?,
            data_offset: le_u32(bytes, OFF_DATA_OFFSET)?,
            disk_size: disk_size_low + (disk_size_high << 32),
            block_size,
            signature: le_u32(bytes, OFF_SIGNATURE)?,
            version: le_u32(bytes, OFF_VERSION)?,
            header_size: le_u32(bytes, OFF_HEADER_SIZE)?,
            image_flags: le_u32(bytes, OFF_IMAGE_FLAGS)?,
            description,
            sector_size: le_u32(bytes, OFF_SECTOR_SIZE)?,
            blocks_in_image: le_u32(bytes, OFF_BLOCKS_IN_IMAGE)?,
            blocks_allocated: le_u32(bytes, OFF_BLOCKS_ALLOCATED)?,
        })
    }

    /// Read and decode the header from the current position of `reader`.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        reader
            .by_ref()
            .take(HEADER_SIZE as u64)
            .read_to_end(&mut buf)
            .map_err(|e| Error::io(IoOp::Read, 0, e))?;
        Self::decode(&buf)
    }

    /// Number of whole logical blocks; a trailing partial block is dropped.
    #[inline]
    pub fn block_count(&self) -> u64 {
        self.disk_size / self.block_size as u64
    }

    /// Size of the logical disk the copy produces, in bytes.
    #[inline]
    pub fn raw_size(&self) -> u64 {
        self.block_count() * self.block_size as u64
    }

    /// The image variant named by [`Self::image_type`].
    pub fn kind(&self) -> ImageType {
        ImageType::from(self.image_type)
    }

    /// Version formatted as `major.minor`.
    pub fn version_string(&self) -> String {
        format!("{}.{}", self.version >> 16, self.version & 0xffff)
    }
}

/// Extract a little-endian `u32` at `offset`.
fn le_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| Error::truncated("header field", (offset + 4) as u64, bytes.len() as u64))
}
