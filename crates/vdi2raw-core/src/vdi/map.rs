//! Block allocation map.
//!
//! The map is a table of little-endian `i32` entries, one per logical block,
//! stored at the header's map offset. A non-negative entry is the physical
//! slot of the block's payload; the two reserved negative values mark blocks
//! with no payload.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{Error, IoOp, Result};

/// Map entry for a block that was never written.
pub const BLOCK_FREE: i32 = -1;

/// Map entry for a block VirtualBox discarded as all-zero.
pub const BLOCK_ZERO: i32 = -2;

/// Result of looking up a logical block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLocation {
    /// Payload lives in the given physical slot.
    Allocated(u32),
    /// No payload; the block reads as zeros.
    Hole,
}

/// Decoded allocation map, indexed by logical block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationMap {
    entries: Vec<i32>,
}

impl AllocationMap {
    /// Decode `block_count` entries from `bytes`.
    ///
    /// `bytes` must start at the first entry. Exactly `block_count * 4` bytes
    /// are consumed.
    pub fn decode(bytes: &[u8], block_count: u64) -> Result<Self> {
        let needed = map_len(block_count)?;
        if (bytes.len() as u64) < needed {
            return Err(Error::truncated(
                "allocation map",
                needed,
                bytes.len() as u64,
            ));
        }

        let entries = bytes[..needed as usize]
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect::<Vec<_>>();

        if let Some((index, &entry)) = entries
            .iter()
            .enumerate()
            .find(|&(_, &e)| e < 0 && e != BLOCK_FREE && e != BLOCK_ZERO)
        {
            return Err(Error::format(
                "allocation map",
                format!("block {} has invalid entry {}", index, entry),
            ));
        }

        Ok(Self { entries })
    }

    /// Seek `reader` to `map_offset` and decode `block_count` entries.
    ///
    /// A zero-length map performs no I/O. The buffer only grows as bytes
    /// arrive, so a short source claiming a huge map is reported as
    /// truncated rather than sized up front.
    pub fn read_from<R: Read + Seek>(reader: &mut R, map_offset: u64, block_count: u64) -> Result<Self> {
        let needed = map_len(block_count)?;
        if needed == 0 {
            return Ok(Self {
                entries: Vec::new(),
            });
        }

        reader
            .seek(SeekFrom::Start(map_offset))
            .map_err(|e| Error::io(IoOp::Seek, map_offset, e))?;

        let mut buf = Vec::new();
        reader
            .by_ref()
            .take(needed)
            .read_to_end(&mut buf)
            .map_err(|e| Error::io(IoOp::Read, map_offset, e))?;
        Self::decode(&buf, block_count)
    }

    /// Look up logical block `index`.
    ///
    /// Indices past the end of the map are holes.
    #[inline]
    pub fn lookup(&self, index: u64) -> BlockLocation {
        match usize::try_from(index).ok().and_then(|i| self.entries.get(i)) {
            Some(&entry) if entry >= 0 => BlockLocation::Allocated(entry as u32),
            _ => BlockLocation::Hole,
        }
    }

    /// Number of logical blocks covered by the map.
    #[inline]
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Returns true if the map covers no blocks.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries with a physical slot.
    pub fn allocated_count(&self) -> u64 {
        self.entries.iter().filter(|&&e| e >= 0).count() as u64
    }
}

/// Byte length of a map with `block_count` entries.
fn map_len(block_count: u64) -> Result<u64> {
    block_count
        .checked_mul(4)
        .filter(|&len| usize::try_from(len).is_ok())
        .ok_or_else(|| {
            Error::format(
                "blockCount",
                format!("{} blocks do not fit in memory", block_count),
            )
        })
}
