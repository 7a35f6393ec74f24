//! Block copy engine.
//!
//! Walks the logical blocks of a [`VdiImage`] in order and writes each one
//! to the destination at its logical offset:
//! - allocated blocks are read from their physical slot in the source
//! - holes become explicit zeros, or a forward seek in sparse mode
//!
//! Blocks move through a fixed-size chunk buffer, so memory use does not
//! depend on the block size the header claims.
//!
//! A session may start part-way into the disk (`skip_bytes`). Destination
//! offsets always equal logical disk offsets, so a copy that was interrupted
//! can be continued in place by resuming at the destination's current length.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use vdi2raw_core::copy::{CopyOptions, CopySession};
//! use vdi2raw_core::vdi::VdiImage;
//!
//! let mut source = File::open("disk.vdi").unwrap();
//! let image = VdiImage::read_from(&mut source).unwrap();
//! let dest = File::create("disk.raw").unwrap();
//!
//! let mut session = CopySession::new(source, dest, image, CopyOptions::default()).unwrap();
//! let result = session.run(None).unwrap();
//! println!("{} blocks copied", result.blocks_processed);
//! ```

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::time::Instant;

use crate::error::{Error, IoOp, Result};
use crate::guard::CancelToken;
use crate::progress::{CopyProgress, ProgressCallback, ProgressEstimator};
use crate::vdi::{BlockLocation, VdiImage};

/// Largest buffer a session allocates for moving block data.
pub const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// A seekable destination that can also be resized.
pub trait RawTarget: Write + Seek {
    /// Truncate or extend to exactly `len` bytes.
    ///
    /// Targets with a fixed size, such as block devices, leave their size
    /// unchanged and return `Ok`.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Push written data to stable storage.
    fn sync(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl RawTarget for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        // ftruncate fails on devices; their holes keep the previous contents.
        if !self.metadata()?.file_type().is_file() {
            tracing::debug!(len, "destination is not a regular file, size left unchanged");
            return Ok(());
        }
        File::set_len(self, len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

impl RawTarget for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds memory"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

impl<T: RawTarget + ?Sized> RawTarget for &mut T {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}

/// Options for a copy session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Seek over holes instead of writing zeros.
    pub sparse: bool,
    /// Logical byte offset at which to start copying.
    pub skip_bytes: u64,
}

impl CopyOptions {
    /// Create new copy options with specified settings.
    pub fn new(sparse: bool, skip_bytes: u64) -> Self {
        Self { sparse, skip_bytes }
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn resume_at(mut self, skip_bytes: u64) -> Self {
        self.skip_bytes = skip_bytes;
        self
    }

    /// Check the options against an image of `raw_size` logical bytes.
    pub fn validate(&self, raw_size: u64) -> Result<()> {
        if self.skip_bytes > raw_size {
            return Err(Error::invalid_options(format!(
                "resume offset {} is past the end of the {}-byte disk",
                self.skip_bytes, raw_size
            )));
        }
        Ok(())
    }
}

/// Summary of a finished copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyResult {
    /// Logical blocks handled by this session, partial first block included.
    pub blocks_processed: u64,
    pub allocated_blocks: u64,
    pub hole_blocks: u64,
    /// Bytes physically written to the destination.
    pub bytes_written: u64,
}

/// One copy of a VDI image to a raw destination.
///
/// The session owns both handles and both block buffers; dropping it
/// releases all of them, whether [`run`](Self::run) succeeded or not.
pub struct CopySession<R, W> {
    source: R,
    dest: W,
    image: VdiImage,
    options: CopyOptions,
    cancel: CancelToken,
    buffer: Vec<u8>,
    zeros: Vec<u8>,
    estimator: ProgressEstimator,
    /// Destination write cursor.
    position: u64,
}

impl<R: Read + Seek, W: RawTarget> CopySession<R, W> {
    /// Create a session, allocating the chunk buffers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if `options.skip_bytes` lies past the
    /// end of the logical disk.
    pub fn new(source: R, dest: W, image: VdiImage, options: CopyOptions) -> Result<Self> {
        options.validate(image.header().raw_size())?;

        let chunk = (image.header().block_size as usize).min(COPY_CHUNK_SIZE);
        let block_count = image.header().block_count();

        Ok(Self {
            source,
            dest,
            options,
            cancel: CancelToken::new(),
            buffer: vec![0u8; chunk],
            zeros: vec![0u8; chunk],
            estimator: ProgressEstimator::new(block_count),
            position: 0,
            image,
        })
    }

    /// Observe `token` between blocks.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Copy every logical block from `skip_bytes` to the end of the disk.
    ///
    /// `progress` is called once per completed block. Any failed or short
    /// seek, read or write aborts the session; no block is retried.
    pub fn run(&mut self, progress: Option<&ProgressCallback>) -> Result<CopyResult> {
        let header = self.image.header();
        let block_size = header.block_size as u64;
        let block_count = header.block_count();
        let raw_size = header.raw_size();
        let skip = self.options.skip_bytes;

        let first_block = skip / block_size;
        let offset_in_first = skip % block_size;

        tracing::info!(
            block_count,
            block_size,
            sparse = self.options.sparse,
            skip_bytes = skip,
            "starting copy"
        );

        let mut result = CopyResult::default();
        self.seek_dest(skip, None)?;

        let mut next_block = first_block;
        if skip > 0 && first_block < block_count {
            self.check_cancelled(first_block)?;
            self.transfer(first_block, offset_in_first, &mut result)?;
            self.report(first_block, progress);
            next_block = first_block + 1;
        }

        for index in next_block..block_count {
            self.check_cancelled(index)?;
            self.transfer(index, 0, &mut result)?;
            self.report(index, progress);
        }

        // Extends past a trailing sparse hole and drops any stale tail left
        // from an earlier, longer output.
        self.dest
            .set_len(raw_size)
            .map_err(|e| Error::io(IoOp::Truncate, raw_size, e))?;
        self.dest
            .sync()
            .map_err(|e| Error::io(IoOp::Sync, self.position, e))?;

        tracing::info!(
            blocks = result.blocks_processed,
            allocated = result.allocated_blocks,
            holes = result.hole_blocks,
            bytes_written = result.bytes_written,
            "copy finished"
        );

        Ok(result)
    }

    /// Move logical block `index`, starting `offset` bytes into it, to the
    /// destination cursor.
    fn transfer(&mut self, index: u64, offset: u64, result: &mut CopyResult) -> Result<()> {
        let block_size = self.image.header().block_size as u64;
        let len = (block_size - offset) as usize;

        match self.image.map().lookup(index) {
            BlockLocation::Allocated(slot) => {
                let src = self.image.slot_offset(slot) + offset;
                let landed = self
                    .source
                    .seek(SeekFrom::Start(src))
                    .map_err(|e| Error::io_at_block(IoOp::Seek, src, index, e))?;
                if landed != src {
                    return Err(Error::io_at_block(IoOp::Seek, src, index, misplaced_seek(landed)));
                }
                let mut remaining = len;
                while remaining > 0 {
                    let n = remaining.min(self.buffer.len());
                    let at = src + (len - remaining) as u64;
                    self.source
                        .read_exact(&mut self.buffer[..n])
                        .map_err(|e| Error::io_at_block(IoOp::Read, at, index, e))?;
                    self.dest
                        .write_all(&self.buffer[..n])
                        .map_err(|e| Error::io_at_block(IoOp::Write, self.position, index, e))?;
                    self.position += n as u64;
                    remaining -= n;
                }
                result.allocated_blocks += 1;
                result.bytes_written += len as u64;
                tracing::trace!(block = index, slot, "copied block");
            }
            BlockLocation::Hole if self.options.sparse => {
                self.seek_dest(self.position + len as u64, Some(index))?;
                result.hole_blocks += 1;
                tracing::trace!(block = index, "skipped hole");
            }
            BlockLocation::Hole => {
                let mut remaining = len;
                while remaining > 0 {
                    let n = remaining.min(self.zeros.len());
                    self.dest
                        .write_all(&self.zeros[..n])
                        .map_err(|e| Error::io_at_block(IoOp::Write, self.position, index, e))?;
                    self.position += n as u64;
                    remaining -= n;
                }
                result.hole_blocks += 1;
                result.bytes_written += len as u64;
                tracing::trace!(block = index, "zero-filled hole");
            }
        }

        result.blocks_processed += 1;
        Ok(())
    }

    fn seek_dest(&mut self, target: u64, block: Option<u64>) -> Result<()> {
        let to_error = |e| match block {
            Some(index) => Error::io_at_block(IoOp::Seek, target, index, e),
            None => Error::io(IoOp::Seek, target, e),
        };
        let landed = self.dest.seek(SeekFrom::Start(target)).map_err(to_error)?;
        if landed != target {
            return Err(to_error(misplaced_seek(landed)));
        }
        self.position = target;
        Ok(())
    }

    fn check_cancelled(&self, index: u64) -> Result<()> {
        if self.cancel.is_cancelled() {
            tracing::warn!(block = index, "copy cancelled");
            return Err(Error::Interrupted { block: index });
        }
        Ok(())
    }

    fn report(&mut self, index: u64, progress: Option<&ProgressCallback>) {
        self.estimator.observe(index, Instant::now());

        if let Some(callback) = progress {
            let header = self.image.header();
            let estimate = self
                .estimator
                .rate_estimate(index, header.block_size);
            callback(CopyProgress {
                block_index: index,
                block_count: header.block_count(),
                bytes_processed: (index + 1) * header.block_size as u64,
                bytes_total: header.raw_size(),
                rate: estimate.rate,
                eta: estimate.eta,
            });
        }
    }

    /// The decoded image being copied.
    pub fn image(&self) -> &VdiImage {
        &self.image
    }
}

fn misplaced_seek(landed: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::Other,
        format!("seek landed at offset {}", landed),
    )
}
