//! File-level conversion entry points.
//!
//! These functions tie the decoder and the copy engine to paths on disk:
//! 1. Open and decode the VDI header and allocation map
//! 2. Check the copy options against the decoded image
//! 3. Open the destination and run a [`CopySession`]
//!
//! The destination is only touched once steps 1 and 2 have succeeded, so a
//! malformed image never creates or truncates an output file.
//!
//! # Example
//!
//! ```no_run
//! use vdi2raw_core::{convert_image, CancelToken, CopyOptions};
//! use std::path::Path;
//!
//! let result = convert_image(
//!     Path::new("disk.vdi"),
//!     Path::new("disk.raw"),
//!     &CopyOptions::default().sparse(true),
//!     &CancelToken::new(),
//!     None,
//! )
//! .unwrap();
//! println!("{} of {} blocks allocated", result.allocated_blocks, result.blocks_processed);
//! ```

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::copy::{CopyOptions, CopyResult, CopySession};
use crate::error::{Error, Result};
use crate::guard::CancelToken;
use crate::progress::ProgressCallback;
use crate::vdi::{ImageHeader, VdiImage};

/// Summary information about a VDI image.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub header: ImageHeader,
    /// Whole logical blocks, `disk_size / block_size`.
    pub block_count: u64,
    pub allocated_blocks: u64,
    pub hole_blocks: u64,
    /// Size of the raw image a full copy produces.
    pub raw_size: u64,
}

impl From<&VdiImage> for ImageInfo {
    fn from(image: &VdiImage) -> Self {
        let header = image.header().clone();
        let allocated_blocks = image.map().allocated_count();

        Self {
            block_count: header.block_count(),
            hole_blocks: image.map().len() - allocated_blocks,
            raw_size: header.raw_size(),
            allocated_blocks,
            header,
        }
    }
}

/// Decode an image's header and map without copying anything.
pub fn get_image_info(path: &Path) -> Result<ImageInfo> {
    let image = VdiImage::open(path)?;
    Ok(ImageInfo::from(&image))
}

/// Open the VDI image at `path` and decode it, keeping the handle for a
/// later [`convert_decoded`].
pub fn open_image(path: &Path) -> Result<(File, VdiImage)> {
    let mut source = File::open(path).map_err(|e| Error::file(e, path))?;
    let image = VdiImage::read_from(&mut source)?;
    Ok((source, image))
}

/// Convert the VDI image at `input` into a raw image at `output`.
///
/// With `options.skip_bytes == 0` the output is created or truncated.
/// Otherwise an existing output is opened as-is and written from
/// `skip_bytes` on, leaving earlier bytes untouched. In both cases a regular
/// output ends at exactly the raw disk size.
///
/// # Arguments
///
/// * `input` - Path to the VDI image.
/// * `output` - Path for the raw image; a regular file or a block device.
/// * `options` - Sparse mode and resume offset.
/// * `cancel` - Checked between blocks.
/// * `progress_callback` - Optional callback invoked after every block.
pub fn convert_image(
    input: &Path,
    output: &Path,
    options: &CopyOptions,
    cancel: &CancelToken,
    progress_callback: Option<ProgressCallback>,
) -> Result<CopyResult> {
    let (source, image) = open_image(input)?;
    convert_decoded(source, image, output, options, cancel, progress_callback)
}

/// Like [`convert_image`], for a source already decoded by [`open_image`].
pub fn convert_decoded(
    source: File,
    image: VdiImage,
    output: &Path,
    options: &CopyOptions,
    cancel: &CancelToken,
    progress_callback: Option<ProgressCallback>,
) -> Result<CopyResult> {
    options.validate(image.header().raw_size())?;

    let dest = open_output(output, options.skip_bytes == 0)?;
    tracing::debug!(output = %output.display(), "opened output");

    let mut session =
        CopySession::new(source, dest, image, options.clone())?.with_cancel_token(cancel.clone());
    session.run(progress_callback.as_ref())
}

fn open_output(path: &Path, truncate: bool) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(truncate)
        .open(path)
        .map_err(|e| Error::file(e, path))
}
