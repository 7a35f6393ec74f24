//! vdi2raw Core Library
//!
//! This crate converts dynamically-allocated VirtualBox disk images (VDI)
//! into flat raw disk images.
//!
//! # Overview
//!
//! A VDI image stores a fixed header, a block allocation map, and the
//! payload of every allocated block in arbitrary physical order. Conversion
//! walks the logical blocks in order, reading allocated blocks from their
//! physical slots and writing zeros (or leaving sparse holes) for the rest.
//! The main entry point is [`convert_image`].
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`vdi`] - VDI header and allocation map decoding
//! - [`copy`] - Block copy engine
//! - [`progress`] - Throughput and ETA estimation
//! - [`guard`] - Cancellation and interrupt handling
//! - [`convert`] - Path-level conversion and image info
//!
//! # Quick Start
//!
//! ```no_run
//! use vdi2raw_core::{convert_image, CancelToken, CopyOptions};
//! use std::path::Path;
//!
//! let input = Path::new("/path/to/disk.vdi");
//! let output = Path::new("/path/to/disk.raw");
//!
//! convert_image(input, output, &CopyOptions::default(), &CancelToken::new(), None).unwrap();
//! ```

pub mod convert;
pub mod copy;
pub mod error;
pub mod guard;
pub mod progress;
pub mod vdi;

pub use error::{Error, ErrorKind, IoOp, Result};

pub use convert::{convert_decoded, convert_image, get_image_info, open_image, ImageInfo};
pub use copy::{CopyOptions, CopyResult, CopySession, RawTarget};
pub use guard::{install_interrupt_handler, CancelToken, EXIT_INTERRUPTED};
pub use progress::{
    CopyProgress, Estimate, ProgressCallback, ProgressEstimator, ProgressWindow, Rate,
    RefreshGate, REFRESH_INTERVAL,
};
pub use vdi::{AllocationMap, BlockLocation, ImageHeader, ImageType, VdiImage};
