//! vdi2raw CLI - Convert VirtualBox VDI images to raw disk images.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use vdi2raw_core::{
    convert_decoded, get_image_info, install_interrupt_handler, open_image, CancelToken,
    CopyOptions, CopyProgress, ErrorKind, ImageInfo, ProgressCallback, Rate, RefreshGate,
    EXIT_INTERRUPTED,
};

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_FORMAT: u8 = 3;
const EXIT_IO: u8 = 4;

/// Convert a dynamically-allocated VirtualBox disk image (VDI) into a raw disk image.
#[derive(Parser, Debug)]
#[command(name = "vdi2raw")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the VDI image.
    input: PathBuf,

    /// Output raw image; a regular file (created if absent) or a block device.
    #[arg(required_unless_present = "info", conflicts_with = "info")]
    output: Option<PathBuf>,

    /// Print the decoded header and exit without copying.
    #[arg(short, long)]
    info: bool,

    /// Leave unallocated blocks as holes instead of writing zeros.
    #[arg(short, long)]
    sparse: bool,

    /// Start at this logical byte offset, continuing an interrupted copy in place.
    #[arg(short = 'p', long, value_name = "N", default_value_t = 0)]
    resume_at_byte: u64,

    /// Suppress progress output.
    #[arg(short, long)]
    quiet: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(cli.verbose);
    tracing::debug!(?cli, "parsed arguments");

    let result = if cli.info {
        show_info(&cli.input)
    } else {
        match cli.output.as_deref() {
            Some(output) => run_convert(
                &cli.input,
                output,
                CopyOptions::new(cli.sparse, cli.resume_at_byte),
                cli.quiet,
            ),
            None => Err(anyhow::anyhow!("an output path is required")),
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_status(&err))
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<vdi2raw_core::Error>().map(|e| e.kind()) {
        Some(ErrorKind::Format) => EXIT_FORMAT,
        Some(ErrorKind::Io) => EXIT_IO,
        Some(ErrorKind::Interrupted) => EXIT_INTERRUPTED as u8,
        Some(ErrorKind::Usage) => EXIT_USAGE,
        None => EXIT_FAILURE,
    }
}

/// Progress bar that is abandoned, not left half-drawn, if dropped unfinished.
struct ProgressDisplay {
    bar: ProgressBar,
}

impl ProgressDisplay {
    fn new(total: u64, start: u64) -> Result<Self> {
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({msg})")?
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_position(start);
        Ok(Self { bar })
    }
}

impl Drop for ProgressDisplay {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

fn run_convert(input: &Path, output: &Path, options: CopyOptions, quiet: bool) -> Result<()> {
    // Decode first so a bad image is reported before anything is created.
    let (source, image) = open_image(input)?;
    let info = ImageInfo::from(&image);

    if !quiet {
        println!("VDI Conversion");
        println!("--------------");
        println!("Input:     {}", input.display());
        println!("Output:    {}", output.display());
        println!("Disk size: {}", format_bytes(info.raw_size));
        println!(
            "Blocks:    {} x {} ({} allocated)",
            info.block_count,
            format_bytes(info.header.block_size as u64),
            info.allocated_blocks
        );
        println!("Sparse:    {}", if options.sparse { "yes" } else { "no" });
        if options.skip_bytes > 0 {
            println!("Resume at: byte {}", options.skip_bytes);
        }
        println!();
    }

    let display = if quiet {
        None
    } else {
        Some(ProgressDisplay::new(info.raw_size, options.skip_bytes)?)
    };

    let cancel = CancelToken::new();
    let restore_bar = display.as_ref().map(|d| d.bar.clone());
    install_interrupt_handler(&cancel, move || {
        if let Some(bar) = &restore_bar {
            bar.abandon_with_message("interrupted");
        }
    })
    .context("failed to install interrupt handler")?;

    let callback: Option<ProgressCallback> = display.as_ref().map(|d| {
        let bar = d.bar.clone();
        let gate = Mutex::new(RefreshGate::default());
        Box::new(move |progress: CopyProgress| {
            bar.set_position(progress.bytes_processed);
            let last = progress.block_index + 1 == progress.block_count;
            let due = gate
                .lock()
                .map(|mut gate| gate.ready(Instant::now()))
                .unwrap_or(true);
            if due || last {
                bar.set_message(format_rate(progress.rate, progress.eta));
            }
        }) as ProgressCallback
    });

    match convert_decoded(source, image, output, &options, &cancel, callback) {
        Ok(result) => {
            if let Some(display) = &display {
                display.bar.finish_with_message("complete");
            }
            if !quiet {
                println!();
                println!("Conversion completed successfully: {}", output.display());
                println!(
                    "Blocks:    {} processed, {} allocated, {} holes",
                    result.blocks_processed, result.allocated_blocks, result.hole_blocks
                );
                println!("Written:   {}", format_bytes(result.bytes_written));
            }
            Ok(())
        }
        Err(err) => {
            if let Some(display) = &display {
                display.bar.abandon_with_message("failed");
            }
            if err.kind() == ErrorKind::Interrupted {
                if let Ok(metadata) = std::fs::metadata(output) {
                    eprintln!(
                        "Interrupted. Continue with: --resume-at-byte {}",
                        metadata.len()
                    );
                }
            }
            Err(err.into())
        }
    }
}

fn show_info(input: &Path) -> Result<()> {
    let info = get_image_info(input)?;
    print_info(&info);
    Ok(())
}

fn print_info(info: &ImageInfo) {
    let header = &info.header;

    println!("VDI Information");
    println!("===============");
    println!();
    if !header.description.is_empty() {
        println!("Description:  {}", header.description);
    }
    println!("Image type:   {}", header.kind());
    println!("Version:      {}", header.version_string());
    println!("Signature:    0x{:08X}", header.signature);
    println!("Header size:  {}", header.header_size);
    println!("Image flags:  0x{:08X}", header.image_flags);
    println!("Map offset:   0x{:X}", header.map_offset);
    println!("Data offset:  0x{:X}", header.data_offset);
    println!(
        "Disk size:    {} ({} bytes)",
        format_bytes(header.disk_size),
        header.disk_size
    );
    println!("Sector size:  {}", header.sector_size);
    println!(
        "Block size:   {} ({} bytes)",
        format_bytes(header.block_size as u64),
        header.block_size
    );
    println!();
    println!(
        "Blocks:       {} ({} in header)",
        info.block_count, header.blocks_in_image
    );
    println!(
        "Allocated:    {} ({} in header)",
        info.allocated_blocks, header.blocks_allocated
    );
    println!("Holes:        {}", info.hole_blocks);
    println!("Raw size:     {}", format_bytes(info.raw_size));
}

fn format_rate(rate: Rate, eta: Option<Duration>) -> String {
    match (rate, eta) {
        (Rate::BytesPerSec(bytes), Some(eta)) => {
            format!("{}/s, ETA {}", format_bytes(bytes as u64), format_duration(eta))
        }
        (Rate::BytesPerSec(bytes), None) => format!("{}/s", format_bytes(bytes as u64)),
        (Rate::Indeterminate, _) => "very fast".to_string(),
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_needs_no_output() {
        let cli = Cli::try_parse_from(["vdi2raw", "--info", "disk.vdi"]).unwrap();
        assert!(cli.info);
        assert!(cli.output.is_none());
    }

    #[test]
    fn test_info_rejects_output() {
        assert!(Cli::try_parse_from(["vdi2raw", "-i", "disk.vdi", "disk.raw"]).is_err());
    }

    #[test]
    fn test_copy_requires_output() {
        assert!(Cli::try_parse_from(["vdi2raw", "disk.vdi"]).is_err());
    }

    #[test]
    fn test_copy_flags() {
        let cli =
            Cli::try_parse_from(["vdi2raw", "-s", "-p", "4096", "disk.vdi", "disk.raw"]).unwrap();
        assert!(cli.sparse);
        assert_eq!(cli.resume_at_byte, 4096);
        assert_eq!(cli.output, Some(PathBuf::from("disk.raw")));
    }

    #[test]
    fn test_exit_status_mapping() {
        let format: anyhow::Error = vdi2raw_core::Error::format("signature", "bad").into();
        assert_eq!(exit_status(&format), EXIT_FORMAT);

        let io: anyhow::Error = vdi2raw_core::Error::io(
            vdi2raw_core::IoOp::Write,
            0,
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        )
        .into();
        assert_eq!(exit_status(&io), EXIT_IO);

        let interrupted: anyhow::Error = vdi2raw_core::Error::Interrupted { block: 1 }.into();
        assert_eq!(exit_status(&interrupted), 130);

        let other = anyhow::anyhow!("something else");
        assert_eq!(exit_status(&other), EXIT_FAILURE);
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(Rate::Indeterminate, None), "very fast");
        assert_eq!(
            format_rate(
                Rate::BytesPerSec(2.0 * 1024.0 * 1024.0),
                Some(Duration::from_secs(3725))
            ),
            "2.00 MB/s, ETA 01:02:05"
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }
}
