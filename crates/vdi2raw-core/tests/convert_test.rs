//! Integration tests for file-to-file conversion.

mod common;

use common::{build_vdi, reference_raw, slot_byte, write_temp, ONE_MB};
use std::fs;
use tempfile::tempdir;
use vdi2raw_core::{
    convert_decoded, convert_image, open_image, CancelToken, CopyOptions, Error, ErrorKind,
    ImageInfo,
};

const MB: usize = ONE_MB as usize;

#[test]
fn test_four_block_image_dense() {
    let input = write_temp(&build_vdi(ONE_MB, &[0, -1, 1, -1]));
    let dir = tempdir().unwrap();
    let output = dir.path().join("disk.raw");

    let result = convert_image(
        input.path(),
        &output,
        &CopyOptions::default(),
        &CancelToken::new(),
        None,
    )
    .expect("conversion should succeed");
    assert_eq!(result.blocks_processed, 4);
    assert_eq!(result.allocated_blocks, 2);
    assert_eq!(result.hole_blocks, 2);

    let out = fs::read(&output).unwrap();
    assert_eq!(out.len(), 4 * MB);
    assert!((0..MB).all(|i| out[i] == slot_byte(0, i)), "block 0 from slot 0");
    assert!(out[MB..2 * MB].iter().all(|&b| b == 0), "block 1 is zeros");
    assert!((0..MB).all(|i| out[2 * MB + i] == slot_byte(1, i)), "block 2 from slot 1");
    assert!(out[3 * MB..].iter().all(|&b| b == 0), "block 3 is zeros");
}

#[test]
fn test_four_block_image_sparse() {
    let map = [0, -1, 1, -1];
    let input = write_temp(&build_vdi(ONE_MB, &map));
    let dir = tempdir().unwrap();
    let output = dir.path().join("disk.raw");

    let result = convert_image(
        input.path(),
        &output,
        &CopyOptions::default().sparse(true),
        &CancelToken::new(),
        None,
    )
    .unwrap();
    assert_eq!(result.bytes_written, 2 * MB as u64);

    assert_eq!(fs::metadata(&output).unwrap().len(), 4 * MB as u64);
    assert_eq!(fs::read(&output).unwrap(), reference_raw(ONE_MB, &map));
}

#[test]
fn test_bad_signature_creates_no_output() {
    let mut image = build_vdi(4096, &[0]);
    image[0] = b'#';
    let input = write_temp(&image);
    let dir = tempdir().unwrap();
    let output = dir.path().join("disk.raw");

    let err = convert_image(
        input.path(),
        &output,
        &CopyOptions::default(),
        &CancelToken::new(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Format { .. }));
    assert!(!output.exists());
}

#[test]
fn test_bad_signature_leaves_existing_output_alone() {
    let mut image = build_vdi(4096, &[0]);
    image[0] = b'#';
    let input = write_temp(&image);
    let existing = write_temp(b"keep me");

    let err = convert_image(
        input.path(),
        existing.path(),
        &CopyOptions::default(),
        &CancelToken::new(),
        None,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert_eq!(fs::read(existing.path()).unwrap(), b"keep me");
}

#[test]
fn test_bad_resume_offset_creates_no_output() {
    let input = write_temp(&build_vdi(4096, &[0, -1]));
    let dir = tempdir().unwrap();
    let output = dir.path().join("disk.raw");

    let err = convert_image(
        input.path(),
        &output,
        &CopyOptions::new(false, 3 * 4096),
        &CancelToken::new(),
        None,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert!(!output.exists());
}

#[test]
fn test_conversion_is_idempotent() {
    let map = [1, -1, 0, -1, 2];
    let input = write_temp(&build_vdi(4096, &map));
    let dir = tempdir().unwrap();
    let first = dir.path().join("first.raw");
    let second = dir.path().join("second.raw");

    for sparse in [false, true] {
        let options = CopyOptions::default().sparse(sparse);
        for output in [&first, &second, &first] {
            convert_image(input.path(), output, &options, &CancelToken::new(), None).unwrap();
        }
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
        assert_eq!(fs::read(&first).unwrap(), reference_raw(4096, &map));
    }
}

#[test]
fn test_full_copy_truncates_stale_output() {
    let map = [0, -1];
    let input = write_temp(&build_vdi(4096, &map));
    let stale = write_temp(&vec![0xFFu8; 5 * 4096]);

    convert_image(
        input.path(),
        stale.path(),
        &CopyOptions::default().sparse(true),
        &CancelToken::new(),
        None,
    )
    .unwrap();
    assert_eq!(fs::read(stale.path()).unwrap(), reference_raw(4096, &map));
}

#[test]
fn test_resume_continues_existing_output() {
    let map = [2, -1, 0, 1, -1, -1];
    let reference = reference_raw(4096, &map);
    let input = write_temp(&build_vdi(4096, &map));

    for (skip, sparse) in [(4096usize, false), (2 * 4096 + 17, true), (5 * 4096, true)] {
        let dir = tempdir().unwrap();
        let output = dir.path().join("disk.raw");
        fs::write(&output, &reference[..skip]).unwrap();

        convert_image(
            input.path(),
            &output,
            &CopyOptions::new(sparse, skip as u64),
            &CancelToken::new(),
            None,
        )
        .unwrap();
        assert_eq!(
            fs::read(&output).unwrap(),
            reference,
            "skip={} sparse={}",
            skip,
            sparse
        );
    }
}

#[test]
fn test_resume_trims_oversized_output() {
    let map = [0, 1];
    let reference = reference_raw(4096, &map);
    let input = write_temp(&build_vdi(4096, &map));

    for sparse in [false, true] {
        let dir = tempdir().unwrap();
        let output = dir.path().join("disk.raw");
        let mut existing = reference[..4096].to_vec();
        existing.resize(3 * 4096, 0xEE);
        fs::write(&output, &existing).unwrap();

        convert_image(
            input.path(),
            &output,
            &CopyOptions::new(sparse, 4096),
            &CancelToken::new(),
            None,
        )
        .unwrap();
        assert_eq!(fs::read(&output).unwrap(), reference, "sparse={}", sparse);
    }
}

#[test]
fn test_convert_decoded_image() {
    let map = [-1, 0, -1, 1];
    let input = write_temp(&build_vdi(4096, &map));
    let dir = tempdir().unwrap();
    let output = dir.path().join("disk.raw");

    let (source, image) = open_image(input.path()).unwrap();
    let info = ImageInfo::from(&image);
    assert_eq!(info.block_count, 4);
    assert_eq!(info.allocated_blocks, 2);

    let result = convert_decoded(
        source,
        image,
        &output,
        &CopyOptions::default(),
        &CancelToken::new(),
        None,
    )
    .unwrap();
    assert_eq!(result.blocks_processed, info.block_count);
    assert_eq!(fs::read(&output).unwrap(), reference_raw(4096, &map));
}

#[test]
fn test_cancelled_conversion() {
    let input = write_temp(&build_vdi(4096, &[0, 1]));
    let dir = tempdir().unwrap();
    let output = dir.path().join("disk.raw");
    let token = CancelToken::new();
    token.cancel();

    let err = convert_image(input.path(), &output, &CopyOptions::default(), &token, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interrupted);
    assert_eq!(fs::metadata(&output).unwrap().len(), 0);
}
