//! Synthetic VDI images for integration tests.

#![allow(dead_code)]

use std::io::Write;
use tempfile::NamedTempFile;

pub const ONE_MB: u32 = 1024 * 1024;

const SIGNATURE_TEXT: &[u8; 40] = b"<<< Oracle VM VirtualBox Disk Image >>>\n";
const MAP_OFFSET: u32 = 0x200;

/// Byte `i` of physical slot `slot`. Never zero, so holes are easy to spot.
pub fn slot_byte(slot: u32, i: usize) -> u8 {
    ((slot as usize * 31 + i) % 251 + 1) as u8
}

/// Build a dynamic VDI with one entry per element of `map`.
///
/// Every physical slot referenced by the map is filled with [`slot_byte`].
pub fn build_vdi(block_size: u32, map: &[i32]) -> Vec<u8> {
    let disk_size = map.len() as u64 * block_size as u64;
    build_vdi_with_disk_size(block_size, map, disk_size)
}

/// Like [`build_vdi`] but with an explicit `diskSize` header field.
pub fn build_vdi_with_disk_size(block_size: u32, map: &[i32], disk_size: u64) -> Vec<u8> {
    let map_len = map.len() as u32 * 4;
    let data_offset = (MAP_OFFSET + map_len + 511) / 512 * 512;
    let slots = map.iter().filter(|&&e| e >= 0).map(|&e| e as u32 + 1).max().unwrap_or(0);

    let mut image = vec![0u8; data_offset as usize];
    image[..40].copy_from_slice(SIGNATURE_TEXT);
    put_u32(&mut image, 0x40, 0xBEDA_107F);
    put_u32(&mut image, 0x44, 0x0001_0001);
    put_u32(&mut image, 0x48, 0x190);
    put_u32(&mut image, 0x4c, 1);
    put_u32(&mut image, 0x154, MAP_OFFSET);
    put_u32(&mut image, 0x158, data_offset);
    put_u32(&mut image, 0x168, 512);
    put_u32(&mut image, 0x170, disk_size as u32);
    put_u32(&mut image, 0x174, (disk_size >> 32) as u32);
    put_u32(&mut image, 0x178, block_size);
    put_u32(&mut image, 0x180, map.len() as u32);
    put_u32(&mut image, 0x184, slots);

    for (i, entry) in map.iter().enumerate() {
        let offset = MAP_OFFSET as usize + i * 4;
        image[offset..offset + 4].copy_from_slice(&entry.to_le_bytes());
    }

    for slot in 0..slots {
        image.extend((0..block_size as usize).map(|i| slot_byte(slot, i)));
    }

    image
}

/// The raw disk `map` describes: zeros everywhere, slot payloads inserted.
pub fn reference_raw(block_size: u32, map: &[i32]) -> Vec<u8> {
    let bs = block_size as usize;
    let mut raw = vec![0u8; map.len() * bs];
    for (index, &entry) in map.iter().enumerate() {
        if entry >= 0 {
            for i in 0..bs {
                raw[index * bs + i] = slot_byte(entry as u32, i);
            }
        }
    }
    raw
}

/// Write `bytes` to a fresh temp file.
pub fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(bytes).expect("Failed to write test data");
    file.flush().expect("Failed to flush");
    file
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
