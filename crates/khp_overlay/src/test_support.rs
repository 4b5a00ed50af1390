//! Fixtures shared by the unit tests: small base containers and packages.

use khp_archive::{ContainerLayout, ContainerOffsets, FixedOffsets};
use khp_patch::{LayoutRevision, PatchEntryBuilder, PatchPackage, PatchPackageBuilder};
use std::collections::HashMap;
use std::io::{Cursor, Write};

pub const TABLE_HASH: u32 = 0x0000_01DC;

/// 2048-byte blocks behind a one-block header, without image record or mirrors.
pub fn plain_layout() -> ContainerLayout {
    ContainerLayout {
        block_size: 2048,
        header_len: 2048,
        table_hash: TABLE_HASH,
        image_hash: None,
        image_terminators: Vec::new(),
        forced_compression: Vec::new(),
        data_signature: 0,
        table_signature: 0,
        mirrors: Vec::new(),
        volume_fields: Vec::new(),
    }
}

pub struct BaseEntry {
    pub hash: u32,
    pub flags: u32,
    pub block: u32,
    pub data: Vec<u8>,
}

impl BaseEntry {
    pub fn new(hash: u32, flags: u32, block: u32, data: Vec<u8>) -> Self {
        Self {
            hash,
            flags,
            block,
            data,
        }
    }
}

/// Lay out a container: a header of `0xEE` bytes, the entries at their blocks and
/// a record table at `table_block` that indexes itself.
pub fn base_image(
    layout: &ContainerLayout,
    table_block: u32,
    entries: &[BaseEntry],
) -> (Vec<u8>, FixedOffsets) {
    let block = layout.block_size as u64;
    let data_offset = layout.header_len;
    let table_size = layout.padded_len((entries.len() as u64 + 1) * 16);
    let table_offset = data_offset + table_block as u64 * block;

    let mut end = table_offset + table_size;
    for entry in entries {
        let start = data_offset + entry.block as u64 * block;
        end = end.max(start + layout.padded_len(entry.data.len() as u64));
    }

    let mut image = vec![0u8; end as usize];
    image[..data_offset as usize].fill(0xEE);

    let mut table = Vec::new();
    let mut push = |hash: u32, flags: u32, block: u32, size: u32| {
        for value in [hash, flags, block, size] {
            table.extend_from_slice(&value.to_le_bytes());
        }
    };
    push(layout.table_hash, 0, table_block, table_size as u32);
    for entry in entries {
        push(entry.hash, entry.flags, entry.block, entry.data.len() as u32);
        let start = (data_offset + entry.block as u64 * block) as usize;
        image[start..start + entry.data.len()].copy_from_slice(&entry.data);
    }
    image[table_offset as usize..table_offset as usize + table.len()].copy_from_slice(&table);

    (
        image,
        FixedOffsets(ContainerOffsets {
            data_offset,
            table_offset,
            table_size,
        }),
    )
}

/// Serialize a package. Relinking entries ignore their data.
pub fn package_bytes(
    revision: LayoutRevision,
    entries: Vec<(PatchEntryBuilder, Vec<u8>)>,
) -> Vec<u8> {
    let mut builder = PatchPackageBuilder::default().with_revision(revision);
    let mut data = HashMap::new();
    for (entry, bytes) in entries {
        data.insert(entry.hash, bytes);
        builder = builder.with_entry(entry);
    }

    let mut cursor = Cursor::new(Vec::new());
    builder
        .build_to_writer(&mut cursor, |entry, out| {
            out.write_all(&data[&entry.hash])?;
            Ok(())
        })
        .unwrap();
    cursor.into_inner()
}

pub fn package(
    revision: LayoutRevision,
    entries: Vec<(PatchEntryBuilder, Vec<u8>)>,
) -> PatchPackage<Cursor<Vec<u8>>> {
    PatchPackage::mount_from_reader(Cursor::new(package_bytes(revision, entries))).unwrap()
}
