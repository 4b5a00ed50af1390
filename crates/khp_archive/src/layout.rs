//! Container layout configuration.
//!
//! Everything the rebuild needs to know about one particular disc layout lives in
//! a [`ContainerLayout`]: block size, header length, the hashes with special
//! treatment, and the header mirrors (secondary copies of a file's location that
//! the outer file system keeps and that must be backpatched when the file moves).
//!
//! The default is the KINGDOM HEARTS Final Mix disc. Other layouts can be loaded
//! from JSON or TOML; missing fields fall back to the default preset.

use crate::error::{ArchiveError, Result};
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Hash of the record table (`kingdom.idx`).
pub const KINGDOM_IDX_HASH: u32 = 0x0393_eba4;
/// Hash of the image region record (`kingdom.img`).
pub const KINGDOM_IMG_HASH: u32 = 0x0392_ebe4;

/// Swappable description of one container layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerLayout {
    /// Size of one block. Every entry starts on a block boundary.
    pub block_size: u32,
    /// Number of header bytes copied verbatim from the base container.
    pub header_len: u64,
    /// Hash under which the record table indexes itself.
    pub table_hash: u32,
    /// Hash of the record spanning the image region, sized at finalize.
    pub image_hash: Option<u32>,
    /// Hashes whose first emission ends the image region.
    pub image_terminators: Vec<u32>,
    /// Hashes that are always recompressed when patched with raw bytes.
    pub forced_compression: Vec<u32>,
    /// First 8 bytes (little-endian) of the block opening the data region.
    pub data_signature: u64,
    /// First 8 bytes (little-endian) of the record table.
    pub table_signature: u64,
    /// Header locations mirroring an entry's block or size.
    pub mirrors: Vec<HeaderMirror>,
    /// Whole-container size fields written at finalize.
    pub volume_fields: Vec<VolumeField>,
}

/// All mirror slots of one hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMirror {
    pub hash: u32,
    pub slots: Vec<MirrorSlot>,
}

/// One backpatch location in the container header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorSlot {
    /// Absolute byte offset in the output container.
    pub offset: u64,
    pub field: MirrorField,
    pub encoding: FieldEncoding,
    /// Only written when this bit is set in the header flag word.
    #[serde(default)]
    pub requires_header_flag: Option<u32>,
}

/// Which value a mirror slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorField {
    /// Container-absolute block number.
    Block,
    /// Size in bytes.
    Size,
}

/// On-disk encoding of a mirrored `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldEncoding {
    /// 4 bytes, little-endian.
    LittleEndian,
    /// 8 bytes: little-endian followed by big-endian.
    BothEndian,
}

/// A field holding the container length in blocks, minus `bias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeField {
    pub offset: u64,
    pub encoding: FieldEncoding,
    #[serde(default)]
    pub bias: u32,
}

impl FieldEncoding {
    /// Number of bytes the encoding occupies.
    pub fn width(self) -> usize {
        match self {
            FieldEncoding::LittleEndian => 4,
            FieldEncoding::BothEndian => 8,
        }
    }

    pub fn write<W: Write>(self, writer: &mut W, value: u32) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(value)?;
        if self == FieldEncoding::BothEndian {
            writer.write_u32::<BigEndian>(value)?;
        }
        Ok(())
    }
}

impl MirrorSlot {
    fn both(offset: u64, field: MirrorField) -> Self {
        Self {
            offset,
            field,
            encoding: FieldEncoding::BothEndian,
            requires_header_flag: None,
        }
    }

    fn little(offset: u64, field: MirrorField) -> Self {
        Self {
            offset,
            field,
            encoding: FieldEncoding::LittleEndian,
            requires_header_flag: None,
        }
    }

    fn gated(self, flag: u32) -> Self {
        Self {
            requires_header_flag: Some(flag),
            ..self
        }
    }
}

impl HeaderMirror {
    /// Block and size (both-endian) in the directory record at `record`, plus the
    /// little-endian size in the secondary file-entry copy at `size_copy`.
    fn directory_entry(hash: u32, record: u64, size_copy: u64) -> Self {
        Self {
            hash,
            slots: vec![
                MirrorSlot::both(record, MirrorField::Block),
                MirrorSlot::both(record + 8, MirrorField::Size),
                MirrorSlot::little(size_copy, MirrorField::Size),
            ],
        }
    }

    /// A directory record only present when the header flag bit is set.
    fn optional_entry(hash: u32, record: u64, flag: u32) -> Self {
        Self {
            hash,
            slots: vec![
                MirrorSlot::both(record, MirrorField::Block).gated(flag),
                MirrorSlot::both(record + 8, MirrorField::Size).gated(flag),
            ],
        }
    }

    /// Slots holding the given field.
    pub fn slots_for(&self, field: MirrorField) -> impl Iterator<Item = &MirrorSlot> {
        self.slots.iter().filter(move |slot| slot.field == field)
    }
}

impl Default for ContainerLayout {
    fn default() -> Self {
        Self::kingdom_hearts_final_mix()
    }
}

impl ContainerLayout {
    /// The KINGDOM HEARTS Final Mix disc.
    pub fn kingdom_hearts_final_mix() -> Self {
        let mut mirrors: Vec<HeaderMirror> = [
            (0x009f_a157, 534_626, 544_824), // system.cnf
            (0x0100_414e, 534_686, 546_872), // SLPS_251.98
            (0x07fa_52d4, 534_746, 548_920), // ioprp250.img
            (0x013d_f21a, 534_808, 550_968), // sio2man.irx
            (0x0046_762a, 534_868, 553_016), // sio2d.irx
            (0x0024_9f1a, 534_926, 555_064), // dbcman.irx
            (0x0002_088a, 534_986, 557_112), // ds2o.irx
            (0x00a5_a51a, 535_044, 559_160), // mcman.irx
            (0x0111_7bda, 535_102, 561_208), // mcserv.irx
            (0x00c0_4a8a, 535_162, 563_256), // libsd.irx
            (0x018d_391a, 535_220, 565_304), // libssl.irx
            (0x0002_cefa, 535_280, 567_352), // dev9.irx
            (0x0022_83ea, 535_338, 569_400), // atad.irx
            (0x003a_f68a, 535_396, 571_448), // hdd.irx
            (0x003a_af8a, 535_452, 573_496), // pfs.irx
        ]
        .into_iter()
        .map(|(hash, record, size_copy)| HeaderMirror::directory_entry(hash, record, size_copy))
        .collect();

        let terminators = [
            (0x001e_c6d9, 535_628, 0x02), // demo.dat
            (0x001a_7629, 535_672, 0x04), // opn.dat
            (0x0013_2c19, 535_714, 0x08), // end.dat
            (0x0021_18c9, 535_756, 0x10), // end2.dat
            (0x0031_18c9, 535_800, 0x20), // end3.dat
            (0x00dd_0889, 535_844, 0x40), // ffx2.dat
        ];
        mirrors.extend(
            terminators
                .iter()
                .map(|&(hash, record, flag)| HeaderMirror::optional_entry(hash, record, flag)),
        );

        mirrors.push(HeaderMirror {
            hash: KINGDOM_IDX_HASH,
            slots: vec![
                MirrorSlot::both(535_508, MirrorField::Block),
                MirrorSlot::both(535_516, MirrorField::Size),
                MirrorSlot::little(575_544, MirrorField::Size),
            ],
        });
        mirrors.push(HeaderMirror::optional_entry(KINGDOM_IMG_HASH, 535_568, 0x01));

        Self {
            block_size: 2048,
            header_len: 577_536,
            table_hash: KINGDOM_IDX_HASH,
            image_hash: Some(KINGDOM_IMG_HASH),
            image_terminators: terminators.iter().map(|&(hash, _, _)| hash).collect(),
            forced_compression: vec![0x0000_171d],
            data_signature: 0x203D_2032_544F_4F42, // "BOOT2 = "
            table_signature: 0x0000_0001_0000_171D,
            mirrors,
            volume_fields: vec![
                // ISO 9660 volume space size
                VolumeField {
                    offset: 32_848,
                    encoding: FieldEncoding::BothEndian,
                    bias: 0,
                },
                // UDF partition length and its reserve copy
                VolumeField {
                    offset: 69_824,
                    encoding: FieldEncoding::LittleEndian,
                    bias: 263,
                },
                VolumeField {
                    offset: 102_592,
                    encoding: FieldEncoding::LittleEndian,
                    bias: 263,
                },
            ],
        }
    }

    /// Load a layout from a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let layout_error = |message: String| ArchiveError::Layout {
            path: path.to_path_buf(),
            message,
        };

        let layout: Self = match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => {
                toml::from_str(&contents).map_err(|e| layout_error(e.to_string()))?
            }
            _ => serde_json::from_str(&contents).map_err(|e| layout_error(e.to_string()))?,
        };

        layout.validate().map_err(layout_error)?;
        tracing::info!("Loaded container layout from {}", path);
        Ok(layout)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.block_size == 0 {
            return Err("block_size must not be zero".to_string());
        }
        if self.image_hash == Some(self.table_hash) {
            return Err("image_hash must differ from table_hash".to_string());
        }
        Ok(())
    }

    pub fn mirror(&self, hash: u32) -> Option<&HeaderMirror> {
        self.mirrors.iter().find(|mirror| mirror.hash == hash)
    }

    pub fn is_image_terminator(&self, hash: u32) -> bool {
        self.image_terminators.contains(&hash)
    }

    pub fn is_forced_compression(&self, hash: u32) -> bool {
        self.forced_compression.contains(&hash)
    }

    /// `len` rounded up to a whole number of blocks.
    pub fn padded_len(&self, len: u64) -> u64 {
        len.div_ceil(self.block_size as u64) * self.block_size as u64
    }
}
