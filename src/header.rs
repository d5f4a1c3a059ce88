//! 3DSX container header.
//!
//! The header is a fixed 0x2C-byte record of little-endian u32 words that
//! follows the 4-byte `3DSX` magic.  Every field is described exactly once
//! in [`HEADER_SCHEMA`]; serialization and parsing both walk that table, so
//! the writer and reader cannot disagree about where a field lives.
//!
//! ```text
//! 0x00  magic            "3DSX"
//! 0x04  header_size      0x2C
//! 0x08  reloc_offset     0x2C (relocation table is always empty)
//! 0x0C  text_addr        0x8000
//! 0x10  text_size        len(code)
//! 0x14  rodata_size      0
//! 0x18  rodata_size_dup  0
//! 0x1C  data_size        0
//! 0x20  data_size_dup    0
//! 0x24  bss_size         0
//! 0x28  flags            0
//! ```

use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Write};
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"3DSX";
/// Fixed header size; code begins immediately after it.
pub const HEADER_SIZE: usize = 0x2C;
/// Virtual address the loader maps the code segment at.
pub const TEXT_LOAD_ADDRESS: u32 = 0x0000_8000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Input too short for a 3DSX header: {len} bytes (need {HEADER_SIZE})")]
    TooShort { len: usize },
    #[error("Invalid magic: {0:02x?}")]
    InvalidMagic([u8; 4]),
    #[error("Code segment {offset:#x}+{size:#x} exceeds file length {len:#x}")]
    CodeOutOfBounds { offset: u64, size: u64, len: usize },
    #[error("Metadata extension {offset:#x}+{size:#x} exceeds file length {len:#x}")]
    MetadataOutOfBounds { offset: u64, size: u64, len: usize },
}

// ── Field schema ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Magic,
    HeaderSize,
    RelocOffset,
    TextAddr,
    TextSize,
    RodataSize,
    RodataSizeDup,
    DataSize,
    DataSizeDup,
    BssSize,
    Flags,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub field:  Field,
    pub name:   &'static str,
    pub offset: usize,
    pub width:  usize,
}

const fn word(field: Field, name: &'static str, offset: usize) -> FieldSpec {
    FieldSpec { field, name, offset, width: 4 }
}

/// Single source of truth for header field placement.
pub const HEADER_SCHEMA: [FieldSpec; 11] = [
    word(Field::Magic,         "magic",           0x00),
    word(Field::HeaderSize,    "header_size",     0x04),
    word(Field::RelocOffset,   "reloc_offset",    0x08),
    word(Field::TextAddr,      "text_addr",       0x0C),
    word(Field::TextSize,      "text_size",       0x10),
    word(Field::RodataSize,    "rodata_size",     0x14),
    word(Field::RodataSizeDup, "rodata_size_dup", 0x18),
    word(Field::DataSize,      "data_size",       0x1C),
    word(Field::DataSizeDup,   "data_size_dup",   0x20),
    word(Field::BssSize,       "bss_size",        0x24),
    word(Field::Flags,         "flags",           0x28),
];

const fn schema_is_contiguous() -> bool {
    let mut i = 0;
    let mut expected = 0;
    while i < HEADER_SCHEMA.len() {
        if HEADER_SCHEMA[i].offset != expected {
            return false;
        }
        expected += HEADER_SCHEMA[i].width;
        i += 1;
    }
    expected == HEADER_SIZE
}

fn read_field(bytes: &[u8], field: Field) -> u32 {
    HEADER_SCHEMA
        .iter()
        .find(|f| f.field == field)
        .map(|f| LittleEndian::read_u32(&bytes[f.offset..f.offset + f.width]))
        .unwrap_or(0)
}

const _: () = assert!(schema_is_contiguous(), "header schema must tile 0..HEADER_SIZE");

// ── Header ───────────────────────────────────────────────────────────────────

/// One memory region the loader allocates.  Only the code segment carries a
/// load address; the others are placed by the loader after it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub load_address: u32,
    pub size:         u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub magic:        [u8; 4],
    pub header_size:  u32,
    pub reloc_offset: u32,
    pub text:         SegmentDescriptor,
    pub rodata:       SegmentDescriptor,
    pub data:         SegmentDescriptor,
    pub bss:          SegmentDescriptor,
    pub flags:        u32,
}

impl ContainerHeader {
    /// Header for a position-independent code blob of `code_len` bytes.
    /// No relocations are emitted, so the relocation table is empty and the
    /// code starts right at `HEADER_SIZE`.
    pub fn for_code(code_len: u32) -> Self {
        Self {
            magic:        *MAGIC,
            header_size:  HEADER_SIZE as u32,
            reloc_offset: HEADER_SIZE as u32,
            text:         SegmentDescriptor { load_address: TEXT_LOAD_ADDRESS, size: code_len },
            rodata:       SegmentDescriptor::default(),
            data:         SegmentDescriptor::default(),
            bss:          SegmentDescriptor::default(),
            flags:        0,
        }
    }

    /// File offset of the first code byte.
    pub fn code_offset(&self) -> u32 {
        self.reloc_offset
    }

    pub fn get(&self, field: Field) -> u32 {
        match field {
            Field::Magic         => u32::from_le_bytes(self.magic),
            Field::HeaderSize    => self.header_size,
            Field::RelocOffset   => self.reloc_offset,
            Field::TextAddr      => self.text.load_address,
            Field::TextSize      => self.text.size,
            Field::RodataSize    |
            Field::RodataSizeDup => self.rodata.size,
            Field::DataSize      |
            Field::DataSizeDup   => self.data.size,
            Field::BssSize       => self.bss.size,
            Field::Flags         => self.flags,
        }
    }

    fn set(&mut self, field: Field, value: u32) {
        match field {
            Field::Magic         => self.magic = value.to_le_bytes(),
            Field::HeaderSize    => self.header_size = value,
            Field::RelocOffset   => self.reloc_offset = value,
            Field::TextAddr      => self.text.load_address = value,
            Field::TextSize      => self.text.size = value,
            Field::RodataSize    => self.rodata.size = value,
            Field::DataSize      => self.data.size = value,
            Field::BssSize       => self.bss.size = value,
            Field::Flags         => self.flags = value,
            // Duplicates are written from the primary field and ignored on read.
            Field::RodataSizeDup | Field::DataSizeDup => {}
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        for f in &HEADER_SCHEMA {
            LittleEndian::write_u32(&mut buf[f.offset..f.offset + f.width], self.get(f.field));
        }
        buf
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Parse the fixed header from the front of `bytes`.  Fails on short
    /// input or a magic mismatch; segment bounds are checked by the caller,
    /// which knows the full file length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::TooShort { len: bytes.len() });
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if &magic != MAGIC {
            return Err(FormatError::InvalidMagic(magic));
        }

        let mut header = Self::for_code(0);
        for f in &HEADER_SCHEMA {
            header.set(f.field, LittleEndian::read_u32(&bytes[f.offset..f.offset + f.width]));
        }

        let rodata_dup = read_field(bytes, Field::RodataSizeDup);
        let data_dup   = read_field(bytes, Field::DataSizeDup);
        if rodata_dup != header.rodata.size || data_dup != header.data.size {
            log::debug!(
                "duplicate segment size fields disagree (rodata {:#x}/{:#x}, data {:#x}/{:#x})",
                header.rodata.size, rodata_dup, header.data.size, data_dup
            );
        }
        Ok(header)
    }

    /// `(name, value)` pairs in on-disk order, for display.
    pub fn fields(&self) -> Vec<(&'static str, u32)> {
        HEADER_SCHEMA.iter().map(|f| (f.name, self.get(f.field))).collect()
    }
}
