//! 3DSX container writer and reader.
//!
//! # Layout
//! ```text
//! header (0x2C) | code | [ padding | "EXAC" | len u32 | SMDH ]
//! ```
//! The trailing metadata is optional.  When present, zero padding brings the
//! extension header to the next 0x1000 boundary after the code; the SMDH
//! bytes follow the 8-byte extension header directly.
//!
//! # Writer
//! [`ContainerWriter`] emits the whole file in one pass from in-memory
//! buffers.  It does not inspect the metadata blob; callers hand it the
//! output of [`Smdh::to_bytes`](crate::smdh::Smdh::to_bytes).
//!
//! # Reader
//! [`ContainerReader`] borrows the file bytes, validates the header and
//! bounds-checks the code segment before handing out slices.  A truncated
//! or corrupt file is a [`FormatError`], never an out-of-range access.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::{self, Write};

use crate::header::{ContainerHeader, FormatError};
use crate::smdh::{Smdh, SmdhError, SMDH_SIZE};

/// Tag of the extension header that introduces the trailing SMDH.
pub const EXTENSION_TAG: &[u8; 4] = b"EXAC";
/// Tag (4) + metadata length (4).
pub const EXTENSION_HEADER_SIZE: usize = 8;
/// Page size the extension header is aligned to.
pub const METADATA_ALIGNMENT: u64 = 0x1000;

fn align_up(offset: u64) -> u64 {
    offset.div_ceil(METADATA_ALIGNMENT) * METADATA_ALIGNMENT
}

/// Zero bytes needed after `end` so the extension header is page aligned.
pub fn padding_for(end: u64) -> usize {
    (align_up(end) - end) as usize
}

/// The header stores the code size as a u32.
fn code_len_u32(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "code segment exceeds 4 GiB")
    })
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct ContainerWriter<W: Write> {
    writer: W,
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write `header || code [|| padding || EXAC || len || metadata]` and
    /// return the header that was emitted.
    pub fn write(&mut self, code: &[u8], metadata: Option<&[u8]>) -> io::Result<ContainerHeader> {
        let code_len = code_len_u32(code.len())?;
        if code.is_empty() {
            log::warn!("writing 3DSX with an empty code segment");
        }

        let header = ContainerHeader::for_code(code_len);
        header.write(&mut self.writer)?;
        self.writer.write_all(code)?;

        if let Some(meta) = metadata {
            if meta.len() != SMDH_SIZE {
                log::warn!("metadata blob is {:#x} bytes, expected {:#x}", meta.len(), SMDH_SIZE);
            }
            let end = header.code_offset() as u64 + code.len() as u64;
            let padding = padding_for(end);
            log::debug!("padding {padding:#x} bytes before EXAC at {:#x}", end + padding as u64);

            self.writer.write_all(&vec![0u8; padding])?;
            self.writer.write_all(EXTENSION_TAG)?;
            self.writer.write_u32::<LittleEndian>(meta.len() as u32)?;
            self.writer.write_all(meta)?;
        }
        Ok(header)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Build a complete container in memory.  Fails only for code segments
/// that do not fit the header's u32 size field.
pub fn write_container(code: &[u8], metadata: Option<&[u8]>) -> io::Result<Vec<u8>> {
    let mut writer = ContainerWriter::new(Vec::with_capacity(container_len(code.len(), metadata)));
    writer.write(code, metadata)?;
    Ok(writer.into_inner())
}

fn container_len(code_len: usize, metadata: Option<&[u8]>) -> usize {
    let end = crate::header::HEADER_SIZE + code_len;
    match metadata {
        Some(m) => end + padding_for(end as u64) + EXTENSION_HEADER_SIZE + m.len(),
        None    => end,
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ContainerReader<'a> {
    bytes:      &'a [u8],
    pub header: ContainerHeader,
}

impl<'a> ContainerReader<'a> {
    /// Validate the header and the code segment bounds.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FormatError> {
        let header = ContainerHeader::from_bytes(bytes)?;
        let offset = header.code_offset() as u64;
        let size   = header.text.size as u64;
        if offset + size > bytes.len() as u64 {
            return Err(FormatError::CodeOutOfBounds { offset, size, len: bytes.len() });
        }
        log::trace!("3DSX code segment at {offset:#x}, {size:#x} bytes");
        Ok(Self { bytes, header })
    }

    pub fn code(&self) -> &'a [u8] {
        let start = self.header.code_offset() as usize;
        &self.bytes[start..start + self.header.text.size as usize]
    }

    fn code_end(&self) -> u64 {
        self.header.code_offset() as u64 + self.header.text.size as u64
    }

    /// The embedded metadata blob, if an `EXAC` extension follows the padded
    /// code region.  A missing tag is `Ok(None)`; a tag whose declared length
    /// runs past the end of the file is an error.
    pub fn metadata(&self) -> Result<Option<&'a [u8]>, FormatError> {
        let tag_at = align_up(self.code_end());
        let len = self.bytes.len() as u64;
        if tag_at + EXTENSION_HEADER_SIZE as u64 > len {
            return Ok(None);
        }
        let tag_at = tag_at as usize;
        if &self.bytes[tag_at..tag_at + 4] != EXTENSION_TAG {
            log::debug!("no EXAC extension at {tag_at:#x}");
            return Ok(None);
        }

        let size   = LittleEndian::read_u32(&self.bytes[tag_at + 4..tag_at + 8]) as u64;
        let offset = (tag_at + EXTENSION_HEADER_SIZE) as u64;
        if offset + size > len {
            return Err(FormatError::MetadataOutOfBounds { offset, size, len: self.bytes.len() });
        }
        Ok(Some(&self.bytes[offset as usize..(offset + size) as usize]))
    }
}

// ── Container ────────────────────────────────────────────────────────────────

/// An owned 3DSX: header, code and optional trailing SMDH bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub header:   ContainerHeader,
    pub code:     Vec<u8>,
    pub metadata: Option<Vec<u8>>,
}

impl Container {
    /// Fails when `code` is too large for the header's u32 size field.
    pub fn new(code: Vec<u8>, metadata: Option<Vec<u8>>) -> io::Result<Self> {
        Ok(Self {
            header: ContainerHeader::for_code(code_len_u32(code.len())?),
            code,
            metadata,
        })
    }

    pub fn with_smdh(code: Vec<u8>, smdh: &Smdh) -> io::Result<Self> {
        Self::new(code, Some(smdh.to_bytes()))
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        write_container(&self.code, self.metadata.as_deref())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let reader = ContainerReader::parse(bytes)?;
        Ok(Self {
            header:   reader.header.clone(),
            code:     reader.code().to_vec(),
            metadata: reader.metadata()?.map(<[u8]>::to_vec),
        })
    }

    /// Decode the embedded SMDH, if any.
    pub fn smdh(&self) -> Option<Result<Smdh, SmdhError>> {
        self.metadata.as_deref().map(Smdh::from_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{HEADER_SIZE, MAGIC};
    use crate::icon::{TiledIcon, LARGE_ICON_SIZE, SMALL_ICON_SIZE};
    use proptest::prelude::*;

    fn sample_smdh() -> Smdh {
        Smdh::build(
            "Sample",
            "Sample application",
            "Tester",
            TiledIcon::blank(SMALL_ICON_SIZE),
            TiledIcon::blank(LARGE_ICON_SIZE),
        )
        .unwrap()
    }

    #[test]
    fn sixty_four_zero_bytes() {
        let file = write_container(&[0u8; 64], None).unwrap();
        assert_eq!(file.len(), 0x2C + 64);
        assert_eq!(&file[0..4], MAGIC);

        let reader = ContainerReader::parse(&file).unwrap();
        assert_eq!(reader.header.text.size, 0x40);
        assert_eq!(reader.header.code_offset(), HEADER_SIZE as u32);
        assert_eq!(reader.code(), &[0u8; 64][..]);
        assert_eq!(reader.metadata().unwrap(), None);
    }

    #[test]
    fn ten_zero_bytes_is_format_error() {
        assert!(matches!(
            ContainerReader::parse(&[0u8; 10]),
            Err(FormatError::TooShort { len: 10 })
        ));
    }

    #[test]
    fn truncated_code_is_format_error() {
        let mut file = write_container(&[0xAB; 100], None).unwrap();
        file.truncate(HEADER_SIZE + 50);
        assert!(matches!(
            ContainerReader::parse(&file),
            Err(FormatError::CodeOutOfBounds { offset: 0x2C, size: 100, .. })
        ));
    }

    #[test]
    fn metadata_is_page_aligned() {
        let smdh = sample_smdh().to_bytes();
        let code = vec![0x11u8; 300];
        let file = write_container(&code, Some(smdh.as_slice())).unwrap();

        assert_eq!(&file[0x1000..0x1004], EXTENSION_TAG);
        assert_eq!(LittleEndian::read_u32(&file[0x1004..0x1008]) as usize, SMDH_SIZE);
        assert!(file[HEADER_SIZE + 300..0x1000].iter().all(|&b| b == 0));
        assert_eq!(file.len(), 0x1008 + SMDH_SIZE);
        assert_eq!(&file[0x1008..0x100C], crate::smdh::MAGIC);

        let reader = ContainerReader::parse(&file).unwrap();
        assert_eq!(reader.code(), &code[..]);
        assert_eq!(reader.metadata().unwrap(), Some(&smdh[..]));
    }

    #[test]
    fn already_aligned_code_gets_no_padding() {
        let code = vec![0u8; 0x1000 - HEADER_SIZE];
        let file = write_container(&code, Some(&[1u8, 2, 3][..])).unwrap();
        assert_eq!(&file[0x1000..0x1004], EXTENSION_TAG);
        assert_eq!(file.len(), 0x1000 + EXTENSION_HEADER_SIZE + 3);
    }

    #[test]
    fn truncated_metadata_is_format_error() {
        let smdh = sample_smdh().to_bytes();
        let mut file = write_container(&[1, 2, 3, 4], Some(smdh.as_slice())).unwrap();
        file.truncate(file.len() - 1);
        let reader = ContainerReader::parse(&file).unwrap();
        assert!(matches!(reader.metadata(), Err(FormatError::MetadataOutOfBounds { .. })));
    }

    #[test]
    fn container_roundtrip_with_smdh() {
        let smdh = sample_smdh();
        let container = Container::with_smdh(vec![0xE1, 0xA0, 0x00, 0x00], &smdh).unwrap();
        let parsed = Container::from_bytes(&container.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, container);
        assert_eq!(parsed.smdh().unwrap().unwrap(), smdh);
    }

    #[test]
    fn oversized_code_length_is_rejected() {
        assert_eq!(code_len_u32(0x40).unwrap(), 0x40);
        assert_eq!(code_len_u32(u32::MAX as usize).unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        {
            let err = code_len_u32(u32::MAX as usize + 1).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn container_header_tracks_code() {
        let container = Container::new(vec![7u8; 300], None).unwrap();
        assert_eq!(container.header.text.size, 300);
        assert_eq!(container.header.code_offset(), HEADER_SIZE as u32);
    }

    #[test]
    fn padding_is_minimal() {
        assert_eq!(padding_for(0x1000), 0);
        assert_eq!(padding_for(0x1001), 0xFFF);
        assert_eq!(padding_for(0x2C), 0x1000 - 0x2C);
    }

    proptest! {
        #[test]
        fn code_roundtrips(code in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let file = write_container(&code, None).unwrap();
            let reader = ContainerReader::parse(&file).unwrap();
            prop_assert_eq!(reader.code(), &code[..]);
            prop_assert_eq!(reader.header.code_offset(), reader.header.header_size);
            prop_assert_eq!(reader.header.text.size as usize, code.len());
        }

        #[test]
        fn parse_never_panics(
            mut bytes   in proptest::collection::vec(any::<u8>(), HEADER_SIZE..0x1100),
            reloc       in prop_oneof![0u32..0x1100, any::<u32>()],
            text_size   in prop_oneof![0u32..0x1100, any::<u32>()],
            with_tag    in any::<bool>(),
        ) {
            bytes[0..4].copy_from_slice(MAGIC);
            LittleEndian::write_u32(&mut bytes[0x08..0x0C], reloc);
            LittleEndian::write_u32(&mut bytes[0x10..0x14], text_size);
            let tag_at = align_up(reloc as u64 + text_size as u64);
            if with_tag && tag_at + 4 <= bytes.len() as u64 {
                let at = tag_at as usize;
                bytes[at..at + 4].copy_from_slice(EXTENSION_TAG);
            }

            match ContainerReader::parse(&bytes) {
                Ok(reader) => {
                    prop_assert!(reloc as u64 + text_size as u64 <= bytes.len() as u64);
                    prop_assert_eq!(reader.code().len(), text_size as usize);
                    if let Ok(Some(meta)) = reader.metadata() {
                        prop_assert!(meta.len() <= bytes.len());
                    }
                }
                Err(e) => {
                    let is_bounds = matches!(e, FormatError::CodeOutOfBounds { .. });
                    prop_assert!(is_bounds);
                }
            }
        }
    }
}
