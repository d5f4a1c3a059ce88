//! SMDH metadata block: localized titles, application settings and icons.
//!
//! A block is always exactly [`SMDH_SIZE`] bytes:
//!
//! ```text
//! 0x0000  magic "SMDH", version u16, reserved u16
//! 0x0008  16 × ApplicationTitle (0x200 each)
//!           short description 0x80 | long description 0x100 | publisher 0x80
//! 0x2008  AppSettings (0x30)
//! 0x2038  reserved (0x8)
//! 0x2040  small icon, 24×24 tiled RGB565 (0x480)
//! 0x24C0  large icon, 48×48 tiled RGB565 (0x1200)
//! ```
//!
//! Text is UTF-16LE, zero padded, and may fill its field completely (there
//! is no guaranteed terminator).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

use crate::icon::{
    TiledIcon, LARGE_ICON_BYTES, LARGE_ICON_SIZE, SMALL_ICON_BYTES, SMALL_ICON_SIZE,
};

pub const MAGIC: &[u8; 4] = b"SMDH";
pub const VERSION: u16 = 0;
pub const SMDH_SIZE: usize = 0x36C0;

pub const LANGUAGE_COUNT: usize = 16;
pub const TITLES_OFFSET: usize = 0x0008;
pub const TITLE_RECORD_SIZE: usize = 0x200;
pub const SHORT_DESCRIPTION_BYTES: usize = 0x80;
pub const LONG_DESCRIPTION_BYTES: usize = 0x100;
pub const PUBLISHER_BYTES: usize = 0x80;

pub const SETTINGS_OFFSET: usize = 0x2008;
pub const SETTINGS_SIZE: usize = 0x30;
pub const RESERVED_OFFSET: usize = 0x2038;
pub const RESERVED_SIZE: usize = 0x8;
pub const SMALL_ICON_OFFSET: usize = 0x2040;
pub const LARGE_ICON_OFFSET: usize = 0x24C0;

const _: () = {
    assert!(SHORT_DESCRIPTION_BYTES + LONG_DESCRIPTION_BYTES + PUBLISHER_BYTES == TITLE_RECORD_SIZE);
    assert!(TITLES_OFFSET + LANGUAGE_COUNT * TITLE_RECORD_SIZE == SETTINGS_OFFSET);
    assert!(SETTINGS_OFFSET + SETTINGS_SIZE == RESERVED_OFFSET);
    assert!(RESERVED_OFFSET + RESERVED_SIZE == SMALL_ICON_OFFSET);
    assert!(SMALL_ICON_OFFSET + SMALL_ICON_BYTES == LARGE_ICON_OFFSET);
    assert!(LARGE_ICON_OFFSET + LARGE_ICON_BYTES == SMDH_SIZE);
};

/// Region lock value meaning "runs on every region".
pub const REGION_FREE: u32 = 0x7FFF_FFFF;
/// Rating byte for a board that does not rate this title.
pub const RATING_UNRATED: u8 = 0x00;

pub const FLAG_VISIBLE:          u32 = 1 << 0;
pub const FLAG_ALLOW_3D:         u32 = 1 << 2;

#[derive(Error, Debug)]
pub enum SmdhError {
    #[error("{slot} icon is {actual_w}x{actual_h} ({actual_len} bytes), expected {expected}x{expected} ({expected_len} bytes)")]
    IconSize {
        slot:         &'static str,
        expected:     u32,
        expected_len: usize,
        actual_w:     u32,
        actual_h:     u32,
        actual_len:   usize,
    },
    #[error("SMDH block too short: {len} bytes (need {SMDH_SIZE})")]
    TooShort { len: usize },
    #[error("Invalid SMDH magic: {0:02x?}")]
    InvalidMagic([u8; 4]),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Languages ────────────────────────────────────────────────────────────────

/// Title slot order.  Slots 12..16 are reserved but still populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Japanese           = 0,
    English            = 1,
    French             = 2,
    German             = 3,
    Italian            = 4,
    Spanish            = 5,
    SimplifiedChinese  = 6,
    Korean             = 7,
    Dutch              = 8,
    Portuguese         = 9,
    Russian            = 10,
    TraditionalChinese = 11,
}

impl Language {
    pub fn slot(self) -> usize {
        self as usize
    }
}

// ── Text fields ──────────────────────────────────────────────────────────────

/// UTF-16LE, cut to whole code units that fit in `width` bytes, zero padded.
/// A surrogate pair is never split: a dangling high surrogate is dropped.
fn encode_text(text: &str, width: usize) -> Vec<u8> {
    let mut units: Vec<u16> = text.encode_utf16().take(width / 2).collect();
    if units.last().is_some_and(|u| (0xD800..0xDC00).contains(u)) {
        units.pop();
    }
    let mut out: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
    out.resize(width, 0);
    out
}

fn decode_text(field: &[u8]) -> String {
    let units: Vec<u16> = field
        .chunks_exact(2)
        .map(|p| u16::from_le_bytes([p[0], p[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// One language slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationTitle {
    pub short_description: String,
    pub long_description:  String,
    pub publisher:         String,
}

impl ApplicationTitle {
    pub fn new(short: &str, long: &str, publisher: &str) -> Self {
        Self {
            short_description: short.to_owned(),
            long_description:  long.to_owned(),
            publisher:         publisher.to_owned(),
        }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&encode_text(&self.short_description, SHORT_DESCRIPTION_BYTES))?;
        writer.write_all(&encode_text(&self.long_description, LONG_DESCRIPTION_BYTES))?;
        writer.write_all(&encode_text(&self.publisher, PUBLISHER_BYTES))?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut record = [0u8; TITLE_RECORD_SIZE];
        reader.read_exact(&mut record)?;
        let (short, rest) = record.split_at(SHORT_DESCRIPTION_BYTES);
        let (long, publisher) = rest.split_at(LONG_DESCRIPTION_BYTES);
        Ok(Self {
            short_description: decode_text(short),
            long_description:  decode_text(long),
            publisher:         decode_text(publisher),
        })
    }
}

// ── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    /// One byte per rating board (CERO, ESRB, USK, PEGI, ...).
    pub ratings:                 [u8; 16],
    pub region_lock:             u32,
    pub match_maker_id:          u32,
    pub match_maker_bit_id:      u64,
    pub flags:                   u32,
    pub eula_version:            u16,
    pub optimal_animation_frame: f32,
    pub cec_id:                  u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            ratings:                 [RATING_UNRATED; 16],
            region_lock:             REGION_FREE,
            match_maker_id:          0,
            match_maker_bit_id:      0,
            flags:                   FLAG_VISIBLE,
            eula_version:            0,
            optimal_animation_frame: 0.0,
            cec_id:                  0,
        }
    }
}

impl AppSettings {
    pub fn is_visible(&self) -> bool {
        self.flags & FLAG_VISIBLE != 0
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.ratings)?;
        writer.write_u32::<LittleEndian>(self.region_lock)?;
        writer.write_u32::<LittleEndian>(self.match_maker_id)?;
        writer.write_u64::<LittleEndian>(self.match_maker_bit_id)?;
        writer.write_u32::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.eula_version)?;
        writer.write_u16::<LittleEndian>(0)?; // reserved
        writer.write_f32::<LittleEndian>(self.optimal_animation_frame)?;
        writer.write_u32::<LittleEndian>(self.cec_id)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut ratings = [0u8; 16];
        reader.read_exact(&mut ratings)?;
        let region_lock        = reader.read_u32::<LittleEndian>()?;
        let match_maker_id     = reader.read_u32::<LittleEndian>()?;
        let match_maker_bit_id = reader.read_u64::<LittleEndian>()?;
        let flags              = reader.read_u32::<LittleEndian>()?;
        let eula_version       = reader.read_u16::<LittleEndian>()?;
        let _reserved          = reader.read_u16::<LittleEndian>()?;
        Ok(Self {
            ratings,
            region_lock,
            match_maker_id,
            match_maker_bit_id,
            flags,
            eula_version,
            optimal_animation_frame: reader.read_f32::<LittleEndian>()?,
            cec_id:                  reader.read_u32::<LittleEndian>()?,
        })
    }
}

// ── Smdh ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Smdh {
    pub titles:   [ApplicationTitle; LANGUAGE_COUNT],
    pub settings: AppSettings,
    small_icon:   TiledIcon,
    large_icon:   TiledIcon,
}

fn check_icon(slot: &'static str, icon: &TiledIcon, size: u32, len: usize) -> Result<(), SmdhError> {
    if icon.width() == size && icon.height() == size && icon.as_bytes().len() == len {
        return Ok(());
    }
    Err(SmdhError::IconSize {
        slot,
        expected:     size,
        expected_len: len,
        actual_w:     icon.width(),
        actual_h:     icon.height(),
        actual_len:   icon.as_bytes().len(),
    })
}

impl Smdh {
    /// Broadcast one title/description/publisher triple to every language
    /// slot, with default settings (region free, visible, unrated).
    ///
    /// Text longer than a field is truncated.  Icons of the wrong size are
    /// rejected with [`SmdhError::IconSize`].
    pub fn build(
        title:       &str,
        description: &str,
        publisher:   &str,
        small_icon:  TiledIcon,
        large_icon:  TiledIcon,
    ) -> Result<Self, SmdhError> {
        check_icon("small", &small_icon, SMALL_ICON_SIZE, SMALL_ICON_BYTES)?;
        check_icon("large", &large_icon, LARGE_ICON_SIZE, LARGE_ICON_BYTES)?;

        let entry = ApplicationTitle::new(title, description, publisher);
        Ok(Self {
            titles:   std::array::from_fn(|_| entry.clone()),
            settings: AppSettings::default(),
            small_icon,
            large_icon,
        })
    }

    pub fn title(&self, lang: Language) -> &ApplicationTitle {
        &self.titles[lang.slot()]
    }

    /// Override a single language slot after a broadcast build.
    pub fn set_title(&mut self, lang: Language, title: ApplicationTitle) {
        self.titles[lang.slot()] = title;
    }

    pub fn small_icon(&self) -> &TiledIcon { &self.small_icon }
    pub fn large_icon(&self) -> &TiledIcon { &self.large_icon }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u16::<LittleEndian>(VERSION)?;
        writer.write_u16::<LittleEndian>(0)?;
        for title in &self.titles {
            title.write(&mut writer)?;
        }
        self.settings.write(&mut writer)?;
        writer.write_all(&[0u8; RESERVED_SIZE])?;
        writer.write_all(self.small_icon.as_bytes())?;
        writer.write_all(self.large_icon.as_bytes())?;
        Ok(())
    }

    /// Serialize into a fresh buffer of exactly [`SMDH_SIZE`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SMDH_SIZE);
        if let Err(e) = self.write(&mut buf) {
            unreachable!("writing SMDH into a Vec failed: {e}");
        }
        debug_assert_eq!(buf.len(), SMDH_SIZE);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SmdhError> {
        if bytes.len() < SMDH_SIZE {
            return Err(SmdhError::TooShort { len: bytes.len() });
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if &magic != MAGIC {
            return Err(SmdhError::InvalidMagic(magic));
        }

        let mut cursor = Cursor::new(&bytes[TITLES_OFFSET..SETTINGS_OFFSET]);
        let mut titles: [ApplicationTitle; LANGUAGE_COUNT] = Default::default();
        for slot in titles.iter_mut() {
            *slot = ApplicationTitle::read(&mut cursor)?;
        }
        let settings = AppSettings::read(&bytes[SETTINGS_OFFSET..RESERVED_OFFSET])?;

        let small = bytes[SMALL_ICON_OFFSET..LARGE_ICON_OFFSET].to_vec();
        let large = bytes[LARGE_ICON_OFFSET..SMDH_SIZE].to_vec();
        Ok(Self {
            titles,
            settings,
            small_icon: TiledIcon::from_tiled_bytes(SMALL_ICON_SIZE, small),
            large_icon: TiledIcon::from_tiled_bytes(LARGE_ICON_SIZE, large),
        })
    }
}
