//! High-level packaging API — the surface the CLI is built on.
//!
//! ```no_run
//! use ctrpack::package::{PackOptions, Packager};
//!
//! let opts = PackOptions {
//!     title: "Hello 3DS".into(),
//!     icon:  Some("gfx/icon.png".into()),
//!     ..PackOptions::default()
//! };
//! Packager::new(opts).pack_file("build/app.elf", "build/app.3dsx")?;
//!
//! let container = ctrpack::package::open("build/app.3dsx")?;
//! assert_eq!(container.header.text.size as usize, container.code.len());
//! # Ok::<(), ctrpack::package::PackageError>(())
//! ```
//!
//! Every output is assembled in memory first and then written through a
//! temporary file in the destination directory that is renamed over the
//! target, so a failed run never leaves a half-written 3DSX behind.

use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::container::Container;
use crate::header::{FormatError, HEADER_SCHEMA};
use crate::icon::{resize_square, TiledIcon, LARGE_ICON_SIZE, SMALL_ICON_SIZE};
use crate::manifest::Manifest;
use crate::smdh::{AppSettings, Language, Smdh, SmdhError};

pub const DEFAULT_TITLE:       &str = "Homebrew";
pub const DEFAULT_DESCRIPTION: &str = "A homebrew application";
pub const DEFAULT_PUBLISHER:   &str = "Developer";

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Invalid 3DSX: {0}")]
    Format(#[from] FormatError),
    #[error("Invalid SMDH: {0}")]
    Smdh(#[from] SmdhError),
    #[error("Icon error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Manifest error: {0}")]
    Manifest(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── File helpers ──────────────────────────────────────────────────────────────

/// Read a whole input file; a missing path is reported as `NotFound`.
pub fn read_input(path: &Path) -> Result<Vec<u8>, PackageError> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PackageError::NotFound(path.to_owned()),
        _                       => PackageError::Io(e),
    })
}

/// Replace `path` with `bytes` in a single rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PackageError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _                                     => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| PackageError::Io(e.error))?;
    log::debug!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

pub fn load_manifest(path: &Path) -> Result<Manifest, PackageError> {
    let text = String::from_utf8_lossy(&read_input(path)?).into_owned();
    let mut manifest = Manifest::parse(&text)?;
    manifest.resolve_paths(path);
    Ok(manifest)
}

/// Decode any image format the `image` crate understands and produce the
/// 24×24 and 48×48 tiled icons.
pub fn load_icons(path: &Path) -> Result<(TiledIcon, TiledIcon), PackageError> {
    let img = image::load_from_memory(&read_input(path)?)?;
    log::debug!("icon {}: {}x{}", path.display(), img.width(), img.height());
    let small = TiledIcon::tile(&resize_square(&img, SMALL_ICON_SIZE));
    let large = TiledIcon::tile(&resize_square(&img, LARGE_ICON_SIZE));
    Ok((small, large))
}

// ── PackOptions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PackOptions {
    pub title:       String,
    pub description: String,
    pub publisher:   String,
    /// Source image for both icons; black icons when `None`.
    pub icon:        Option<PathBuf>,
    pub settings:    AppSettings,
    /// Append an SMDH extension to the 3DSX.
    pub embed_smdh:  bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            title:       DEFAULT_TITLE.to_owned(),
            description: DEFAULT_DESCRIPTION.to_owned(),
            publisher:   DEFAULT_PUBLISHER.to_owned(),
            icon:        None,
            settings:    AppSettings::default(),
            embed_smdh:  true,
        }
    }
}

impl PackOptions {
    /// Defaults overlaid with whatever the manifest sets.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut opts = Self::default();
        if let Some(t) = &manifest.app.title { opts.title = t.clone(); }
        if let Some(d) = &manifest.app.description { opts.description = d.clone(); }
        if let Some(p) = &manifest.app.publisher { opts.publisher = p.clone(); }
        opts.icon = manifest.app.icon.clone();
        manifest.settings.apply(&mut opts.settings);
        opts
    }
}

// ── Packager ──────────────────────────────────────────────────────────────────

pub struct Packager {
    opts: PackOptions,
}

impl Packager {
    pub fn new(opts: PackOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &PackOptions {
        &self.opts
    }

    pub fn build_smdh(&self) -> Result<Smdh, PackageError> {
        let (small, large) = match &self.opts.icon {
            Some(path) => load_icons(path)?,
            None => {
                log::info!("no icon given, using blank icons");
                (TiledIcon::blank(SMALL_ICON_SIZE), TiledIcon::blank(LARGE_ICON_SIZE))
            }
        };
        let mut smdh = Smdh::build(
            &self.opts.title,
            &self.opts.description,
            &self.opts.publisher,
            small,
            large,
        )?;
        smdh.settings = self.opts.settings.clone();
        Ok(smdh)
    }

    pub fn pack(&self, code: Vec<u8>) -> Result<Container, PackageError> {
        let metadata = if self.opts.embed_smdh {
            Some(self.build_smdh()?.to_bytes())
        } else {
            None
        };
        Ok(Container::new(code, metadata)?)
    }

    /// Wrap the executable at `input` into a 3DSX at `output`.
    pub fn pack_file<P: AsRef<Path>, Q: AsRef<Path>>(&self, input: P, output: Q) -> Result<Container, PackageError> {
        let (input, output) = (input.as_ref(), output.as_ref());
        let code = read_input(input)?;
        log::info!("packing {} ({} bytes of code)", input.display(), code.len());

        let container = self.pack(code)?;
        write_atomic(output, &container.to_bytes()?)?;
        log::info!("created {}", output.display());
        Ok(container)
    }

    /// Write a standalone SMDH block to `output`.
    pub fn write_smdh<P: AsRef<Path>>(&self, output: P) -> Result<Smdh, PackageError> {
        let smdh = self.build_smdh()?;
        write_atomic(output.as_ref(), &smdh.to_bytes())?;
        log::info!("created {}", output.as_ref().display());
        Ok(smdh)
    }
}

// ── Inspection ────────────────────────────────────────────────────────────────

pub fn open<P: AsRef<Path>>(path: P) -> Result<Container, PackageError> {
    Ok(Container::from_bytes(&read_input(path.as_ref())?)?)
}

/// Write the code segment (and the embedded SMDH when `smdh_out` is given).
pub fn extract(container: &Container, code_out: &Path, smdh_out: Option<&Path>) -> Result<(), PackageError> {
    write_atomic(code_out, &container.code)?;
    if let Some(path) = smdh_out {
        match &container.metadata {
            Some(meta) => write_atomic(path, meta)?,
            None       => log::warn!("no SMDH extension present; {} not written", path.display()),
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    pub file_size:   usize,
    pub fields:      Vec<(String, u32)>,
    pub code_blake3: String,
    /// First 32 bytes of code as little-endian words.
    pub code_words:  Vec<u32>,
    pub code_head:   String,
    pub smdh:        Option<SmdhInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmdhInfo {
    pub title:       String,
    pub description: String,
    pub publisher:   String,
    pub region_lock: u32,
    pub flags:       u32,
}

pub fn describe(container: &Container, file_size: usize) -> ContainerInfo {
    let fields = container.header.fields()
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect::<Vec<_>>();
    debug_assert_eq!(fields.len(), HEADER_SCHEMA.len());

    let code = &container.code;
    let smdh = match container.smdh() {
        Some(Ok(smdh)) => {
            let en = smdh.title(Language::English);
            Some(SmdhInfo {
                title:       en.short_description.clone(),
                description: en.long_description.clone(),
                publisher:   en.publisher.clone(),
                region_lock: smdh.settings.region_lock,
                flags:       smdh.settings.flags,
            })
        }
        Some(Err(e)) => {
            log::warn!("embedded SMDH is unreadable: {e}");
            None
        }
        None => None,
    };

    ContainerInfo {
        file_size,
        fields,
        code_blake3: blake3::hash(code).to_hex().to_string(),
        code_words:  code[..code.len().min(32)]
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect(),
        code_head:   hex::encode(&code[..code.len().min(16)]),
        smdh,
    }
}
