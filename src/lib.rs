pub mod header;
pub mod icon;
pub mod smdh;
pub mod container;
pub mod manifest;
pub mod package;

pub use header::{ContainerHeader, FormatError, SegmentDescriptor};
pub use icon::{TiledIcon, PixelSource, rgb565};
pub use smdh::{Smdh, SmdhError, ApplicationTitle, AppSettings, Language};
pub use container::{Container, ContainerReader, ContainerWriter, write_container};
pub use package::{PackOptions, Packager, PackageError};
