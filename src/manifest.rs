//! Optional `ctrpack.toml` project manifest.
//!
//! ```toml
//! [app]
//! title       = "X18 Mixer"
//! description = "X18 Mixer Controller"
//! publisher   = "MLJ"
//! icon        = "gfx/icon.png"   # relative to the manifest
//!
//! [settings]
//! region_lock  = 0x7FFFFFFF
//! visible      = true
//! allow_3d     = false
//! eula_version = 0
//! ```
//!
//! Every key is optional.  Command-line flags take precedence.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::smdh::{AppSettings, FLAG_ALLOW_3D, FLAG_VISIBLE};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
    pub app:      AppSection,
    pub settings: SettingsSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppSection {
    pub title:       Option<String>,
    pub description: Option<String>,
    pub publisher:   Option<String>,
    pub icon:        Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsSection {
    pub region_lock:  Option<u32>,
    pub visible:      Option<bool>,
    pub allow_3d:     Option<bool>,
    pub eula_version: Option<u16>,
}

fn set_flag(flags: &mut u32, bit: u32, on: bool) {
    if on { *flags |= bit } else { *flags &= !bit }
}

impl SettingsSection {
    /// Overlay the keys that are present onto `settings`.
    pub fn apply(&self, settings: &mut AppSettings) {
        if let Some(region) = self.region_lock {
            settings.region_lock = region;
        }
        if let Some(visible) = self.visible {
            set_flag(&mut settings.flags, FLAG_VISIBLE, visible);
        }
        if let Some(allow_3d) = self.allow_3d {
            set_flag(&mut settings.flags, FLAG_ALLOW_3D, allow_3d);
        }
        if let Some(eula) = self.eula_version {
            settings.eula_version = eula;
        }
    }
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Make a relative icon path relative to the manifest's directory.
    pub fn resolve_paths(&mut self, manifest_path: &Path) {
        let base = manifest_path.parent().unwrap_or_else(|| Path::new(""));
        if let Some(icon) = self.app.icon.as_mut() {
            if icon.is_relative() {
                *icon = base.join(&*icon);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smdh::REGION_FREE;

    #[test]
    fn empty_manifest_is_all_defaults() {
        assert_eq!(Manifest::parse("").unwrap(), Manifest::default());
    }

    #[test]
    fn full_manifest() {
        let m = Manifest::parse(r#"
            [app]
            title = "X18 Mixer"
            description = "X18 Mixer Controller"
            publisher = "MLJ"
            icon = "gfx/icon.png"

            [settings]
            region_lock = 1
            visible = false
            allow_3d = true
        "#).unwrap();
        assert_eq!(m.app.title.as_deref(), Some("X18 Mixer"));
        assert_eq!(m.app.icon.as_deref(), Some(Path::new("gfx/icon.png")));

        let mut settings = AppSettings::default();
        m.settings.apply(&mut settings);
        assert_eq!(settings.region_lock, 1);
        assert!(!settings.is_visible());
        assert_eq!(settings.flags & FLAG_ALLOW_3D, FLAG_ALLOW_3D);
    }

    #[test]
    fn absent_settings_keep_defaults() {
        let mut settings = AppSettings::default();
        SettingsSection::default().apply(&mut settings);
        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.region_lock, REGION_FREE);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Manifest::parse("[app]\nname = \"x\"\n").is_err());
    }

    #[test]
    fn icon_is_resolved_against_manifest_dir() {
        let mut m = Manifest::parse("[app]\nicon = \"icon.png\"\n").unwrap();
        m.resolve_paths(Path::new("project/ctrpack.toml"));
        assert_eq!(m.app.icon.as_deref(), Some(Path::new("project/icon.png")));
    }
}
