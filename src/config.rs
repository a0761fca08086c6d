use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

use crate::model::ViewPlane;
use crate::navigation::InitialSlice;
use crate::windowing::WindowPreset;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Slices moved per scroll step.
    pub scroll_step: usize,
    pub initial_slice: InitialSlice,
    /// Planes shown when the viewer opens.
    pub initial_planes: Vec<ViewPlane>,
    pub presets: BTreeMap<String, WindowPreset>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scroll_step: 1,
            initial_slice: InitialSlice::Middle,
            initial_planes: vec![ViewPlane::Axial],
            presets: default_presets(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: SessionConfig =
            toml::from_str(text).context("Could not parse session settings")?;
        config.scroll_step = config.scroll_step.max(1);
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Could not read settings from {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    /// Loads `explicit` if given. Otherwise tries the per-user settings file
    /// and falls back to defaults when it does not exist.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_settings_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("no settings file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

pub fn default_presets() -> BTreeMap<String, WindowPreset> {
    [
        ("Brain", 40.0, 80.0),
        ("Subdural", 75.0, 215.0),
        ("Stroke", 40.0, 40.0),
        ("Soft tissue", 50.0, 400.0),
        ("Lung", -600.0, 1500.0),
        ("Bone", 400.0, 1800.0),
    ]
    .into_iter()
    .map(|(name, center, width)| (name.to_string(), WindowPreset { center, width }))
    .collect()
}

pub fn default_settings_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        return env::var_os("APPDATA")
            .map(PathBuf::from)
            .map(|base| base.join("voxview").join("session.toml"));
    }

    #[cfg(target_os = "macos")]
    {
        return env::var_os("HOME").map(PathBuf::from).map(|home| {
            home.join("Library")
                .join("Application Support")
                .join("voxview")
                .join("session.toml")
        });
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(xdg).join("voxview").join("session.toml"));
        }
        env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".config").join("voxview").join("session.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path() -> PathBuf {
        env::temp_dir().join(format!(
            "voxview-settings-test-{}-{}.toml",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    #[test]
    fn empty_settings_use_defaults() {
        let config = SessionConfig::from_toml("").expect("empty TOML should parse");
        assert_eq!(config, SessionConfig::default());
        assert!(config.presets.contains_key("Lung"));
    }

    #[test]
    fn settings_override_fields() {
        let text = r#"
scroll_step = 0
initial_slice = "first"
initial_planes = ["coronal", "sagittal"]

[presets.Liver]
center = 60.0
width = 160.0
"#;
        let config = SessionConfig::from_toml(text).expect("settings should parse");
        assert_eq!(config.scroll_step, 1);
        assert_eq!(config.initial_slice, InitialSlice::First);
        assert_eq!(
            config.initial_planes,
            vec![ViewPlane::Coronal, ViewPlane::Sagittal]
        );
        assert_eq!(
            config.presets.get("Liver"),
            Some(&WindowPreset {
                center: 60.0,
                width: 160.0
            })
        );
        assert!(!config.presets.contains_key("Brain"));
    }

    #[test]
    fn unknown_plane_is_rejected() {
        let err = SessionConfig::from_toml("initial_planes = [\"oblique\"]")
            .expect_err("oblique is not a plane");
        assert!(format!("{err:#}").contains("oblique"));
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() {
        let path = temp_settings_path();
        fs::write(&path, "scroll_step = 3\n").expect("should write temp settings");
        let loaded = SessionConfig::load_or_default(Some(&path)).expect("settings should load");
        assert_eq!(loaded.scroll_step, 3);
        let _ = fs::remove_file(&path);

        assert!(SessionConfig::load_or_default(Some(&path)).is_err());
    }
}
