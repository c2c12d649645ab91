//! Viewer settings. Loaded from viewer.ron at startup.

use renderer::RendererConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub title: String,
    /// Starting hour, 0 to 24.
    pub time_of_day: f32,
    /// Simulated seconds per real second.
    pub time_scale: f32,
    /// Camera orbit speed in radians per second.
    pub orbit_speed: f32,
    /// Frames rendered before the headless image is written.
    pub headless_frames: u32,
    pub headless_output: PathBuf,
    pub renderer: RendererConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: String::from("HDR Deferred Viewer"),
            time_of_day: 16.5,
            time_scale: 60.0,
            orbit_speed: 0.15,
            headless_frames: 3,
            headless_output: PathBuf::from("frame.png"),
            renderer: RendererConfig::default(),
        }
    }
}

impl ViewerConfig {
    /// Load from `viewer.ron` in the working directory. Missing or invalid files give defaults.
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => Self::parse(&data).unwrap_or_else(|e| {
                log::warn!("Invalid config at {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            Err(_) => {
                log::warn!("No config at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    pub fn parse(data: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(data)
    }

    /// Write the current settings to `viewer.ron`. Logs on error.
    pub fn save(&self) {
        let path = config_path();
        match ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default()) {
            Ok(s) => {
                if let Err(e) = std::fs::write(&path, s) {
                    log::warn!("Could not write config to {:?}: {}", path, e);
                }
            }
            Err(e) => log::warn!("Could not serialize config: {}", e),
        }
    }
}

fn config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("viewer.ron")
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::{DebugView, Effect};

    #[test]
    fn partial_files_keep_defaults_for_missing_fields() {
        let config = ViewerConfig::parse("(time_of_day: 9.0, renderer: (width: 640, debug_view: Normal))").unwrap();
        assert_eq!(config.time_of_day, 9.0);
        assert_eq!(config.renderer.width, 640);
        assert_eq!(config.renderer.height, 720);
        assert_eq!(config.renderer.debug_view, DebugView::Normal);
        assert!(config.renderer.post.is_enabled(Effect::Bloom));
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("viewer-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("viewer.ron");
        std::fs::write(&path, "(time_of_day: \"noon\")").unwrap();
        assert_eq!(ViewerConfig::load_from(&path), ViewerConfig::default());
        assert_eq!(ViewerConfig::load_from(&dir.join("missing.ron")), ViewerConfig::default());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn settings_survive_a_ron_round_trip() {
        let mut config = ViewerConfig::default();
        config.renderer.shadow_pool_size = 7;
        let text = ron::ser::to_string(&config).unwrap();
        assert_eq!(ViewerConfig::parse(&text).unwrap(), config);
    }
}
