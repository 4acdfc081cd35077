use serde::{Deserialize, Serialize};

use crate::error::LumenResult;
use crate::scale::PipelineScaleConfig;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub alpha: bool,
    #[serde(default)]
    pub object_id: bool,
    #[serde(default = "default_true")]
    pub radiance_per_pixel_normalized: bool,
    #[serde(default)]
    pub radiance_per_screen_normalized: bool,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            alpha: false,
            object_id: false,
            radiance_per_pixel_normalized: true,
            radiance_per_screen_normalized: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FilmConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_count")]
    pub radiance_group_count: usize,
    #[serde(default = "default_count")]
    pub image_pipeline_count: usize,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl Default for FilmConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            radiance_group_count: 1,
            image_pipeline_count: 1,
            channels: ChannelsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HardwareConfig {
    /// When false the hardware merge stays inert.
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Index into the list of hardware devices; None picks automatically.
    #[serde(default)]
    pub device_index: Option<usize>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            enable: true,
            device_index: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_count() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct LumenConfig {
    #[serde(default)]
    pub film: FilmConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub image_pipelines: Vec<PipelineScaleConfig>,
}

impl LumenConfig {
    pub fn load_from_file(path: &std::path::Path) -> LumenResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: LumenConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> LumenResult<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
