//! Per image pipeline light group configuration.
//!
//! Every image pipeline carries its own list of radiance channel scales,
//! indexed by light group. Lookups never fail: a missing pipeline or a
//! missing group resolves to the neutral entry (enabled, unit scale).

use serde::{Deserialize, Serialize};

/// Enable flag and RGB scale for one light group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadianceChannelScale {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_global_scale")]
    pub global_scale: f32,
    #[serde(default = "default_rgb_scale")]
    pub rgb_scale: [f32; 3],
}

fn default_enabled() -> bool {
    true
}

fn default_global_scale() -> f32 {
    1.0
}

fn default_rgb_scale() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

impl RadianceChannelScale {
    /// The neutral entry: enabled, unit scale.
    pub const NEUTRAL: RadianceChannelScale = RadianceChannelScale {
        enabled: true,
        global_scale: 1.0,
        rgb_scale: [1.0, 1.0, 1.0],
    };

    pub fn new(enabled: bool, rgb_scale: [f32; 3]) -> Self {
        Self {
            enabled,
            global_scale: 1.0,
            rgb_scale,
        }
    }

    /// Effective per-component scale applied to the group's radiance.
    pub fn scale(&self) -> [f32; 3] {
        [
            self.global_scale * self.rgb_scale[0],
            self.global_scale * self.rgb_scale[1],
            self.global_scale * self.rgb_scale[2],
        ]
    }
}

impl Default for RadianceChannelScale {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Light group configuration for one image pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineScaleConfig {
    #[serde(default)]
    pub radiance_channel_scales: Vec<RadianceChannelScale>,
}

static NEUTRAL_PIPELINE: PipelineScaleConfig = PipelineScaleConfig {
    radiance_channel_scales: Vec::new(),
};

impl PipelineScaleConfig {
    pub fn new(radiance_channel_scales: Vec<RadianceChannelScale>) -> Self {
        Self {
            radiance_channel_scales,
        }
    }

    /// The configuration used when a pipeline has none of its own.
    pub fn neutral() -> &'static PipelineScaleConfig {
        &NEUTRAL_PIPELINE
    }

    /// Resolve the configuration for `pipeline_index`, falling back to the
    /// neutral configuration when the index is out of range.
    pub fn resolve(configs: &[PipelineScaleConfig], pipeline_index: usize) -> &PipelineScaleConfig {
        configs.get(pipeline_index).unwrap_or(&NEUTRAL_PIPELINE)
    }

    /// Scale entry for light group `group`; neutral if absent.
    pub fn group(&self, group: usize) -> RadianceChannelScale {
        self.radiance_channel_scales
            .get(group)
            .copied()
            .unwrap_or(RadianceChannelScale::NEUTRAL)
    }

    /// Configuration with every one of `group_count` groups disabled.
    pub fn all_disabled(group_count: usize) -> Self {
        Self::new(vec![RadianceChannelScale::new(false, [1.0, 1.0, 1.0]); group_count])
    }
}
