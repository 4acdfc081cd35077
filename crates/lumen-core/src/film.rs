//! Host side of the film: every channel the merge reads or writes, the
//! light group configuration of each image pipeline, and sample totals.

use crate::channel::{Channel, ChannelKind};
use crate::config::{FilmConfig, LumenConfig};
use crate::error::{LumenError, LumenResult};
use crate::samples::SampleCounters;
use crate::scale::PipelineScaleConfig;

#[derive(Debug, Clone)]
pub struct Film {
    width: u32,
    height: u32,
    image_pipelines: Vec<Channel<f32>>,
    alpha: Option<Channel<f32>>,
    object_id: Option<Channel<u32>>,
    radiance_per_pixel_normalized: Vec<Channel<f32>>,
    radiance_per_screen_normalized: Vec<Channel<f32>>,
    /// Light group configuration, indexed by image pipeline.
    pub pipeline_scales: Vec<PipelineScaleConfig>,
    pub sample_counts: SampleCounters,
}

impl Film {
    /// Create a film with one image pipeline channel and no radiance channels.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            image_pipelines: vec![Channel::new(ChannelKind::ImagePipeline, width, height)],
            alpha: None,
            object_id: None,
            radiance_per_pixel_normalized: Vec::new(),
            radiance_per_screen_normalized: Vec::new(),
            pipeline_scales: Vec::new(),
            sample_counts: SampleCounters::new(),
        }
    }

    /// Build a film from the `[film]` section and pipeline scale list.
    pub fn from_config(config: &LumenConfig) -> LumenResult<Self> {
        let FilmConfig {
            width,
            height,
            radiance_group_count,
            image_pipeline_count,
            ref channels,
        } = config.film;
        if width == 0 || height == 0 {
            return Err(LumenError::InvalidArgument(format!(
                "film size must be non-zero, got {width}x{height}"
            )));
        }

        let mut film = Film::new(width, height).with_image_pipelines(image_pipeline_count.max(1));
        if channels.alpha {
            film = film.with_alpha();
        }
        if channels.object_id {
            film = film.with_object_id();
        }
        if channels.radiance_per_pixel_normalized {
            film = film.with_radiance_per_pixel_normalized(radiance_group_count);
        }
        if channels.radiance_per_screen_normalized {
            film = film.with_radiance_per_screen_normalized(radiance_group_count);
        }
        film.pipeline_scales = config.image_pipelines.clone();
        Ok(film)
    }

    pub fn with_image_pipelines(mut self, count: usize) -> Self {
        self.image_pipelines = (0..count)
            .map(|_| Channel::new(ChannelKind::ImagePipeline, self.width, self.height))
            .collect();
        self
    }

    pub fn with_alpha(mut self) -> Self {
        self.alpha = Some(Channel::new(ChannelKind::Alpha, self.width, self.height));
        self
    }

    pub fn with_object_id(mut self) -> Self {
        self.object_id = Some(Channel::new(ChannelKind::ObjectId, self.width, self.height));
        self
    }

    pub fn with_radiance_per_pixel_normalized(mut self, groups: usize) -> Self {
        self.radiance_per_pixel_normalized = (0..groups)
            .map(|_| Channel::new(ChannelKind::RadiancePerPixelNormalized, self.width, self.height))
            .collect();
        self
    }

    pub fn with_radiance_per_screen_normalized(mut self, groups: usize) -> Self {
        self.radiance_per_screen_normalized = (0..groups)
            .map(|_| Channel::new(ChannelKind::RadiancePerScreenNormalized, self.width, self.height))
            .collect();
        self
    }

    pub fn with_pipeline_scales(mut self, scales: Vec<PipelineScaleConfig>) -> Self {
        self.pipeline_scales = scales;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Whether the film carries at least one channel of `kind`.
    pub fn has_channel(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::ImagePipeline => !self.image_pipelines.is_empty(),
            ChannelKind::Alpha => self.alpha.is_some(),
            ChannelKind::ObjectId => self.object_id.is_some(),
            ChannelKind::RadiancePerPixelNormalized => !self.radiance_per_pixel_normalized.is_empty(),
            ChannelKind::RadiancePerScreenNormalized => {
                !self.radiance_per_screen_normalized.is_empty()
            }
        }
    }

    /// Byte size of one channel of `kind`, or 0 if the film has none.
    pub fn channel_size(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::ImagePipeline => self.image_pipelines.first().map_or(0, Channel::byte_size),
            ChannelKind::Alpha => self.alpha.as_ref().map_or(0, Channel::byte_size),
            ChannelKind::ObjectId => self.object_id.as_ref().map_or(0, Channel::byte_size),
            ChannelKind::RadiancePerPixelNormalized => self
                .radiance_per_pixel_normalized
                .first()
                .map_or(0, Channel::byte_size),
            ChannelKind::RadiancePerScreenNormalized => self
                .radiance_per_screen_normalized
                .first()
                .map_or(0, Channel::byte_size),
        }
    }

    /// Number of light groups tracked by the radiance channels.
    pub fn radiance_group_count(&self) -> usize {
        self.radiance_per_pixel_normalized
            .len()
            .max(self.radiance_per_screen_normalized.len())
    }

    pub fn image_pipeline_count(&self) -> usize {
        self.image_pipelines.len()
    }

    pub fn image_pipeline(&self, index: usize) -> Option<&Channel<f32>> {
        self.image_pipelines.get(index)
    }

    pub fn image_pipeline_mut(&mut self, index: usize) -> Option<&mut Channel<f32>> {
        self.image_pipelines.get_mut(index)
    }

    pub fn alpha(&self) -> Option<&Channel<f32>> {
        self.alpha.as_ref()
    }

    pub fn alpha_mut(&mut self) -> Option<&mut Channel<f32>> {
        self.alpha.as_mut()
    }

    pub fn object_id(&self) -> Option<&Channel<u32>> {
        self.object_id.as_ref()
    }

    pub fn object_id_mut(&mut self) -> Option<&mut Channel<u32>> {
        self.object_id.as_mut()
    }

    pub fn radiance_per_pixel_normalized(&self, group: usize) -> Option<&Channel<f32>> {
        self.radiance_per_pixel_normalized.get(group)
    }

    pub fn radiance_per_pixel_normalized_mut(&mut self, group: usize) -> Option<&mut Channel<f32>> {
        self.radiance_per_pixel_normalized.get_mut(group)
    }

    pub fn radiance_per_screen_normalized(&self, group: usize) -> Option<&Channel<f32>> {
        self.radiance_per_screen_normalized.get(group)
    }

    pub fn radiance_per_screen_normalized_mut(
        &mut self,
        group: usize,
    ) -> Option<&mut Channel<f32>> {
        self.radiance_per_screen_normalized.get_mut(group)
    }

    /// All per-pixel-normalized radiance channels, in light group order.
    pub fn radiance_per_pixel_normalized_channels(&self) -> &[Channel<f32>] {
        &self.radiance_per_pixel_normalized
    }

    /// All per-screen-normalized radiance channels, in light group order.
    pub fn radiance_per_screen_normalized_channels(&self) -> &[Channel<f32>] {
        &self.radiance_per_screen_normalized
    }

    /// Light group configuration for `pipeline_index`, neutral when out of range.
    pub fn pipeline_scale(&self, pipeline_index: usize) -> &PipelineScaleConfig {
        PipelineScaleConfig::resolve(&self.pipeline_scales, pipeline_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelsConfig;

    #[test]
    fn test_new_film_has_only_pipeline() {
        let film = Film::new(4, 2);
        assert_eq!(film.pixel_count(), 8);
        assert!(film.has_channel(ChannelKind::ImagePipeline));
        assert!(!film.has_channel(ChannelKind::Alpha));
        assert!(!film.has_channel(ChannelKind::RadiancePerPixelNormalized));
        assert_eq!(film.channel_size(ChannelKind::ImagePipeline), 8 * 3 * 4);
        assert_eq!(film.channel_size(ChannelKind::RadiancePerScreenNormalized), 0);
        assert_eq!(film.radiance_group_count(), 0);
    }

    #[test]
    fn test_radiance_channel_sizes_differ() {
        let film = Film::new(4, 1)
            .with_radiance_per_pixel_normalized(2)
            .with_radiance_per_screen_normalized(2);
        assert_eq!(film.channel_size(ChannelKind::RadiancePerPixelNormalized), 4 * 4 * 4);
        assert_eq!(film.channel_size(ChannelKind::RadiancePerScreenNormalized), 4 * 3 * 4);
        assert_eq!(film.radiance_group_count(), 2);
    }

    #[test]
    fn test_from_config() {
        let mut config = LumenConfig::default();
        config.film = FilmConfig {
            width: 8,
            height: 8,
            radiance_group_count: 3,
            image_pipeline_count: 2,
            channels: ChannelsConfig {
                alpha: true,
                object_id: true,
                radiance_per_pixel_normalized: false,
                radiance_per_screen_normalized: true,
            },
        };
        let film = Film::from_config(&config).unwrap();
        assert_eq!(film.image_pipeline_count(), 2);
        assert!(film.has_channel(ChannelKind::Alpha));
        assert!(film.has_channel(ChannelKind::ObjectId));
        assert!(!film.has_channel(ChannelKind::RadiancePerPixelNormalized));
        assert_eq!(film.radiance_group_count(), 3);
    }

    #[test]
    fn test_from_config_rejects_empty_film() {
        let mut config = LumenConfig::default();
        config.film.width = 0;
        assert!(matches!(
            Film::from_config(&config),
            Err(LumenError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_pipeline_scale_falls_back() {
        let film = Film::new(1, 1).with_pipeline_scales(vec![PipelineScaleConfig::all_disabled(1)]);
        assert!(!film.pipeline_scale(0).group(0).enabled);
        assert!(film.pipeline_scale(1).group(0).enabled);
    }
}
