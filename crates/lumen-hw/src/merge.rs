//! One merge of the radiance channels into an image pipeline.
//!
//! Per call: upload the host pipeline channel, clear it on the device,
//! accumulate every enabled light group of both radiance kinds through the
//! shared scratch buffer, sanitize, read back into the host channel. The
//! call returns once the readback has landed.

use lumen_core::{ChannelKind, Film, LumenError, LumenResult};

use crate::buffers::DeviceBuffers;
use crate::device::{BufferId, HardwareDevice, ReadbackId, ScaleArgs};
use crate::kernels::{KernelPipeline, MergeKernel};

/// Scale applied to per-screen-normalized radiance: pixels per screen
/// sample, or 1 before any screen sample was taken.
pub fn per_screen_factor(pixel_count: usize, screen_sample_count: f64) -> f32 {
    if screen_sample_count > 0.0 {
        (pixel_count as f64 / screen_sample_count) as f32
    } else {
        1.0
    }
}

pub struct MergeEngine<'a> {
    device: &'a mut dyn HardwareDevice,
    buffers: &'a DeviceBuffers,
    kernels: &'a KernelPipeline,
    pending_read: Option<ReadbackId>,
}

impl<'a> MergeEngine<'a> {
    pub fn new(
        device: &'a mut dyn HardwareDevice,
        buffers: &'a DeviceBuffers,
        kernels: &'a KernelPipeline,
    ) -> Self {
        Self {
            device,
            buffers,
            kernels,
            pending_read: None,
        }
    }

    /// Merge into the image pipeline channel `pipeline_index` of `film`.
    pub fn merge(&mut self, film: &mut Film, pipeline_index: usize) -> LumenResult<()> {
        let result = self.run(film, pipeline_index);
        if result.is_err() {
            // Drain whatever the failed merge left queued, and drop a
            // readback it never redeemed.
            let _ = self.device.finish_queue();
            if let Some(readback) = self.pending_read.take() {
                let _ = self.device.take_readback(readback);
            }
        }
        result
    }

    fn run(&mut self, film: &mut Film, pipeline_index: usize) -> LumenResult<()> {
        let output = self.buffers.image_pipeline();
        let range = self.kernels.range();

        let pipeline = film.image_pipeline(pipeline_index).ok_or_else(|| {
            LumenError::InvalidArgument(format!(
                "film has no image pipeline channel {pipeline_index}"
            ))
        })?;
        self.device.enqueue_write_buffer(output, pipeline.as_bytes())?;

        self.kernels
            .initialize()
            .dispatch(&mut *self.device, ScaleArgs::UNIT, range)?;

        let scales = film.pipeline_scale(pipeline_index);

        if film.has_channel(ChannelKind::RadiancePerPixelNormalized) {
            let kernel = accumulate_kernel(
                self.kernels.accumulate_per_pixel(),
                ChannelKind::RadiancePerPixelNormalized,
            )?;
            let scratch = self.scratch()?;
            let channels = film.radiance_per_pixel_normalized_channels();
            for (group, channel) in channels.iter().enumerate() {
                let entry = scales.group(group);
                if !entry.enabled {
                    continue;
                }
                self.device.enqueue_write_buffer(scratch, channel.as_bytes())?;
                kernel.dispatch(&mut *self.device, ScaleArgs::new(entry.scale()), range)?;
            }
        }

        if film.has_channel(ChannelKind::RadiancePerScreenNormalized) {
            let kernel = accumulate_kernel(
                self.kernels.accumulate_per_screen(),
                ChannelKind::RadiancePerScreenNormalized,
            )?;
            let scratch = self.scratch()?;
            let factor = per_screen_factor(
                film.pixel_count(),
                film.sample_counts.per_screen_normalized(),
            );
            let channels = film.radiance_per_screen_normalized_channels();
            for (group, channel) in channels.iter().enumerate() {
                let entry = scales.group(group);
                if !entry.enabled {
                    continue;
                }
                self.device.enqueue_write_buffer(scratch, channel.as_bytes())?;
                let args = ScaleArgs::new(entry.scale()).scaled(factor);
                kernel.dispatch(&mut *self.device, args, range)?;
            }
        }

        self.kernels
            .finalize()
            .dispatch(&mut *self.device, ScaleArgs::UNIT, range)?;

        let size = self.buffers.image_pipeline_size();
        let readback = self.device.enqueue_read_buffer(output, size)?;
        self.pending_read = Some(readback);
        self.device.finish_queue()?;
        self.pending_read = None;
        let bytes = self.device.take_readback(readback)?;

        let pipeline = film.image_pipeline_mut(pipeline_index).ok_or_else(|| {
            LumenError::InvalidArgument(format!(
                "film has no image pipeline channel {pipeline_index}"
            ))
        })?;
        let target = pipeline.as_bytes_mut();
        if bytes.len() != target.len() {
            return Err(LumenError::Readback(format!(
                "read {} bytes into a {} byte channel",
                bytes.len(),
                target.len()
            )));
        }
        target.copy_from_slice(&bytes);
        Ok(())
    }

    fn scratch(&self) -> LumenResult<BufferId> {
        self.buffers.scratch().ok_or_else(|| {
            LumenError::InvalidArgument(
                "film has radiance channels but no merge buffer".to_string(),
            )
        })
    }
}

fn accumulate_kernel(
    kernel: Option<&MergeKernel>,
    kind: ChannelKind,
) -> LumenResult<&MergeKernel> {
    kernel.ok_or_else(|| {
        LumenError::InvalidArgument(format!("no merge kernel was created for {kind}"))
    })
}
