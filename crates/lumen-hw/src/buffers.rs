//! Device mirrors of the film channels.
//!
//! The image pipeline buffer is the merge output and is read-write. Alpha
//! and object id are mirrored read-only when the film has them. All radiance
//! channels share one read-only scratch buffer sized for the larger of the
//! two radiance layouts; each light group is copied into it right before the
//! kernel that consumes it.

use lumen_core::{ChannelKind, Film, LumenError, LumenResult};

use crate::context::Verbosity;
use crate::device::{BufferAccess, BufferId, HardwareDevice};

const SCRATCH_LABEL: &str = "Merge";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBuffers {
    image_pipeline: BufferId,
    image_pipeline_size: usize,
    alpha: Option<BufferId>,
    object_id: Option<BufferId>,
    scratch: Option<BufferId>,
    scratch_size: usize,
}

impl DeviceBuffers {
    /// Allocate every buffer the merge needs for `film`.
    ///
    /// If any allocation fails the buffers already allocated are freed before
    /// the error is returned.
    pub fn allocate(
        device: &mut dyn HardwareDevice,
        verbosity: &Verbosity,
        film: &Film,
    ) -> LumenResult<Self> {
        let _verbose = verbosity.raise();

        let image_pipeline_size = film.channel_size(ChannelKind::ImagePipeline);
        if image_pipeline_size == 0 {
            return Err(LumenError::InvalidArgument(
                "film has no image pipeline channel".to_string(),
            ));
        }
        let image_pipeline = device.alloc_buffer(
            BufferAccess::ReadWrite,
            image_pipeline_size,
            ChannelKind::ImagePipeline.label(),
        )?;

        let mut buffers = DeviceBuffers {
            image_pipeline,
            image_pipeline_size,
            alpha: None,
            object_id: None,
            scratch: None,
            scratch_size: 0,
        };
        match buffers.allocate_optional(device, film) {
            Ok(()) => Ok(buffers),
            Err(err) => {
                buffers.release(device);
                Err(err)
            }
        }
    }

    fn allocate_optional(
        &mut self,
        device: &mut dyn HardwareDevice,
        film: &Film,
    ) -> LumenResult<()> {
        if film.has_channel(ChannelKind::Alpha) {
            self.alpha = Some(device.alloc_buffer(
                BufferAccess::ReadOnly,
                film.channel_size(ChannelKind::Alpha),
                ChannelKind::Alpha.label(),
            )?);
        }
        if film.has_channel(ChannelKind::ObjectId) {
            self.object_id = Some(device.alloc_buffer(
                BufferAccess::ReadOnly,
                film.channel_size(ChannelKind::ObjectId),
                ChannelKind::ObjectId.label(),
            )?);
        }

        let scratch_size = scratch_size(film);
        if scratch_size > 0 {
            self.scratch = Some(device.alloc_buffer(
                BufferAccess::ReadOnly,
                scratch_size,
                SCRATCH_LABEL,
            )?);
            self.scratch_size = scratch_size;
        }
        Ok(())
    }

    pub fn image_pipeline(&self) -> BufferId {
        self.image_pipeline
    }

    pub fn image_pipeline_size(&self) -> usize {
        self.image_pipeline_size
    }

    pub fn alpha(&self) -> Option<BufferId> {
        self.alpha
    }

    pub fn object_id(&self) -> Option<BufferId> {
        self.object_id
    }

    pub fn scratch(&self) -> Option<BufferId> {
        self.scratch
    }

    pub fn scratch_size(&self) -> usize {
        self.scratch_size
    }

    /// Upload the auxiliary channels (alpha, object id) the film carries.
    pub fn write_auxiliary(&self, device: &mut dyn HardwareDevice, film: &Film) -> LumenResult<()> {
        if let (Some(buffer), Some(channel)) = (self.alpha, film.alpha()) {
            device.enqueue_write_buffer(buffer, channel.as_bytes())?;
        }
        if let (Some(buffer), Some(channel)) = (self.object_id, film.object_id()) {
            device.enqueue_write_buffer(buffer, channel.as_bytes())?;
        }
        Ok(())
    }

    /// Free every buffer, scratch first.
    pub fn release(self, device: &mut dyn HardwareDevice) {
        let buffers = [self.scratch, self.object_id, self.alpha, Some(self.image_pipeline)];
        for buffer in buffers.into_iter().flatten() {
            device.free_buffer(buffer);
        }
    }
}

/// Size of the shared radiance scratch buffer, 0 when there is no radiance.
pub fn scratch_size(film: &Film) -> usize {
    film.channel_size(ChannelKind::RadiancePerPixelNormalized)
        .max(film.channel_size(ChannelKind::RadiancePerScreenNormalized))
}
