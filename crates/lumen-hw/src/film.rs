//! Film facing entry point of the hardware merge.
//!
//! [`FilmHardware`] is either active, owning a running context with the
//! film's device buffers and merge kernels, or inert. Inert covers a
//! disabled config and a machine without a usable device; every operation
//! on an inert instance does nothing and reports so.

use lumen_core::{Film, HardwareConfig, LumenError, LumenResult};

use crate::buffers::DeviceBuffers;
use crate::context::ComputeContext;
use crate::device::{format_memory, DeviceDescription, DeviceType, HardwareDevice};
use crate::kernels::{KernelPipeline, KernelSource};
use crate::merge::MergeEngine;
use crate::select::{filter_hardware, select_device};

struct HardwareState {
    width: u32,
    height: u32,
    kernels: Option<KernelPipeline>,
    buffers: Option<DeviceBuffers>,
    context: ComputeContext,
}

impl HardwareState {
    fn parts(&mut self) -> LumenResult<(&mut dyn HardwareDevice, &DeviceBuffers, &KernelPipeline)> {
        match (self.context.device_mut(), self.buffers.as_ref(), self.kernels.as_ref()) {
            (Some(device), Some(buffers), Some(kernels)) => Ok((device, buffers, kernels)),
            _ => Err(LumenError::Device(
                "hardware merge is not fully set up".to_string(),
            )),
        }
    }

    fn check_film(&self, film: &Film) -> LumenResult<()> {
        if film.width() != self.width || film.height() != self.height {
            return Err(LumenError::InvalidArgument(format!(
                "film is {}x{}, hardware buffers were built for {}x{}",
                film.width(),
                film.height(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

impl Drop for HardwareState {
    fn drop(&mut self) {
        if let Some(device) = self.context.device_mut() {
            tracing::info!(
                "[{}] Memory used for hardware image pipeline: {}",
                device.name(),
                format_memory(device.used_memory())
            );
            if let Some(kernels) = self.kernels.take() {
                kernels.release(device);
            }
            if let Some(buffers) = self.buffers.take() {
                buffers.release(device);
            }
        }
        // The context drops next: device first, then the workload.
    }
}

pub struct FilmHardware {
    state: Option<HardwareState>,
}

impl FilmHardware {
    /// A hardware merge that does nothing.
    pub fn inert() -> Self {
        Self { state: None }
    }

    /// Select a device per `config` and set the merge up for `film`.
    ///
    /// Returns an inert instance when hardware is disabled or no device
    /// qualifies. Errors come from setup on the selected device.
    pub fn start(config: &HardwareConfig, film: &Film, source: &KernelSource) -> LumenResult<Self> {
        if !config.enable {
            tracing::debug!("Film hardware image pipeline disabled");
            return Ok(Self::inert());
        }

        let mut context = ComputeContext::new();
        let descriptions = filter_hardware(context.available_device_descriptions());
        match select_device(&descriptions, config.device_index, config.enable) {
            Some(description) => Self::start_on(context, &description, film, source),
            None => {
                tracing::info!("No hardware device available, film hardware merge disabled");
                Ok(Self::inert())
            }
        }
    }

    /// Set the merge up on a specific device, bypassing selection.
    pub fn with_device(
        description: &DeviceDescription,
        film: &Film,
        source: &KernelSource,
    ) -> LumenResult<Self> {
        Self::start_on(ComputeContext::new(), description, film, source)
    }

    fn start_on(
        mut context: ComputeContext,
        description: &DeviceDescription,
        film: &Film,
        source: &KernelSource,
    ) -> LumenResult<Self> {
        tracing::info!("Film hardware image pipeline");
        context.start(description)?;
        Self::set_up(context, film, source)
    }

    /// Allocate buffers and compile kernels on the running `context`.
    fn set_up(context: ComputeContext, film: &Film, source: &KernelSource) -> LumenResult<Self> {
        // From here on a failure drops `state`, which tears down whatever
        // was set up so far.
        let mut state = HardwareState {
            width: film.width(),
            height: film.height(),
            kernels: None,
            buffers: None,
            context,
        };
        let verbosity = state.context.verbosity().clone();
        let device = state
            .context
            .device_mut()
            .ok_or_else(|| LumenError::Device("context started without a device".to_string()))?;

        let buffers = DeviceBuffers::allocate(&mut *device, &verbosity, film)?;
        let buffers = state.buffers.insert(buffers);
        let kernels = KernelPipeline::compile(
            device,
            &verbosity,
            buffers,
            film.width(),
            film.height(),
            source,
        )?;
        state.kernels = Some(kernels);

        Ok(Self { state: Some(state) })
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.state
            .as_ref()
            .and_then(|s| s.context.device())
            .map(|d| d.name())
    }

    pub fn device_type(&self) -> Option<DeviceType> {
        self.state
            .as_ref()
            .and_then(|s| s.context.device())
            .map(|d| d.device_type())
    }

    /// Device memory held by the merge, 0 when inert.
    pub fn used_memory(&self) -> usize {
        self.state
            .as_ref()
            .and_then(|s| s.context.device())
            .map_or(0, |d| d.used_memory())
    }

    /// Merge the radiance channels of `film` into its image pipeline channel
    /// `pipeline_index`. Returns false, leaving `film` untouched, when inert.
    pub fn merge(&mut self, film: &mut Film, pipeline_index: usize) -> LumenResult<bool> {
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };
        state.check_film(film)?;
        let (device, buffers, kernels) = state.parts()?;
        MergeEngine::new(device, buffers, kernels).merge(film, pipeline_index)?;
        Ok(true)
    }

    /// Upload the alpha and object id channels, waiting for completion.
    pub fn write_all_buffers(&mut self, film: &Film) -> LumenResult<bool> {
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };
        state.check_film(film)?;
        let (device, buffers, _) = state.parts()?;
        buffers.write_auxiliary(&mut *device, film)?;
        device.finish_queue()?;
        Ok(true)
    }

    /// Upload one image pipeline channel to the device, waiting for completion.
    pub fn write_image_pipeline(
        &mut self,
        film: &Film,
        pipeline_index: usize,
    ) -> LumenResult<bool> {
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };
        state.check_film(film)?;
        let (device, buffers, _) = state.parts()?;
        let channel = film.image_pipeline(pipeline_index).ok_or_else(|| {
            LumenError::InvalidArgument(format!(
                "film has no image pipeline channel {pipeline_index}"
            ))
        })?;
        device.enqueue_write_buffer(buffers.image_pipeline(), channel.as_bytes())?;
        device.finish_queue()?;
        Ok(true)
    }

    /// Read the device image pipeline buffer into channel `pipeline_index`.
    pub fn read_image_pipeline(
        &mut self,
        film: &mut Film,
        pipeline_index: usize,
    ) -> LumenResult<bool> {
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };
        state.check_film(film)?;
        let (device, buffers, _) = state.parts()?;
        let channel = film.image_pipeline_mut(pipeline_index).ok_or_else(|| {
            LumenError::InvalidArgument(format!(
                "film has no image pipeline channel {pipeline_index}"
            ))
        })?;
        let readback =
            device.enqueue_read_buffer(buffers.image_pipeline(), buffers.image_pipeline_size())?;
        device.finish_queue()?;
        let bytes = device.take_readback(readback)?;
        let target = channel.as_bytes_mut();
        if bytes.len() != target.len() {
            return Err(LumenError::Readback(format!(
                "read {} bytes into a {} byte channel",
                bytes.len(),
                target.len()
            )));
        }
        target.copy_from_slice(&bytes);
        Ok(true)
    }

    /// Tear down: kernels, buffers, device, workload, in that order.
    pub fn stop(self) {
        drop(self.state);
    }
}

impl std::fmt::Debug for FilmHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilmHardware")
            .field("active", &self.is_active())
            .field("device", &self.device_name())
            .finish()
    }
}
