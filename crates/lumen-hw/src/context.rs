//! Execution context owning the selected device.
//!
//! The context starts quiet: device level chatter goes to `debug`. Setup
//! phases that should be visible (buffer allocation, kernel compilation)
//! raise the verbosity with [`Verbosity::raise`] and get it back when the
//! returned guard goes out of scope.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lumen_core::{LumenError, LumenResult};

use crate::device::{CapabilityVersion, DeviceBackend, DeviceDescription, HardwareDevice};
use crate::gpu::{self, WgpuDevice};
use crate::reference::{self, ReferenceDevice};

/// Shared verbosity flag of a context and its device.
#[derive(Debug, Clone, Default)]
pub struct Verbosity(Arc<AtomicBool>);

impl Verbosity {
    pub fn new(verbose: bool) -> Self {
        Self(Arc::new(AtomicBool::new(verbose)))
    }

    pub fn is_verbose(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, verbose: bool) {
        self.0.store(verbose, Ordering::Relaxed);
    }

    /// Make the context verbose until the guard is dropped.
    pub fn raise(&self) -> VerbosityGuard {
        let previous = self.0.swap(true, Ordering::Relaxed);
        VerbosityGuard {
            verbosity: self.clone(),
            previous,
        }
    }
}

/// Restores the previous verbosity on drop, also on early error returns.
#[must_use = "verbosity is restored as soon as the guard is dropped"]
pub struct VerbosityGuard {
    verbosity: Verbosity,
    previous: bool,
}

impl Drop for VerbosityGuard {
    fn drop(&mut self) {
        self.verbosity.set(self.previous);
    }
}

/// Scene workload attached to the context.
///
/// The merge does not trace rays, so the workload is always empty; the
/// context still needs one attached before it can run.
#[derive(Debug, Default)]
pub struct Workload {
    preprocessed: bool,
}

impl Workload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn preprocess(&mut self) {
        self.preprocessed = true;
    }

    pub fn is_preprocessed(&self) -> bool {
        self.preprocessed
    }
}

pub struct ComputeContext {
    verbosity: Verbosity,
    // Field order is drop order: the device goes before the workload, and
    // both before the instance that created the device.
    device: Option<Box<dyn HardwareDevice>>,
    workload: Option<Workload>,
    running: bool,
    instance: Option<wgpu::Instance>,
}

impl ComputeContext {
    /// Create an idle, low verbosity context.
    pub fn new() -> Self {
        Self {
            verbosity: Verbosity::new(false),
            device: None,
            workload: None,
            running: false,
            instance: None,
        }
    }

    pub fn verbosity(&self) -> &Verbosity {
        &self.verbosity
    }

    fn instance(&mut self) -> &wgpu::Instance {
        self.instance.get_or_insert_with(gpu::create_instance)
    }

    /// Every device this context can instantiate: the wgpu adapters first,
    /// in enumeration order, then the host emulation.
    pub fn available_device_descriptions(&mut self) -> Vec<DeviceDescription> {
        let mut descriptions = gpu::describe_adapters(self.instance());
        descriptions.push(reference::description());
        descriptions
    }

    /// Instantiate the device described by `description`.
    pub fn add_device(&mut self, description: &DeviceDescription) -> LumenResult<()> {
        if self.device.is_some() {
            return Err(LumenError::Device(
                "context already owns a device".to_string(),
            ));
        }
        let verbosity = self.verbosity.clone();
        let device: Box<dyn HardwareDevice> = match &description.backend {
            DeviceBackend::Wgpu { adapter_index, .. } => {
                let index = *adapter_index;
                Box::new(WgpuDevice::open(self.instance(), index, verbosity)?)
            }
            DeviceBackend::Reference => Box::new(ReferenceDevice::new(verbosity)),
        };
        self.attach_device(device)
    }

    /// Take ownership of an already instantiated device.
    pub(crate) fn attach_device(&mut self, device: Box<dyn HardwareDevice>) -> LumenResult<()> {
        if self.device.is_some() {
            return Err(LumenError::Device(
                "context already owns a device".to_string(),
            ));
        }
        self.device = Some(device);
        Ok(())
    }

    pub fn set_workload(&mut self, workload: Workload) {
        self.workload = Some(workload);
    }

    /// Mark the context running. Needs a device and a workload.
    pub fn run(&mut self) -> LumenResult<()> {
        if self.device.is_none() {
            return Err(LumenError::Device("no device added to context".to_string()));
        }
        match self.workload.as_mut() {
            Some(workload) => workload.preprocess(),
            None => {
                return Err(LumenError::Device(
                    "no workload attached to context".to_string(),
                ))
            }
        }
        self.running = true;
        Ok(())
    }

    /// Instantiate `description`, check its capability, attach an empty
    /// workload and run.
    pub fn start(&mut self, description: &DeviceDescription) -> LumenResult<()> {
        self.add_device(description)?;
        tracing::info!("  Device capability version: {}", description.capability);
        if description.capability < CapabilityVersion::MINIMUM {
            tracing::warn!(
                "WARNING: device {} has compute capability {}, below the supported minimum {}",
                description.name,
                description.capability,
                CapabilityVersion::MINIMUM
            );
        }
        self.set_workload(Workload::empty());
        self.run()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn workload(&self) -> Option<&Workload> {
        self.workload.as_ref()
    }

    pub fn device(&self) -> Option<&dyn HardwareDevice> {
        self.device.as_deref()
    }

    pub fn device_mut(&mut self) -> Option<&mut dyn HardwareDevice> {
        match &mut self.device {
            Some(device) => Some(device.as_mut()),
            None => None,
        }
    }
}

impl Default for ComputeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ComputeContext {
    fn drop(&mut self) {
        if self.running {
            tracing::debug!("Stopping compute context");
        }
        self.running = false;
    }
}
