//! # lumen-hw
//!
//! Hardware accelerated merge of the film sample buffers.
//!
//! Setup runs once per film: pick a device ([`select`]), start a
//! [`ComputeContext`] on it, allocate the device mirrors ([`buffers`]) and
//! compile the four merge kernels ([`kernels`]). After that every frame calls
//! [`FilmHardware::merge`] once per image pipeline. Without a usable device
//! the whole subsystem is inert and `merge` reports that nothing happened.

pub mod buffers;
pub mod context;
pub mod device;
pub mod film;
pub mod gpu;
pub mod kernels;
pub mod merge;
pub mod reference;
pub mod select;
#[cfg(test)]
mod testing;

pub use buffers::DeviceBuffers;
pub use context::{ComputeContext, Verbosity, VerbosityGuard, Workload};
pub use device::{
    BufferAccess, BufferId, CapabilityVersion, DeviceBackend, DeviceDescription, DeviceType,
    DispatchRange, HardwareDevice, KernelBindings, ScaleArgs,
};
pub use film::FilmHardware;
pub use kernels::{KernelPipeline, KernelSource, MergeStage};
pub use merge::MergeEngine;
pub use select::{filter_hardware, select_device};
