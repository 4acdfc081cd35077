//! The device abstraction the merge runs on.
//!
//! A [`HardwareDevice`] owns buffers, programs and kernels, identified by
//! opaque handles, plus one in-order command queue. Writes, dispatches and
//! reads are enqueued and take effect in enqueue order; [`finish_queue`]
//! blocks until everything enqueued so far has completed, after which the
//! bytes of every enqueued read can be collected with [`take_readback`].
//!
//! [`finish_queue`]: HardwareDevice::finish_queue
//! [`take_readback`]: HardwareDevice::take_readback

use lumen_core::LumenResult;
use serde::Serialize;

/// Device classes, in the order the automatic selection cares about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceType {
    /// Dedicated GPU. Preferred class: the first one found wins.
    DiscreteGpu,
    /// GPU sharing memory with the host. Fallback class.
    IntegratedGpu,
    /// Virtualized GPU. Treated like an integrated GPU.
    VirtualGpu,
    /// Hardware of unknown kind. Only used when picked explicitly.
    OtherHardware,
    /// Software rasterizer exposed through a GPU API. Never used.
    SoftwareCpu,
    /// Host emulation of the device, not hardware.
    Native,
}

impl DeviceType {
    /// Whether devices of this class take part in hardware selection.
    pub fn is_hardware(&self) -> bool {
        matches!(
            self,
            DeviceType::DiscreteGpu
                | DeviceType::IntegratedGpu
                | DeviceType::VirtualGpu
                | DeviceType::OtherHardware
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::DiscreteGpu => "DISCRETE_GPU",
            DeviceType::IntegratedGpu => "INTEGRATED_GPU",
            DeviceType::VirtualGpu => "VIRTUAL_GPU",
            DeviceType::OtherHardware => "OTHER_HARDWARE",
            DeviceType::SoftwareCpu => "SOFTWARE_CPU",
            DeviceType::Native => "NATIVE",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute capability reported by a device, compared against
/// [`CapabilityVersion::MINIMUM`] when the device is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CapabilityVersion {
    pub major: u32,
    pub minor: u32,
}

impl CapabilityVersion {
    /// Below this the merge may still work, but it is not supported.
    pub const MINIMUM: CapabilityVersion = CapabilityVersion::new(5, 0);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for CapabilityVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Which implementation instantiates a described device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceBackend {
    /// A wgpu adapter, by enumeration index.
    Wgpu { adapter_index: usize, api: String },
    /// The host emulation in [`crate::reference`].
    Reference,
}

/// What enumeration knows about a device before it is instantiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescription {
    pub name: String,
    pub device_type: DeviceType,
    pub capability: CapabilityVersion,
    pub backend: DeviceBackend,
}

/// Access a kernel has to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferAccess {
    ReadOnly,
    ReadWrite,
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

handle!(
    /// A device buffer.
    BufferId,
    "buffer"
);
handle!(
    /// A compiled program. Only needed until its kernels are created.
    ProgramId,
    "program"
);
handle!(
    /// A kernel: one program entry point with its buffers bound.
    KernelId,
    "kernel"
);
handle!(
    /// An enqueued read, redeemed after the queue drains.
    ReadbackId,
    "readback"
);

/// Monotonic handle allocator shared by both device implementations.
#[derive(Debug, Default)]
pub(crate) struct HandleCounter(u32);

impl HandleCounter {
    pub(crate) fn next(&mut self) -> u32 {
        self.0 += 1;
        self.0
    }
}

/// Arguments bound to a kernel once, when it is created.
///
/// `buffers` are bound in order; the first is the merge output, the second
/// (if any) the merge scratch buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelBindings {
    pub width: u32,
    pub height: u32,
    pub buffers: Vec<BufferId>,
}

/// Per-dispatch RGB scale. Ignored by kernels that do not scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleArgs {
    pub rgb: [f32; 3],
}

impl ScaleArgs {
    pub const UNIT: ScaleArgs = ScaleArgs { rgb: [1.0, 1.0, 1.0] };

    pub fn new(rgb: [f32; 3]) -> Self {
        Self { rgb }
    }

    /// Multiply every component by `factor`.
    pub fn scaled(self, factor: f32) -> Self {
        Self {
            rgb: [self.rgb[0] * factor, self.rgb[1] * factor, self.rgb[2] * factor],
        }
    }
}

/// A one-dimensional dispatch: `global` work items in groups of `local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRange {
    pub global: u32,
    pub local: u32,
}

impl DispatchRange {
    /// Smallest range with a `local` sized group count covering `count` items.
    pub fn covering(count: usize, local: u32) -> Self {
        let local = local.max(1);
        let groups = count.div_ceil(local as usize) as u32;
        Self {
            global: groups * local,
            local,
        }
    }

    pub fn work_groups(&self) -> u32 {
        self.global / self.local.max(1)
    }
}

/// A compile time constant made visible to a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramDefine {
    Flag(&'static str),
    U32(&'static str, u32),
}

impl ProgramDefine {
    pub fn name(&self) -> &'static str {
        match self {
            ProgramDefine::Flag(name) | ProgramDefine::U32(name, _) => *name,
        }
    }

    /// WGSL declaration prepended to the program source.
    pub fn to_wgsl(&self) -> String {
        match self {
            ProgramDefine::Flag(name) => format!("const {name}: bool = true;"),
            ProgramDefine::U32(name, value) => format!("const {name}: u32 = {value}u;"),
        }
    }
}

/// Program source with `defines` prepended, one declaration per line.
pub fn with_defines(source: &str, defines: &[ProgramDefine]) -> String {
    let mut text = String::with_capacity(source.len() + defines.len() * 48);
    for define in defines {
        text.push_str(&define.to_wgsl());
        text.push('\n');
    }
    text.push_str(source);
    text
}

/// Human readable memory size: bytes below 10000, whole Kbytes from there.
pub fn format_memory(bytes: usize) -> String {
    if bytes < 10000 {
        format!("{bytes} bytes")
    } else {
        format!("{} Kbytes", bytes / 1024)
    }
}

/// One compute device with an in-order queue.
///
/// Every `enqueue_*` call returns as soon as the command is queued. Errors
/// returned from them cover invalid handles or arguments; failures while
/// executing surface from [`HardwareDevice::finish_queue`].
pub trait HardwareDevice: Send {
    fn name(&self) -> &str;

    fn device_type(&self) -> DeviceType;

    /// Bytes currently allocated on the device by this context.
    fn used_memory(&self) -> usize;

    fn alloc_buffer(&mut self, access: BufferAccess, size: usize, label: &str)
        -> LumenResult<BufferId>;

    fn free_buffer(&mut self, buffer: BufferId);

    fn compile_program(
        &mut self,
        name: &str,
        source: &str,
        defines: &[ProgramDefine],
    ) -> LumenResult<ProgramId>;

    fn release_program(&mut self, program: ProgramId);

    fn create_kernel(
        &mut self,
        program: ProgramId,
        entry_point: &str,
        bindings: &KernelBindings,
    ) -> LumenResult<KernelId>;

    fn release_kernel(&mut self, kernel: KernelId);

    /// Queue a copy of `data` into the start of `buffer`. The bytes are
    /// captured at enqueue time.
    fn enqueue_write_buffer(&mut self, buffer: BufferId, data: &[u8]) -> LumenResult<()>;

    fn enqueue_kernel(
        &mut self,
        kernel: KernelId,
        args: ScaleArgs,
        range: DispatchRange,
    ) -> LumenResult<()>;

    /// Queue a read of the first `size` bytes of `buffer`.
    fn enqueue_read_buffer(&mut self, buffer: BufferId, size: usize) -> LumenResult<ReadbackId>;

    /// Block until every queued command has completed.
    fn finish_queue(&mut self) -> LumenResult<()>;

    /// Bytes of a read completed by [`HardwareDevice::finish_queue`].
    fn take_readback(&mut self, readback: ReadbackId) -> LumenResult<Vec<u8>>;
}

/// Log at info when the context is verbose, at debug otherwise.
macro_rules! device_log {
    ($verbosity:expr, $($arg:tt)+) => {
        if $verbosity.is_verbose() {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}
pub(crate) use device_log;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covering_rounds_up_to_local() {
        let range = DispatchRange::covering(1000, 256);
        assert_eq!(range.global, 1024);
        assert_eq!(range.work_groups(), 4);

        let exact = DispatchRange::covering(512, 256);
        assert_eq!(exact.global, 512);

        let single = DispatchRange::covering(1, 256);
        assert_eq!(single.global, 256);
    }

    #[test]
    fn test_hardware_classes() {
        assert!(DeviceType::DiscreteGpu.is_hardware());
        assert!(DeviceType::VirtualGpu.is_hardware());
        assert!(DeviceType::OtherHardware.is_hardware());
        assert!(!DeviceType::SoftwareCpu.is_hardware());
        assert!(!DeviceType::Native.is_hardware());
    }

    #[test]
    fn test_capability_ordering() {
        assert!(CapabilityVersion::new(4, 0) < CapabilityVersion::MINIMUM);
        assert!(CapabilityVersion::new(5, 0) >= CapabilityVersion::MINIMUM);
        assert_eq!(CapabilityVersion::new(5, 0).to_string(), "5.0");
    }

    #[test]
    fn test_defines_are_prepended() {
        let text = with_defines(
            "fn main() {}",
            &[ProgramDefine::Flag("LUMEN_KERNEL"), ProgramDefine::U32("GROUP", 256)],
        );
        assert_eq!(
            text,
            "const LUMEN_KERNEL: bool = true;\nconst GROUP: u32 = 256u;\nfn main() {}"
        );
    }

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory(4096), "4096 bytes");
        assert_eq!(format_memory(3 * 1024 * 1024), "3072 Kbytes");
    }

    #[test]
    fn test_format_memory_switches_at_ten_thousand() {
        assert_eq!(format_memory(9999), "9999 bytes");
        assert_eq!(format_memory(10000), "9 Kbytes");
        assert_eq!(format_memory(10239), "9 Kbytes");
        assert_eq!(format_memory(10240), "10 Kbytes");
    }

    #[test]
    fn test_scale_args_scaled() {
        assert_eq!(ScaleArgs::new([1.0, 2.0, 4.0]).scaled(0.5).rgb, [0.5, 1.0, 2.0]);
    }
}
