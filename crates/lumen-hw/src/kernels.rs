//! The merge program and its four kernels.

use std::borrow::Cow;
use std::time::Instant;

use lumen_core::{LumenError, LumenResult};

use crate::buffers::DeviceBuffers;
use crate::context::Verbosity;
use crate::device::{
    DispatchRange, HardwareDevice, KernelBindings, KernelId, ProgramDefine, ProgramId, ScaleArgs,
};

/// Work items per group for every merge dispatch.
pub const MERGE_WORKGROUP_SIZE: u32 = 256;

pub const MERGE_PROGRAM_NAME: &str = "MergeSampleBuffers";

const MERGE_PROGRAM_SOURCE: &str = include_str!("../kernels/merge_sample_buffers.wgsl");

/// The four stages of one merge, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeStage {
    Initialize,
    AccumulatePerPixelNormalized,
    AccumulatePerScreenNormalized,
    Finalize,
}

impl MergeStage {
    pub const ALL: [MergeStage; 4] = [
        MergeStage::Initialize,
        MergeStage::AccumulatePerPixelNormalized,
        MergeStage::AccumulatePerScreenNormalized,
        MergeStage::Finalize,
    ];

    pub fn entry_point(&self) -> &'static str {
        match self {
            MergeStage::Initialize => "Film_MergeBufferInitialize",
            MergeStage::AccumulatePerPixelNormalized => "Film_MergeRADIANCE_PER_PIXEL_NORMALIZED",
            MergeStage::AccumulatePerScreenNormalized => "Film_MergeRADIANCE_PER_SCREEN_NORMALIZED",
            MergeStage::Finalize => "Film_MergeBufferFinalize",
        }
    }

    pub fn from_entry_point(entry_point: &str) -> Option<MergeStage> {
        MergeStage::ALL
            .into_iter()
            .find(|stage| stage.entry_point() == entry_point)
    }

    /// Whether the stage reads the merge scratch buffer.
    pub fn reads_scratch(&self) -> bool {
        matches!(
            self,
            MergeStage::AccumulatePerPixelNormalized | MergeStage::AccumulatePerScreenNormalized
        )
    }
}

/// Source text of the merge program.
#[derive(Debug, Clone)]
pub struct KernelSource {
    pub name: String,
    pub text: Cow<'static, str>,
}

impl KernelSource {
    pub fn new(name: impl Into<String>, text: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// The merge program shipped with the crate.
    pub fn builtin() -> Self {
        Self::new(MERGE_PROGRAM_NAME, MERGE_PROGRAM_SOURCE)
    }
}

impl Default for KernelSource {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Constants every merge program is compiled with.
pub fn merge_defines() -> [ProgramDefine; 2] {
    [
        ProgramDefine::Flag("LUMEN_KERNEL"),
        ProgramDefine::U32("MERGE_WORKGROUP_SIZE", MERGE_WORKGROUP_SIZE),
    ]
}

/// A created kernel together with the stage it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeKernel {
    id: KernelId,
    stage: MergeStage,
}

impl MergeKernel {
    pub fn id(&self) -> KernelId {
        self.id
    }

    pub fn stage(&self) -> MergeStage {
        self.stage
    }

    pub fn dispatch(
        &self,
        device: &mut dyn HardwareDevice,
        args: ScaleArgs,
        range: DispatchRange,
    ) -> LumenResult<()> {
        device.enqueue_kernel(self.id, args, range)
    }
}

/// Compiled merge kernels with their arguments bound.
///
/// The accumulate kernels only exist when the film has radiance channels,
/// since they have no scratch buffer to bind otherwise.
#[derive(Debug)]
pub struct KernelPipeline {
    initialize: MergeKernel,
    accumulate_per_pixel: Option<MergeKernel>,
    accumulate_per_screen: Option<MergeKernel>,
    finalize: MergeKernel,
    range: DispatchRange,
}

impl KernelPipeline {
    /// Compile `source` and create the merge kernels bound to `buffers`.
    ///
    /// On failure nothing created here is left on the device.
    pub fn compile(
        device: &mut dyn HardwareDevice,
        verbosity: &Verbosity,
        buffers: &DeviceBuffers,
        width: u32,
        height: u32,
        source: &KernelSource,
    ) -> LumenResult<Self> {
        let _verbose = verbosity.raise();
        let start = Instant::now();

        tracing::info!("[{}] Compiling kernels", source.name);
        let program = device.compile_program(&source.name, &source.text, &merge_defines())?;

        let mut created = Vec::with_capacity(MergeStage::ALL.len());
        let result = Self::create_kernels(
            device,
            program,
            buffers,
            width,
            height,
            &source.name,
            &mut created,
        );
        device.release_program(program);
        let pipeline = match result {
            Ok(pipeline) => pipeline,
            Err(err) => {
                for kernel in created {
                    device.release_kernel(kernel.id);
                }
                return Err(err);
            }
        };

        tracing::info!(
            "[{}] Kernels compilation time: {}ms",
            source.name,
            start.elapsed().as_millis()
        );
        Ok(pipeline)
    }

    fn create_kernels(
        device: &mut dyn HardwareDevice,
        program: ProgramId,
        buffers: &DeviceBuffers,
        width: u32,
        height: u32,
        program_name: &str,
        created: &mut Vec<MergeKernel>,
    ) -> LumenResult<Self> {
        let mut create = |device: &mut dyn HardwareDevice,
                          stage: MergeStage|
         -> LumenResult<Option<MergeKernel>> {
            let mut bound = vec![buffers.image_pipeline()];
            if stage.reads_scratch() {
                match buffers.scratch() {
                    Some(scratch) => bound.push(scratch),
                    None => return Ok(None),
                }
            }
            tracing::info!("[{}] Compiling {} Kernel", program_name, stage.entry_point());
            let bindings = KernelBindings {
                width,
                height,
                buffers: bound,
            };
            let id = device.create_kernel(program, stage.entry_point(), &bindings)?;
            let kernel = MergeKernel { id, stage };
            created.push(kernel);
            Ok(Some(kernel))
        };

        let initialize = create(device, MergeStage::Initialize)?;
        let accumulate_per_pixel = create(device, MergeStage::AccumulatePerPixelNormalized)?;
        let accumulate_per_screen = create(device, MergeStage::AccumulatePerScreenNormalized)?;
        let finalize = create(device, MergeStage::Finalize)?;

        match (initialize, finalize) {
            (Some(initialize), Some(finalize)) => Ok(Self {
                initialize,
                accumulate_per_pixel,
                accumulate_per_screen,
                finalize,
                range: DispatchRange::covering(
                    (width as usize) * (height as usize),
                    MERGE_WORKGROUP_SIZE,
                ),
            }),
            _ => Err(LumenError::compile(
                program_name,
                "initialize and finalize kernels were not created",
            )),
        }
    }

    pub fn initialize(&self) -> &MergeKernel {
        &self.initialize
    }

    pub fn accumulate_per_pixel(&self) -> Option<&MergeKernel> {
        self.accumulate_per_pixel.as_ref()
    }

    pub fn accumulate_per_screen(&self) -> Option<&MergeKernel> {
        self.accumulate_per_screen.as_ref()
    }

    pub fn finalize(&self) -> &MergeKernel {
        &self.finalize
    }

    /// Dispatch range shared by every merge kernel.
    pub fn range(&self) -> DispatchRange {
        self.range
    }

    /// Release every kernel, in stage order.
    pub fn release(self, device: &mut dyn HardwareDevice) {
        let kernels = [
            Some(self.initialize),
            self.accumulate_per_pixel,
            self.accumulate_per_screen,
            Some(self.finalize),
        ];
        for kernel in kernels.into_iter().flatten() {
            device.release_kernel(kernel.id);
        }
    }
}
