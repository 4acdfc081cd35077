//! Host emulation of a merge device.
//!
//! Buffers live in host memory and the queue is a FIFO of commands that runs
//! when [`HardwareDevice::finish_queue`] is called. Kernels are the merge
//! stages implemented with rayon, with the same arithmetic as the WGSL
//! program, so results can be compared against a GPU run. The device reports
//! [`DeviceType::Native`] and never takes part in hardware selection.

use std::collections::{HashMap, VecDeque};

use lumen_core::{LumenError, LumenResult};
use rayon::prelude::*;

use crate::context::Verbosity;
use crate::device::{
    device_log, format_memory, BufferAccess, BufferId, CapabilityVersion, DeviceBackend,
    DeviceDescription, DeviceType, DispatchRange, HandleCounter, HardwareDevice, KernelBindings,
    KernelId, ProgramDefine, ProgramId, ReadbackId, ScaleArgs,
};
use crate::kernels::MergeStage;

pub const REFERENCE_DEVICE_NAME: &str = "Lumen host reference";

/// Description of the host emulation, as listed by enumeration.
pub fn description() -> DeviceDescription {
    DeviceDescription {
        name: REFERENCE_DEVICE_NAME.to_string(),
        device_type: DeviceType::Native,
        capability: CapabilityVersion::MINIMUM,
        backend: DeviceBackend::Reference,
    }
}

struct HostBuffer {
    label: String,
    access: BufferAccess,
    size: usize,
    words: Vec<f32>,
}

struct HostProgram {
    name: String,
    source: String,
}

struct HostKernel {
    stage: MergeStage,
    bindings: KernelBindings,
}

enum Command {
    Write { buffer: BufferId, bytes: Vec<u8> },
    Dispatch { kernel: KernelId, args: ScaleArgs, range: DispatchRange },
    Read { buffer: BufferId, size: usize, readback: ReadbackId },
}

pub struct ReferenceDevice {
    verbosity: Verbosity,
    handles: HandleCounter,
    buffers: HashMap<BufferId, HostBuffer>,
    programs: HashMap<ProgramId, HostProgram>,
    kernels: HashMap<KernelId, HostKernel>,
    queue: VecDeque<Command>,
    completed_reads: HashMap<ReadbackId, Vec<u8>>,
    used_memory: usize,
    memory_limit: Option<usize>,
}

impl ReferenceDevice {
    pub fn new(verbosity: Verbosity) -> Self {
        device_log!(verbosity, "[{}] Creating host reference device", REFERENCE_DEVICE_NAME);
        Self {
            verbosity,
            handles: HandleCounter::default(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            kernels: HashMap::new(),
            queue: VecDeque::new(),
            completed_reads: HashMap::new(),
            used_memory: 0,
            memory_limit: None,
        }
    }

    /// Cap the total allocation size, to exercise out of memory paths.
    pub fn set_memory_limit(&mut self, limit: Option<usize>) {
        self.memory_limit = limit;
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    /// Commands enqueued and not yet executed.
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Reads completed and not yet taken.
    pub fn completed_readbacks(&self) -> usize {
        self.completed_reads.len()
    }

    pub fn buffer_access(&self, buffer: BufferId) -> Option<BufferAccess> {
        self.buffers.get(&buffer).map(|b| b.access)
    }

    fn buffer(&self, buffer: BufferId) -> LumenResult<&HostBuffer> {
        self.buffers
            .get(&buffer)
            .ok_or_else(|| LumenError::UnknownHandle(buffer.to_string()))
    }

    fn execute(&mut self, command: Command) -> LumenResult<()> {
        match command {
            Command::Write { buffer, bytes } => {
                let target = self
                    .buffers
                    .get_mut(&buffer)
                    .ok_or_else(|| LumenError::UnknownHandle(buffer.to_string()))?;
                let words: &mut [u8] = bytemuck::cast_slice_mut(&mut target.words);
                words[..bytes.len()].copy_from_slice(&bytes);
            }
            Command::Dispatch { kernel, args, range } => self.run_kernel(kernel, args, range)?,
            Command::Read {
                buffer,
                size,
                readback,
            } => {
                let source = self.buffer(buffer)?;
                let bytes: &[u8] = bytemuck::cast_slice(&source.words);
                self.completed_reads.insert(readback, bytes[..size].to_vec());
            }
        }
        Ok(())
    }

    fn run_kernel(
        &mut self,
        kernel: KernelId,
        args: ScaleArgs,
        range: DispatchRange,
    ) -> LumenResult<()> {
        let HostKernel { stage, bindings } = self
            .kernels
            .get(&kernel)
            .ok_or_else(|| LumenError::UnknownHandle(kernel.to_string()))?;
        let stage = *stage;
        let pixel_count = (bindings.width as usize) * (bindings.height as usize);
        let active = (range.global as usize).min(pixel_count);
        let output_id = bindings.buffers[0];
        let scratch_id = bindings.buffers.get(1).copied();

        // Take the output out of the map so the scratch can be borrowed
        // alongside it.
        let mut output = self
            .buffers
            .remove(&output_id)
            .ok_or_else(|| LumenError::UnknownHandle(output_id.to_string()))?;
        let result = match scratch_id {
            Some(id) => match self.buffers.get(&id) {
                Some(scratch) => run_stage(stage, &mut output.words, &scratch.words, active, args),
                None => Err(LumenError::UnknownHandle(id.to_string())),
            },
            None => run_stage(stage, &mut output.words, &[], active, args),
        };
        self.buffers.insert(output_id, output);
        result
    }
}

fn check_len(stage: MergeStage, what: &str, len: usize, needed: usize) -> LumenResult<()> {
    if len < needed {
        return Err(LumenError::Dispatch(format!(
            "{}: {what} holds {len} values, {needed} needed",
            stage.entry_point()
        )));
    }
    Ok(())
}

/// One merge stage over the first `active` pixels.
fn run_stage(
    stage: MergeStage,
    output: &mut [f32],
    scratch: &[f32],
    active: usize,
    args: ScaleArgs,
) -> LumenResult<()> {
    check_len(stage, "output", output.len(), active * 3)?;
    let output = &mut output[..active * 3];
    let [sr, sg, sb] = args.rgb;

    match stage {
        MergeStage::Initialize => output.par_iter_mut().for_each(|v| *v = 0.0),
        MergeStage::AccumulatePerPixelNormalized => {
            check_len(stage, "scratch", scratch.len(), active * 4)?;
            output
                .par_chunks_mut(3)
                .zip(scratch[..active * 4].par_chunks(4))
                .for_each(|(dst, src)| {
                    let weight = src[3];
                    if weight > 0.0 {
                        let iweight = 1.0 / weight;
                        dst[0] += src[0] * iweight * sr;
                        dst[1] += src[1] * iweight * sg;
                        dst[2] += src[2] * iweight * sb;
                    }
                });
        }
        MergeStage::AccumulatePerScreenNormalized => {
            check_len(stage, "scratch", scratch.len(), active * 3)?;
            output
                .par_chunks_mut(3)
                .zip(scratch[..active * 3].par_chunks(3))
                .for_each(|(dst, src)| {
                    dst[0] += src[0] * sr;
                    dst[1] += src[1] * sg;
                    dst[2] += src[2] * sb;
                });
        }
        MergeStage::Finalize => output.par_iter_mut().for_each(|v| {
            if !v.is_finite() {
                *v = 0.0;
            }
        }),
    }
    Ok(())
}

impl HardwareDevice for ReferenceDevice {
    fn name(&self) -> &str {
        REFERENCE_DEVICE_NAME
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Native
    }

    fn used_memory(&self) -> usize {
        self.used_memory
    }

    fn alloc_buffer(
        &mut self,
        access: BufferAccess,
        size: usize,
        label: &str,
    ) -> LumenResult<BufferId> {
        if let Some(limit) = self.memory_limit {
            if self.used_memory + size > limit {
                return Err(LumenError::allocation(
                    label,
                    size,
                    format!("out of device memory ({} in use)", format_memory(self.used_memory)),
                ));
            }
        }
        let id = BufferId(self.handles.next());
        device_log!(
            self.verbosity,
            "[{}] Allocating buffer {}: {}",
            REFERENCE_DEVICE_NAME,
            label,
            format_memory(size)
        );
        self.buffers.insert(
            id,
            HostBuffer {
                label: label.to_string(),
                access,
                size,
                words: vec![0.0; size.div_ceil(4)],
            },
        );
        self.used_memory += size;
        Ok(id)
    }

    fn free_buffer(&mut self, buffer: BufferId) {
        if let Some(freed) = self.buffers.remove(&buffer) {
            device_log!(
                self.verbosity,
                "[{}] Freeing buffer {}",
                REFERENCE_DEVICE_NAME,
                freed.label
            );
            self.used_memory -= freed.size;
        }
    }

    fn compile_program(
        &mut self,
        name: &str,
        source: &str,
        defines: &[ProgramDefine],
    ) -> LumenResult<ProgramId> {
        if source.trim().is_empty() {
            return Err(LumenError::compile(name, "empty program source"));
        }
        let id = ProgramId(self.handles.next());
        device_log!(
            self.verbosity,
            "[{}] Program {} defines: {}",
            REFERENCE_DEVICE_NAME,
            name,
            defines.iter().map(ProgramDefine::name).collect::<Vec<_>>().join(" ")
        );
        self.programs.insert(
            id,
            HostProgram {
                name: name.to_string(),
                source: source.to_string(),
            },
        );
        Ok(id)
    }

    fn release_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn create_kernel(
        &mut self,
        program: ProgramId,
        entry_point: &str,
        bindings: &KernelBindings,
    ) -> LumenResult<KernelId> {
        let host_program = self
            .programs
            .get(&program)
            .ok_or_else(|| LumenError::UnknownHandle(program.to_string()))?;
        let declared = host_program.source.contains(&format!("fn {entry_point}("));
        let stage = match MergeStage::from_entry_point(entry_point) {
            Some(stage) if declared => stage,
            _ => return Err(LumenError::kernel_not_found(&host_program.name, entry_point)),
        };

        let expected = if stage.reads_scratch() { 2 } else { 1 };
        if bindings.buffers.len() != expected {
            return Err(LumenError::InvalidArgument(format!(
                "{entry_point} binds {expected} buffers, got {}",
                bindings.buffers.len()
            )));
        }
        for buffer in &bindings.buffers {
            self.buffer(*buffer)?;
        }

        let id = KernelId(self.handles.next());
        self.kernels.insert(
            id,
            HostKernel {
                stage,
                bindings: bindings.clone(),
            },
        );
        Ok(id)
    }

    fn release_kernel(&mut self, kernel: KernelId) {
        self.kernels.remove(&kernel);
    }

    fn enqueue_write_buffer(&mut self, buffer: BufferId, data: &[u8]) -> LumenResult<()> {
        let target = self.buffer(buffer)?;
        if data.len() > target.size {
            return Err(LumenError::InvalidArgument(format!(
                "write of {} bytes into {} byte buffer {}",
                data.len(),
                target.size,
                target.label
            )));
        }
        self.queue.push_back(Command::Write {
            buffer,
            bytes: data.to_vec(),
        });
        Ok(())
    }

    fn enqueue_kernel(
        &mut self,
        kernel: KernelId,
        args: ScaleArgs,
        range: DispatchRange,
    ) -> LumenResult<()> {
        if !self.kernels.contains_key(&kernel) {
            return Err(LumenError::UnknownHandle(kernel.to_string()));
        }
        if range.local == 0 || range.global % range.local != 0 {
            return Err(LumenError::Dispatch(format!(
                "global size {} is not a multiple of local size {}",
                range.global, range.local
            )));
        }
        self.queue.push_back(Command::Dispatch { kernel, args, range });
        Ok(())
    }

    fn enqueue_read_buffer(&mut self, buffer: BufferId, size: usize) -> LumenResult<ReadbackId> {
        let source = self.buffer(buffer)?;
        if size > source.size {
            return Err(LumenError::Readback(format!(
                "read of {size} bytes from {} byte buffer {}",
                source.size, source.label
            )));
        }
        let readback = ReadbackId(self.handles.next());
        self.queue.push_back(Command::Read {
            buffer,
            size,
            readback,
        });
        Ok(readback)
    }

    fn finish_queue(&mut self) -> LumenResult<()> {
        while let Some(command) = self.queue.pop_front() {
            if let Err(err) = self.execute(command) {
                self.queue.clear();
                return Err(err);
            }
        }
        Ok(())
    }

    fn take_readback(&mut self, readback: ReadbackId) -> LumenResult<Vec<u8>> {
        self.completed_reads.remove(&readback).ok_or_else(|| {
            LumenError::Readback(format!("{readback} has not completed, finish the queue first"))
        })
    }
}
