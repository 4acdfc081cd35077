//! wgpu implementation of [`HardwareDevice`].
//!
//! wgpu applies `Queue::write_buffer` at the next submit. Every dispatch
//! and every readback copy is therefore submitted on its own, which keeps
//! writes, dispatches and reads in enqueue order. Readbacks go through a
//! mappable staging buffer and are mapped when the queue is finished.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::mpsc;

use lumen_core::{LumenError, LumenResult};

use crate::context::Verbosity;
use crate::device::{
    device_log, format_memory, with_defines, BufferAccess, BufferId, CapabilityVersion,
    DeviceBackend, DeviceDescription, DeviceType, DispatchRange, HandleCounter, HardwareDevice,
    KernelBindings, KernelId, ProgramDefine, ProgramId, ReadbackId, ScaleArgs,
};

/// Uniform block bound at binding 0 of every merge kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct KernelParams {
    width: u32,
    height: u32,
    _pad: [u32; 2],
    scale: [f32; 4],
}

impl KernelParams {
    fn new(width: u32, height: u32, args: ScaleArgs) -> Self {
        Self {
            width,
            height,
            _pad: [0; 2],
            scale: [args.rgb[0], args.rgb[1], args.rgb[2], 0.0],
        }
    }
}

const PARAMS_SIZE: usize = std::mem::size_of::<KernelParams>();

/// Backends to enumerate: `WGPU_BACKEND` if set, otherwise all of them.
pub fn backends() -> wgpu::Backends {
    wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all())
}

pub fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: backends(),
        ..Default::default()
    })
}

fn device_type(device_type: wgpu::DeviceType) -> DeviceType {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => DeviceType::DiscreteGpu,
        wgpu::DeviceType::IntegratedGpu => DeviceType::IntegratedGpu,
        wgpu::DeviceType::VirtualGpu => DeviceType::VirtualGpu,
        wgpu::DeviceType::Cpu => DeviceType::SoftwareCpu,
        wgpu::DeviceType::Other => DeviceType::OtherHardware,
    }
}

fn capability(shader_model: wgpu::ShaderModel) -> CapabilityVersion {
    match shader_model {
        wgpu::ShaderModel::Sm2 => CapabilityVersion::new(2, 0),
        wgpu::ShaderModel::Sm4 => CapabilityVersion::new(4, 0),
        wgpu::ShaderModel::Sm5 => CapabilityVersion::new(5, 0),
    }
}

/// Describe every adapter `instance` exposes, in enumeration order.
pub fn describe_adapters(instance: &wgpu::Instance) -> Vec<DeviceDescription> {
    instance
        .enumerate_adapters(backends())
        .iter()
        .enumerate()
        .map(|(adapter_index, adapter)| {
            let info = adapter.get_info();
            DeviceDescription {
                name: info.name.clone(),
                device_type: device_type(info.device_type),
                capability: capability(adapter.get_downlevel_capabilities().shader_model),
                backend: DeviceBackend::Wgpu {
                    adapter_index,
                    api: format!("{:?}", info.backend),
                },
            }
        })
        .collect()
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    label: String,
    access: BufferAccess,
    size: usize,
}

struct GpuProgram {
    name: String,
    source: String,
    module: wgpu::ShaderModule,
}

struct GpuKernel {
    entry_point: String,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    params_buffer: wgpu::Buffer,
    width: u32,
    height: u32,
}

struct PendingRead {
    readback: ReadbackId,
    staging: wgpu::Buffer,
    size: usize,
}

pub struct WgpuDevice {
    name: String,
    device_type: DeviceType,
    verbosity: Verbosity,
    handles: HandleCounter,
    buffers: HashMap<BufferId, GpuBuffer>,
    programs: HashMap<ProgramId, GpuProgram>,
    kernels: HashMap<KernelId, GpuKernel>,
    pending_reads: Vec<PendingRead>,
    completed_reads: HashMap<ReadbackId, Vec<u8>>,
    used_memory: usize,
    // Declared last so every resource above is dropped before the device.
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl WgpuDevice {
    /// Open the adapter at `adapter_index` in enumeration order.
    pub fn open(
        instance: &wgpu::Instance,
        adapter_index: usize,
        verbosity: Verbosity,
    ) -> LumenResult<Self> {
        let adapter = instance
            .enumerate_adapters(backends())
            .into_iter()
            .nth(adapter_index)
            .ok_or_else(|| {
                LumenError::Device(format!("no wgpu adapter at index {adapter_index}"))
            })?;
        let info = adapter.get_info();

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Lumen film merge device"),
                required_features: wgpu::Features::empty(),
                // The radiance channels of a large film exceed the default
                // storage binding limit.
                required_limits: adapter.limits(),
            },
            None,
        ))
        .map_err(|e| LumenError::Device(format!("{}: {e}", info.name)))?;

        device_log!(
            verbosity,
            "[{}] Opened {:?} adapter, driver {} {}",
            info.name,
            info.backend,
            info.driver,
            info.driver_info
        );

        Ok(Self {
            name: info.name,
            device_type: device_type(info.device_type),
            verbosity,
            handles: HandleCounter::default(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            kernels: HashMap::new(),
            pending_reads: Vec::new(),
            completed_reads: HashMap::new(),
            used_memory: 0,
            device,
            queue,
        })
    }

    /// Run `f` inside validation and out of memory error scopes.
    fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        (value, validation.or(out_of_memory))
    }

    fn gpu_buffer(&self, buffer: BufferId) -> LumenResult<&GpuBuffer> {
        self.buffers
            .get(&buffer)
            .ok_or_else(|| LumenError::UnknownHandle(buffer.to_string()))
    }

    fn create_bind_group_layout(
        &self,
        entry_point: &str,
        buffers: &[&GpuBuffer],
    ) -> wgpu::BindGroupLayout {
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        for (i, buffer) in buffers.iter().enumerate() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: i as u32 + 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage {
                        read_only: buffer.access == BufferAccess::ReadOnly,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(entry_point),
                entries: &entries,
            })
    }

    /// Split `groups` into an (x, y) grid within the per-dimension limit.
    fn fold_groups(&self, groups: u32) -> (u32, u32) {
        let max = self.device.limits().max_compute_workgroups_per_dimension.max(1);
        if groups <= max {
            (groups, 1)
        } else {
            (max, groups.div_ceil(max))
        }
    }
}

impl HardwareDevice for WgpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn device_type(&self) -> DeviceType {
        self.device_type
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
        // Copies must be 4 byte aligned.
        let padded = (size.div_ceil(4) * 4).max(4) as u64;
        let max_buffer_size = self.device.limits().max_buffer_size;
        if padded > max_buffer_size {
            return Err(LumenError::allocation(
                label,
                size,
                format!("exceeds the device buffer limit of {max_buffer_size} bytes"),
            ));
        }

        device_log!(
            self.verbosity,
            "[{}] Allocating buffer {}: {}",
            self.name,
            label,
            format_memory(size)
        );
        let (buffer, error) = self.scoped(|device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: padded,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        });
        if let Some(error) = error {
            return Err(LumenError::allocation(label, size, error.to_string()));
        }

        let id = BufferId(self.handles.next());
        self.buffers.insert(
            id,
            GpuBuffer {
                buffer,
                label: label.to_string(),
                access,
                size,
            },
        );
        self.used_memory += size;
        Ok(id)
    }

    fn free_buffer(&mut self, buffer: BufferId) {
        if let Some(freed) = self.buffers.remove(&buffer) {
            device_log!(self.verbosity, "[{}] Freeing buffer {}", self.name, freed.label);
            freed.buffer.destroy();
            self.used_memory -= freed.size;
        }
    }

    fn compile_program(
        &mut self,
        name: &str,
        source: &str,
        defines: &[ProgramDefine],
    ) -> LumenResult<ProgramId> {
        let text = with_defines(source, defines);
        let (module, error) = self.scoped(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&text)),
            })
        });
        if let Some(error) = error {
            return Err(LumenError::compile(name, error.to_string()));
        }

        let id = ProgramId(self.handles.next());
        self.programs.insert(
            id,
            GpuProgram {
                name: name.to_string(),
                source: text,
                module,
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
        let gpu_program = self
            .programs
            .get(&program)
            .ok_or_else(|| LumenError::UnknownHandle(program.to_string()))?;
        if !gpu_program.source.contains(&format!("fn {entry_point}(")) {
            return Err(LumenError::kernel_not_found(&gpu_program.name, entry_point));
        }
        let bound = bindings
            .buffers
            .iter()
            .map(|id| self.gpu_buffer(*id))
            .collect::<LumenResult<Vec<_>>>()?;

        let params = KernelParams::new(bindings.width, bindings.height, ScaleArgs::UNIT);
        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("merge_params"),
            size: PARAMS_SIZE as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));

        let layout = self.create_bind_group_layout(entry_point, &bound);
        let ((pipeline, bind_group), error) = self.scoped(|device| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(entry_point),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &gpu_program.module,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            });

            let mut entries = vec![wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }];
            for (i, buffer) in bound.iter().enumerate() {
                entries.push(wgpu::BindGroupEntry {
                    binding: i as u32 + 1,
                    resource: buffer.buffer.as_entire_binding(),
                });
            }
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(entry_point),
                layout: &layout,
                entries: &entries,
            });
            (pipeline, bind_group)
        });
        if let Some(error) = error {
            return Err(LumenError::compile(&gpu_program.name, error.to_string()));
        }

        let id = KernelId(self.handles.next());
        self.kernels.insert(
            id,
            GpuKernel {
                entry_point: entry_point.to_string(),
                pipeline,
                bind_group,
                params_buffer,
                width: bindings.width,
                height: bindings.height,
            },
        );
        self.used_memory += PARAMS_SIZE;
        Ok(id)
    }

    fn release_kernel(&mut self, kernel: KernelId) {
        if let Some(released) = self.kernels.remove(&kernel) {
            released.params_buffer.destroy();
            self.used_memory -= PARAMS_SIZE;
        }
    }

    fn enqueue_write_buffer(&mut self, buffer: BufferId, data: &[u8]) -> LumenResult<()> {
        let target = self.gpu_buffer(buffer)?;
        if data.len() > target.size {
            return Err(LumenError::InvalidArgument(format!(
                "write of {} bytes into {} byte buffer {}",
                data.len(),
                target.size,
                target.label
            )));
        }
        if data.len() % 4 == 0 {
            self.queue.write_buffer(&target.buffer, 0, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(data.len().div_ceil(4) * 4, 0);
            self.queue.write_buffer(&target.buffer, 0, &padded);
        }
        Ok(())
    }

    fn enqueue_kernel(
        &mut self,
        kernel: KernelId,
        args: ScaleArgs,
        range: DispatchRange,
    ) -> LumenResult<()> {
        if range.local == 0 || range.global % range.local != 0 {
            return Err(LumenError::Dispatch(format!(
                "global size {} is not a multiple of local size {}",
                range.global, range.local
            )));
        }
        let (x, y) = self.fold_groups(range.work_groups());
        let gpu_kernel = self
            .kernels
            .get(&kernel)
            .ok_or_else(|| LumenError::UnknownHandle(kernel.to_string()))?;

        let params = KernelParams::new(gpu_kernel.width, gpu_kernel.height, args);
        self.queue
            .write_buffer(&gpu_kernel.params_buffer, 0, bytemuck::bytes_of(&params));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(gpu_kernel.entry_point.as_str()),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(gpu_kernel.entry_point.as_str()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&gpu_kernel.pipeline);
            pass.set_bind_group(0, &gpu_kernel.bind_group, &[]);
            if x > 0 {
                pass.dispatch_workgroups(x, y, 1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn enqueue_read_buffer(&mut self, buffer: BufferId, size: usize) -> LumenResult<ReadbackId> {
        let source = self.gpu_buffer(buffer)?;
        if size > source.size {
            return Err(LumenError::Readback(format!(
                "read of {size} bytes from {} byte buffer {}",
                source.size, source.label
            )));
        }
        let padded = (size.div_ceil(4) * 4).max(4) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("merge_readback"),
            size: padded,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("merge_readback"),
            });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &staging, 0, padded);
        self.queue.submit(Some(encoder.finish()));

        let readback = ReadbackId(self.handles.next());
        self.pending_reads.push(PendingRead {
            readback,
            staging,
            size,
        });
        Ok(readback)
    }

    fn finish_queue(&mut self) -> LumenResult<()> {
        // Flush writes that no dispatch or copy has submitted yet.
        self.queue.submit(std::iter::empty::<wgpu::CommandBuffer>());

        let pending = std::mem::take(&mut self.pending_reads);
        let (tx, rx) = mpsc::channel();
        for (slot, read) in pending.iter().enumerate() {
            let tx = tx.clone();
            read.staging
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = tx.send((slot, result));
                });
        }
        drop(tx);

        let _ = self.device.poll(wgpu::Maintain::Wait);

        let mut mapped = 0;
        for (slot, result) in rx.try_iter() {
            if let Err(e) = result {
                return Err(LumenError::Readback(format!(
                    "mapping {} failed: {e}",
                    pending[slot].readback
                )));
            }
            mapped += 1;
        }
        if mapped != pending.len() {
            return Err(LumenError::Readback(format!(
                "{} of {} readbacks did not complete",
                pending.len() - mapped,
                pending.len()
            )));
        }

        for read in pending {
            let bytes = {
                let mapped = read.staging.slice(..).get_mapped_range();
                mapped[..read.size].to_vec()
            };
            read.staging.unmap();
            self.completed_reads.insert(read.readback, bytes);
        }
        Ok(())
    }

    fn take_readback(&mut self, readback: ReadbackId) -> LumenResult<Vec<u8>> {
        self.completed_reads.remove(&readback).ok_or_else(|| {
            LumenError::Readback(format!("{readback} has not completed, finish the queue first"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout_matches_wgsl() {
        assert_eq!(PARAMS_SIZE, 32);
        let params = KernelParams::new(3, 2, ScaleArgs::new([0.5, 1.0, 2.0]));
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&params));
        assert_eq!(&words[..2], &[3, 2]);
        assert_eq!(f32::from_bits(words[4]), 0.5);
        assert_eq!(f32::from_bits(words[6]), 2.0);
    }

    #[test]
    fn test_device_type_mapping() {
        assert_eq!(device_type(wgpu::DeviceType::DiscreteGpu), DeviceType::DiscreteGpu);
        assert_eq!(device_type(wgpu::DeviceType::VirtualGpu), DeviceType::VirtualGpu);
        assert_eq!(device_type(wgpu::DeviceType::Cpu), DeviceType::SoftwareCpu);
        assert!(!device_type(wgpu::DeviceType::Cpu).is_hardware());
    }

    #[test]
    fn test_capability_mapping() {
        assert!(capability(wgpu::ShaderModel::Sm4) < CapabilityVersion::MINIMUM);
        assert_eq!(capability(wgpu::ShaderModel::Sm5), CapabilityVersion::MINIMUM);
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_open_first_adapter() {
        let instance = create_instance();
        let adapters = describe_adapters(&instance);
        assert!(!adapters.is_empty());
        let device = WgpuDevice::open(&instance, 0, Verbosity::new(false)).unwrap();
        assert_eq!(device.name(), adapters[0].name);
        assert_eq!(device.used_memory(), 0);
    }
}
