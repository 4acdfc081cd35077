//! Instrumented device for lifecycle tests.

use std::sync::{Arc, Mutex};

use lumen_core::{LumenError, LumenResult};

use crate::context::Verbosity;
use crate::device::{
    BufferAccess, BufferId, DeviceType, DispatchRange, HardwareDevice, KernelBindings, KernelId,
    ProgramDefine, ProgramId, ReadbackId, ScaleArgs,
};
use crate::reference::ReferenceDevice;

pub(crate) type EventLog = Arc<Mutex<Vec<&'static str>>>;

/// Reference device that records used memory queries, allocations,
/// releases and its own drop. With `fail_finish` set, `finish_queue` runs
/// the queue and then reports an error.
pub(crate) struct RecordingDevice {
    pub(crate) inner: ReferenceDevice,
    pub(crate) fail_finish: bool,
    events: EventLog,
}

impl RecordingDevice {
    pub(crate) fn new(events: EventLog) -> Self {
        Self {
            inner: ReferenceDevice::new(Verbosity::new(false)),
            fail_finish: false,
            events,
        }
    }

    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }
}

impl Drop for RecordingDevice {
    fn drop(&mut self) {
        self.record("drop_device");
    }
}

impl HardwareDevice for RecordingDevice {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn device_type(&self) -> DeviceType {
        self.inner.device_type()
    }

    fn used_memory(&self) -> usize {
        self.record("used_memory");
        self.inner.used_memory()
    }

    fn alloc_buffer(
        &mut self,
        access: BufferAccess,
        size: usize,
        label: &str,
    ) -> LumenResult<BufferId> {
        self.record("alloc_buffer");
        self.inner.alloc_buffer(access, size, label)
    }

    fn free_buffer(&mut self, buffer: BufferId) {
        self.record("free_buffer");
        self.inner.free_buffer(buffer)
    }

    fn compile_program(
        &mut self,
        name: &str,
        source: &str,
        defines: &[ProgramDefine],
    ) -> LumenResult<ProgramId> {
        self.inner.compile_program(name, source, defines)
    }

    fn release_program(&mut self, program: ProgramId) {
        self.record("release_program");
        self.inner.release_program(program)
    }

    fn create_kernel(
        &mut self,
        program: ProgramId,
        entry_point: &str,
        bindings: &KernelBindings,
    ) -> LumenResult<KernelId> {
        let kernel = self.inner.create_kernel(program, entry_point, bindings)?;
        self.record("create_kernel");
        Ok(kernel)
    }

    fn release_kernel(&mut self, kernel: KernelId) {
        self.record("release_kernel");
        self.inner.release_kernel(kernel)
    }

    fn enqueue_write_buffer(&mut self, buffer: BufferId, data: &[u8]) -> LumenResult<()> {
        self.inner.enqueue_write_buffer(buffer, data)
    }

    fn enqueue_kernel(
        &mut self,
        kernel: KernelId,
        args: ScaleArgs,
        range: DispatchRange,
    ) -> LumenResult<()> {
        self.inner.enqueue_kernel(kernel, args, range)
    }

    fn enqueue_read_buffer(&mut self, buffer: BufferId, size: usize) -> LumenResult<ReadbackId> {
        self.inner.enqueue_read_buffer(buffer, size)
    }

    fn finish_queue(&mut self) -> LumenResult<()> {
        self.inner.finish_queue()?;
        if self.fail_finish {
            return Err(LumenError::Device("queue failed".to_string()));
        }
        Ok(())
    }

    fn take_readback(&mut self, readback: ReadbackId) -> LumenResult<Vec<u8>> {
        self.inner.take_readback(readback)
    }
}
