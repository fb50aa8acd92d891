//! A host-memory implementation of the recording traits.
//!
//! Command lists are recorded into a `Vec` and replayed in order by
//! [`SoftwareDevice::execute`]. Marker writes land in host memory only when
//! the replay reaches them, so the breadcrumbs left behind by a simulated
//! fault are exactly what a real GPU would leave.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use gpu_crash_common::errors::StatusCode;
use gpu_crash_common::ops::OperationTag;
use tracing::{debug, trace, warn};

use crate::recorder::*;

/// Where the fake GPU address space starts.
const BASE_ADDRESS: GpuAddress = 0x1_0000_0000;
/// Allocations are aligned to this many bytes.
const ALLOCATION_ALIGNMENT: u64 = 0x1_0000;

/// Marker memory in host memory, at a fake GPU address.
#[derive(Debug)]
pub struct SoftwareMarkerMemory {
    address: GpuAddress,
    words: Arc<[AtomicU32]>,
}

impl MarkerMemory for SoftwareMarkerMemory {
    fn gpu_address(&self) -> GpuAddress {
        self.address
    }

    fn len(&self) -> usize {
        self.words.len()
    }

    fn read(&self, index: usize) -> u32 {
        self.words
            .get(index)
            .map_or(0, |word| word.load(Ordering::Acquire))
    }

    fn zero(&self, words: Range<usize>) {
        for word in self.words.get(words).unwrap_or(&[]) {
            word.store(0, Ordering::Release);
        }
    }
}

/// A recorded command.
#[derive(Clone, Debug, PartialEq)]
pub enum SoftwareCommand {
    /// A GPU-executed write to marker memory.
    WriteMarker {
        address: GpuAddress,
        value: u32,
        mode: WriteMode,
    },
    /// GPU work that can fault.
    Work(OperationTag),
    /// A debug event or marker, which does no GPU work.
    Event(OperationTag),
    /// The commands of an executed bundle.
    Bundle(Vec<SoftwareCommand>),
    /// Pipeline state setting.
    State(&'static str),
}

/// A command list recorded in host memory.
#[derive(Debug)]
pub struct SoftwareCommandList {
    list_type: CommandListType,
    commands: Vec<SoftwareCommand>,
    closed: bool,
}

impl SoftwareCommandList {
    pub fn new(list_type: CommandListType) -> SoftwareCommandList {
        SoftwareCommandList {
            list_type,
            commands: Vec::new(),
            closed: false,
        }
    }

    pub fn commands(&self) -> &[SoftwareCommand] {
        &self.commands
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn record(&mut self, command: SoftwareCommand) {
        if self.closed {
            warn!("software: dropping {:?} recorded into a closed list", command);
            return;
        }
        self.commands.push(command);
    }
}

impl CommandRecorder for SoftwareCommandList {
    fn list_type(&self) -> CommandListType {
        self.list_type
    }

    fn write_marker(&mut self, address: GpuAddress, value: u32, mode: WriteMode) {
        self.record(SoftwareCommand::WriteMarker {
            address,
            value,
            mode,
        });
    }

    fn reset(&mut self) -> Result<(), RecorderError> {
        self.commands.clear();
        self.closed = false;
        Ok(())
    }

    fn close(&mut self) -> Result<(), RecorderError> {
        if self.closed {
            return Err(RecorderError::Closed);
        }
        self.closed = true;
        Ok(())
    }

    fn draw_instanced(&mut self, _: u32, _: u32, _: u32, _: u32) {
        self.record(SoftwareCommand::Work(OperationTag::DrawInstanced));
    }

    fn draw_indexed_instanced(&mut self, _: u32, _: u32, _: u32, _: i32, _: u32) {
        self.record(SoftwareCommand::Work(OperationTag::DrawIndexedInstanced));
    }

    fn dispatch(&mut self, _: u32, _: u32, _: u32) {
        self.record(SoftwareCommand::Work(OperationTag::Dispatch));
    }

    fn execute_indirect(
        &mut self,
        _: CommandSignatureId,
        _: u32,
        _: ResourceId,
        _: u64,
        _: Option<ResourceId>,
        _: u64,
    ) {
        self.record(SoftwareCommand::Work(OperationTag::ExecuteIndirect));
    }

    fn copy_buffer_region(&mut self, _: ResourceId, _: u64, _: ResourceId, _: u64, _: u64) {
        self.record(SoftwareCommand::Work(OperationTag::CopyBufferRegion));
    }

    fn copy_texture_region(
        &mut self,
        _: TextureCopyLocation,
        _: (u32, u32, u32),
        _: TextureCopyLocation,
        _: Option<Box3>,
    ) {
        self.record(SoftwareCommand::Work(OperationTag::CopyTextureRegion));
    }

    fn copy_resource(&mut self, _: ResourceId, _: ResourceId) {
        self.record(SoftwareCommand::Work(OperationTag::CopyResource));
    }

    fn resolve_subresource(&mut self, _: ResourceId, _: u32, _: ResourceId, _: u32, _: u32) {
        self.record(SoftwareCommand::Work(OperationTag::ResolveSubresource));
    }

    fn clear_render_target_view(&mut self, _: DescriptorHandle, _: [f32; 4], _: &[Rect]) {
        self.record(SoftwareCommand::Work(OperationTag::ClearRenderTargetView));
    }

    fn clear_depth_stencil_view(&mut self, _: DescriptorHandle, _: ClearFlags, _: f32, _: u8, _: &[Rect]) {
        self.record(SoftwareCommand::Work(OperationTag::ClearDepthStencilView));
    }

    fn clear_unordered_access_view(
        &mut self,
        _: DescriptorHandle,
        _: DescriptorHandle,
        _: ResourceId,
        _: [u32; 4],
        _: &[Rect],
    ) {
        self.record(SoftwareCommand::Work(OperationTag::ClearUnorderedAccessView));
    }

    fn resource_barrier(&mut self, _: &[ResourceBarrier]) {
        self.record(SoftwareCommand::Work(OperationTag::ResourceBarrier));
    }

    fn begin_event(&mut self, _: u32, _: &[u8]) {
        self.record(SoftwareCommand::Event(OperationTag::BeginEvent));
    }

    fn end_event(&mut self) {
        self.record(SoftwareCommand::Event(OperationTag::EndEvent));
    }

    fn set_marker(&mut self, _: u32, _: &[u8]) {
        self.record(SoftwareCommand::Event(OperationTag::SetMarker));
    }

    fn resolve_query_data(&mut self, _: QueryHeapId, _: QueryType, _: u32, _: u32, _: ResourceId, _: u64) {
        self.record(SoftwareCommand::Work(OperationTag::ResolveQueryData));
    }

    fn execute_bundle(&mut self, bundle: &Self) {
        if bundle.list_type != CommandListType::Bundle {
            warn!("software: executing a {:?} list as a bundle", bundle.list_type);
        }
        self.record(SoftwareCommand::Bundle(bundle.commands.clone()));
    }

    fn set_pipeline_state(&mut self, _: PipelineId) {
        self.record(SoftwareCommand::State("pipeline state"));
    }

    fn set_primitive_topology(&mut self, _: PrimitiveTopology) {
        self.record(SoftwareCommand::State("primitive topology"));
    }

    fn set_viewports(&mut self, _: &[Viewport]) {
        self.record(SoftwareCommand::State("viewports"));
    }

    fn set_scissor_rects(&mut self, _: &[Rect]) {
        self.record(SoftwareCommand::State("scissor rects"));
    }

    fn set_vertex_buffers(&mut self, _: u32, _: &[VertexBufferView]) {
        self.record(SoftwareCommand::State("vertex buffers"));
    }

    fn set_index_buffer(&mut self, _: Option<IndexBufferView>) {
        self.record(SoftwareCommand::State("index buffer"));
    }

    fn set_descriptor_heaps(&mut self, _: &[DescriptorHeapId]) {
        self.record(SoftwareCommand::State("descriptor heaps"));
    }

    fn begin_query(&mut self, _: QueryHeapId, _: QueryType, _: u32) {
        self.record(SoftwareCommand::State("begin query"));
    }

    fn end_query(&mut self, _: QueryHeapId, _: QueryType, _: u32) {
        self.record(SoftwareCommand::State("end query"));
    }
}

#[derive(Debug)]
struct Allocation {
    address: GpuAddress,
    words: Weak<[AtomicU32]>,
}

#[derive(Debug)]
struct DeviceState {
    allocations: Vec<Allocation>,
    next_address: GpuAddress,
    /// Fault on the n-th fault-capable command from now (1-based).
    fault_countdown: Option<usize>,
    status: StatusCode,
}

/// A device that executes [`SoftwareCommandList`]s on the CPU.
#[derive(Debug)]
pub struct SoftwareDevice {
    state: Mutex<DeviceState>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        SoftwareDevice::new()
    }
}

impl SoftwareDevice {
    pub fn new() -> SoftwareDevice {
        SoftwareDevice {
            state: Mutex::new(DeviceState {
                allocations: Vec::new(),
                next_address: BASE_ADDRESS,
                fault_countdown: None,
                status: StatusCode::OK,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the `n`-th fault-capable command executed from now on (counting
    /// from 1) hang the device.
    pub fn fault_on(&self, n: usize) {
        self.lock().fault_countdown = Some(n.max(1));
    }

    /// `StatusCode::OK`, or the reason the device was removed.
    pub fn status(&self) -> StatusCode {
        self.lock().status
    }

    pub fn is_removed(&self) -> bool {
        self.status() != StatusCode::OK
    }

    /// Replay a closed command list.
    ///
    /// Commands run in recorded order. If a fault was requested, execution
    /// stops at the faulting command and the device is removed.
    pub fn execute(&self, list: &SoftwareCommandList) -> Result<(), RecorderError> {
        let mut state = self.lock();
        if state.status != StatusCode::OK {
            return Err(RecorderError::DeviceRemoved(state.status));
        }
        if list.list_type == CommandListType::Bundle {
            return Err(RecorderError::NotExecutable(list.list_type));
        }
        if !list.closed {
            return Err(RecorderError::NotClosed);
        }
        let result = replay(&mut state, &list.commands);
        if let Err(RecorderError::DeviceRemoved(status)) = result {
            state.status = status;
        }
        result
    }
}

fn replay(state: &mut DeviceState, commands: &[SoftwareCommand]) -> Result<(), RecorderError> {
    for command in commands {
        match command {
            SoftwareCommand::WriteMarker { address, value, .. } => {
                write_word(state, *address, *value);
            }
            SoftwareCommand::Work(tag) => {
                if let Some(countdown) = state.fault_countdown.as_mut() {
                    *countdown -= 1;
                    if *countdown == 0 {
                        state.fault_countdown = None;
                        debug!("software: {} hung the device", tag);
                        return Err(RecorderError::DeviceRemoved(StatusCode::DEVICE_HUNG));
                    }
                }
                trace!("software: executed {}", tag);
            }
            SoftwareCommand::Bundle(nested) => replay(state, nested)?,
            SoftwareCommand::Event(_) | SoftwareCommand::State(_) => {}
        }
    }
    Ok(())
}

fn write_word(state: &mut DeviceState, address: GpuAddress, value: u32) {
    let target = state.allocations.iter().find_map(|allocation| {
        let offset = address.checked_sub(allocation.address)?;
        let words = allocation.words.upgrade()?;
        let index = (offset / 4) as usize;
        (offset % 4 == 0 && index < words.len()).then_some((words, index))
    });
    match target {
        Some((words, index)) => words[index].store(value, Ordering::Release),
        None => warn!("software: marker write to unmapped address {:#x}", address),
    }
}

impl CommandDevice for SoftwareDevice {
    type Recorder = SoftwareCommandList;

    fn create_recorder(&self, list_type: CommandListType) -> Result<SoftwareCommandList, RecorderError> {
        let status = self.status();
        if status != StatusCode::OK {
            return Err(RecorderError::DeviceRemoved(status));
        }
        Ok(SoftwareCommandList::new(list_type))
    }

    fn create_marker_memory(&self, words: usize) -> Result<Box<dyn MarkerMemory>, RecorderError> {
        let bytes = (words as u64) * 4;
        let words: Arc<[AtomicU32]> = (0..words).map(|_| AtomicU32::new(0)).collect();
        let mut state = self.lock();
        // Drop allocations whose memory is gone.
        state.allocations.retain(|allocation| allocation.words.strong_count() > 0);
        let address = state.next_address;
        let size = bytes.div_ceil(ALLOCATION_ALIGNMENT).max(1) * ALLOCATION_ALIGNMENT;
        state.next_address += size;
        state.allocations.push(Allocation {
            address,
            words: Arc::downgrade(&words),
        });
        Ok(Box::new(SoftwareMarkerMemory { address, words }))
    }
}
