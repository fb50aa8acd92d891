//! The native command recording interface that breadcrumbs are layered on.
//!
//! These traits describe the slice of a D3D12-style command list, device and
//! GPU memory API that instrumentation needs. A real backend implements them
//! over the platform API; [`crate::software`] implements them in host memory.

use gpu_crash_common::errors::StatusCode;
use std::ops::Range;

/// A GPU virtual address.
pub type GpuAddress = u64;

/// The kind of command list being recorded.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum CommandListType {
    Direct,
    Bundle,
    Compute,
    Copy,
}

/// When a GPU-executed marker write becomes visible, relative to the commands
/// around it.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum WriteMode {
    /// The write happens once all preceding commands have started.
    MarkerIn,
    /// The write happens once all preceding commands have finished.
    MarkerOut,
}

/// An opaque handle to a GPU resource.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ResourceId(pub u64);

/// An opaque handle to a pipeline state object.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct PipelineId(pub u64);

/// An opaque handle to a descriptor heap.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct DescriptorHeapId(pub u64);

/// An opaque handle to a query heap.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct QueryHeapId(pub u64);

/// An opaque handle to an indirect command signature.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct CommandSignatureId(pub u64);

/// A CPU or GPU descriptor handle.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct DescriptorHandle(pub u64);

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Viewport {
    pub top_left_x: f32,
    pub top_left_y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// A region of a texture, for partial copies.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Box3 {
    pub left: u32,
    pub top: u32,
    pub front: u32,
    pub right: u32,
    pub bottom: u32,
    pub back: u32,
}

/// One subresource of a texture, as the source or destination of a copy.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TextureCopyLocation {
    pub resource: ResourceId,
    pub subresource: u32,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct VertexBufferView {
    pub location: GpuAddress,
    pub size_in_bytes: u32,
    pub stride_in_bytes: u32,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct IndexBufferView {
    pub location: GpuAddress,
    pub size_in_bytes: u32,
    /// A DXGI format value.
    pub format: u32,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PrimitiveTopology {
    Undefined,
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum QueryType {
    Occlusion,
    BinaryOcclusion,
    Timestamp,
    PipelineStatistics,
}

/// A resource state transition or hazard.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ResourceBarrier {
    Transition {
        resource: ResourceId,
        subresource: u32,
        before: u32,
        after: u32,
    },
    Aliasing {
        before: Option<ResourceId>,
        after: Option<ResourceId>,
    },
    UnorderedAccess {
        resource: Option<ResourceId>,
    },
}

/// Which planes `clear_depth_stencil_view` clears.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ClearFlags {
    pub depth: bool,
    pub stencil: bool,
}

/// Errors from the native recording layer.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("out of memory allocating {0} bytes of marker memory")]
    OutOfMemory(usize),
    #[error("the device was removed: {0}")]
    DeviceRemoved(StatusCode),
    #[error("command list is not closed")]
    NotClosed,
    #[error("command list is closed")]
    Closed,
    #[error("command list type {0:?} cannot be executed directly")]
    NotExecutable(CommandListType),
    #[error("invalid breadcrumb buffer dimensions: {0}")]
    InvalidConfig(&'static str),
}

/// GPU-addressable, CPU-readable memory holding breadcrumb markers.
///
/// Markers are 32-bit words. Implementations must tolerate reads from another
/// thread while the GPU (or a replay) is writing.
pub trait MarkerMemory: Send + Sync {
    /// The GPU address of word 0.
    fn gpu_address(&self) -> GpuAddress;

    /// The number of 32-bit words.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read back word `index` on the CPU.
    fn read(&self, index: usize) -> u32;

    /// Zero a range of words from the CPU.
    fn zero(&self, words: Range<usize>);
}

/// A native command list.
///
/// `write_marker` must be recorded as a GPU-executed write that is ordered with
/// the neighbouring commands (for D3D12, `WriteBufferImmediate`). A CPU-side
/// write would not tell which command the GPU had reached.
pub trait CommandRecorder {
    fn list_type(&self) -> CommandListType;

    /// Record a write of `value` to `address`.
    fn write_marker(&mut self, address: GpuAddress, value: u32, mode: WriteMode);

    /// Reset the list for reuse after its previous submission finished.
    fn reset(&mut self) -> Result<(), RecorderError>;

    /// Finish recording.
    fn close(&mut self) -> Result<(), RecorderError>;

    fn draw_instanced(
        &mut self,
        vertex_count_per_instance: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    );

    fn draw_indexed_instanced(
        &mut self,
        index_count_per_instance: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    );

    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    fn execute_indirect(
        &mut self,
        signature: CommandSignatureId,
        max_command_count: u32,
        argument_buffer: ResourceId,
        argument_offset: u64,
        count_buffer: Option<ResourceId>,
        count_offset: u64,
    );

    fn copy_buffer_region(
        &mut self,
        dst: ResourceId,
        dst_offset: u64,
        src: ResourceId,
        src_offset: u64,
        num_bytes: u64,
    );

    fn copy_texture_region(
        &mut self,
        dst: TextureCopyLocation,
        dst_xyz: (u32, u32, u32),
        src: TextureCopyLocation,
        src_box: Option<Box3>,
    );

    fn copy_resource(&mut self, dst: ResourceId, src: ResourceId);

    fn resolve_subresource(
        &mut self,
        dst: ResourceId,
        dst_subresource: u32,
        src: ResourceId,
        src_subresource: u32,
        format: u32,
    );

    fn clear_render_target_view(&mut self, rtv: DescriptorHandle, color: [f32; 4], rects: &[Rect]);

    fn clear_depth_stencil_view(
        &mut self,
        dsv: DescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
        rects: &[Rect],
    );

    fn clear_unordered_access_view(
        &mut self,
        gpu_handle: DescriptorHandle,
        cpu_handle: DescriptorHandle,
        resource: ResourceId,
        values: [u32; 4],
        rects: &[Rect],
    );

    fn resource_barrier(&mut self, barriers: &[ResourceBarrier]);

    fn begin_event(&mut self, metadata: u32, data: &[u8]);

    fn end_event(&mut self);

    fn set_marker(&mut self, metadata: u32, data: &[u8]);

    fn resolve_query_data(
        &mut self,
        heap: QueryHeapId,
        query_type: QueryType,
        start_index: u32,
        num_queries: u32,
        dst: ResourceId,
        dst_offset: u64,
    );

    fn execute_bundle(&mut self, bundle: &Self);

    fn set_pipeline_state(&mut self, pipeline: PipelineId);

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology);

    fn set_viewports(&mut self, viewports: &[Viewport]);

    fn set_scissor_rects(&mut self, rects: &[Rect]);

    fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]);

    fn set_index_buffer(&mut self, view: Option<IndexBufferView>);

    fn set_descriptor_heaps(&mut self, heaps: &[DescriptorHeapId]);

    fn begin_query(&mut self, heap: QueryHeapId, query_type: QueryType, index: u32);

    fn end_query(&mut self, heap: QueryHeapId, query_type: QueryType, index: u32);
}

/// Creates command lists and marker memory.
pub trait CommandDevice {
    type Recorder: CommandRecorder;

    /// Create a command list (with its allocator) of `list_type`.
    fn create_recorder(&self, list_type: CommandListType) -> Result<Self::Recorder, RecorderError>;

    /// Allocate `words` 32-bit words of zeroed marker memory.
    fn create_marker_memory(&self, words: usize) -> Result<Box<dyn MarkerMemory>, RecorderError>;
}
