//! A command list wrapper that brackets GPU work with breadcrumbs.

use std::io::{self, Write};
use std::sync::Arc;

use gpu_crash_common::ops::OperationTag;
use tracing::{trace, warn};

use crate::buffer::{BreadcrumbBuffer, BreadcrumbConfig};
use crate::marker::Marker;
use crate::recorder::*;
use crate::registry::{LiveStreamRegistry, StreamId, StreamRecord};

/// A command list whose GPU work is bracketed by breadcrumb markers.
///
/// Every instrumented command is recorded as
///
/// 1. a GPU write of [`Marker::entered`] to the current slot,
/// 2. the command itself,
/// 3. a GPU write of [`Marker::exited`] to the same slot,
///
/// after which the slot advances. If the GPU faults inside the command, the slot
/// is left with only the entered bit set.
///
/// The stream registers its history with a [`LiveStreamRegistry`] when created
/// and unregisters it when dropped.
pub struct InstrumentedCommandStream<R: CommandRecorder> {
    recorder: R,
    buffer: Arc<BreadcrumbBuffer>,
    registry: Arc<LiveStreamRegistry>,
    id: StreamId,
    generation: usize,
    slot: usize,
    submission: u64,
}

impl<R: CommandRecorder> InstrumentedCommandStream<R> {
    /// Create a command list of `list_type` on `device` with the default
    /// breadcrumb configuration, and register it with `registry`.
    pub fn new<D>(
        device: &D,
        list_type: CommandListType,
        registry: Arc<LiveStreamRegistry>,
    ) -> Result<Self, RecorderError>
    where
        D: CommandDevice<Recorder = R>,
    {
        Self::with_config(device, list_type, registry, BreadcrumbConfig::default())
    }

    pub fn with_config<D>(
        device: &D,
        list_type: CommandListType,
        registry: Arc<LiveStreamRegistry>,
        config: BreadcrumbConfig,
    ) -> Result<Self, RecorderError>
    where
        D: CommandDevice<Recorder = R>,
    {
        let recorder = device.create_recorder(list_type)?;
        let buffer = Arc::new(BreadcrumbBuffer::allocate(device, config)?);
        let id = StreamId::next();
        registry.add(StreamRecord {
            id,
            list_type,
            buffer: buffer.clone(),
        });
        Ok(InstrumentedCommandStream {
            recorder,
            buffer,
            registry,
            id,
            generation: 0,
            slot: 0,
            submission: 0,
        })
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// The native recorder, for commands this wrapper doesn't cover.
    pub fn recorder_mut(&mut self) -> &mut R {
        &mut self.recorder
    }

    pub fn buffer(&self) -> &Arc<BreadcrumbBuffer> {
        &self.buffer
    }

    /// The number of times this stream has been reset.
    pub fn submission(&self) -> u64 {
        self.submission
    }

    /// Record the entered marker for `tag` in the current slot.
    pub fn push(&mut self, tag: OperationTag) {
        if self.slot >= self.buffer.capacity() {
            if self.buffer.note_overflow(self.generation) {
                warn!(
                    "breadcrumbs: stream {} ran out of slots in submission {}; further commands are untracked",
                    self.id.0, self.submission
                );
            }
            return;
        }
        trace!("breadcrumbs: push {} at slot {}", tag, self.slot);
        let address = self.buffer.marker_address(self.generation, self.slot);
        self.recorder
            .write_marker(address, Marker::entered(tag).0, WriteMode::MarkerIn);
        self.buffer.record_reached(self.generation, self.slot, tag);
    }

    /// Record the exited marker for `tag` in the current slot and advance.
    pub fn pop(&mut self, tag: OperationTag) {
        if self.slot >= self.buffer.capacity() {
            return;
        }
        let address = self.buffer.marker_address(self.generation, self.slot);
        self.recorder
            .write_marker(address, Marker::exited(tag).0, WriteMode::MarkerOut);
        self.slot += 1;
    }

    /// Record the high-water mark of the current generation.
    pub fn finish(&mut self) {
        self.buffer.finish(self.generation);
    }

    /// Reset the native list for reuse and start the next generation.
    pub fn reset(&mut self) -> Result<(), RecorderError> {
        self.recorder.reset()?;
        self.generation = (self.generation + 1) % self.buffer.config().generations;
        self.slot = 0;
        self.submission += 1;
        self.buffer.begin_generation(self.generation, self.submission);
        Ok(())
    }

    /// Close the native list, recording the high-water mark first.
    pub fn close(&mut self) -> Result<(), RecorderError> {
        self.finish();
        self.recorder.close()
    }

    /// Print this stream's history.
    pub fn print<T: Write + ?Sized>(&self, w: &mut T) -> io::Result<()> {
        self.buffer.print(w)
    }

    fn instrumented<F: FnOnce(&mut R)>(&mut self, tag: OperationTag, f: F) {
        self.push(tag);
        f(&mut self.recorder);
        self.pop(tag);
    }

    pub fn draw_instanced(
        &mut self,
        vertex_count_per_instance: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    ) {
        self.instrumented(OperationTag::DrawInstanced, |r| {
            r.draw_instanced(
                vertex_count_per_instance,
                instance_count,
                start_vertex,
                start_instance,
            )
        });
    }

    pub fn draw_indexed_instanced(
        &mut self,
        index_count_per_instance: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) {
        self.instrumented(OperationTag::DrawIndexedInstanced, |r| {
            r.draw_indexed_instanced(
                index_count_per_instance,
                instance_count,
                start_index,
                base_vertex,
                start_instance,
            )
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.instrumented(OperationTag::Dispatch, |r| r.dispatch(x, y, z));
    }

    pub fn execute_indirect(
        &mut self,
        signature: CommandSignatureId,
        max_command_count: u32,
        argument_buffer: ResourceId,
        argument_offset: u64,
        count_buffer: Option<ResourceId>,
        count_offset: u64,
    ) {
        self.instrumented(OperationTag::ExecuteIndirect, |r| {
            r.execute_indirect(
                signature,
                max_command_count,
                argument_buffer,
                argument_offset,
                count_buffer,
                count_offset,
            )
        });
    }

    pub fn copy_buffer_region(
        &mut self,
        dst: ResourceId,
        dst_offset: u64,
        src: ResourceId,
        src_offset: u64,
        num_bytes: u64,
    ) {
        self.instrumented(OperationTag::CopyBufferRegion, |r| {
            r.copy_buffer_region(dst, dst_offset, src, src_offset, num_bytes)
        });
    }

    pub fn copy_texture_region(
        &mut self,
        dst: TextureCopyLocation,
        dst_xyz: (u32, u32, u32),
        src: TextureCopyLocation,
        src_box: Option<Box3>,
    ) {
        self.instrumented(OperationTag::CopyTextureRegion, |r| {
            r.copy_texture_region(dst, dst_xyz, src, src_box)
        });
    }

    pub fn copy_resource(&mut self, dst: ResourceId, src: ResourceId) {
        self.instrumented(OperationTag::CopyResource, |r| r.copy_resource(dst, src));
    }

    pub fn resolve_subresource(
        &mut self,
        dst: ResourceId,
        dst_subresource: u32,
        src: ResourceId,
        src_subresource: u32,
        format: u32,
    ) {
        self.instrumented(OperationTag::ResolveSubresource, |r| {
            r.resolve_subresource(dst, dst_subresource, src, src_subresource, format)
        });
    }

    pub fn clear_render_target_view(&mut self, rtv: DescriptorHandle, color: [f32; 4], rects: &[Rect]) {
        self.instrumented(OperationTag::ClearRenderTargetView, |r| {
            r.clear_render_target_view(rtv, color, rects)
        });
    }

    pub fn clear_depth_stencil_view(
        &mut self,
        dsv: DescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
        rects: &[Rect],
    ) {
        self.instrumented(OperationTag::ClearDepthStencilView, |r| {
            r.clear_depth_stencil_view(dsv, flags, depth, stencil, rects)
        });
    }

    pub fn clear_unordered_access_view(
        &mut self,
        gpu_handle: DescriptorHandle,
        cpu_handle: DescriptorHandle,
        resource: ResourceId,
        values: [u32; 4],
        rects: &[Rect],
    ) {
        self.instrumented(OperationTag::ClearUnorderedAccessView, |r| {
            r.clear_unordered_access_view(gpu_handle, cpu_handle, resource, values, rects)
        });
    }

    pub fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) {
        self.instrumented(OperationTag::ResourceBarrier, |r| r.resource_barrier(barriers));
    }

    pub fn begin_event(&mut self, metadata: u32, data: &[u8]) {
        self.instrumented(OperationTag::BeginEvent, |r| r.begin_event(metadata, data));
    }

    pub fn end_event(&mut self) {
        self.instrumented(OperationTag::EndEvent, |r| r.end_event());
    }

    pub fn set_marker(&mut self, metadata: u32, data: &[u8]) {
        self.instrumented(OperationTag::SetMarker, |r| r.set_marker(metadata, data));
    }

    pub fn resolve_query_data(
        &mut self,
        heap: QueryHeapId,
        query_type: QueryType,
        start_index: u32,
        num_queries: u32,
        dst: ResourceId,
        dst_offset: u64,
    ) {
        self.instrumented(OperationTag::ResolveQueryData, |r| {
            r.resolve_query_data(heap, query_type, start_index, num_queries, dst, dst_offset)
        });
    }

    /// Execute a bundle. The bundle's own breadcrumbs, if any, are recorded in
    /// its own stream.
    pub fn execute_bundle(&mut self, bundle: &InstrumentedCommandStream<R>) {
        let bundle = &bundle.recorder;
        self.instrumented(OperationTag::ExecuteBundle, |r| r.execute_bundle(bundle));
    }

    // State setting records no GPU work of its own, so it is forwarded as-is.

    pub fn set_pipeline_state(&mut self, pipeline: PipelineId) {
        self.recorder.set_pipeline_state(pipeline);
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.recorder.set_primitive_topology(topology);
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.recorder.set_viewports(viewports);
    }

    pub fn set_scissor_rects(&mut self, rects: &[Rect]) {
        self.recorder.set_scissor_rects(rects);
    }

    pub fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]) {
        self.recorder.set_vertex_buffers(start_slot, views);
    }

    pub fn set_index_buffer(&mut self, view: Option<IndexBufferView>) {
        self.recorder.set_index_buffer(view);
    }

    pub fn set_descriptor_heaps(&mut self, heaps: &[DescriptorHeapId]) {
        self.recorder.set_descriptor_heaps(heaps);
    }

    pub fn begin_query(&mut self, heap: QueryHeapId, query_type: QueryType, index: u32) {
        self.recorder.begin_query(heap, query_type, index);
    }

    pub fn end_query(&mut self, heap: QueryHeapId, query_type: QueryType, index: u32) {
        self.recorder.end_query(heap, query_type, index);
    }
}

impl<R: CommandRecorder> Drop for InstrumentedCommandStream<R> {
    fn drop(&mut self) {
        // Unregister before the buffer can be released.
        self.registry.remove(self.id);
    }
}

impl<R: CommandRecorder + std::fmt::Debug> std::fmt::Debug for InstrumentedCommandStream<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("InstrumentedCommandStream")
            .field("id", &self.id)
            .field("recorder", &self.recorder)
            .field("generation", &self.generation)
            .field("slot", &self.slot)
            .field("submission", &self.submission)
            .finish()
    }
}
