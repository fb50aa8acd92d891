//! Operation and allocation tables.
//!
//! The same operation numbering is used by the application-recorded breadcrumbs
//! and by the driver-recorded breadcrumb history of the device-removed
//! diagnostics, so a single name table serves both. Raw values read back from
//! GPU memory or the driver are never trusted: anything outside the tables is
//! rendered as [`UNKNOWN`].
#![allow(non_camel_case_types)]

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

/// The name used for operation and allocation values outside the known tables.
pub const UNKNOWN: &str = "UNKNOWN";

/// A category of GPU command that can independently fault or hang the GPU.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Primitive)]
pub enum OperationTag {
    SetMarker = 0,
    BeginEvent = 1,
    EndEvent = 2,
    DrawInstanced = 3,
    DrawIndexedInstanced = 4,
    ExecuteIndirect = 5,
    Dispatch = 6,
    CopyBufferRegion = 7,
    CopyTextureRegion = 8,
    CopyResource = 9,
    CopyTiles = 10,
    ResolveSubresource = 11,
    ClearRenderTargetView = 12,
    ClearUnorderedAccessView = 13,
    ClearDepthStencilView = 14,
    ResourceBarrier = 15,
    ExecuteBundle = 16,
    Present = 17,
    ResolveQueryData = 18,
    BeginSubmission = 19,
    EndSubmission = 20,
    DecodeFrame = 21,
    ProcessFrames = 22,
    AtomicCopyBufferUint = 23,
    AtomicCopyBufferUint64 = 24,
    ResolveSubresourceRegion = 25,
    WriteBufferImmediate = 26,
    DecodeFrame1 = 27,
    SetProtectedResourceSession = 28,
    DecodeFrame2 = 29,
    ProcessFrames1 = 30,
    BuildRaytracingAccelerationStructure = 31,
    EmitRaytracingAccelerationStructurePostbuildInfo = 32,
    CopyRaytracingAccelerationStructure = 33,
    DispatchRays = 34,
    InitializeMetaCommand = 35,
    ExecuteMetaCommand = 36,
    EstimateMotion = 37,
    ResolveMotionVectorHeap = 38,
    SetPipelineState1 = 39,
    InitializeExtensionCommand = 40,
    ExecuteExtensionCommand = 41,
    DispatchMesh = 42,
    EncodeFrame = 43,
    ResolveEncoderOutputMetadata = 44,
    Barrier = 45,
}

/// Names of [`OperationTag`] values, indexed by the raw tag value.
static OPERATION_NAMES: [&str; 46] = [
    "SETMARKER",
    "BEGINEVENT",
    "ENDEVENT",
    "DRAWINSTANCED",
    "DRAWINDEXEDINSTANCED",
    "EXECUTEINDIRECT",
    "DISPATCH",
    "COPYBUFFERREGION",
    "COPYTEXTUREREGION",
    "COPYRESOURCE",
    "COPYTILES",
    "RESOLVESUBRESOURCE",
    "CLEARRENDERTARGETVIEW",
    "CLEARUNORDEREDACCESSVIEW",
    "CLEARDEPTHSTENCILVIEW",
    "RESOURCEBARRIER",
    "EXECUTEBUNDLE",
    "PRESENT",
    "RESOLVEQUERYDATA",
    "BEGINSUBMISSION",
    "ENDSUBMISSION",
    "DECODEFRAME",
    "PROCESSFRAMES",
    "ATOMICCOPYBUFFERUINT",
    "ATOMICCOPYBUFFERUINT64",
    "RESOLVESUBRESOURCEREGION",
    "WRITEBUFFERIMMEDIATE",
    "DECODEFRAME1",
    "SETPROTECTEDRESOURCESESSION",
    "DECODEFRAME2",
    "PROCESSFRAMES1",
    "BUILDRAYTRACINGACCELERATIONSTRUCTURE",
    "EMITRAYTRACINGACCELERATIONSTRUCTUREPOSTBUILDINFO",
    "COPYRAYTRACINGACCELERATIONSTRUCTURE",
    "DISPATCHRAYS",
    "INITIALIZEMETACOMMAND",
    "EXECUTEMETACOMMAND",
    "ESTIMATEMOTION",
    "RESOLVEMOTIONVECTORHEAP",
    "SETPIPELINESTATE1",
    "INITIALIZEEXTENSIONCOMMAND",
    "EXECUTEEXTENSIONCOMMAND",
    "DISPATCHMESH",
    "ENCODEFRAME",
    "RESOLVEENCODEROUTPUTMETADATA",
    "BARRIER",
];

impl OperationTag {
    /// The upper-case name of this operation, as printed in reports.
    pub fn name(self) -> &'static str {
        OPERATION_NAMES[self as usize]
    }

    /// The raw value of this tag.
    pub fn raw(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for OperationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Get the name of a raw operation value, or [`UNKNOWN`] if it is out of range.
pub fn operation_name(raw: u32) -> &'static str {
    OPERATION_NAMES
        .get(raw as usize)
        .copied()
        .unwrap_or(UNKNOWN)
}

/// The kind of object an allocation belonged to, as reported by the
/// device-removed page fault diagnostics.
///
/// The values are sparse; anything not listed here is [`UNKNOWN`].
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Primitive)]
pub enum AllocationType {
    CommandQueue = 19,
    CommandAllocator = 20,
    PipelineState = 21,
    CommandList = 22,
    Fence = 23,
    DescriptorHeap = 24,
    Heap = 25,
    QueryHeap = 27,
    CommandSignature = 28,
    PipelineLibrary = 29,
    VideoDecoder = 30,
    VideoProcessor = 32,
    Resource = 34,
    Pass = 35,
    CryptoSession = 36,
    CryptoSessionPolicy = 37,
    ProtectedResourceSession = 38,
    VideoDecoderHeap = 39,
    CommandPool = 40,
    CommandRecorder = 41,
    StateObject = 42,
    MetaCommand = 43,
    SchedulingGroup = 44,
    VideoMotionEstimator = 45,
    VideoMotionVectorHeap = 46,
    VideoExtensionCommand = 47,
    VideoEncoder = 48,
    VideoEncoderHeap = 49,
    Invalid = 0xffff_ffffu32,
}

impl AllocationType {
    /// The upper-case name of this allocation type, as printed in reports.
    pub fn name(self) -> &'static str {
        match self {
            AllocationType::CommandQueue => "COMMAND_QUEUE",
            AllocationType::CommandAllocator => "COMMAND_ALLOCATOR",
            AllocationType::PipelineState => "PIPELINE_STATE",
            AllocationType::CommandList => "COMMAND_LIST",
            AllocationType::Fence => "FENCE",
            AllocationType::DescriptorHeap => "DESCRIPTOR_HEAP",
            AllocationType::Heap => "HEAP",
            AllocationType::QueryHeap => "QUERY_HEAP",
            AllocationType::CommandSignature => "COMMAND_SIGNATURE",
            AllocationType::PipelineLibrary => "PIPELINE_LIBRARY",
            AllocationType::VideoDecoder => "VIDEO_DECODER",
            AllocationType::VideoProcessor => "VIDEO_PROCESSOR",
            AllocationType::Resource => "RESOURCE",
            AllocationType::Pass => "PASS",
            AllocationType::CryptoSession => "CRYPTOSESSION",
            AllocationType::CryptoSessionPolicy => "CRYPTOSESSIONPOLICY",
            AllocationType::ProtectedResourceSession => "PROTECTEDRESOURCESESSION",
            AllocationType::VideoDecoderHeap => "VIDEO_DECODER_HEAP",
            AllocationType::CommandPool => "COMMAND_POOL",
            AllocationType::CommandRecorder => "COMMAND_RECORDER",
            AllocationType::StateObject => "STATE_OBJECT",
            AllocationType::MetaCommand => "METACOMMAND",
            AllocationType::SchedulingGroup => "SCHEDULINGGROUP",
            AllocationType::VideoMotionEstimator => "VIDEO_MOTION_ESTIMATOR",
            AllocationType::VideoMotionVectorHeap => "VIDEO_MOTION_VECTOR_HEAP",
            AllocationType::VideoExtensionCommand => "VIDEO_EXTENSION_COMMAND",
            AllocationType::VideoEncoder => "VIDEO_ENCODER",
            AllocationType::VideoEncoderHeap => "VIDEO_ENCODER_HEAP",
            AllocationType::Invalid => "INVALID",
        }
    }
}

/// Get the name of a raw allocation type value, or [`UNKNOWN`] if it is not in the table.
pub fn allocation_type_name(raw: u32) -> &'static str {
    AllocationType::from_u32(raw).map_or(UNKNOWN, AllocationType::name)
}
