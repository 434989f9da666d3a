#![forbid(unsafe_code)]
//! Framebuffer-graph image and video processing.
//!
//! Sources push framebuffers into a graph of shader operations; each operation renders
//! once all of its inputs have arrived and hands the result on to its targets, until
//! the frames reach outputs. Framebuffers are reference counted and recycled through a
//! cache shared by the whole [`Pipeline`].

pub mod chain;
pub mod foundation;
pub mod graph;
pub mod operations;
pub mod outputs;
pub mod render;
pub mod sources;

pub use chain::{BuiltChain, FilterChain, FilterStep};
pub use foundation::core::{Color, GlSize, MediaTime, Position, Size};
pub use foundation::error::{LumaError, LumaResult, ShaderCompileError};
pub use foundation::math::{
    Matrix3x3, Matrix4x4, frustum_matrix, look_at_matrix, orthographic_matrix,
};
pub use foundation::orientation::{ImageOrientation, Rotation};
pub use graph::container::{NodeId, Port, Target};
pub use graph::node::{Node, NodeContext};
pub use graph::pipeline::{Pipeline, PipelineOpts, PipelineStats};
pub use graph::queue::{ProcessingQueue, QueueHandle};
pub use operations::{
    BasicOperation, InputRetention, LinearLightBlend, LookupFilter, RenderHooks,
    TransformOperation,
};
pub use outputs::{
    DisplayOutput, FillMode, InMemoryOutput, PictureFileFormat, PictureOutput, Presenter,
    filter_image,
};
pub use render::backend::{BackendKind, FrameRGBA, RenderBackend, create_backend};
pub use render::cache::{FramebufferCache, FramebufferCacheStats};
pub use render::cpu::{CpuBackend, CpuBackendOpts};
pub use render::framebuffer::{Framebuffer, FramebufferId, FramebufferTiming};
pub use render::shader::{ShaderSource, UniformKind, UniformValue};
pub use sources::{
    MediaPlayback, MoviePlayer, MoviePlayerOpts, PictureInput, PlayerEvent, RawDataInput,
    RawPixelBuffer,
};
