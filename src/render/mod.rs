//! Framebuffers, their pooling cache and the backends that draw into them.

/// Backend trait and draw command types.
pub mod backend;
/// Framebuffer pool and registry.
pub mod cache;
/// CPU reference rasterizer.
pub mod cpu;
/// Framebuffer metadata.
pub mod framebuffer;
#[cfg(feature = "gpu")]
/// wgpu backend.
pub mod gpu;
/// Built-in programs and the per-context program cache.
pub mod programs;
/// Shader sources, uniforms and CPU kernels.
pub mod shader;
