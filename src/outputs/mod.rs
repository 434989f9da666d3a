//! Sinks consuming framebuffers at the end of the graph.

use crate::foundation::core::{Color, GlSize};
use crate::foundation::error::LumaResult;
use crate::foundation::orientation::{ImageOrientation, Rotation};
use crate::graph::node::NodeContext;
use crate::render::backend::{FrameRGBA, QuadDraw, StencilMode};
use crate::render::framebuffer::FramebufferId;

pub mod display;
pub mod memory;
pub mod picture;

pub use display::{DisplayOutput, FillMode, Presenter};
pub use memory::{CapturedFrame, InMemoryOutput};
pub use picture::{PictureFileFormat, PictureOutput, filter_image};

/// Draw `framebuffer` with `rotation` into a scratch framebuffer of `size` and read the
/// pixels back. The scratch framebuffer goes back to the pool afterwards.
pub(crate) fn render_to_rgba(
    ctx: &mut NodeContext<'_>,
    framebuffer: FramebufferId,
    rotation: Rotation,
    size: GlSize,
    vertices: [f32; 8],
    background: Color,
) -> LumaResult<FrameRGBA> {
    let input = ctx
        .cache
        .framebuffer(framebuffer)?
        .texture_properties_for_output_rotation(rotation);
    let program = ctx.programs.passthrough(&mut *ctx.backend)?;
    let scratch = ctx
        .cache
        .request(&mut *ctx.backend, size, ImageOrientation::Portrait, false)?;

    let result = (|| -> LumaResult<FrameRGBA> {
        let target = ctx.cache.framebuffer(scratch)?.texture();
        ctx.backend.clear(target, background)?;
        ctx.backend.draw_quad(&QuadDraw {
            target,
            program: program.handle(),
            vertices,
            inputs: std::slice::from_ref(&input),
            uniforms: &[],
            stencil: StencilMode::Disabled,
        })?;
        ctx.backend.read_rgba8(target)
    })();
    ctx.cache.unlock(scratch);
    result
}
