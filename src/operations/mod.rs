//! Shader passes placed in the processing graph.

/// Implements [`crate::graph::node::Node`] for a wrapper around a
/// [`basic::BasicOperation`] stored in field `op`, rendering with the hooks returned by
/// the wrapper's `hooks()` method.
macro_rules! operation_node {
    ($ty:ty) => {
        impl $crate::graph::node::Node for $ty {
            fn label(&self) -> &str {
                $crate::graph::node::Node::label(&self.op)
            }

            fn maximum_inputs(&self) -> u32 {
                self.op.maximum_inputs()
            }

            fn new_framebuffer_available(
                &mut self,
                framebuffer: $crate::render::framebuffer::FramebufferId,
                index: u32,
                ctx: &mut $crate::graph::node::NodeContext<'_>,
            ) -> $crate::foundation::error::LumaResult<
                Option<$crate::render::framebuffer::FramebufferId>,
            > {
                let mut hooks = self.hooks();
                self.op.receive(framebuffer, index, ctx, &mut hooks)
            }

            fn mask_framebuffer_available(
                &mut self,
                framebuffer: $crate::render::framebuffer::FramebufferId,
                ctx: &mut $crate::graph::node::NodeContext<'_>,
            ) -> $crate::foundation::error::LumaResult<()> {
                self.op.receive_mask(framebuffer, ctx.cache);
                Ok(())
            }

            fn mask_attached(
                &mut self,
                attached: bool,
                ctx: &mut $crate::graph::node::NodeContext<'_>,
            ) -> $crate::foundation::error::LumaResult<()> {
                self.op.set_mask_attached(attached, ctx.cache);
                Ok(())
            }

            fn source_removed(&mut self, index: u32, ctx: &mut $crate::graph::node::NodeContext<'_>) {
                self.op.release_input(index, ctx.cache);
            }

            fn release_resources(&mut self, ctx: &mut $crate::graph::node::NodeContext<'_>) {
                self.op.release_all(ctx.cache);
            }
        }
    };
}

pub mod basic;
pub mod linear_light_blend;
pub mod lookup;
pub mod transform;

pub use basic::{BasicOperation, DefaultHooks, InputRetention, RenderHooks};
pub use linear_light_blend::LinearLightBlend;
pub use lookup::LookupFilter;
pub use transform::TransformOperation;
