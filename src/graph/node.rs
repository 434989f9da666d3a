use std::any::Any;

use crate::foundation::error::{LumaError, LumaResult};
use crate::graph::container::NodeId;
use crate::render::backend::{FrameRGBA, RenderBackend};
use crate::render::cache::FramebufferCache;
use crate::render::framebuffer::FramebufferId;
use crate::render::programs::ProgramLibrary;

/// Render state lent to a node while it handles a delivery.
pub struct NodeContext<'a> {
    pub cache: &'a mut FramebufferCache,
    pub backend: &'a mut dyn RenderBackend,
    pub programs: &'a mut ProgramLibrary,
    pub(crate) node: NodeId,
}

impl NodeContext<'_> {
    /// The node being called.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn read_framebuffer(&mut self, framebuffer: FramebufferId) -> LumaResult<FrameRGBA> {
        let texture = self.cache.framebuffer(framebuffer)?.texture();
        self.backend.read_rgba8(texture)
    }
}

/// A vertex of the processing graph.
///
/// Ownership rule for every delivery: the framebuffer arrives locked once on behalf of
/// the receiver. A node either keeps that lock (and unlocks later) or unlocks it before
/// returning. A returned framebuffer carries one lock owned by the caller, which
/// hands a lock to each downstream target and then drops its own.
pub trait Node: Any + Send {
    fn label(&self) -> &str;

    /// Number of input slots. Sources report zero.
    fn maximum_inputs(&self) -> u32;

    /// Handle a framebuffer arriving at input `index`. Returns the node's output, if
    /// this delivery produced one.
    fn new_framebuffer_available(
        &mut self,
        framebuffer: FramebufferId,
        index: u32,
        ctx: &mut NodeContext<'_>,
    ) -> LumaResult<Option<FramebufferId>>;

    /// Handle a new frame from the node's mask producer.
    fn mask_framebuffer_available(
        &mut self,
        framebuffer: FramebufferId,
        ctx: &mut NodeContext<'_>,
    ) -> LumaResult<()> {
        tracing::warn!(node = self.label(), "mask frame delivered to a node without mask support");
        ctx.cache.unlock(framebuffer);
        Ok(())
    }

    /// Called when a mask producer is attached or detached.
    fn mask_attached(&mut self, attached: bool, _ctx: &mut NodeContext<'_>) -> LumaResult<()> {
        if attached {
            return Err(LumaError::validation(format!(
                "node `{}` does not accept a mask",
                self.label()
            )));
        }
        Ok(())
    }

    /// Called after the producer feeding `index` was disconnected.
    fn source_removed(&mut self, _index: u32, _ctx: &mut NodeContext<'_>) {}

    /// Release every framebuffer the node still holds. Called when the node leaves the graph.
    fn release_resources(&mut self, _ctx: &mut NodeContext<'_>) {}
}
