use crate::foundation::core::GlSize;
use crate::foundation::error::LumaResult;
use crate::foundation::orientation::ImageOrientation;
use crate::graph::node::{Node, NodeContext};
use crate::render::backend::FrameRGBA;
use crate::render::framebuffer::{FramebufferId, FramebufferTiming, UserInfo};

/// One frame recorded by an [`InMemoryOutput`].
#[derive(Clone)]
pub struct CapturedFrame {
    pub size: GlSize,
    pub orientation: ImageOrientation,
    pub timing: FramebufferTiming,
    pub user_info: Option<UserInfo>,
    /// Pixels as stored, without rotation. `None` when pixel capture is off.
    pub pixels: Option<FrameRGBA>,
}

impl std::fmt::Debug for CapturedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("size", &self.size)
            .field("orientation", &self.orientation)
            .field("timing", &self.timing)
            .field("has_user_info", &self.user_info.is_some())
            .field("has_pixels", &self.pixels.is_some())
            .finish()
    }
}

/// Sink recording what reaches it. Used for tests and debugging.
pub struct InMemoryOutput {
    label: String,
    capture_pixels: bool,
    frames: Vec<CapturedFrame>,
}

impl Default for InMemoryOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutput {
    pub fn new() -> Self {
        Self {
            label: "in_memory_output".to_string(),
            capture_pixels: true,
            frames: Vec::new(),
        }
    }

    /// Record metadata only, skipping the readback.
    pub fn metadata_only() -> Self {
        Self {
            capture_pixels: false,
            ..Self::new()
        }
    }

    pub fn frames(&self) -> &[CapturedFrame] {
        &self.frames
    }

    pub fn last(&self) -> Option<&CapturedFrame> {
        self.frames.last()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn take_frames(&mut self) -> Vec<CapturedFrame> {
        std::mem::take(&mut self.frames)
    }
}

impl Node for InMemoryOutput {
    fn label(&self) -> &str {
        &self.label
    }

    fn maximum_inputs(&self) -> u32 {
        1
    }

    fn new_framebuffer_available(
        &mut self,
        framebuffer: FramebufferId,
        _index: u32,
        ctx: &mut NodeContext<'_>,
    ) -> LumaResult<Option<FramebufferId>> {
        let captured = (|| -> LumaResult<CapturedFrame> {
            let fb = ctx.cache.framebuffer(framebuffer)?;
            let mut frame = CapturedFrame {
                size: fb.size(),
                orientation: fb.orientation(),
                timing: fb.timing(),
                user_info: fb.user_info().cloned(),
                pixels: None,
            };
            if self.capture_pixels {
                frame.pixels = Some(ctx.read_framebuffer(framebuffer)?);
            }
            Ok(frame)
        })();
        ctx.cache.unlock(framebuffer);
        self.frames.push(captured?);
        Ok(None)
    }
}
