use crate::foundation::core::{Color, GlSize};
use crate::foundation::error::LumaResult;
use crate::foundation::orientation::ImageOrientation;
use crate::graph::node::{Node, NodeContext};
use crate::outputs::render_to_rgba;
use crate::render::backend::FrameRGBA;
use crate::render::framebuffer::FramebufferId;

/// Surface frames are shown on. Presentation is fire-and-forget: a presenter handles
/// its own failures.
pub trait Presenter: Send {
    fn present(&mut self, frame: FrameRGBA);
}

impl<F: FnMut(FrameRGBA) + Send> Presenter for F {
    fn present(&mut self, frame: FrameRGBA) {
        self(frame)
    }
}

/// How an image is fitted into a viewport of a different aspect ratio.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Stretch to cover the viewport exactly.
    Stretch,
    /// Fit inside the viewport, leaving bars of the background color.
    #[default]
    PreserveAspectRatio,
    /// Cover the viewport, cropping whatever overflows.
    PreserveAspectRatioAndFill,
}

impl FillMode {
    /// Quad corners placing an image of `image` size inside `viewport`.
    pub fn vertices(self, image: GlSize, viewport: GlSize) -> [f32; 8] {
        let (iw, ih) = (image.width as f32, image.height as f32);
        let (vw, vh) = (viewport.width as f32, viewport.height as f32);
        let (sx, sy) = match self {
            FillMode::Stretch => (1.0, 1.0),
            FillMode::PreserveAspectRatio | FillMode::PreserveAspectRatioAndFill => {
                let fit = (vw / iw).min(vh / ih);
                let fill = (vw / iw).max(vh / ih);
                let s = if self == FillMode::PreserveAspectRatio { fit } else { fill };
                (iw * s / vw, ih * s / vh)
            }
        };
        [-sx, -sy, sx, -sy, -sx, sy, sx, sy]
    }
}

/// Sink presenting every frame, upright, through a [`Presenter`].
pub struct DisplayOutput {
    label: String,
    presenter: Box<dyn Presenter>,
    /// Viewport size in pixels. `None` presents at the frame's upright size.
    pub viewport: Option<GlSize>,
    pub fill_mode: FillMode,
    pub background_color: Color,
    frames_presented: u64,
}

impl DisplayOutput {
    pub fn new(presenter: impl Presenter + 'static) -> Self {
        Self {
            label: "display_output".to_string(),
            presenter: Box::new(presenter),
            viewport: None,
            fill_mode: FillMode::default(),
            background_color: Color::BLACK,
            frames_presented: 0,
        }
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    fn present(&mut self, ctx: &mut NodeContext<'_>, framebuffer: FramebufferId) -> LumaResult<()> {
        let fb = ctx.cache.framebuffer(framebuffer)?;
        let upright = fb.size_for_target_orientation(ImageOrientation::Portrait);
        let rotation = fb.orientation().rotation_needed_for(ImageOrientation::Portrait);
        let viewport = self.viewport.unwrap_or(upright);
        let vertices = self.fill_mode.vertices(upright, viewport);
        let frame = render_to_rgba(
            ctx,
            framebuffer,
            rotation,
            viewport,
            vertices,
            self.background_color,
        )?;
        self.presenter.present(frame);
        self.frames_presented += 1;
        Ok(())
    }
}

impl Node for DisplayOutput {
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
        if let Err(err) = self.present(ctx, framebuffer) {
            tracing::warn!(error = %err, "frame not presented");
        }
        ctx.cache.unlock(framebuffer);
        Ok(None)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/outputs/display.rs"]
mod tests;
