use std::path::Path;

use crate::foundation::core::GlSize;
use crate::foundation::error::{LumaError, LumaResult};
use crate::foundation::orientation::ImageOrientation;
use crate::graph::container::NodeId;
use crate::graph::node::{Node, NodeContext};
use crate::graph::pipeline::Pipeline;
use crate::render::framebuffer::{FramebufferId, FramebufferTiming};

/// Source holding one still image.
///
/// The image is uploaded once into a dedicated framebuffer the picture keeps locked for
/// its whole life, so it can be sent again at any time with
/// [`PictureInput::process_image`]. Frames are tagged as still images, which lets
/// operations retain them across renders.
pub struct PictureInput {
    label: String,
    image_name: Option<String>,
    framebuffer: Option<FramebufferId>,
    size: GlSize,
    has_processed_image: bool,
}

impl PictureInput {
    /// Upload `image` and register the picture in `pipeline`.
    pub fn add(
        pipeline: &mut Pipeline,
        image: &image::RgbaImage,
        orientation: ImageOrientation,
    ) -> LumaResult<NodeId> {
        let picture = Self::from_image(pipeline, image, orientation)?;
        Ok(pipeline.add_node(picture))
    }

    pub fn from_image(
        pipeline: &mut Pipeline,
        image: &image::RgbaImage,
        orientation: ImageOrientation,
    ) -> LumaResult<Self> {
        let size = GlSize::new(image.width(), image.height())?;
        let framebuffer = pipeline.import_rgba8(
            size,
            image.as_raw(),
            orientation,
            FramebufferTiming::StillImage,
        )?;
        tracing::debug!(width = size.width, height = size.height, "uploaded picture");
        Ok(Self {
            label: "picture_input".to_string(),
            image_name: None,
            framebuffer: Some(framebuffer),
            size,
            has_processed_image: false,
        })
    }

    /// Decode the image file at `path` (any format the `image` crate reads).
    pub fn from_path(
        pipeline: &mut Pipeline,
        path: &Path,
        orientation: ImageOrientation,
    ) -> LumaResult<Self> {
        let image = image::open(path)?.to_rgba8();
        let mut picture = Self::from_image(pipeline, &image, orientation)?;
        picture.image_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Ok(picture)
    }

    pub fn with_image_name(mut self, name: impl Into<String>) -> Self {
        self.image_name = Some(name.into());
        self
    }

    pub fn image_name(&self) -> Option<&str> {
        self.image_name.as_deref()
    }

    pub fn size(&self) -> GlSize {
        self.size
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    pub fn has_processed_image(&self) -> bool {
        self.has_processed_image
    }

    /// Send the image to every target of `picture`.
    #[tracing::instrument(level = "trace", skip(pipeline))]
    pub fn process_image(pipeline: &mut Pipeline, picture: NodeId) -> LumaResult<()> {
        let framebuffer = pipeline
            .node::<PictureInput>(picture)
            .ok_or_else(|| LumaError::validation(format!("node {picture:?} is not a picture input")))?
            .framebuffer
            .ok_or_else(|| LumaError::validation("picture input has released its image"))?;
        pipeline.lock(framebuffer);
        pipeline.update_targets(picture, framebuffer)?;
        if let Some(p) = pipeline.node_mut::<PictureInput>(picture) {
            p.has_processed_image = true;
        }
        Ok(())
    }
}

impl Node for PictureInput {
    fn label(&self) -> &str {
        self.image_name.as_deref().unwrap_or(&self.label)
    }

    fn maximum_inputs(&self) -> u32 {
        0
    }

    fn new_framebuffer_available(
        &mut self,
        framebuffer: FramebufferId,
        index: u32,
        ctx: &mut NodeContext<'_>,
    ) -> LumaResult<Option<FramebufferId>> {
        tracing::warn!(index, "picture input has no inputs, frame dropped");
        ctx.cache.unlock(framebuffer);
        Ok(None)
    }

    fn release_resources(&mut self, ctx: &mut NodeContext<'_>) {
        if let Some(fb) = self.framebuffer.take() {
            ctx.cache.unlock(fb);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/sources/picture.rs"]
mod tests;
