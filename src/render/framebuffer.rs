use std::any::Any;
use std::sync::Arc;

use crate::foundation::core::{GlSize, MediaTime};
use crate::foundation::orientation::{ImageOrientation, Rotation};
use crate::render::backend::{InputTexture, TextureHandle};

/// Registry handle of a framebuffer owned by a [`FramebufferCache`].
///
/// The generation makes handles to destroyed framebuffers detectably stale.
///
/// [`FramebufferCache`]: crate::render::cache::FramebufferCache
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// What a framebuffer's contents represent in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FramebufferTiming {
    /// A picture with no time of its own.
    StillImage,
    /// A decoded or derived video frame at a presentation time.
    VideoFrame(MediaTime),
    /// An intermediate result with no timing of its own.
    #[default]
    Transient,
}

impl FramebufferTiming {
    pub fn timestamp(self) -> Option<MediaTime> {
        match self {
            FramebufferTiming::VideoFrame(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_still(self) -> bool {
        matches!(self, FramebufferTiming::StillImage)
    }
}

/// Where a framebuffer's storage came from, which decides what happens when its
/// reference count reaches zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FramebufferOrigin {
    /// Pooled by the cache; returns to the free pool.
    Cache,
    /// Wraps an externally created texture; destroyed and its texture released.
    Imported,
}

/// Opaque payload carried from an operation's first input to its output.
pub type UserInfo = Arc<dyn Any + Send + Sync>;

/// A texture-backed image with a reference-counted lifetime.
#[derive(Clone)]
pub struct Framebuffer {
    pub(crate) id: FramebufferId,
    pub(crate) size: GlSize,
    pub(crate) orientation: ImageOrientation,
    pub(crate) timing: FramebufferTiming,
    pub(crate) texture: TextureHandle,
    pub(crate) has_stencil: bool,
    pub(crate) ref_count: u32,
    pub(crate) origin: FramebufferOrigin,
    pub(crate) user_info: Option<UserInfo>,
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("orientation", &self.orientation)
            .field("timing", &self.timing)
            .field("texture", &self.texture)
            .field("has_stencil", &self.has_stencil)
            .field("ref_count", &self.ref_count)
            .field("origin", &self.origin)
            .field("user_info", &self.user_info.is_some())
            .finish()
    }
}

impl Framebuffer {
    pub fn id(&self) -> FramebufferId {
        self.id
    }

    pub fn size(&self) -> GlSize {
        self.size
    }

    pub fn orientation(&self) -> ImageOrientation {
        self.orientation
    }

    pub fn timing(&self) -> FramebufferTiming {
        self.timing
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn has_stencil(&self) -> bool {
        self.has_stencil
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn origin(&self) -> FramebufferOrigin {
        self.origin
    }

    pub fn user_info(&self) -> Option<&UserInfo> {
        self.user_info.as_ref()
    }

    pub fn set_timing(&mut self, timing: FramebufferTiming) {
        self.timing = timing;
    }

    pub fn set_user_info(&mut self, info: Option<UserInfo>) {
        self.user_info = info;
    }

    /// Size this image has once rotated into `target` orientation.
    pub fn size_for_target_orientation(&self, target: ImageOrientation) -> GlSize {
        self.orientation
            .rotation_needed_for(target)
            .rotated_size(self.size)
    }

    /// Height over width as drawn after `rotation`.
    pub fn aspect_ratio_for_rotation(&self, rotation: Rotation) -> f32 {
        let (w, h) = (self.size.width as f32, self.size.height as f32);
        if rotation.flips_dimensions() { w / h } else { h / w }
    }

    pub fn texture_properties_for_target_orientation(
        &self,
        target: ImageOrientation,
    ) -> InputTexture {
        self.texture_properties_for_output_rotation(self.orientation.rotation_needed_for(target))
    }

    pub fn texture_properties_for_output_rotation(&self, rotation: Rotation) -> InputTexture {
        InputTexture {
            texture: self.texture,
            coordinates: rotation.texture_coordinates(),
        }
    }
}
