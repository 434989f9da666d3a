use crate::foundation::core::GlSize;

/// Orientation of the pixel data stored in a framebuffer, relative to how it should
/// be displayed.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl ImageOrientation {
    /// Rotation that turns pixels stored in `self` orientation into `target` orientation.
    pub fn rotation_needed_for(self, target: ImageOrientation) -> Rotation {
        use ImageOrientation::*;
        match (self, target) {
            (a, b) if a == b => Rotation::NoRotation,
            (Portrait, PortraitUpsideDown) | (PortraitUpsideDown, Portrait) => {
                Rotation::Rotate180
            }
            (LandscapeLeft, LandscapeRight) | (LandscapeRight, LandscapeLeft) => {
                Rotation::Rotate180
            }
            (Portrait, LandscapeLeft) => Rotation::RotateCounterclockwise,
            (LandscapeLeft, Portrait) => Rotation::RotateClockwise,
            (Portrait, LandscapeRight) => Rotation::RotateClockwise,
            (LandscapeRight, Portrait) => Rotation::RotateCounterclockwise,
            (PortraitUpsideDown, LandscapeLeft) => Rotation::RotateClockwise,
            (LandscapeLeft, PortraitUpsideDown) => Rotation::RotateCounterclockwise,
            (PortraitUpsideDown, LandscapeRight) => Rotation::RotateCounterclockwise,
            (LandscapeRight, PortraitUpsideDown) => Rotation::RotateClockwise,
            _ => Rotation::NoRotation,
        }
    }
}

/// Sampling rotation applied when an input texture is drawn into an output.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    NoRotation,
    RotateCounterclockwise,
    RotateClockwise,
    Rotate180,
    FlipHorizontally,
    FlipVertically,
    RotateClockwiseAndFlipVertically,
    RotateClockwiseAndFlipHorizontally,
}

impl Rotation {
    pub fn flips_dimensions(self) -> bool {
        matches!(
            self,
            Rotation::RotateCounterclockwise
                | Rotation::RotateClockwise
                | Rotation::RotateClockwiseAndFlipVertically
                | Rotation::RotateClockwiseAndFlipHorizontally
        )
    }

    /// Texture coordinates for the four corners of the standard quad, in strip order
    /// (bottom-left, bottom-right, top-left, top-right).
    pub fn texture_coordinates(self) -> [f32; 8] {
        match self {
            Rotation::NoRotation => [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            Rotation::RotateCounterclockwise => [0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0],
            Rotation::RotateClockwise => [1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            Rotation::Rotate180 => [1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0],
            Rotation::FlipHorizontally => [1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0],
            Rotation::FlipVertically => [0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
            Rotation::RotateClockwiseAndFlipVertically => {
                [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0]
            }
            Rotation::RotateClockwiseAndFlipHorizontally => {
                [1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0]
            }
        }
    }

    /// Size of an image of `size` after this rotation.
    pub fn rotated_size(self, size: GlSize) -> GlSize {
        if self.flips_dimensions() {
            size.transposed()
        } else {
            size
        }
    }
}

/// Quad covering the whole of clip space, in strip order.
pub const STANDARD_IMAGE_VERTICES: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];

#[cfg(test)]
#[path = "../../tests/unit/foundation/orientation.rs"]
mod tests;
