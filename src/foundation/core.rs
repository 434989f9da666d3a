use crate::foundation::error::{LumaError, LumaResult};
use crate::foundation::math::Matrix4x4;

pub use kurbo::{Affine, Point};

/// Pixel dimensions of a framebuffer or texture.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct GlSize {
    pub width: u32,
    pub height: u32,
}

impl GlSize {
    pub fn new(width: u32, height: u32) -> LumaResult<Self> {
        if width == 0 || height == 0 {
            return Err(LumaError::validation(format!(
                "framebuffer size must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    pub fn pixel_count(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    pub fn byte_len_rgba8(self) -> usize {
        self.pixel_count().saturating_mul(4)
    }

    /// Swap width and height, used when a rotation turns the image on its side.
    pub fn transposed(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

impl From<Size> for GlSize {
    fn from(size: Size) -> Self {
        Self {
            width: size.width.round().max(1.0) as u32,
            height: size.height.round().max(1.0) as u32,
        }
    }
}

/// Floating point size used by geometry and layout code.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl From<GlSize> for Size {
    fn from(size: GlSize) -> Self {
        Self {
            width: size.width as f32,
            height: size.height as f32,
        }
    }
}

/// A 2D or 3D position. `z` is absent for planar coordinates and treated as `0.0`
/// by the transform helpers.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: Option<f32>,
}

impl Position {
    pub const CENTER: Self = Self::new(0.5, 0.5);
    pub const ZERO: Self = Self::new(0.0, 0.0);

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: None }
    }

    pub const fn new_3d(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z: Some(z) }
    }

    pub fn distance(self, other: Position) -> f32 {
        let dz = self.z.unwrap_or(0.0) - other.z.unwrap_or(0.0);
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + dz.powi(2)).sqrt()
    }

    /// Map this point through `m` as a row vector (`p' = p * m`), ignoring the
    /// projective column.
    pub fn applied_transform(self, m: &Matrix4x4) -> Position {
        let z = self.z.unwrap_or(0.0);
        Position::new_3d(
            m.m11 * self.x + m.m21 * self.y + m.m31 * z + m.m41,
            m.m12 * self.x + m.m22 * self.y + m.m32 * z + m.m42,
            m.m13 * self.x + m.m23 * self.y + m.m33 * z + m.m43,
        )
    }

    /// Like [`Position::applied_transform`] followed by the perspective divide.
    pub fn applied_projection(self, m: &Matrix4x4) -> Position {
        let p = self.applied_transform(m);
        let z = self.z.unwrap_or(0.0);
        let w = m.m14 * self.x + m.m24 * self.y + m.m34 * z + m.m44;
        Position::new_3d(p.x / w, p.y / w, p.z.unwrap_or(0.0) / w)
    }

    /// Inverse of [`Position::applied_projection`]. `None` when `m` is singular.
    pub fn applied_unprojection(self, m: &Matrix4x4) -> Option<Position> {
        m.inverted().map(|inv| self.applied_projection(&inv))
    }

    pub fn ndc_to_texture_coordinate(self) -> Position {
        Position {
            x: self.x * 0.5 + 0.5,
            y: self.y * 0.5 + 0.5,
            z: self.z.map(|z| z * 0.5 + 0.5),
        }
    }

    pub fn texture_to_ndc_coordinate(self) -> Position {
        Position {
            x: self.x * 2.0 - 1.0,
            y: self.y * 2.0 - 1.0,
            z: self.z.map(|z| z * 2.0 - 1.0),
        }
    }

    pub fn ndc_to_screen(self, size: Size) -> Point {
        let t = self.ndc_to_texture_coordinate();
        Point::new(
            f64::from(t.x) * f64::from(size.width),
            f64::from(t.y) * f64::from(size.height),
        )
    }
}

impl From<Point> for Position {
    fn from(p: Point) -> Self {
        Position::new(p.x as f32, p.y as f32)
    }
}

/// Straight (non-premultiplied) RGBA color with components in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        fn q(c: f32) -> u8 {
            (c.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }
}

impl From<[f32; 4]> for Color {
    fn from(c: [f32; 4]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }
}

/// Presentation time of a video frame, stored as whole microseconds so it can be
/// ordered and compared exactly.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct MediaTime(i64);

impl MediaTime {
    pub const ZERO: Self = Self(0);

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1000))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1_000_000.0).round() as i64)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn saturating_add(self, rhs: MediaTime) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    pub fn saturating_sub(self, rhs: MediaTime) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    pub fn abs_diff(self, rhs: MediaTime) -> MediaTime {
        Self(self.0.abs_diff(rhs.0).min(i64::MAX as u64) as i64)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
