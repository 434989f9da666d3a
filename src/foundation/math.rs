//! Matrix value types and projection builders.
//!
//! Matrices use the row-vector convention: a point maps as `p' = p * M` and the
//! translation lives in `m41..m43`. Composition therefore reads right to left in
//! visual order: `a.multiplied_by(b)` applies `b` first, then `a`.

use crate::foundation::core::Affine;
use crate::foundation::error::{LumaError, LumaResult};

/// Row-major 4x4 matrix.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Matrix4x4 {
    pub m11: f32,
    pub m12: f32,
    pub m13: f32,
    pub m14: f32,
    pub m21: f32,
    pub m22: f32,
    pub m23: f32,
    pub m24: f32,
    pub m31: f32,
    pub m32: f32,
    pub m33: f32,
    pub m34: f32,
    pub m41: f32,
    pub m42: f32,
    pub m43: f32,
    pub m44: f32,
}

impl Default for Matrix4x4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix4x4 {
    pub const IDENTITY: Self = Self::from_row_major([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub const fn from_row_major(v: [f32; 16]) -> Self {
        Self {
            m11: v[0],
            m12: v[1],
            m13: v[2],
            m14: v[3],
            m21: v[4],
            m22: v[5],
            m23: v[6],
            m24: v[7],
            m31: v[8],
            m32: v[9],
            m33: v[10],
            m34: v[11],
            m41: v[12],
            m42: v[13],
            m43: v[14],
            m44: v[15],
        }
    }

    /// Values in `m11, m12, .., m44` order. This is also the uniform upload order:
    /// a shader reading the buffer column-major sees the transpose, which is what
    /// lets WGSL write `transform * position`.
    pub fn to_row_major(&self) -> [f32; 16] {
        [
            self.m11, self.m12, self.m13, self.m14, //
            self.m21, self.m22, self.m23, self.m24, //
            self.m31, self.m32, self.m33, self.m34, //
            self.m41, self.m42, self.m43, self.m44,
        ]
    }

    fn rows(&self) -> [[f32; 4]; 4] {
        let v = self.to_row_major();
        [
            [v[0], v[1], v[2], v[3]],
            [v[4], v[5], v[6], v[7]],
            [v[8], v[9], v[10], v[11]],
            [v[12], v[13], v[14], v[15]],
        ]
    }

    /// Plain matrix product `a * b`: with row vectors, `a` is applied before `b`.
    fn concat(a: &Matrix4x4, b: &Matrix4x4) -> Matrix4x4 {
        let a = a.rows();
        let b = b.rows();
        let mut out = [0.0f32; 16];
        for r in 0..4 {
            for c in 0..4 {
                out[r * 4 + c] = (0..4).map(|k| a[r][k] * b[k][c]).sum();
            }
        }
        Matrix4x4::from_row_major(out)
    }

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.m41 = x;
        m.m42 = y;
        m.m43 = z;
        m
    }

    pub fn scale(sx: f32, sy: f32, sz: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.m11 = sx;
        m.m22 = sy;
        m.m33 = sz;
        m
    }

    /// Rotation of `angle` radians about the axis `(x, y, z)`. A zero axis yields identity.
    pub fn rotation(angle: f32, x: f32, y: f32, z: f32) -> Self {
        let len = (x * x + y * y + z * z).sqrt();
        if len == 0.0 {
            return Self::IDENTITY;
        }
        let (x, y, z) = (x / len, y / len, z / len);
        let (s, c) = angle.sin_cos();
        let t = 1.0 - c;
        Self::from_row_major([
            c + x * x * t,
            x * y * t + z * s,
            x * z * t - y * s,
            0.0,
            x * y * t - z * s,
            c + y * y * t,
            y * z * t + x * s,
            0.0,
            x * z * t + y * s,
            y * z * t - x * s,
            c + z * z * t,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
        ])
    }

    /// Apply `rhs` first, then `self`.
    pub fn multiplied_by(&self, rhs: &Matrix4x4) -> Matrix4x4 {
        Self::concat(rhs, self)
    }

    pub fn translated_by(&self, x: f32, y: f32, z: f32) -> Matrix4x4 {
        self.multiplied_by(&Self::translation(x, y, z))
    }

    pub fn rotated_by(&self, angle: f32, x: f32, y: f32, z: f32) -> Matrix4x4 {
        self.multiplied_by(&Self::rotation(angle, x, y, z))
    }

    pub fn scaled_by(&self, sx: f32, sy: f32, sz: f32) -> Matrix4x4 {
        self.multiplied_by(&Self::scale(sx, sy, sz))
    }

    pub fn determinant(&self) -> f32 {
        let m = self.rows();
        let mut det = 0.0;
        for c in 0..4 {
            let sign = if c % 2 == 0 { 1.0 } else { -1.0 };
            det += sign * m[0][c] * minor3(&m, 0, c);
        }
        det
    }

    /// Cofactor inverse. `None` when the matrix is singular.
    pub fn inverted(&self) -> Option<Matrix4x4> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() <= f32::MIN_POSITIVE {
            return None;
        }
        let m = self.rows();
        let mut out = [0.0f32; 16];
        for r in 0..4 {
            for c in 0..4 {
                let sign = if (r + c) % 2 == 0 { 1.0 } else { -1.0 };
                // adjugate is the transposed cofactor matrix
                out[c * 4 + r] = sign * minor3(&m, r, c) / det;
            }
        }
        Some(Matrix4x4::from_row_major(out))
    }

    pub fn from_affine(affine: Affine) -> Self {
        let [a, b, c, d, e, f] = affine.as_coeffs();
        let mut m = Self::IDENTITY;
        m.m11 = a as f32;
        m.m12 = b as f32;
        m.m21 = c as f32;
        m.m22 = d as f32;
        m.m41 = e as f32;
        m.m42 = f as f32;
        m
    }

    /// `Some` when the matrix only carries a planar affine transform.
    pub fn to_affine(&self) -> Option<Affine> {
        let planar = self.m13 == 0.0
            && self.m14 == 0.0
            && self.m23 == 0.0
            && self.m24 == 0.0
            && self.m31 == 0.0
            && self.m32 == 0.0
            && self.m33 == 1.0
            && self.m34 == 0.0
            && self.m43 == 0.0
            && self.m44 == 1.0;
        planar.then(|| {
            Affine::new([
                f64::from(self.m11),
                f64::from(self.m12),
                f64::from(self.m21),
                f64::from(self.m22),
                f64::from(self.m41),
                f64::from(self.m42),
            ])
        })
    }
}

impl From<Affine> for Matrix4x4 {
    fn from(affine: Affine) -> Self {
        Self::from_affine(affine)
    }
}

fn minor3(m: &[[f32; 4]; 4], skip_row: usize, skip_col: usize) -> f32 {
    let mut sub = [[0.0f32; 3]; 3];
    let mut ri = 0;
    for (r, row) in m.iter().enumerate() {
        if r == skip_row {
            continue;
        }
        let mut ci = 0;
        for (c, v) in row.iter().enumerate() {
            if c == skip_col {
                continue;
            }
            sub[ri][ci] = *v;
            ci += 1;
        }
        ri += 1;
    }
    sub[0][0] * (sub[1][1] * sub[2][2] - sub[1][2] * sub[2][1])
        - sub[0][1] * (sub[1][0] * sub[2][2] - sub[1][2] * sub[2][0])
        + sub[0][2] * (sub[1][0] * sub[2][1] - sub[1][1] * sub[2][0])
}

/// Row-major 3x3 matrix.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Matrix3x3 {
    pub m11: f32,
    pub m12: f32,
    pub m13: f32,
    pub m21: f32,
    pub m22: f32,
    pub m23: f32,
    pub m31: f32,
    pub m32: f32,
    pub m33: f32,
}

impl Matrix3x3 {
    pub const IDENTITY: Self = Self::from_row_major([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
    /// Keeps only the center tap of a 3x3 kernel.
    pub const CENTER_ONLY: Self =
        Self::from_row_major([0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);

    pub const fn from_row_major(v: [f32; 9]) -> Self {
        Self {
            m11: v[0],
            m12: v[1],
            m13: v[2],
            m21: v[3],
            m22: v[4],
            m23: v[5],
            m31: v[6],
            m32: v[7],
            m33: v[8],
        }
    }

    pub fn to_row_major(&self) -> [f32; 9] {
        [
            self.m11, self.m12, self.m13, self.m21, self.m22, self.m23, self.m31, self.m32,
            self.m33,
        ]
    }
}

impl Default for Matrix3x3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Orthographic projection. With `anchor_top_left` the origin moves to the top-left
/// corner of the viewport and the scale doubles, so normalized `[0, 1]` geometry fills
/// clip space.
pub fn orthographic_matrix(
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
    near: f32,
    far: f32,
    anchor_top_left: bool,
) -> Matrix4x4 {
    let r_l = right - left;
    let t_b = top - bottom;
    let f_n = far - near;
    let tz = -(far + near) / f_n;
    let (scale, tx, ty) = if anchor_top_left {
        (4.0, -1.0, -1.0)
    } else {
        (2.0, -(right + left) / r_l, -(top + bottom) / t_b)
    };

    Matrix4x4::from_row_major([
        scale / r_l,
        0.0,
        0.0,
        tx,
        0.0,
        scale / t_b,
        0.0,
        ty,
        0.0,
        0.0,
        scale / f_n,
        tz,
        0.0,
        0.0,
        0.0,
        1.0,
    ])
}

/// Perspective projection from the limits of a view frustum.
pub fn frustum_matrix(
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
    near: f32,
    far: f32,
) -> LumaResult<Matrix4x4> {
    if left == right || top == bottom || near == far {
        return Err(LumaError::validation("frustum planes must not coincide"));
    }
    if near <= 0.0 || far <= 0.0 {
        return Err(LumaError::validation(
            "frustum near and far planes must be positive",
        ));
    }

    let r_width = 1.0 / (right - left);
    let r_height = 1.0 / (top - bottom);
    let r_depth = 1.0 / (near - far);
    let x = 2.0 * (near * r_width);
    let y = 2.0 * (near * r_height);
    let a = (right + left) * r_width;
    let b = (top + bottom) * r_height;
    let c = (far + near) * r_depth;
    let d = 2.0 * (far * near * r_depth);
    Ok(Matrix4x4::from_row_major([
        x, 0.0, 0.0, 0.0, //
        0.0, y, 0.0, 0.0, //
        a, b, c, -1.0, //
        0.0, 0.0, d, 0.0,
    ]))
}

/// Viewing transform looking from `eye` towards `center` with the given `up` vector.
pub fn look_at_matrix(eye: [f32; 3], center: [f32; 3], up: [f32; 3]) -> LumaResult<Matrix4x4> {
    let mut f = [center[0] - eye[0], center[1] - eye[1], center[2] - eye[2]];
    normalize(&mut f).ok_or_else(|| LumaError::validation("look_at eye and center coincide"))?;

    let mut s = [
        f[1] * up[2] - f[2] * up[1],
        f[2] * up[0] - f[0] * up[2],
        f[0] * up[1] - f[1] * up[0],
    ];
    normalize(&mut s)
        .ok_or_else(|| LumaError::validation("look_at up vector is parallel to view direction"))?;

    let u = [
        s[1] * f[2] - s[2] * f[1],
        s[2] * f[0] - s[0] * f[2],
        s[0] * f[1] - s[1] * f[0],
    ];

    let m = Matrix4x4::from_row_major([
        s[0], u[0], -f[0], 0.0, //
        s[1], u[1], -f[1], 0.0, //
        s[2], u[2], -f[2], 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);
    Ok(m.translated_by(-eye[0], -eye[1], -eye[2]))
}

fn normalize(v: &mut [f32; 3]) -> Option<()> {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len == 0.0 || !len.is_finite() {
        return None;
    }
    for c in v.iter_mut() {
        *c /= len;
    }
    Some(())
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
