use crate::foundation::error::LumaResult;
use crate::foundation::math::{Matrix4x4, orthographic_matrix};
use crate::foundation::orientation::Rotation;
use crate::graph::pipeline::Pipeline;
use crate::operations::basic::{BasicOperation, RenderHooks};
use crate::render::framebuffer::Framebuffer;
use crate::render::shader::{
    Fragment, ShaderProgram, ShaderSource, ShaderUniforms, UniformKind, UniformSettings,
};

const TRANSFORM_MATRIX: &str = "transform_matrix";
const ORTHOGRAPHIC_MATRIX: &str = "orthographic_matrix";

const TRANSFORM_VERTEX: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) texture_coordinate: vec2<f32>,
};

@vertex
fn vs_main(
    @location(0) position: vec2<f32>,
    @location(1) input_texture_coordinate: vec2<f32>,
) -> VertexOutput {
    var out: VertexOutput;
    let placed = uniforms.transform_matrix * vec4<f32>(position, 0.0, 1.0);
    let clip = placed * uniforms.orthographic_matrix;
    out.position = vec4<f32>(clip.x, -clip.y, clip.z, clip.w);
    out.texture_coordinate = input_texture_coordinate;
    return out;
}
"#;

const TRANSFORM_FRAGMENT: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(input_texture, input_sampler, in.texture_coordinate);
}
"#;

/// `clip = O * (p * T)`: the transform acts on row vectors, the projection on columns.
fn transform_vertex(position: [f32; 2], uniforms: &ShaderUniforms<'_>) -> [f32; 4] {
    let t = uniforms.matrix4(TRANSFORM_MATRIX).to_row_major();
    let o = uniforms.matrix4(ORTHOGRAPHIC_MATRIX).to_row_major();
    let p = [position[0], position[1], 0.0, 1.0];

    let mut placed = [0.0f32; 4];
    for (c, out) in placed.iter_mut().enumerate() {
        *out = (0..4).map(|r| p[r] * t[r * 4 + c]).sum();
    }
    let mut clip = [0.0f32; 4];
    for (r, out) in clip.iter_mut().enumerate() {
        *out = (0..4).map(|c| o[r * 4 + c] * placed[c]).sum();
    }
    clip
}

fn transform_fragment(f: &Fragment<'_>) -> Option<[f32; 4]> {
    Some(f.sample(0))
}

pub fn transform_source() -> ShaderSource {
    ShaderSource::new("transform", 1, TRANSFORM_FRAGMENT, transform_fragment)
        .with_vertex(TRANSFORM_VERTEX, transform_vertex)
        .with_uniform(TRANSFORM_MATRIX, UniformKind::Matrix4)
        .with_uniform(ORTHOGRAPHIC_MATRIX, UniformKind::Matrix4)
}

struct TransformHooks {
    transform: Matrix4x4,
    anchor_top_left_origin: bool,
    ignore_aspect_ratio: bool,
    vertices: [f32; 8],
}

impl RenderHooks for TransformHooks {
    fn configure(
        &mut self,
        input: &Framebuffer,
        rotation: Rotation,
        _program: &ShaderProgram,
        uniforms: &mut UniformSettings,
    ) {
        let aspect = if self.ignore_aspect_ratio {
            1.0
        } else {
            input.aspect_ratio_for_rotation(rotation)
        };
        let ortho = orthographic_matrix(
            -1.0,
            1.0,
            -aspect,
            aspect,
            -1.0,
            1.0,
            self.anchor_top_left_origin,
        );
        self.vertices = if self.anchor_top_left_origin {
            [0.0, 0.0, 1.0, 0.0, 0.0, aspect, 1.0, aspect]
        } else {
            [-1.0, -aspect, 1.0, -aspect, -1.0, aspect, 1.0, aspect]
        };
        uniforms.set(TRANSFORM_MATRIX, self.transform);
        uniforms.set(ORTHOGRAPHIC_MATRIX, ortho);
    }

    fn vertices(&self) -> [f32; 8] {
        self.vertices
    }
}

/// Draws its input through a 4x4 transform inside an aspect-preserving orthographic
/// space, so a rotation about z does not shear non-square images.
pub struct TransformOperation {
    op: BasicOperation,
    transform: Matrix4x4,
    anchor_top_left_origin: bool,
    ignore_aspect_ratio: bool,
}

impl TransformOperation {
    pub fn new(pipeline: &mut Pipeline) -> LumaResult<Self> {
        Ok(Self {
            op: BasicOperation::new(pipeline, &transform_source())?,
            transform: Matrix4x4::IDENTITY,
            anchor_top_left_origin: false,
            ignore_aspect_ratio: false,
        })
    }

    pub fn with_transform(mut self, transform: Matrix4x4) -> Self {
        self.transform = transform;
        self
    }

    pub fn transform(&self) -> Matrix4x4 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Matrix4x4) {
        self.transform = transform;
    }

    pub fn anchor_top_left_origin(&self) -> bool {
        self.anchor_top_left_origin
    }

    /// Place the origin at the top-left corner and use `[0, 1]` geometry instead of a
    /// centered quad.
    pub fn set_anchor_top_left_origin(&mut self, anchor: bool) {
        self.anchor_top_left_origin = anchor;
    }

    pub fn ignore_aspect_ratio(&self) -> bool {
        self.ignore_aspect_ratio
    }

    pub fn set_ignore_aspect_ratio(&mut self, ignore: bool) {
        self.ignore_aspect_ratio = ignore;
    }

    pub fn operation(&self) -> &BasicOperation {
        &self.op
    }

    pub fn operation_mut(&mut self) -> &mut BasicOperation {
        &mut self.op
    }

    fn hooks(&self) -> TransformHooks {
        TransformHooks {
            transform: self.transform,
            anchor_top_left_origin: self.anchor_top_left_origin,
            ignore_aspect_ratio: self.ignore_aspect_ratio,
            vertices: [0.0; 8],
        }
    }
}

operation_node!(TransformOperation);

#[cfg(test)]
#[path = "../../tests/unit/operations/transform.rs"]
mod tests;
