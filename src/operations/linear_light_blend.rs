use crate::foundation::error::LumaResult;
use crate::graph::pipeline::Pipeline;
use crate::operations::basic::{BasicOperation, DefaultHooks};
use crate::render::shader::{Fragment, ShaderSource, UniformKind};

const TEXTURE2_ALPHA: &str = "texture2_alpha";
const BRIGHTNESS_THRESHOLD: &str = "brightness_threshold";

const LINEAR_LIGHT_FRAGMENT: &str = r#"
fn linear_burn(base: f32, blend: f32) -> f32 {
    return max(0.0, base + blend - 1.0);
}

fn linear_dodge(base: f32, blend: f32) -> f32 {
    return min(1.0, base + blend);
}

fn linear_light(base: f32, blend: f32) -> f32 {
    if (blend <= uniforms.brightness_threshold) {
        return linear_burn(base, 2.0 * blend);
    }
    return linear_dodge(base, 2.0 * (blend - 0.5));
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let base = textureSample(input_texture, input_sampler, in.texture_coordinate);
    let overlay = textureSample(input_texture2, input_sampler, in.texture_coordinate2);
    let alpha = overlay.a * uniforms.texture2_alpha;
    let lit = vec3<f32>(
        linear_light(base.r, overlay.r),
        linear_light(base.g, overlay.g),
        linear_light(base.b, overlay.b),
    );
    return vec4<f32>(lit * alpha + base.rgb * (1.0 - alpha), 1.0);
}
"#;

fn linear_light(base: f32, blend: f32, threshold: f32) -> f32 {
    if blend <= threshold {
        (base + 2.0 * blend - 1.0).max(0.0)
    } else {
        (base + 2.0 * (blend - 0.5)).min(1.0)
    }
}

fn linear_light_fragment(f: &Fragment<'_>) -> Option<[f32; 4]> {
    let base = f.sample(0);
    let overlay = f.sample(1);
    let threshold = f.uniforms.float(BRIGHTNESS_THRESHOLD);
    let alpha = overlay[3] * f.uniforms.float(TEXTURE2_ALPHA);
    let mut out = [0.0, 0.0, 0.0, 1.0];
    for c in 0..3 {
        out[c] = linear_light(base[c], overlay[c], threshold) * alpha + base[c] * (1.0 - alpha);
    }
    Some(out)
}

pub fn linear_light_blend_source() -> ShaderSource {
    ShaderSource::new(
        "linear_light_blend",
        2,
        LINEAR_LIGHT_FRAGMENT,
        linear_light_fragment,
    )
    .with_uniform(TEXTURE2_ALPHA, UniformKind::Float)
    .with_uniform(BRIGHTNESS_THRESHOLD, UniformKind::Float)
}

pub(crate) fn clamp_unit(operation: &str, parameter: &str, value: f32) -> f32 {
    if (0.0..=1.0).contains(&value) {
        return value;
    }
    let clamped = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    tracing::warn!(operation, parameter, value, clamped, "parameter outside [0, 1], clamped");
    clamped
}

/// Linear light blend of input 1 over input 0.
///
/// Per channel, overlay values at or below `brightness_threshold` burn the base and
/// brighter ones dodge it. The result is mixed with the base by the overlay's alpha
/// scaled by `texture2_alpha`. Output alpha is always opaque.
pub struct LinearLightBlend {
    op: BasicOperation,
    texture2_alpha: f32,
    brightness_threshold: f32,
}

impl LinearLightBlend {
    pub fn new(pipeline: &mut Pipeline) -> LumaResult<Self> {
        let mut blend = Self {
            op: BasicOperation::new(pipeline, &linear_light_blend_source())?,
            texture2_alpha: 1.0,
            brightness_threshold: 0.5,
        };
        blend.set_texture2_alpha(1.0);
        blend.set_brightness_threshold(0.5);
        Ok(blend)
    }

    pub fn texture2_alpha(&self) -> f32 {
        self.texture2_alpha
    }

    pub fn set_texture2_alpha(&mut self, alpha: f32) {
        self.texture2_alpha = clamp_unit(self.op.program().label(), TEXTURE2_ALPHA, alpha);
        self.op.set_uniform(TEXTURE2_ALPHA, self.texture2_alpha);
    }

    pub fn brightness_threshold(&self) -> f32 {
        self.brightness_threshold
    }

    pub fn set_brightness_threshold(&mut self, threshold: f32) {
        self.brightness_threshold =
            clamp_unit(self.op.program().label(), BRIGHTNESS_THRESHOLD, threshold);
        self.op
            .set_uniform(BRIGHTNESS_THRESHOLD, self.brightness_threshold);
    }

    pub fn operation(&self) -> &BasicOperation {
        &self.op
    }

    pub fn operation_mut(&mut self) -> &mut BasicOperation {
        &mut self.op
    }

    fn hooks(&self) -> DefaultHooks {
        DefaultHooks
    }
}

operation_node!(LinearLightBlend);

#[cfg(test)]
#[path = "../../tests/unit/operations/linear_light_blend.rs"]
mod tests;
