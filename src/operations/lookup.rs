use crate::foundation::error::LumaResult;
use crate::graph::container::NodeId;
use crate::graph::pipeline::Pipeline;
use crate::operations::basic::{BasicOperation, DefaultHooks};
use crate::operations::linear_light_blend::clamp_unit;
use crate::render::shader::{Fragment, ShaderSource, UniformKind};
use crate::sources::picture::PictureInput;

const INTENSITY: &str = "intensity";

/// Side of a lookup image in pixels.
pub const LOOKUP_IMAGE_SIZE: u32 = 512;
/// Cells per row of a lookup image; each cell is one blue level.
const CELLS_PER_ROW: u32 = 8;
/// Side of one cell in pixels, and the number of levels per channel.
const CELL_SIZE: u32 = 64;

const LOOKUP_FRAGMENT: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSample(input_texture, input_sampler, in.texture_coordinate);
    let blue = color.b * 63.0;

    var quad1: vec2<f32>;
    quad1.y = floor(floor(blue) / 8.0);
    quad1.x = floor(blue) - quad1.y * 8.0;
    var quad2: vec2<f32>;
    quad2.y = floor(ceil(blue) / 8.0);
    quad2.x = ceil(blue) - quad2.y * 8.0;

    let inset = 0.5 / 512.0;
    let span = 0.125 - 1.0 / 512.0;
    let pos1 = quad1 * 0.125 + vec2<f32>(inset) + span * color.rg;
    let pos2 = quad2 * 0.125 + vec2<f32>(inset) + span * color.rg;

    let new1 = textureSample(input_texture2, input_sampler, pos1);
    let new2 = textureSample(input_texture2, input_sampler, pos2);
    let mapped = mix(new1, new2, fract(blue));
    return mix(color, vec4<f32>(mapped.rgb, color.a), uniforms.intensity);
}
"#;

fn lookup_position(quad: [f32; 2], rg: [f32; 2]) -> [f32; 2] {
    let inset = 0.5 / LOOKUP_IMAGE_SIZE as f32;
    let span = 0.125 - 1.0 / LOOKUP_IMAGE_SIZE as f32;
    [
        quad[0] * 0.125 + inset + span * rg[0],
        quad[1] * 0.125 + inset + span * rg[1],
    ]
}

fn cell(level: f32) -> [f32; 2] {
    let y = (level / 8.0).floor();
    [level - y * 8.0, y]
}

fn lookup_fragment(f: &Fragment<'_>) -> Option<[f32; 4]> {
    let color = f.sample(0);
    let blue = color[2] * 63.0;
    let rg = [color[0], color[1]];

    let new1 = f.sample_at(1, lookup_position(cell(blue.floor()), rg));
    let new2 = f.sample_at(1, lookup_position(cell(blue.ceil()), rg));
    let t = blue.fract();
    let intensity = f.uniforms.float(INTENSITY);

    let mut out = color;
    for c in 0..3 {
        let mapped = new1[c] + (new2[c] - new1[c]) * t;
        out[c] = color[c] + (mapped - color[c]) * intensity;
    }
    Some(out)
}

pub fn lookup_source() -> ShaderSource {
    ShaderSource::new("lookup", 2, LOOKUP_FRAGMENT, lookup_fragment)
        .with_uniform(INTENSITY, UniformKind::Float)
}

/// The 512x512 lookup image that maps every color to itself. Editing a copy of it in
/// an image editor is how new color grades are authored.
pub fn identity_lookup_image() -> image::RgbaImage {
    let scale = |v: u32| ((v as f32 / (CELL_SIZE - 1) as f32) * 255.0).round() as u8;
    image::RgbaImage::from_fn(LOOKUP_IMAGE_SIZE, LOOKUP_IMAGE_SIZE, |x, y| {
        let blue = (y / CELL_SIZE) * CELLS_PER_ROW + x / CELL_SIZE;
        image::Rgba([scale(x % CELL_SIZE), scale(y % CELL_SIZE), scale(blue), 255])
    })
}

/// Color grading through a 64-level lookup image bound to input 1.
///
/// Input 0 is the image being graded. The lookup image is normally a still
/// [`PictureInput`], so it is retained across renders and only input 0 needs new frames.
pub struct LookupFilter {
    op: BasicOperation,
    intensity: f32,
    lookup_image: Option<NodeId>,
}

impl LookupFilter {
    pub fn new(pipeline: &mut Pipeline) -> LumaResult<Self> {
        let mut filter = Self {
            op: BasicOperation::new(pipeline, &lookup_source())?,
            intensity: 1.0,
            lookup_image: None,
        };
        filter.set_intensity(1.0);
        Ok(filter)
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Mix between the original (0) and fully graded (1) color.
    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = clamp_unit(self.op.program().label(), INTENSITY, intensity);
        self.op.set_uniform(INTENSITY, self.intensity);
    }

    pub fn lookup_image(&self) -> Option<NodeId> {
        self.lookup_image
    }

    pub fn operation(&self) -> &BasicOperation {
        &self.op
    }

    pub fn operation_mut(&mut self) -> &mut BasicOperation {
        &mut self.op
    }

    /// Wire the picture node `lookup` into input 1 of `filter` and send its image.
    pub fn set_lookup_image(pipeline: &mut Pipeline, filter: NodeId, lookup: NodeId) -> LumaResult<()> {
        pipeline.add_target(lookup, filter, 1)?;
        pipeline.with_node::<LookupFilter, _>(filter, |f, _| f.lookup_image = Some(lookup))?;
        PictureInput::process_image(pipeline, lookup)
    }

    fn hooks(&self) -> DefaultHooks {
        DefaultHooks
    }
}

operation_node!(LookupFilter);

#[cfg(test)]
#[path = "../../tests/unit/operations/lookup.rs"]
mod tests;
