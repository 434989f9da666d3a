//! Declarative filter chains loaded from JSON.
//!
//! ```json
//! { "steps": [
//!     { "op": "transform", "rotate_degrees": 90 },
//!     { "op": "lookup", "image": "grade.png", "intensity": 0.8 },
//!     { "op": "linear_light_blend", "overlay": "texture.png", "texture2_alpha": 0.5 }
//! ] }
//! ```
//!
//! Relative image paths resolve against the directory passed to [`FilterChain::build`].

use std::path::{Path, PathBuf};

use crate::foundation::error::{LumaError, LumaResult};
use crate::foundation::math::Matrix4x4;
use crate::foundation::orientation::ImageOrientation;
use crate::graph::container::NodeId;
use crate::graph::pipeline::Pipeline;
use crate::operations::{BasicOperation, LinearLightBlend, LookupFilter, TransformOperation};
use crate::render::programs::passthrough_source;
use crate::sources::picture::PictureInput;

fn one() -> f32 {
    1.0
}

fn half() -> f32 {
    0.5
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterStep {
    Passthrough,
    /// Either a full row-major `matrix`, or translate/rotate/scale applied in the order
    /// scale, rotate about z, translate.
    Transform {
        #[serde(default)]
        matrix: Option<[f32; 16]>,
        #[serde(default)]
        translate: Option<[f32; 3]>,
        #[serde(default)]
        rotate_degrees: Option<f32>,
        #[serde(default)]
        scale: Option<[f32; 3]>,
        #[serde(default)]
        anchor_top_left: bool,
        #[serde(default)]
        ignore_aspect_ratio: bool,
    },
    LinearLightBlend {
        overlay: PathBuf,
        #[serde(default = "one")]
        texture2_alpha: f32,
        #[serde(default = "half")]
        brightness_threshold: f32,
    },
    /// Without `image` the identity lookup image is used.
    Lookup {
        #[serde(default)]
        image: Option<PathBuf>,
        #[serde(default = "one")]
        intensity: f32,
    },
}

impl FilterStep {
    fn transform_matrix(
        matrix: Option<[f32; 16]>,
        translate: Option<[f32; 3]>,
        rotate_degrees: Option<f32>,
        scale: Option<[f32; 3]>,
    ) -> Matrix4x4 {
        if let Some(m) = matrix {
            return Matrix4x4::from_row_major(m);
        }
        let mut m = Matrix4x4::IDENTITY;
        if let Some([x, y, z]) = translate {
            m = m.translated_by(x, y, z);
        }
        if let Some(deg) = rotate_degrees {
            m = m.rotated_by(deg.to_radians(), 0.0, 0.0, 1.0);
        }
        if let Some([x, y, z]) = scale {
            m = m.scaled_by(x, y, z);
        }
        m
    }
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterChain {
    pub steps: Vec<FilterStep>,
}

/// Nodes created by [`FilterChain::build`].
#[derive(Clone, Debug, Default)]
pub struct BuiltChain {
    /// Operations in processing order. Not yet connected to each other.
    pub operations: Vec<NodeId>,
    /// Picture inputs feeding overlay and lookup images.
    pub auxiliary: Vec<NodeId>,
}

impl FilterChain {
    pub fn from_json(text: &str) -> LumaResult<Self> {
        serde_json::from_str(text)
            .map_err(|err| LumaError::validation(format!("invalid filter chain: {err}")))
    }

    pub fn from_path(path: &Path) -> LumaResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> LumaResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| LumaError::Other(err.into()))
    }

    pub fn validate(&self) -> LumaResult<()> {
        if self.steps.is_empty() {
            return Err(LumaError::validation("filter chain has no steps"));
        }
        Ok(())
    }

    /// Create one operation per step in `pipeline`, loading and sending any auxiliary
    /// images. Relative paths resolve against `base_dir`.
    #[tracing::instrument(level = "debug", skip_all, fields(steps = self.steps.len()))]
    pub fn build(&self, pipeline: &mut Pipeline, base_dir: &Path) -> LumaResult<BuiltChain> {
        self.validate()?;
        let mut built = BuiltChain::default();
        for step in &self.steps {
            let id = match step {
                FilterStep::Passthrough => {
                    let op = BasicOperation::new(pipeline, &passthrough_source())?;
                    pipeline.add_node(op)
                }
                FilterStep::Transform {
                    matrix,
                    translate,
                    rotate_degrees,
                    scale,
                    anchor_top_left,
                    ignore_aspect_ratio,
                } => {
                    let mut op = TransformOperation::new(pipeline)?.with_transform(
                        FilterStep::transform_matrix(*matrix, *translate, *rotate_degrees, *scale),
                    );
                    op.set_anchor_top_left_origin(*anchor_top_left);
                    op.set_ignore_aspect_ratio(*ignore_aspect_ratio);
                    pipeline.add_node(op)
                }
                FilterStep::LinearLightBlend {
                    overlay,
                    texture2_alpha,
                    brightness_threshold,
                } => {
                    let mut op = LinearLightBlend::new(pipeline)?;
                    op.set_texture2_alpha(*texture2_alpha);
                    op.set_brightness_threshold(*brightness_threshold);
                    let id = pipeline.add_node(op);
                    let picture = PictureInput::from_path(
                        pipeline,
                        &base_dir.join(overlay),
                        ImageOrientation::Portrait,
                    )?;
                    let picture = pipeline.add_node(picture);
                    pipeline.add_target(picture, id, 1)?;
                    PictureInput::process_image(pipeline, picture)?;
                    built.auxiliary.push(picture);
                    id
                }
                FilterStep::Lookup { image, intensity } => {
                    let mut op = LookupFilter::new(pipeline)?;
                    op.set_intensity(*intensity);
                    let id = pipeline.add_node(op);
                    let picture = match image {
                        Some(path) => PictureInput::from_path(
                            pipeline,
                            &base_dir.join(path),
                            ImageOrientation::Portrait,
                        )?,
                        None => PictureInput::from_image(
                            pipeline,
                            &crate::operations::lookup::identity_lookup_image(),
                            ImageOrientation::Portrait,
                        )?
                        .with_image_name("identity_lookup"),
                    };
                    let picture = pipeline.add_node(picture);
                    LookupFilter::set_lookup_image(pipeline, id, picture)?;
                    built.auxiliary.push(picture);
                    id
                }
            };
            built.operations.push(id);
        }
        Ok(built)
    }
}

#[cfg(test)]
#[path = "../tests/unit/chain.rs"]
mod tests;
