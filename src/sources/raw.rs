use crate::foundation::core::GlSize;
use crate::foundation::error::{LumaError, LumaResult};
use crate::foundation::orientation::ImageOrientation;
use crate::graph::container::NodeId;
use crate::graph::node::{Node, NodeContext};
use crate::graph::pipeline::Pipeline;
use crate::render::framebuffer::{FramebufferId, FramebufferTiming, UserInfo};

/// Memory layout of a [`RawPixelBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Luminance8,
    /// Full-range BT.601 4:2:0: a luma plane followed by an interleaved CbCr plane at
    /// half resolution (rounded up).
    Yuv420BiPlanarFullRange,
}

/// Decoded pixels handed over by a decoder or a capture device.
#[derive(Clone, Debug)]
pub struct RawPixelBuffer {
    pub size: GlSize,
    pub format: PixelFormat,
    /// One entry per plane, tightly packed rows.
    pub planes: Vec<Vec<u8>>,
}

fn plane_len(plane: &[u8], expected: usize, which: &str) -> LumaResult<()> {
    if plane.len() != expected {
        return Err(LumaError::validation(format!(
            "{which} plane holds {} bytes, expected {expected}",
            plane.len()
        )));
    }
    Ok(())
}

fn yuv_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = f32::from(y) / 255.0;
    let cb = f32::from(cb) / 255.0 - 0.5;
    let cr = f32::from(cr) / 255.0 - 0.5;
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    [
        to_u8(y + 1.402 * cr),
        to_u8(y - 0.344_136 * cb - 0.714_136 * cr),
        to_u8(y + 1.772 * cb),
    ]
}

impl RawPixelBuffer {
    pub fn rgba8(size: GlSize, data: Vec<u8>) -> Self {
        Self {
            size,
            format: PixelFormat::Rgba8,
            planes: vec![data],
        }
    }

    pub fn bgra8(size: GlSize, data: Vec<u8>) -> Self {
        Self {
            size,
            format: PixelFormat::Bgra8,
            planes: vec![data],
        }
    }

    pub fn luminance8(size: GlSize, data: Vec<u8>) -> Self {
        Self {
            size,
            format: PixelFormat::Luminance8,
            planes: vec![data],
        }
    }

    pub fn yuv420_bi_planar(size: GlSize, luma: Vec<u8>, chroma: Vec<u8>) -> Self {
        Self {
            size,
            format: PixelFormat::Yuv420BiPlanarFullRange,
            planes: vec![luma, chroma],
        }
    }

    /// Size of the interleaved CbCr plane in chroma samples.
    pub fn chroma_size(&self) -> (usize, usize) {
        (
            self.size.width.div_ceil(2) as usize,
            self.size.height.div_ceil(2) as usize,
        )
    }

    /// Convert to tightly packed RGBA8.
    pub fn to_rgba8(&self) -> LumaResult<Vec<u8>> {
        let pixels = self.size.pixel_count();
        let first = self
            .planes
            .first()
            .ok_or_else(|| LumaError::validation("pixel buffer has no planes"))?;
        match self.format {
            PixelFormat::Rgba8 => {
                plane_len(first, pixels * 4, "rgba")?;
                Ok(first.clone())
            }
            PixelFormat::Bgra8 => {
                plane_len(first, pixels * 4, "bgra")?;
                Ok(first
                    .chunks_exact(4)
                    .flat_map(|p| [p[2], p[1], p[0], p[3]])
                    .collect())
            }
            PixelFormat::Luminance8 => {
                plane_len(first, pixels, "luminance")?;
                Ok(first.iter().flat_map(|&l| [l, l, l, 255]).collect())
            }
            PixelFormat::Yuv420BiPlanarFullRange => {
                plane_len(first, pixels, "luma")?;
                let chroma = self
                    .planes
                    .get(1)
                    .ok_or_else(|| LumaError::validation("bi-planar buffer has no chroma plane"))?;
                let (cw, ch) = self.chroma_size();
                plane_len(chroma, cw * ch * 2, "chroma")?;

                let width = self.size.width as usize;
                let mut out = Vec::with_capacity(pixels * 4);
                for (i, &y) in first.iter().enumerate() {
                    let (px, py) = (i % width, i / width);
                    let c = ((py / 2) * cw + px / 2) * 2;
                    let [r, g, b] = yuv_to_rgb(y, chroma[c], chroma[c + 1]);
                    out.extend_from_slice(&[r, g, b, 255]);
                }
                Ok(out)
            }
        }
    }
}

/// Upload `buffer` into a pooled framebuffer and push it to the targets of `node`.
pub(crate) fn push_raw_frame(
    pipeline: &mut Pipeline,
    node: NodeId,
    buffer: &RawPixelBuffer,
    orientation: ImageOrientation,
    timing: FramebufferTiming,
    user_info: Option<UserInfo>,
) -> LumaResult<()> {
    let rgba = buffer.to_rgba8()?;
    let fb = pipeline.upload_rgba8(buffer.size, &rgba, orientation, timing)?;
    if let Some(framebuffer) = pipeline.cache_mut().get_mut(fb) {
        framebuffer.set_user_info(user_info);
    }
    pipeline.update_targets(node, fb)
}

/// Source fed with raw pixel buffers by the application, one frame per
/// [`RawDataInput::upload`].
pub struct RawDataInput {
    label: String,
    orientation: ImageOrientation,
    frames_sent: u64,
}

impl Default for RawDataInput {
    fn default() -> Self {
        Self::new()
    }
}

impl RawDataInput {
    pub fn new() -> Self {
        Self {
            label: "raw_data_input".to_string(),
            orientation: ImageOrientation::Portrait,
            frames_sent: 0,
        }
    }

    pub fn with_orientation(mut self, orientation: ImageOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Convert `buffer`, wrap it in a framebuffer with `timing` and push it downstream.
    #[tracing::instrument(level = "trace", skip(pipeline, buffer))]
    pub fn upload(
        pipeline: &mut Pipeline,
        input: NodeId,
        buffer: &RawPixelBuffer,
        timing: FramebufferTiming,
    ) -> LumaResult<()> {
        let orientation = pipeline
            .node::<RawDataInput>(input)
            .map(|n| n.orientation)
            .ok_or_else(|| LumaError::validation(format!("node {input:?} is not a raw data input")))?;
        push_raw_frame(pipeline, input, buffer, orientation, timing, None)?;
        if let Some(n) = pipeline.node_mut::<RawDataInput>(input) {
            n.frames_sent += 1;
        }
        Ok(())
    }
}

impl Node for RawDataInput {
    fn label(&self) -> &str {
        &self.label
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
        tracing::warn!(index, "raw data input has no inputs, frame dropped");
        ctx.cache.unlock(framebuffer);
        Ok(None)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/sources/raw.rs"]
mod tests;
