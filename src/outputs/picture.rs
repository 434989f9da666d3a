use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use image::ImageEncoder;

use crate::foundation::core::Color;
use crate::foundation::error::{LumaError, LumaResult};
use crate::foundation::orientation::{ImageOrientation, Rotation, STANDARD_IMAGE_VERTICES};
use crate::graph::container::NodeId;
use crate::graph::node::{Node, NodeContext};
use crate::graph::pipeline::Pipeline;
use crate::graph::queue::QueueHandle;
use crate::outputs::render_to_rgba;
use crate::render::framebuffer::FramebufferId;
use crate::sources::picture::PictureInput;

/// Encoded file format for exports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PictureFileFormat {
    #[default]
    Png,
    Jpeg,
}

impl PictureFileFormat {
    /// Format implied by a file extension (`png`, `jpg`, `jpeg`).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

pub type ImageCallback = Box<dyn FnMut(&image::RgbaImage) + Send>;
pub type EncodedImageCallback = Box<dyn FnMut(&[u8]) + Send>;
pub type SaveCallback = Box<dyn FnOnce(LumaResult<PathBuf>) + Send>;

struct SaveRequest {
    path: PathBuf,
    on_result: Option<SaveCallback>,
}

/// Encode `image` as PNG or JPEG. JPEG drops the alpha channel.
pub fn encode_image(
    image: &image::RgbaImage,
    format: PictureFileFormat,
    jpeg_quality: u8,
) -> LumaResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    match format {
        PictureFileFormat::Png => image::codecs::png::PngEncoder::new(&mut out).write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )?,
        PictureFileFormat::Jpeg => {
            let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, jpeg_quality)
                .write_image(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    image::ExtendedColorType::Rgb8,
                )?
        }
    }
    Ok(out.into_inner())
}

/// Sink turning framebuffers into images: handed to a callback, encoded, or written to
/// disk.
pub struct PictureOutput {
    label: String,
    pub encoded_image_format: PictureFileFormat,
    pub jpeg_quality: u8,
    /// Drop each callback after it has fired once.
    pub only_capture_next_frame: bool,
    /// Keep the latest framebuffer so [`PictureOutput::synchronous_image_capture`] can
    /// read it later.
    pub keep_image_for_synchronous_capture: bool,
    /// Keep the alpha channel; otherwise exported pixels are opaque.
    pub export_with_alpha: bool,
    image_available: Option<ImageCallback>,
    encoded_image_available: Option<EncodedImageCallback>,
    save_request: Option<SaveRequest>,
    stored_framebuffer: Option<FramebufferId>,
    frames_received: u64,
}

impl Default for PictureOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl PictureOutput {
    pub fn new() -> Self {
        Self {
            label: "picture_output".to_string(),
            encoded_image_format: PictureFileFormat::Png,
            jpeg_quality: 80,
            only_capture_next_frame: true,
            keep_image_for_synchronous_capture: false,
            export_with_alpha: false,
            image_available: None,
            encoded_image_available: None,
            save_request: None,
            stored_framebuffer: None,
            frames_received: 0,
        }
    }

    pub fn on_image_available(&mut self, callback: impl FnMut(&image::RgbaImage) + Send + 'static) {
        self.image_available = Some(Box::new(callback));
    }

    pub fn on_encoded_image_available(&mut self, callback: impl FnMut(&[u8]) + Send + 'static) {
        self.encoded_image_available = Some(Box::new(callback));
    }

    /// Encode the next frame in `format` and write it to `path`.
    pub fn save_next_frame_to_path(&mut self, path: impl Into<PathBuf>, format: PictureFileFormat) {
        self.only_capture_next_frame = true;
        self.encoded_image_format = format;
        self.save_request = Some(SaveRequest {
            path: path.into(),
            on_result: None,
        });
    }

    /// Like [`PictureOutput::save_next_frame_to_path`], reporting the outcome to `on_result`.
    pub fn save_next_frame_to_path_with(
        &mut self,
        path: impl Into<PathBuf>,
        format: PictureFileFormat,
        on_result: impl FnOnce(LumaResult<PathBuf>) + Send + 'static,
    ) {
        self.save_next_frame_to_path(path, format);
        if let Some(request) = &mut self.save_request {
            request.on_result = Some(Box::new(on_result));
        }
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn stored_framebuffer(&self) -> Option<FramebufferId> {
        self.stored_framebuffer
    }

    fn wants_pixels(&self) -> bool {
        self.image_available.is_some()
            || self.encoded_image_available.is_some()
            || self.save_request.is_some()
    }

    fn image_from_framebuffer(
        &self,
        ctx: &mut NodeContext<'_>,
        framebuffer: FramebufferId,
    ) -> LumaResult<image::RgbaImage> {
        let size = ctx.cache.framebuffer(framebuffer)?.size();
        let mut frame = render_to_rgba(
            ctx,
            framebuffer,
            Rotation::NoRotation,
            size,
            STANDARD_IMAGE_VERTICES,
            Color::TRANSPARENT,
        )?;
        if !self.export_with_alpha {
            for px in frame.data.chunks_exact_mut(4) {
                px[3] = 255;
            }
        }
        frame.into_image()
    }

    #[tracing::instrument(level = "debug", skip_all, fields(output = %self.label))]
    fn export(&mut self, ctx: &mut NodeContext<'_>, framebuffer: FramebufferId) -> LumaResult<()> {
        let image = self.image_from_framebuffer(ctx, framebuffer)?;

        if let Some(callback) = &mut self.image_available {
            callback(&image);
            if self.only_capture_next_frame {
                self.image_available = None;
            }
        }

        if self.encoded_image_available.is_none() && self.save_request.is_none() {
            return Ok(());
        }
        let encoded = encode_image(&image, self.encoded_image_format, self.jpeg_quality)?;
        if let Some(callback) = &mut self.encoded_image_available {
            callback(&encoded);
            if self.only_capture_next_frame {
                self.encoded_image_available = None;
            }
        }
        if let Some(request) = self.save_request.take() {
            let result = std::fs::write(&request.path, &encoded)
                .map(|()| request.path.clone())
                .map_err(LumaError::from);
            match &result {
                Ok(path) => tracing::debug!(path = %path.display(), "saved frame"),
                Err(err) => {
                    tracing::warn!(path = %request.path.display(), error = %err, "could not save frame");
                }
            }
            if let Some(on_result) = request.on_result {
                on_result(result);
            }
        }
        Ok(())
    }

    /// Read the stored framebuffer while on the processing thread.
    pub fn capture_stored_image(pipeline: &mut Pipeline, output: NodeId) -> LumaResult<image::RgbaImage> {
        pipeline.with_node::<PictureOutput, _>(output, |o, ctx| {
            let stored = o.stored_framebuffer.ok_or_else(|| {
                LumaError::validation(
                    "synchronous capture needs keep_image_for_synchronous_capture and a received frame",
                )
            })?;
            o.image_from_framebuffer(ctx, stored)
        })?
    }

    /// Read the stored framebuffer from any thread other than the queue's own.
    pub fn synchronous_image_capture(queue: &QueueHandle, output: NodeId) -> LumaResult<image::RgbaImage> {
        queue.run_sync(move |pipeline| Self::capture_stored_image(pipeline, output))?
    }

    /// Attach a one-shot output to `source` that writes its next frame to `path`.
    pub fn save_next_frame(
        pipeline: &mut Pipeline,
        source: NodeId,
        path: impl Into<PathBuf>,
        format: PictureFileFormat,
    ) -> LumaResult<NodeId> {
        let mut output = PictureOutput::new();
        output.save_next_frame_to_path(path, format);
        let id = pipeline.add_node(output);
        pipeline.add_target(source, id, 0)?;
        Ok(id)
    }
}

impl Node for PictureOutput {
    fn label(&self) -> &str {
        &self.label
    }

    fn maximum_inputs(&self) -> u32 {
        1
    }

    fn new_framebuffer_available(
        &mut self,
        framebuffer: FramebufferId,
        _index: u32,
        ctx: &mut NodeContext<'_>,
    ) -> LumaResult<Option<FramebufferId>> {
        self.frames_received += 1;
        let result = if self.wants_pixels() {
            self.export(ctx, framebuffer)
        } else {
            Ok(())
        };

        if self.keep_image_for_synchronous_capture {
            if let Some(previous) = self.stored_framebuffer.replace(framebuffer) {
                ctx.cache.unlock(previous);
            }
        } else {
            ctx.cache.unlock(framebuffer);
        }
        result.map(|()| None)
    }

    fn release_resources(&mut self, ctx: &mut NodeContext<'_>) {
        if let Some(stored) = self.stored_framebuffer.take() {
            ctx.cache.unlock(stored);
        }
    }
}

/// Run `image` through the `operations` chain once and return the result.
///
/// The operations must already be in `pipeline`. A temporary picture input and output
/// are wired around them; both, and every edge added to link the chain, are removed
/// again afterwards.
pub fn filter_image(
    pipeline: &mut Pipeline,
    image: &image::RgbaImage,
    operations: &[NodeId],
) -> LumaResult<image::RgbaImage> {
    let picture = PictureInput::add(pipeline, image, ImageOrientation::Portrait)?;
    let slot: Arc<Mutex<Option<image::RgbaImage>>> = Arc::new(Mutex::new(None));

    let mut output = PictureOutput::new();
    output.export_with_alpha = true;
    let sink = Arc::clone(&slot);
    output.on_image_available(move |img| {
        *sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(img.clone());
    });
    let output = pipeline.add_node(output);

    let mut chain = Vec::with_capacity(operations.len() + 2);
    chain.push(picture);
    chain.extend_from_slice(operations);
    chain.push(output);

    let mut added = Vec::with_capacity(chain.len() - 1);
    let run = chain
        .windows(2)
        .try_for_each(|pair| -> LumaResult<()> {
            if connect_once(pipeline, pair[0], pair[1])? {
                added.push((pair[0], pair[1]));
            }
            Ok(())
        })
        .and_then(|()| PictureInput::process_image(pipeline, picture));
    for (source, target) in added {
        pipeline.remove_target(source, target);
    }
    pipeline.remove_node(picture)?;
    pipeline.remove_node(output)?;
    run?;

    let filtered = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    filtered.ok_or_else(|| LumaError::validation("the operation chain produced no image"))
}

/// Connect `source` to the next free input of `target` unless it already feeds it.
/// Returns whether an edge was added.
fn connect_once(pipeline: &mut Pipeline, source: NodeId, target: NodeId) -> LumaResult<bool> {
    if pipeline.sources(target).iter().any(|&(_, s)| s == source) {
        return Ok(false);
    }
    pipeline.add_target_at_next_index(source, target)?;
    Ok(true)
}

#[cfg(test)]
#[path = "../../tests/unit/outputs/picture.rs"]
mod tests;
