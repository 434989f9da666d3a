use crate::foundation::core::{Color, GlSize};
use crate::foundation::error::{LumaError, LumaResult, ShaderCompileError};
use crate::render::shader::{BoundUniform, ShaderSource};

/// Opaque handle to a backend texture (color plus optional stencil attachment).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

/// Opaque handle to a compiled program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub(crate) u64);

/// A frame read back from the backend as RGBA8 pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRGBA {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGBA8 bytes, tightly packed, row-major, straight alpha.
    pub data: Vec<u8>,
}

impl FrameRGBA {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + x as usize) * 4;
        Some([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }

    pub fn into_image(self) -> LumaResult<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.data)
            .ok_or_else(|| LumaError::backend("readback buffer does not match frame size"))
    }
}

/// How a draw interacts with the target's stencil attachment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StencilMode {
    /// Stencil is neither tested nor written.
    #[default]
    Disabled,
    /// Surviving fragments mark the stencil; color is not written.
    WriteMask,
    /// Color is written only where the stencil is marked.
    TestMask,
}

/// One sampled input of a draw: the texture and the texture coordinate of each quad
/// corner in strip order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputTexture {
    pub texture: TextureHandle,
    pub coordinates: [f32; 8],
}

/// A textured quad draw into `target`.
#[derive(Clone, Copy, Debug)]
pub struct QuadDraw<'a> {
    pub target: TextureHandle,
    pub program: ProgramHandle,
    /// Quad corners in strip order, as `[x0, y0, x1, y1, ..]`.
    pub vertices: [f32; 8],
    pub inputs: &'a [InputTexture],
    pub uniforms: &'a [BoundUniform],
    pub stencil: StencilMode,
}

/// The GPU collaborator behind a pipeline.
///
/// Every call happens on the pipeline's processing queue, so implementations need
/// `Send` but no internal locking.
pub trait RenderBackend: Send {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    fn create_texture(&mut self, size: GlSize, with_stencil: bool) -> LumaResult<TextureHandle>;

    /// Free a texture's storage. Unknown handles are ignored.
    fn release_texture(&mut self, texture: TextureHandle);

    /// Replace a texture's contents with tightly packed RGBA8 rows.
    fn upload_rgba8(&mut self, texture: TextureHandle, data: &[u8]) -> LumaResult<()>;

    fn read_rgba8(&mut self, texture: TextureHandle) -> LumaResult<FrameRGBA>;

    fn compile_program(
        &mut self,
        source: &ShaderSource,
    ) -> Result<ProgramHandle, ShaderCompileError>;

    /// Clear color to `color` and the stencil attachment (if any) to zero.
    fn clear(&mut self, target: TextureHandle, color: Color) -> LumaResult<()>;

    fn draw_quad(&mut self, draw: &QuadDraw<'_>) -> LumaResult<()>;

    /// Number of textures currently holding storage.
    fn live_textures(&self) -> usize;
}

/// Available backend kinds.
///
/// - `Cpu` is always available.
/// - `Gpu` requires the `gpu` cargo feature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Reference software rasterizer.
    #[default]
    Cpu,
    /// wgpu-backed renderer.
    Gpu,
}

/// Create a rendering backend implementation.
pub fn create_backend(kind: BackendKind) -> LumaResult<Box<dyn RenderBackend>> {
    match kind {
        BackendKind::Cpu => Ok(Box::new(crate::render::cpu::CpuBackend::new(
            crate::render::cpu::CpuBackendOpts::default(),
        ))),
        #[cfg(feature = "gpu")]
        BackendKind::Gpu => Ok(Box::new(crate::render::gpu::WgpuBackend::new()?)),
        #[cfg(not(feature = "gpu"))]
        BackendKind::Gpu => Err(LumaError::validation(
            "gpu backend requested but the `gpu` feature is disabled",
        )),
    }
}
