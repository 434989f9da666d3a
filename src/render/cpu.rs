use std::collections::HashMap;

use rayon::prelude::*;

use crate::foundation::core::{Color, GlSize};
use crate::foundation::error::{LumaError, LumaResult, ShaderCompileError};
use crate::render::backend::{
    FrameRGBA, ProgramHandle, QuadDraw, RenderBackend, StencilMode, TextureHandle,
};
use crate::render::shader::{
    CpuShader, Fragment, MAX_PROGRAM_INPUTS, ShaderSource, ShaderUniforms, TextureSampler,
    UniformDecl, UniformValue, validate_wgsl,
};

/// Options for the CPU reference backend.
#[derive(Debug, Clone, Copy)]
pub struct CpuBackendOpts {
    /// Shade rows in parallel on the rayon pool.
    pub parallel: bool,
}

impl Default for CpuBackendOpts {
    fn default() -> Self {
        Self { parallel: true }
    }
}

struct CpuTexture {
    size: GlSize,
    pixels: Vec<u8>,
    stencil: Option<Vec<u8>>,
}

impl CpuTexture {
    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, i64::from(self.size.width) - 1) as usize;
        let y = y.clamp(0, i64::from(self.size.height) - 1) as usize;
        let i = (y * self.size.width as usize + x) * 4;
        let p = &self.pixels[i..i + 4];
        [
            f32::from(p[0]) / 255.0,
            f32::from(p[1]) / 255.0,
            f32::from(p[2]) / 255.0,
            f32::from(p[3]) / 255.0,
        ]
    }

    fn sample_bilinear(&self, uv: [f32; 2]) -> [f32; 4] {
        let x = uv[0] * self.size.width as f32 - 0.5;
        let y = uv[1] * self.size.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let a = self.texel(x0, y0);
        let b = self.texel(x0 + 1, y0);
        let c = self.texel(x0, y0 + 1);
        let d = self.texel(x0 + 1, y0 + 1);
        let mut out = [0.0f32; 4];
        for i in 0..4 {
            let top = a[i] + (b[i] - a[i]) * fx;
            let bottom = c[i] + (d[i] - c[i]) * fx;
            out[i] = top + (bottom - top) * fy;
        }
        out
    }
}

struct CpuProgram {
    uniforms: Vec<UniformDecl>,
    inputs: u32,
    shader: CpuShader,
}

struct BoundInputs<'a> {
    textures: Vec<&'a CpuTexture>,
}

impl TextureSampler for BoundInputs<'_> {
    fn sample(&self, input: usize, uv: [f32; 2]) -> [f32; 4] {
        match self.textures.get(input) {
            Some(t) => t.sample_bilinear(uv),
            None => [0.0; 4],
        }
    }
}

/// Screen-space quad corner after the vertex stage.
#[derive(Clone, Copy)]
struct ScreenVertex {
    x: f32,
    y: f32,
    inv_w: f32,
    // texture coordinates pre-divided by w for perspective-correct interpolation
    uv_over_w: [[f32; 2]; MAX_PROGRAM_INPUTS as usize],
}

struct Triangle {
    v: [ScreenVertex; 3],
    area: f32,
}

impl Triangle {
    fn new(a: ScreenVertex, b: ScreenVertex, c: ScreenVertex) -> Option<Self> {
        let area = edge(&a, &b, c.x, c.y);
        (area.abs() > f32::EPSILON).then_some(Self { v: [a, b, c], area })
    }

    /// Barycentric weights of `(px, py)`, `None` when outside.
    fn weights(&self, px: f32, py: f32) -> Option<[f32; 3]> {
        let [a, b, c] = &self.v;
        let w0 = edge(b, c, px, py) / self.area;
        let w1 = edge(c, a, px, py) / self.area;
        let w2 = edge(a, b, px, py) / self.area;
        const EPS: f32 = -1e-6;
        (w0 >= EPS && w1 >= EPS && w2 >= EPS).then_some([w0, w1, w2])
    }
}

fn edge(a: &ScreenVertex, b: &ScreenVertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// Software rasterizer over RGBA8 buffers.
///
/// Row 0 of every texture corresponds to clip-space `y = -1` and texture `v = 0`, so a
/// quad drawn with unrotated coordinates copies rows in memory order.
pub struct CpuBackend {
    opts: CpuBackendOpts,
    textures: HashMap<TextureHandle, CpuTexture>,
    programs: HashMap<ProgramHandle, CpuProgram>,
    next_id: u64,
}

impl CpuBackend {
    pub fn new(opts: CpuBackendOpts) -> Self {
        Self {
            opts,
            textures: HashMap::new(),
            programs: HashMap::new(),
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn texture(&self, texture: TextureHandle) -> LumaResult<&CpuTexture> {
        self.textures
            .get(&texture)
            .ok_or_else(|| LumaError::backend(format!("unknown texture {texture:?}")))
    }
}

impl RenderBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn create_texture(&mut self, size: GlSize, with_stencil: bool) -> LumaResult<TextureHandle> {
        let handle = TextureHandle(self.next_id());
        self.textures.insert(
            handle,
            CpuTexture {
                size,
                pixels: vec![0; size.byte_len_rgba8()],
                stencil: with_stencil.then(|| vec![0; size.pixel_count()]),
            },
        );
        Ok(handle)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
    }

    fn upload_rgba8(&mut self, texture: TextureHandle, data: &[u8]) -> LumaResult<()> {
        let t = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| LumaError::backend(format!("unknown texture {texture:?}")))?;
        if data.len() != t.pixels.len() {
            return Err(LumaError::validation(format!(
                "upload of {} bytes into a {}x{} texture",
                data.len(),
                t.size.width,
                t.size.height
            )));
        }
        t.pixels.copy_from_slice(data);
        Ok(())
    }

    fn read_rgba8(&mut self, texture: TextureHandle) -> LumaResult<FrameRGBA> {
        let t = self.texture(texture)?;
        Ok(FrameRGBA {
            width: t.size.width,
            height: t.size.height,
            data: t.pixels.clone(),
        })
    }

    fn compile_program(
        &mut self,
        source: &ShaderSource,
    ) -> Result<ProgramHandle, ShaderCompileError> {
        validate_wgsl(source).map_err(|msg| ShaderCompileError::new(&source.label, msg))?;
        let handle = ProgramHandle(self.next_id());
        self.programs.insert(
            handle,
            CpuProgram {
                uniforms: source.uniforms.clone(),
                inputs: source.inputs,
                shader: source.cpu,
            },
        );
        Ok(handle)
    }

    fn clear(&mut self, target: TextureHandle, color: Color) -> LumaResult<()> {
        let t = self
            .textures
            .get_mut(&target)
            .ok_or_else(|| LumaError::backend(format!("unknown texture {target:?}")))?;
        let rgba = color.to_rgba8();
        for px in t.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        if let Some(stencil) = t.stencil.as_mut() {
            stencil.fill(0);
        }
        Ok(())
    }

    fn draw_quad(&mut self, draw: &QuadDraw<'_>) -> LumaResult<()> {
        let program = self
            .programs
            .get(&draw.program)
            .ok_or_else(|| LumaError::backend(format!("unknown program {:?}", draw.program)))?;
        if draw.inputs.len() < program.inputs as usize {
            return Err(LumaError::validation(format!(
                "program expects {} inputs, draw binds {}",
                program.inputs,
                draw.inputs.len()
            )));
        }
        if draw.inputs.iter().any(|i| i.texture == draw.target) {
            return Err(LumaError::validation(
                "a draw cannot sample its own render target",
            ));
        }

        let mut target = self
            .textures
            .remove(&draw.target)
            .ok_or_else(|| LumaError::backend(format!("unknown texture {:?}", draw.target)))?;
        let result = draw
            .inputs
            .iter()
            .take(program.inputs as usize)
            .map(|i| {
                self.textures
                    .get(&i.texture)
                    .ok_or_else(|| LumaError::backend(format!("unknown texture {:?}", i.texture)))
            })
            .collect::<LumaResult<Vec<_>>>()
            .and_then(|textures| {
                rasterize(
                    &mut target,
                    program,
                    draw,
                    &BoundInputs { textures },
                    self.opts.parallel,
                )
            });
        self.textures.insert(draw.target, target);
        result
    }

    fn live_textures(&self) -> usize {
        self.textures.len()
    }
}

fn rasterize(
    target: &mut CpuTexture,
    program: &CpuProgram,
    draw: &QuadDraw<'_>,
    inputs: &BoundInputs<'_>,
    parallel: bool,
) -> LumaResult<()> {
    let mut values: Vec<Option<UniformValue>> = vec![None; program.uniforms.len()];
    for b in draw.uniforms {
        if let Some(v) = values.get_mut(b.slot) {
            *v = Some(b.value);
        }
    }
    let uniforms = ShaderUniforms::new(&program.uniforms, &values);

    let n_inputs = (program.inputs as usize).min(MAX_PROGRAM_INPUTS as usize);
    let (w, h) = (target.size.width as f32, target.size.height as f32);
    let mut corners = [ScreenVertex {
        x: 0.0,
        y: 0.0,
        inv_w: 1.0,
        uv_over_w: [[0.0; 2]; MAX_PROGRAM_INPUTS as usize],
    }; 4];
    for (i, corner) in corners.iter_mut().enumerate() {
        let clip = (program.shader.vertex)(
            [draw.vertices[i * 2], draw.vertices[i * 2 + 1]],
            &uniforms,
        );
        if clip[3].abs() <= f32::EPSILON {
            return Ok(());
        }
        let inv_w = 1.0 / clip[3];
        corner.x = (clip[0] * inv_w * 0.5 + 0.5) * w;
        corner.y = (clip[1] * inv_w * 0.5 + 0.5) * h;
        corner.inv_w = inv_w;
        for (k, input) in draw.inputs.iter().take(n_inputs).enumerate() {
            corner.uv_over_w[k] = [
                input.coordinates[i * 2] * inv_w,
                input.coordinates[i * 2 + 1] * inv_w,
            ];
        }
    }
    // strip order: (0, 1, 2) and (2, 1, 3)
    let triangles: Vec<Triangle> = [
        Triangle::new(corners[0], corners[1], corners[2]),
        Triangle::new(corners[2], corners[1], corners[3]),
    ]
    .into_iter()
    .flatten()
    .collect();
    if triangles.is_empty() {
        return Ok(());
    }

    let mode = draw.stencil;
    let width = target.size.width as usize;
    let shade_row = |y: usize, row: &mut [u8], mut stencil: Option<&mut [u8]>| {
        let py = y as f32 + 0.5;
        let mut coords = [[0.0f32; 2]; MAX_PROGRAM_INPUTS as usize];
        for x in 0..width {
            if mode == StencilMode::TestMask
                && stencil.as_ref().is_some_and(|s| s[x] == 0)
            {
                continue;
            }
            let px = x as f32 + 0.5;
            let Some((tri, wts)) = triangles
                .iter()
                .find_map(|t| t.weights(px, py).map(|wts| (t, wts)))
            else {
                continue;
            };
            let inv_w: f32 = (0..3).map(|i| wts[i] * tri.v[i].inv_w).sum();
            for (k, c) in coords.iter_mut().enumerate().take(n_inputs) {
                for axis in 0..2 {
                    let num: f32 = (0..3).map(|i| wts[i] * tri.v[i].uv_over_w[k][axis]).sum();
                    c[axis] = num / inv_w;
                }
            }
            let fragment = Fragment::new(&coords[..n_inputs], &uniforms, inputs);
            let Some(color) = (program.shader.fragment)(&fragment) else {
                continue;
            };
            match mode {
                StencilMode::WriteMask => {
                    if let Some(s) = stencil.as_mut() {
                        s[x] = 1;
                    }
                }
                StencilMode::Disabled | StencilMode::TestMask => {
                    let out = Color::from(color).to_rgba8();
                    row[x * 4..x * 4 + 4].copy_from_slice(&out);
                }
            }
        }
    };

    let row_bytes = width * 4;
    match (mode, target.stencil.as_mut()) {
        (StencilMode::Disabled, _) => {
            if parallel {
                target
                    .pixels
                    .par_chunks_mut(row_bytes)
                    .enumerate()
                    .for_each(|(y, row)| shade_row(y, row, None));
            } else {
                target
                    .pixels
                    .chunks_mut(row_bytes)
                    .enumerate()
                    .for_each(|(y, row)| shade_row(y, row, None));
            }
        }
        (_, Some(stencil)) => {
            if parallel {
                target
                    .pixels
                    .par_chunks_mut(row_bytes)
                    .zip(stencil.par_chunks_mut(width))
                    .enumerate()
                    .for_each(|(y, (row, s))| shade_row(y, row, Some(s)));
            } else {
                target
                    .pixels
                    .chunks_mut(row_bytes)
                    .zip(stencil.chunks_mut(width))
                    .enumerate()
                    .for_each(|(y, (row, s))| shade_row(y, row, Some(s)));
            }
        }
        (_, None) => {
            return Err(LumaError::validation(
                "stencil draw into a target without a stencil attachment",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/render/cpu.rs"]
mod tests;
