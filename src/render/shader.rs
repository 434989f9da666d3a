//! Shader program description shared by every backend.
//!
//! A [`ShaderSource`] carries WGSL text for GPU backends and a pair of CPU kernels
//! for the reference rasterizer. The generated WGSL module layout is fixed:
//! binding 0 holds the uniform block (when the program declares uniforms),
//! binding 1 the shared sampler and bindings `2..` one texture per input.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::foundation::core::Color;
use crate::foundation::math::{Matrix3x3, Matrix4x4};
use crate::render::backend::ProgramHandle;

/// Maximum number of sampled inputs a single program can bind.
pub const MAX_PROGRAM_INPUTS: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Matrix3,
    Matrix4,
}

impl UniformKind {
    pub fn wgsl_type(self) -> &'static str {
        match self {
            UniformKind::Float => "f32",
            UniformKind::Vec2 => "vec2<f32>",
            UniformKind::Vec3 => "vec3<f32>",
            UniformKind::Vec4 => "vec4<f32>",
            UniformKind::Matrix3 => "mat3x3<f32>",
            UniformKind::Matrix4 => "mat4x4<f32>",
        }
    }

    /// (alignment, size) in bytes under WGSL uniform address space rules.
    pub fn layout(self) -> (usize, usize) {
        match self {
            UniformKind::Float => (4, 4),
            UniformKind::Vec2 => (8, 8),
            UniformKind::Vec3 => (16, 12),
            UniformKind::Vec4 => (16, 16),
            UniformKind::Matrix3 => (16, 48),
            UniformKind::Matrix4 => (16, 64),
        }
    }
}

/// A named uniform a program declares. Declaration order is buffer order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: String,
    pub kind: UniformKind,
}

impl UniformDecl {
    pub fn new(name: impl Into<String>, kind: UniformKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Closed set of values a uniform can hold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Matrix3(Matrix3x3),
    Matrix4(Matrix4x4),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Matrix3(_) => UniformKind::Matrix3,
            UniformValue::Matrix4(_) => UniformKind::Matrix4,
        }
    }

    /// Write this value at the start of `out` using the uniform buffer layout.
    /// Matrix rows become WGSL columns, so `m11..m14` fill the first column.
    pub fn write_le_bytes(&self, out: &mut [u8]) {
        fn put(out: &mut [u8], at: usize, v: f32) {
            out[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        match self {
            UniformValue::Float(v) => put(out, 0, *v),
            UniformValue::Vec2(v) => v.iter().enumerate().for_each(|(i, c)| put(out, i * 4, *c)),
            UniformValue::Vec3(v) => v.iter().enumerate().for_each(|(i, c)| put(out, i * 4, *c)),
            UniformValue::Vec4(v) => v.iter().enumerate().for_each(|(i, c)| put(out, i * 4, *c)),
            UniformValue::Matrix3(m) => {
                for (i, c) in m.to_row_major().iter().enumerate() {
                    // each vec3 column is padded to 16 bytes
                    put(out, (i / 3) * 16 + (i % 3) * 4, *c);
                }
            }
            UniformValue::Matrix4(m) => m
                .to_row_major()
                .iter()
                .enumerate()
                .for_each(|(i, c)| put(out, i * 4, *c)),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Color> for UniformValue {
    fn from(c: Color) -> Self {
        UniformValue::Vec4(c.to_array())
    }
}

impl From<Matrix3x3> for UniformValue {
    fn from(m: Matrix3x3) -> Self {
        UniformValue::Matrix3(m)
    }
}

impl From<Matrix4x4> for UniformValue {
    fn from(m: Matrix4x4) -> Self {
        UniformValue::Matrix4(m)
    }
}

/// Byte offsets of each declared uniform inside the uniform buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformLayout {
    pub offsets: Vec<usize>,
    pub size: usize,
}

impl UniformLayout {
    pub fn for_decls(decls: &[UniformDecl]) -> Self {
        let mut offsets = Vec::with_capacity(decls.len());
        let mut cursor = 0usize;
        for d in decls {
            let (align, size) = d.kind.layout();
            cursor = cursor.div_ceil(align) * align;
            offsets.push(cursor);
            cursor += size;
        }
        Self {
            offsets,
            size: cursor.div_ceil(16) * 16,
        }
    }
}

/// A value resolved to its slot in a compiled program.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundUniform {
    pub slot: usize,
    pub value: UniformValue,
}

/// Per-operation uniform table, keyed by name and resolved against a program when
/// a pass is bound.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UniformSettings {
    values: BTreeMap<String, UniformValue>,
}

impl UniformSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<UniformValue> {
        self.values.get(name).copied()
    }

    pub fn remove(&mut self, name: &str) -> Option<UniformValue> {
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Resolve names to program slots. Names the program does not declare are skipped,
    /// as are values whose type disagrees with the declaration.
    pub fn resolve(&self, program: &ShaderProgram) -> Vec<BoundUniform> {
        let mut bound = Vec::with_capacity(self.values.len());
        for (name, value) in &self.values {
            let Some(slot) = program.uniform_index(name) else {
                tracing::trace!(program = program.label(), uniform = %name, "uniform not declared");
                continue;
            };
            let declared = program.uniforms()[slot].kind;
            if declared != value.kind() {
                tracing::warn!(
                    program = program.label(),
                    uniform = %name,
                    ?declared,
                    provided = ?value.kind(),
                    "uniform type mismatch, value skipped"
                );
                continue;
            }
            bound.push(BoundUniform {
                slot,
                value: *value,
            });
        }
        bound
    }
}

/// Uniform values visible to CPU kernels, looked up by name.
pub struct ShaderUniforms<'a> {
    decls: &'a [UniformDecl],
    values: &'a [Option<UniformValue>],
}

impl<'a> ShaderUniforms<'a> {
    pub fn new(decls: &'a [UniformDecl], values: &'a [Option<UniformValue>]) -> Self {
        Self { decls, values }
    }

    pub fn get(&self, name: &str) -> Option<UniformValue> {
        let slot = self.decls.iter().position(|d| d.name == name)?;
        self.values.get(slot).copied().flatten()
    }

    /// Unset uniforms read as zero, matching GPU buffer defaults.
    pub fn float(&self, name: &str) -> f32 {
        match self.get(name) {
            Some(UniformValue::Float(v)) => v,
            _ => 0.0,
        }
    }

    pub fn matrix4(&self, name: &str) -> Matrix4x4 {
        match self.get(name) {
            Some(UniformValue::Matrix4(m)) => m,
            _ => Matrix4x4::from_row_major([0.0; 16]),
        }
    }

    pub fn vec4(&self, name: &str) -> [f32; 4] {
        match self.get(name) {
            Some(UniformValue::Vec4(v)) => v,
            _ => [0.0; 4],
        }
    }
}

/// Texture lookups available to a CPU fragment kernel.
pub trait TextureSampler {
    /// Sample `input` at normalized coordinate `uv` with linear filtering and
    /// clamp-to-edge addressing. Returns straight RGBA in `[0, 1]`.
    fn sample(&self, input: usize, uv: [f32; 2]) -> [f32; 4];
}

/// Fragment invocation state for CPU kernels.
pub struct Fragment<'a> {
    pub texture_coordinates: &'a [[f32; 2]],
    pub uniforms: &'a ShaderUniforms<'a>,
    sampler: &'a dyn TextureSampler,
}

impl<'a> Fragment<'a> {
    pub fn new(
        texture_coordinates: &'a [[f32; 2]],
        uniforms: &'a ShaderUniforms<'a>,
        sampler: &'a dyn TextureSampler,
    ) -> Self {
        Self {
            texture_coordinates,
            uniforms,
            sampler,
        }
    }

    /// Sample `input` at its own interpolated coordinate.
    pub fn sample(&self, input: usize) -> [f32; 4] {
        let uv = self
            .texture_coordinates
            .get(input)
            .copied()
            .unwrap_or([0.0, 0.0]);
        self.sampler.sample(input, uv)
    }

    pub fn sample_at(&self, input: usize, uv: [f32; 2]) -> [f32; 4] {
        self.sampler.sample(input, uv)
    }
}

/// Maps a quad corner to clip space `[x, y, z, w]`.
pub type VertexKernel = fn(position: [f32; 2], uniforms: &ShaderUniforms<'_>) -> [f32; 4];
/// Shades one fragment. `None` discards it.
pub type FragmentKernel = fn(fragment: &Fragment<'_>) -> Option<[f32; 4]>;

/// CPU rendition of a program, run by the reference rasterizer.
#[derive(Clone, Copy, Debug)]
pub struct CpuShader {
    pub vertex: VertexKernel,
    pub fragment: FragmentKernel,
}

pub fn standard_vertex(position: [f32; 2], _uniforms: &ShaderUniforms<'_>) -> [f32; 4] {
    [position[0], position[1], 0.0, 1.0]
}

/// Name of the interpolated texture coordinate for `input` in generated WGSL.
pub fn texture_coordinate_name(input: u32) -> String {
    if input == 0 {
        "texture_coordinate".to_string()
    } else {
        format!("texture_coordinate{}", input + 1)
    }
}

/// Name of the sampled texture binding for `input` in generated WGSL.
pub fn input_texture_name(input: u32) -> String {
    if input == 0 {
        "input_texture".to_string()
    } else {
        format!("input_texture{}", input + 1)
    }
}

/// Vertex stage passing positions through and forwarding one texture coordinate
/// per input. Render targets store row 0 at the top, so y is mirrored here to keep
/// clip-space `y = -1` on the first row.
pub fn default_vertex_wgsl(inputs: u32) -> String {
    let mut out = String::from("struct VertexOutput {\n    @builtin(position) position: vec4<f32>,\n");
    for i in 0..inputs {
        let _ = writeln!(out, "    @location({i}) {}: vec2<f32>,", texture_coordinate_name(i));
    }
    out.push_str("};\n\n@vertex\nfn vs_main(\n    @location(0) position: vec2<f32>,\n");
    for i in 0..inputs {
        let _ = writeln!(
            out,
            "    @location({}) input_{}: vec2<f32>,",
            i + 1,
            texture_coordinate_name(i)
        );
    }
    out.push_str(
        ") -> VertexOutput {\n    var out: VertexOutput;\n    out.position = vec4<f32>(position.x, -position.y, 0.0, 1.0);\n",
    );
    for i in 0..inputs {
        let name = texture_coordinate_name(i);
        let _ = writeln!(out, "    out.{name} = input_{name};");
    }
    out.push_str("    return out;\n}\n");
    out
}

/// Source text and CPU kernels for one program.
#[derive(Clone, Debug)]
pub struct ShaderSource {
    pub label: String,
    pub inputs: u32,
    pub vertex_wgsl: String,
    pub fragment_wgsl: String,
    pub uniforms: Vec<UniformDecl>,
    pub cpu: CpuShader,
}

impl ShaderSource {
    /// Program with the default pass-through vertex stage.
    pub fn new(
        label: impl Into<String>,
        inputs: u32,
        fragment_wgsl: impl Into<String>,
        fragment: FragmentKernel,
    ) -> Self {
        Self {
            label: label.into(),
            inputs,
            vertex_wgsl: default_vertex_wgsl(inputs),
            fragment_wgsl: fragment_wgsl.into(),
            uniforms: Vec::new(),
            cpu: CpuShader {
                vertex: standard_vertex,
                fragment,
            },
        }
    }

    pub fn with_vertex(mut self, vertex_wgsl: impl Into<String>, vertex: VertexKernel) -> Self {
        self.vertex_wgsl = vertex_wgsl.into();
        self.cpu.vertex = vertex;
        self
    }

    pub fn with_uniform(mut self, name: impl Into<String>, kind: UniformKind) -> Self {
        self.uniforms.push(UniformDecl::new(name, kind));
        self
    }

    /// Key used by program caches. Sources share a program only when label, uniform
    /// declarations, WGSL text and CPU kernels all agree.
    pub fn cache_key(&self) -> String {
        format!(
            "{}\n{:p}/{:p}\n{}",
            self.label,
            self.cpu.vertex,
            self.cpu.fragment,
            self.module_wgsl()
        )
    }

    pub fn uniform_layout(&self) -> UniformLayout {
        UniformLayout::for_decls(&self.uniforms)
    }

    /// Complete WGSL module: generated bindings, vertex stage and fragment stage.
    pub fn module_wgsl(&self) -> String {
        let mut out = String::new();
        if !self.uniforms.is_empty() {
            out.push_str("struct Uniforms {\n");
            for u in &self.uniforms {
                let _ = writeln!(out, "    {}: {},", u.name, u.kind.wgsl_type());
            }
            out.push_str("};\n\n@group(0) @binding(0) var<uniform> uniforms: Uniforms;\n");
        }
        out.push_str("@group(0) @binding(1) var input_sampler: sampler;\n");
        for i in 0..self.inputs {
            let _ = writeln!(
                out,
                "@group(0) @binding({}) var {}: texture_2d<f32>;",
                i + 2,
                input_texture_name(i)
            );
        }
        out.push('\n');
        out.push_str(&self.vertex_wgsl);
        out.push('\n');
        out.push_str(&self.fragment_wgsl);
        out
    }
}

/// A compiled and linked program.
#[derive(Clone, Debug)]
pub struct ShaderProgram {
    handle: ProgramHandle,
    label: Arc<str>,
    inputs: u32,
    uniforms: Arc<[UniformDecl]>,
}

impl ShaderProgram {
    pub(crate) fn new(handle: ProgramHandle, source: &ShaderSource) -> Self {
        Self {
            handle,
            label: Arc::from(source.label.as_str()),
            inputs: source.inputs,
            uniforms: Arc::from(source.uniforms.as_slice()),
        }
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn inputs(&self) -> u32 {
        self.inputs
    }

    pub fn uniforms(&self) -> &[UniformDecl] {
        &self.uniforms
    }

    /// Slot of the uniform named `name`, if the program declares it.
    pub fn uniform_index(&self, name: &str) -> Option<usize> {
        self.uniforms.iter().position(|u| u.name == name)
    }
}

/// Structural checks run before a program is accepted: balanced delimiters, both
/// entry points present, uniform names usable as WGSL identifiers and unique.
pub fn validate_wgsl(source: &ShaderSource) -> Result<(), String> {
    if source.inputs > MAX_PROGRAM_INPUTS {
        return Err(format!(
            "program binds {} inputs, at most {MAX_PROGRAM_INPUTS} are supported",
            source.inputs
        ));
    }

    let module = source.module_wgsl();
    let mut stack: Vec<(char, usize)> = Vec::new();
    for (line_no, line) in module.lines().enumerate() {
        let code = line.split("//").next().unwrap_or("");
        for ch in code.chars() {
            match ch {
                '(' | '{' | '[' => stack.push((ch, line_no + 1)),
                ')' | '}' | ']' => {
                    let want = match ch {
                        ')' => '(',
                        '}' => '{',
                        _ => '[',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == want => {}
                        Some((open, at)) => {
                            return Err(format!(
                                "line {}: `{ch}` closes `{open}` opened on line {at}",
                                line_no + 1
                            ));
                        }
                        None => return Err(format!("line {}: unmatched `{ch}`", line_no + 1)),
                    }
                }
                _ => {}
            }
        }
    }
    if let Some((open, at)) = stack.pop() {
        return Err(format!("line {at}: `{open}` is never closed"));
    }

    for (attr, entry) in [("@vertex", "fn vs_main"), ("@fragment", "fn fs_main")] {
        if !module.contains(attr) || !module.contains(entry) {
            return Err(format!("missing entry point `{}`", &entry[3..]));
        }
    }

    let mut seen = std::collections::HashSet::new();
    for u in &source.uniforms {
        let valid = u
            .name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && u.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(format!("uniform `{}` is not a valid identifier", u.name));
        }
        if !seen.insert(u.name.as_str()) {
            return Err(format!("uniform `{}` is declared twice", u.name));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/render/shader.rs"]
mod tests;
