use std::collections::HashMap;

use crate::foundation::error::LumaResult;
use crate::render::backend::RenderBackend;
use crate::render::shader::{Fragment, ShaderProgram, ShaderSource};

const PASSTHROUGH_FRAGMENT: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(input_texture, input_sampler, in.texture_coordinate);
}
"#;

const STENCIL_MASK_FRAGMENT: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSample(input_texture, input_sampler, in.texture_coordinate);
    if (color.a < 0.5) {
        discard;
    }
    return color;
}
"#;

fn passthrough_fragment(f: &Fragment<'_>) -> Option<[f32; 4]> {
    Some(f.sample(0))
}

fn stencil_mask_fragment(f: &Fragment<'_>) -> Option<[f32; 4]> {
    let c = f.sample(0);
    (c[3] >= 0.5).then_some(c)
}

/// Copies input 0 unchanged.
pub fn passthrough_source() -> ShaderSource {
    ShaderSource::new("passthrough", 1, PASSTHROUGH_FRAGMENT, passthrough_fragment)
}

/// Keeps only fragments whose mask alpha reaches one half; used to write the stencil.
pub fn stencil_mask_source() -> ShaderSource {
    ShaderSource::new(
        "stencil_mask",
        1,
        STENCIL_MASK_FRAGMENT,
        stencil_mask_fragment,
    )
}

/// Per-context program cache keyed by shader text.
#[derive(Default)]
pub struct ProgramLibrary {
    programs: HashMap<String, ShaderProgram>,
}

impl ProgramLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `source`, or return the program already built from identical text.
    pub fn program(
        &mut self,
        backend: &mut dyn RenderBackend,
        source: &ShaderSource,
    ) -> LumaResult<ShaderProgram> {
        let key = source.cache_key();
        if let Some(p) = self.programs.get(&key) {
            return Ok(p.clone());
        }
        let handle = backend.compile_program(source).inspect_err(|err| {
            tracing::error!(
                program = %source.label,
                diagnostic = %err.diagnostic,
                "shader compile failed"
            );
        })?;
        tracing::debug!(program = %source.label, backend = backend.name(), "compiled program");
        let program = ShaderProgram::new(handle, source);
        self.programs.insert(key, program.clone());
        Ok(program)
    }

    pub fn passthrough(&mut self, backend: &mut dyn RenderBackend) -> LumaResult<ShaderProgram> {
        self.program(backend, &passthrough_source())
    }

    pub fn stencil_mask(&mut self, backend: &mut dyn RenderBackend) -> LumaResult<ShaderProgram> {
        self.program(backend, &stencil_mask_source())
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}
