use std::collections::BTreeMap;

use crate::foundation::core::{Color, GlSize, MediaTime};
use crate::foundation::error::{LumaError, LumaResult};
use crate::foundation::orientation::{ImageOrientation, Rotation, STANDARD_IMAGE_VERTICES};
use crate::graph::node::{Node, NodeContext};
use crate::graph::pipeline::Pipeline;
use crate::render::backend::{InputTexture, QuadDraw, StencilMode};
use crate::render::cache::FramebufferCache;
use crate::render::framebuffer::{Framebuffer, FramebufferId, FramebufferTiming};
use crate::render::shader::{ShaderProgram, ShaderSource, UniformSettings, UniformValue};

/// Uniform fed automatically with the height/width ratio of input 0 when declared.
pub const ASPECT_RATIO_UNIFORM: &str = "aspect_ratio";

/// What happens to an input slot after a render.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRetention {
    /// Keep still images for the next render, release timed and transient frames.
    #[default]
    Automatic,
    /// Always keep the framebuffer until a new one replaces it.
    Retain,
    /// Always release the framebuffer, so the slot must be refilled before the next render.
    Release,
}

impl InputRetention {
    pub fn retains(self, timing: FramebufferTiming) -> bool {
        match self {
            InputRetention::Automatic => timing.is_still(),
            InputRetention::Retain => true,
            InputRetention::Release => false,
        }
    }
}

/// Points where a derived operation customizes the shared render procedure.
pub trait RenderHooks {
    /// Update uniforms for the frame about to be drawn. `rotation` is the rotation input 0
    /// is drawn with.
    fn configure(
        &mut self,
        input: &Framebuffer,
        rotation: Rotation,
        program: &ShaderProgram,
        uniforms: &mut UniformSettings,
    ) {
        configure_aspect_ratio(input, rotation, program, uniforms);
    }

    /// Quad geometry of the main pass.
    fn vertices(&self) -> [f32; 8] {
        STANDARD_IMAGE_VERTICES
    }
}

/// Hooks of a plain shader pass.
pub struct DefaultHooks;

impl RenderHooks for DefaultHooks {}

pub fn configure_aspect_ratio(
    input: &Framebuffer,
    rotation: Rotation,
    program: &ShaderProgram,
    uniforms: &mut UniformSettings,
) {
    if program.uniform_index(ASPECT_RATIO_UNIFORM).is_some() {
        uniforms.set(
            ASPECT_RATIO_UNIFORM,
            input.aspect_ratio_for_rotation(rotation),
        );
    }
}

/// A shader pass over `maximum_inputs` inputs.
///
/// Inputs accumulate per slot, last write wins. Once every slot is occupied the pass
/// renders into a framebuffer from the shared cache and the result is emitted to the
/// node's targets. After each render, slots are kept or released according to their
/// [`InputRetention`].
pub struct BasicOperation {
    label: String,
    maximum_inputs: u32,
    program: ShaderProgram,
    uniforms: UniformSettings,
    input_framebuffers: BTreeMap<u32, FramebufferId>,
    input_retention: BTreeMap<u32, InputRetention>,
    mask_attached: bool,
    mask_framebuffer: Option<FramebufferId>,
    overridden_output_size: Option<GlSize>,
    overridden_output_rotation: Option<Rotation>,
    background_color: Color,
    draw_unmodified_image_outside_of_mask: bool,
    activate_passthrough_on_next_frame: bool,
    release_all_inputs_after_rendering: bool,
    render_count: u64,
}

impl BasicOperation {
    /// Compile `source` in `pipeline` and build a pass taking `source.inputs` inputs.
    pub fn new(pipeline: &mut Pipeline, source: &ShaderSource) -> LumaResult<Self> {
        let program = pipeline.program(source)?;
        Self::with_program(program, source.inputs)
    }

    pub fn with_program(program: ShaderProgram, maximum_inputs: u32) -> LumaResult<Self> {
        if maximum_inputs == 0 {
            return Err(LumaError::validation("an operation needs at least one input"));
        }
        if program.inputs() != maximum_inputs {
            return Err(LumaError::validation(format!(
                "program `{}` samples {} inputs but the operation takes {maximum_inputs}",
                program.label(),
                program.inputs()
            )));
        }
        Ok(Self {
            label: program.label().to_string(),
            maximum_inputs,
            program,
            uniforms: UniformSettings::new(),
            input_framebuffers: BTreeMap::new(),
            input_retention: BTreeMap::new(),
            mask_attached: false,
            mask_framebuffer: None,
            overridden_output_size: None,
            overridden_output_rotation: None,
            background_color: Color::BLACK,
            draw_unmodified_image_outside_of_mask: true,
            activate_passthrough_on_next_frame: false,
            release_all_inputs_after_rendering: false,
            render_count: 0,
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn maximum_inputs(&self) -> u32 {
        self.maximum_inputs
    }

    pub fn uniforms(&self) -> &UniformSettings {
        &self.uniforms
    }

    pub fn set_uniform(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) {
        self.uniforms.set(name, value);
    }

    pub fn overridden_output_size(&self) -> Option<GlSize> {
        self.overridden_output_size
    }

    pub fn set_overridden_output_size(&mut self, size: Option<GlSize>) {
        self.overridden_output_size = size;
    }

    pub fn overridden_output_rotation(&self) -> Option<Rotation> {
        self.overridden_output_rotation
    }

    pub fn set_overridden_output_rotation(&mut self, rotation: Option<Rotation>) {
        self.overridden_output_rotation = rotation;
    }

    pub fn background_color(&self) -> Color {
        self.background_color
    }

    pub fn set_background_color(&mut self, color: Color) {
        self.background_color = color;
    }

    pub fn draw_unmodified_image_outside_of_mask(&self) -> bool {
        self.draw_unmodified_image_outside_of_mask
    }

    pub fn set_draw_unmodified_image_outside_of_mask(&mut self, draw: bool) {
        self.draw_unmodified_image_outside_of_mask = draw;
    }

    /// Forward the next arriving framebuffer unchanged instead of rendering. Used to seed
    /// feedback loops.
    pub fn activate_passthrough_on_next_frame(&mut self) {
        self.activate_passthrough_on_next_frame = true;
    }

    pub fn release_all_inputs_after_rendering(&self) -> bool {
        self.release_all_inputs_after_rendering
    }

    /// Clear every slot after each render regardless of retention.
    pub fn set_release_all_inputs_after_rendering(&mut self, release: bool) {
        self.release_all_inputs_after_rendering = release;
    }

    pub fn input_retention(&self, index: u32) -> InputRetention {
        self.input_retention
            .get(&index)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_input_retention(&mut self, index: u32, retention: InputRetention) {
        self.input_retention.insert(index, retention);
    }

    /// Framebuffer currently held at input `index`.
    pub fn input_framebuffer(&self, index: u32) -> Option<FramebufferId> {
        self.input_framebuffers.get(&index).copied()
    }

    pub fn occupied_inputs(&self) -> usize {
        self.input_framebuffers.len()
    }

    pub fn mask_framebuffer(&self) -> Option<FramebufferId> {
        self.mask_framebuffer
    }

    pub fn has_mask(&self) -> bool {
        self.mask_attached
    }

    pub fn render_count(&self) -> u64 {
        self.render_count
    }

    /// Store a delivered framebuffer and render once every slot is filled.
    pub fn receive(
        &mut self,
        framebuffer: FramebufferId,
        index: u32,
        ctx: &mut NodeContext<'_>,
        hooks: &mut dyn RenderHooks,
    ) -> LumaResult<Option<FramebufferId>> {
        if index >= self.maximum_inputs {
            tracing::warn!(
                operation = %self.label,
                index,
                maximum = self.maximum_inputs,
                "framebuffer delivered past the last input, dropped"
            );
            ctx.cache.unlock(framebuffer);
            return Ok(None);
        }

        if let Some(previous) = self.input_framebuffers.insert(index, framebuffer) {
            ctx.cache.unlock(previous);
        }

        if self.activate_passthrough_on_next_frame {
            self.activate_passthrough_on_next_frame = false;
            ctx.cache.lock(framebuffer);
            tracing::trace!(operation = %self.label, "passthrough frame");
            return Ok(Some(framebuffer));
        }

        if self.input_framebuffers.len() as u32 >= self.maximum_inputs {
            return self.render_frame(ctx, hooks).map(Some);
        }
        Ok(None)
    }

    fn held_input(&self, index: u32) -> LumaResult<FramebufferId> {
        self.input_framebuffer(index).ok_or_else(|| {
            LumaError::validation(format!(
                "operation `{}` has no framebuffer at input {index}",
                self.label
            ))
        })
    }

    #[tracing::instrument(level = "trace", skip_all, fields(operation = %self.label))]
    fn render_frame(
        &mut self,
        ctx: &mut NodeContext<'_>,
        hooks: &mut dyn RenderHooks,
    ) -> LumaResult<FramebufferId> {
        let first = ctx.cache.framebuffer(self.held_input(0)?)?.clone();
        let size = self
            .overridden_output_size
            .unwrap_or_else(|| first.size_for_target_orientation(ImageOrientation::Portrait));
        let output = ctx.cache.request(
            &mut *ctx.backend,
            size,
            ImageOrientation::Portrait,
            self.mask_attached,
        )?;

        if let Err(err) = self.draw(output, &first, ctx, hooks) {
            ctx.cache.unlock(output);
            return Err(err);
        }

        self.release_incoming_framebuffers(output, &first, ctx.cache);
        self.render_count += 1;
        Ok(output)
    }

    fn input_textures(&self, cache: &FramebufferCache) -> LumaResult<Vec<InputTexture>> {
        (0..self.maximum_inputs)
            .map(|i| {
                let fb = cache.framebuffer(self.held_input(i)?)?;
                Ok(match self.overridden_output_rotation {
                    Some(r) => fb.texture_properties_for_output_rotation(r),
                    None => fb.texture_properties_for_target_orientation(ImageOrientation::Portrait),
                })
            })
            .collect()
    }

    fn draw(
        &mut self,
        output: FramebufferId,
        first: &Framebuffer,
        ctx: &mut NodeContext<'_>,
        hooks: &mut dyn RenderHooks,
    ) -> LumaResult<()> {
        let inputs = self.input_textures(ctx.cache)?;
        let rotation = self
            .overridden_output_rotation
            .unwrap_or_else(|| first.orientation().rotation_needed_for(ImageOrientation::Portrait));
        hooks.configure(first, rotation, &self.program, &mut self.uniforms);

        let target = ctx.cache.framebuffer(output)?.texture();
        ctx.backend.clear(target, self.background_color)?;
        let uniforms = self.uniforms.resolve(&self.program);
        let main = QuadDraw {
            target,
            program: self.program.handle(),
            vertices: hooks.vertices(),
            inputs: &inputs,
            uniforms: &uniforms,
            stencil: StencilMode::Disabled,
        };

        let mask = match (self.mask_attached, self.mask_framebuffer) {
            (true, Some(mask)) => Some(
                ctx.cache
                    .framebuffer(mask)?
                    .texture_properties_for_target_orientation(ImageOrientation::Portrait),
            ),
            _ => None,
        };
        let Some(mask) = mask else {
            return ctx.backend.draw_quad(&main);
        };

        if self.draw_unmodified_image_outside_of_mask {
            let passthrough = ctx.programs.passthrough(&mut *ctx.backend)?;
            ctx.backend.draw_quad(&QuadDraw {
                target,
                program: passthrough.handle(),
                vertices: STANDARD_IMAGE_VERTICES,
                inputs: &inputs[..1],
                uniforms: &[],
                stencil: StencilMode::Disabled,
            })?;
        }
        let stencil_program = ctx.programs.stencil_mask(&mut *ctx.backend)?;
        ctx.backend.draw_quad(&QuadDraw {
            target,
            program: stencil_program.handle(),
            vertices: STANDARD_IMAGE_VERTICES,
            inputs: std::slice::from_ref(&mask),
            uniforms: &[],
            stencil: StencilMode::WriteMask,
        })?;
        ctx.backend.draw_quad(&QuadDraw {
            stencil: StencilMode::TestMask,
            ..main
        })
    }

    /// Apply retention to every slot and derive the output's timing: the latest
    /// timestamp among timed inputs, else transient if any input was, else still.
    fn release_incoming_framebuffers(
        &mut self,
        output: FramebufferId,
        first: &Framebuffer,
        cache: &mut FramebufferCache,
    ) {
        let mut latest: Option<MediaTime> = None;
        let mut any_transient = false;

        for (index, id) in std::mem::take(&mut self.input_framebuffers) {
            let timing = cache
                .get(id)
                .map_or(FramebufferTiming::Transient, Framebuffer::timing);
            match timing {
                FramebufferTiming::VideoFrame(t) => latest = latest.max(Some(t)),
                FramebufferTiming::Transient => any_transient = true,
                FramebufferTiming::StillImage => {}
            }
            let keep =
                !self.release_all_inputs_after_rendering && self.input_retention(index).retains(timing);
            if keep {
                self.input_framebuffers.insert(index, id);
            } else {
                cache.unlock(id);
            }
        }

        let timing = match latest {
            Some(t) => FramebufferTiming::VideoFrame(t),
            None if any_transient => FramebufferTiming::Transient,
            None => FramebufferTiming::StillImage,
        };
        if let Some(out) = cache.get_mut(output) {
            out.set_timing(timing);
            out.set_user_info(first.user_info().cloned());
        }
    }

    /// Swap in a new mask frame, releasing the previous one.
    pub fn receive_mask(&mut self, framebuffer: FramebufferId, cache: &mut FramebufferCache) {
        if !self.mask_attached {
            cache.unlock(framebuffer);
            return;
        }
        if let Some(previous) = self.mask_framebuffer.replace(framebuffer) {
            cache.unlock(previous);
        }
    }

    pub fn set_mask_attached(&mut self, attached: bool, cache: &mut FramebufferCache) {
        self.mask_attached = attached;
        if !attached && let Some(previous) = self.mask_framebuffer.take() {
            cache.unlock(previous);
        }
    }

    pub fn release_input(&mut self, index: u32, cache: &mut FramebufferCache) {
        if let Some(id) = self.input_framebuffers.remove(&index) {
            cache.unlock(id);
        }
    }

    /// Unlock every held input and the mask frame.
    pub fn release_all(&mut self, cache: &mut FramebufferCache) {
        for (_, id) in std::mem::take(&mut self.input_framebuffers) {
            cache.unlock(id);
        }
        if let Some(mask) = self.mask_framebuffer.take() {
            cache.unlock(mask);
        }
    }
}

impl Node for BasicOperation {
    fn label(&self) -> &str {
        &self.label
    }

    fn maximum_inputs(&self) -> u32 {
        self.maximum_inputs
    }

    fn new_framebuffer_available(
        &mut self,
        framebuffer: FramebufferId,
        index: u32,
        ctx: &mut NodeContext<'_>,
    ) -> LumaResult<Option<FramebufferId>> {
        self.receive(framebuffer, index, ctx, &mut DefaultHooks)
    }

    fn mask_framebuffer_available(
        &mut self,
        framebuffer: FramebufferId,
        ctx: &mut NodeContext<'_>,
    ) -> LumaResult<()> {
        self.receive_mask(framebuffer, ctx.cache);
        Ok(())
    }

    fn mask_attached(&mut self, attached: bool, ctx: &mut NodeContext<'_>) -> LumaResult<()> {
        self.set_mask_attached(attached, ctx.cache);
        Ok(())
    }

    fn source_removed(&mut self, index: u32, ctx: &mut NodeContext<'_>) {
        self.release_input(index, ctx.cache);
    }

    fn release_resources(&mut self, ctx: &mut NodeContext<'_>) {
        self.release_all(ctx.cache);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/operations/basic.rs"]
mod tests;
