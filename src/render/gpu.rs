use std::collections::HashMap;

use wgpu::util::DeviceExt as _;

use crate::foundation::core::{Color, GlSize};
use crate::foundation::error::{LumaError, LumaResult, ShaderCompileError};
use crate::render::backend::{
    FrameRGBA, ProgramHandle, QuadDraw, RenderBackend, StencilMode, TextureHandle,
};
use crate::render::shader::{ShaderSource, UniformDecl, UniformLayout, validate_wgsl};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Stencil8;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: GlSize,
    stencil: Option<wgpu::TextureView>,
}

struct GpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    inputs: u32,
    uniforms: Vec<UniformDecl>,
    layout: UniformLayout,
    pipelines: HashMap<(StencilMode, bool), wgpu::RenderPipeline>,
}

/// Renders through wgpu on whatever adapter the platform offers.
///
/// Submissions are synchronous: every draw and clear is submitted immediately and
/// readback blocks until the copy lands.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    sampler: wgpu::Sampler,
    textures: HashMap<TextureHandle, GpuTexture>,
    programs: HashMap<ProgramHandle, GpuProgram>,
    next_id: u64,
}

/// Run `f` inside error scopes for every wgpu error class. A caught error is reported
/// against program `label`.
fn scoped<T>(
    device: &wgpu::Device,
    label: &str,
    f: impl FnOnce(&wgpu::Device) -> T,
) -> Result<T, ShaderCompileError> {
    const FILTERS: [wgpu::ErrorFilter; 3] = [
        wgpu::ErrorFilter::Validation,
        wgpu::ErrorFilter::OutOfMemory,
        wgpu::ErrorFilter::Internal,
    ];
    for filter in FILTERS {
        device.push_error_scope(filter);
    }
    let value = f(device);
    let mut caught = None;
    for _ in FILTERS {
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            caught.get_or_insert(err);
        }
    }
    match caught {
        Some(err) => Err(ShaderCompileError::new(label, err.to_string())),
        None => Ok(value),
    }
}

impl WgpuBackend {
    pub fn new() -> LumaResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                LumaError::backend("no suitable GPU adapter found")
            }
            other => LumaError::backend(format!("adapter request failed: {other}")),
        })?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("luma_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| LumaError::backend(format!("request_device failed: {e}")))?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("luma_input_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        tracing::debug!(adapter = ?adapter.get_info().name, "wgpu backend ready");

        Ok(Self {
            device,
            queue,
            sampler,
            textures: HashMap::new(),
            programs: HashMap::new(),
            next_id: 1,
        })
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn texture(&self, handle: TextureHandle) -> LumaResult<&GpuTexture> {
        self.textures
            .get(&handle)
            .ok_or_else(|| LumaError::backend(format!("unknown texture {handle:?}")))
    }

    fn pipeline_for(
        device: &wgpu::Device,
        program: &mut GpuProgram,
        mode: StencilMode,
        has_stencil: bool,
    ) -> wgpu::RenderPipeline {
        if let Some(p) = program.pipelines.get(&(mode, has_stencil)) {
            return p.clone();
        }

        let attributes: Vec<wgpu::VertexAttribute> = (0..=program.inputs)
            .map(|i| wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: u64::from(i) * 8,
                shader_location: i,
            })
            .collect();

        let face = |compare, pass_op| wgpu::StencilFaceState {
            compare,
            fail_op: wgpu::StencilOperation::Keep,
            depth_fail_op: wgpu::StencilOperation::Keep,
            pass_op,
        };
        let depth_stencil = has_stencil.then(|| {
            let state = match mode {
                StencilMode::Disabled => {
                    face(wgpu::CompareFunction::Always, wgpu::StencilOperation::Keep)
                }
                StencilMode::WriteMask => {
                    face(wgpu::CompareFunction::Always, wgpu::StencilOperation::Replace)
                }
                StencilMode::TestMask => {
                    face(wgpu::CompareFunction::Equal, wgpu::StencilOperation::Keep)
                }
            };
            wgpu::DepthStencilState {
                format: STENCIL_FORMAT,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Always,
                stencil: wgpu::StencilState {
                    front: state,
                    back: state,
                    read_mask: 0xff,
                    write_mask: 0xff,
                },
                bias: wgpu::DepthBiasState::default(),
            }
        });

        let write_mask = if mode == StencilMode::WriteMask {
            wgpu::ColorWrites::empty()
        } else {
            wgpu::ColorWrites::ALL
        };

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(program.label.as_str()),
            layout: Some(&program.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &program.module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: u64::from(program.inputs + 1) * 8,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &attributes,
                }],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &program.module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask,
                })],
            }),
            multiview: None,
            cache: None,
        });
        program
            .pipelines
            .insert((mode, has_stencil), pipeline.clone());
        pipeline
    }
}

impl RenderBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_texture(&mut self, size: GlSize, with_stencil: bool) -> LumaResult<TextureHandle> {
        if size.width == 0 || size.height == 0 {
            return Err(LumaError::backend(format!(
                "cannot allocate a {}x{} texture",
                size.width, size.height
            )));
        }
        let extent = wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("luma_framebuffer"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let stencil = with_stencil.then(|| {
            self.device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some("luma_stencil"),
                    size: extent,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: STENCIL_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        });

        let handle = TextureHandle(self.next_handle());
        self.textures.insert(
            handle,
            GpuTexture {
                texture,
                view,
                size,
                stencil,
            },
        );
        Ok(handle)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if let Some(t) = self.textures.remove(&texture) {
            t.texture.destroy();
        }
    }

    fn upload_rgba8(&mut self, texture: TextureHandle, data: &[u8]) -> LumaResult<()> {
        let t = self.texture(texture)?;
        let expected = t.size.pixel_count() * 4;
        if data.len() != expected {
            return Err(LumaError::backend(format!(
                "upload of {} bytes into a texture expecting {expected}",
                data.len()
            )));
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &t.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(t.size.width * 4),
                rows_per_image: Some(t.size.height),
            },
            wgpu::Extent3d {
                width: t.size.width,
                height: t.size.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_rgba8(&mut self, texture: TextureHandle) -> LumaResult<FrameRGBA> {
        let t = self.texture(texture)?;
        let GlSize { width, height } = t.size;
        let row_bytes = width * 4;
        let padded_row_bytes = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("luma_readback"),
            size: u64::from(padded_row_bytes) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("luma_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &t.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| LumaError::backend(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| LumaError::backend("readback channel closed"))?
            .map_err(|e| LumaError::backend(format!("readback map failed: {e:?}")))?;

        let mapped = slice.get_mapped_range();
        let mut data = Vec::with_capacity(row_bytes as usize * height as usize);
        for row in 0..height as usize {
            let start = row * padded_row_bytes as usize;
            data.extend_from_slice(&mapped[start..start + row_bytes as usize]);
        }
        drop(mapped);
        readback.unmap();

        Ok(FrameRGBA {
            width,
            height,
            data,
        })
    }

    fn compile_program(
        &mut self,
        source: &ShaderSource,
    ) -> Result<ProgramHandle, ShaderCompileError> {
        validate_wgsl(source).map_err(|d| ShaderCompileError::new(&source.label, d))?;

        let module = scoped(&self.device, &source.label, |device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.label.as_str()),
                source: wgpu::ShaderSource::Wgsl(source.module_wgsl().into()),
            })
        })?;

        let mut entries = Vec::with_capacity(source.inputs as usize + 2);
        if !source.uniforms.is_empty() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
        for i in 0..source.inputs {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: i + 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(source.label.as_str()),
                    entries: &entries,
                });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(source.label.as_str()),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let mut program = GpuProgram {
            label: source.label.clone(),
            module,
            bind_group_layout,
            pipeline_layout,
            inputs: source.inputs,
            uniforms: source.uniforms.clone(),
            layout: source.uniform_layout(),
            pipelines: HashMap::new(),
        };

        // Link failures surface when the first pipeline is built.
        scoped(&self.device, &source.label, |device| {
            Self::pipeline_for(device, &mut program, StencilMode::Disabled, false)
        })?;

        let handle = ProgramHandle(self.next_handle());
        self.programs.insert(handle, program);
        Ok(handle)
    }

    fn clear(&mut self, target: TextureHandle, color: Color) -> LumaResult<()> {
        let t = self.texture(target)?;
        let [r, g, b, a] = color.to_array().map(|c| f64::from(c.clamp(0.0, 1.0)));
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("luma_clear_encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("luma_clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &t.view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: t.stencil.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: None,
                        stencil_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(0),
                            store: wgpu::StoreOp::Store,
                        }),
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn draw_quad(&mut self, draw: &QuadDraw<'_>) -> LumaResult<()> {
        let program = self
            .programs
            .get_mut(&draw.program)
            .ok_or_else(|| LumaError::backend(format!("unknown program {:?}", draw.program)))?;
        if draw.inputs.len() != program.inputs as usize {
            return Err(LumaError::backend(format!(
                "program `{}` samples {} inputs, draw supplied {}",
                program.label,
                program.inputs,
                draw.inputs.len()
            )));
        }
        let target = self
            .textures
            .get(&draw.target)
            .ok_or_else(|| LumaError::backend(format!("unknown texture {:?}", draw.target)))?;
        let has_stencil = target.stencil.is_some();
        if draw.stencil != StencilMode::Disabled && !has_stencil {
            return Err(LumaError::backend(
                "stencil draw into a target without a stencil attachment",
            ));
        }

        // Interleave position followed by one coordinate per input for each corner.
        let mut vertex_data = Vec::with_capacity(4 * (program.inputs as usize + 1) * 2);
        for corner in 0..4 {
            vertex_data.push(draw.vertices[corner * 2]);
            vertex_data.push(draw.vertices[corner * 2 + 1]);
            for input in draw.inputs {
                vertex_data.push(input.coordinates[corner * 2]);
                vertex_data.push(input.coordinates[corner * 2 + 1]);
            }
        }
        let vertex_bytes: Vec<u8> = vertex_data.iter().flat_map(|v| v.to_le_bytes()).collect();
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("luma_quad"),
                contents: &vertex_bytes,
                usage: wgpu::BufferUsages::VERTEX,
            });

        let uniform_buffer = (!program.uniforms.is_empty()).then(|| {
            let mut bytes = vec![0u8; program.layout.size];
            for bound in draw.uniforms {
                if let Some(&offset) = program.layout.offsets.get(bound.slot) {
                    bound.value.write_le_bytes(&mut bytes[offset..]);
                }
            }
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("luma_uniforms"),
                    contents: &bytes,
                    usage: wgpu::BufferUsages::UNIFORM,
                })
        });

        let mut input_views = Vec::with_capacity(draw.inputs.len());
        for input in draw.inputs {
            let t = self
                .textures
                .get(&input.texture)
                .ok_or_else(|| LumaError::backend(format!("unknown texture {:?}", input.texture)))?;
            input_views.push(&t.view);
        }

        let mut entries = Vec::with_capacity(input_views.len() + 2);
        if let Some(buffer) = uniform_buffer.as_ref() {
            entries.push(wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: 1,
            resource: wgpu::BindingResource::Sampler(&self.sampler),
        });
        for (i, view) in input_views.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32 + 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.label.as_str()),
            layout: &program.bind_group_layout,
            entries: &entries,
        });

        let pipeline = Self::pipeline_for(&self.device, program, draw.stencil, has_stencil);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("luma_draw_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("luma_draw"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: target.stencil.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: None,
                        stencil_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.set_stencil_reference(1);
            pass.draw(0..4, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn live_textures(&self) -> usize {
        self.textures.len()
    }
}
