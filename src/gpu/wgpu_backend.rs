use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::{
    foundation::{
        core::{Bitmap, FrameRGBA, OutputSize},
        error::{CompositorError, CompositorResult},
    },
    gpu::device::{
        BackendKind, BlendFunc, GpuDevice, MAX_TEXTURE_UNITS, ProgramDesc, ProgramId, QuadAttrib,
        TextureId, UniformKind, UniformValue,
    },
};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct GpuProgram {
    desc: &'static ProgramDesc,
    opaque: wgpu::RenderPipeline,
    blended: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    params: Option<wgpu::Buffer>,
    params_size: u64,
    /// Byte offset of each declared uniform inside `params`; samplers have none.
    offsets: Vec<Option<u64>>,
    values: Vec<Option<UniformValue>>,
}

struct GpuTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// Headless wgpu implementation of [`GpuDevice`] rendering into an offscreen RGBA8 target.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    sampler: wgpu::Sampler,
    fallback: GpuTexture,
    size: OutputSize,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    readback_bytes_per_row: u32,
    programs: HashMap<ProgramId, GpuProgram>,
    textures: HashMap<TextureId, GpuTexture>,
    units: [Option<TextureId>; MAX_TEXTURE_UNITS],
    current: Option<ProgramId>,
    blend: Option<BlendFunc>,
    next_id: u32,
}

impl WgpuDevice {
    pub fn new(size: OutputSize) -> CompositorResult<Self> {
        if size.is_degenerate() {
            return Err(CompositorError::validation(
                "render target must be non-empty",
            ));
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                CompositorError::device("no gpu adapter available")
            }
            other => CompositorError::device(format!("wgpu request_adapter failed: {other:?}")),
        })?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("mattecomp_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| CompositorError::device(format!("wgpu request_device failed: {e:?}")))?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("mattecomp_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let fallback = create_texture(&device, &queue, &Bitmap::empty());
        let (target, target_view) = create_target(&device, size);
        let (readback, readback_bytes_per_row) = create_readback(&device, size)?;

        tracing::debug!(
            adapter = ?adapter.get_info().name,
            width = size.width,
            height = size.height,
            "wgpu device ready"
        );

        Ok(Self {
            device,
            queue,
            sampler,
            fallback,
            size,
            target,
            target_view,
            readback,
            readback_bytes_per_row,
            programs: HashMap::new(),
            textures: HashMap::new(),
            units: [None; MAX_TEXTURE_UNITS],
            current: None,
            blend: None,
            next_id: 1,
        })
    }

    fn next_handle(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn build_program(&self, desc: &'static ProgramDesc) -> GpuProgram {
        let mut offsets = Vec::with_capacity(desc.uniforms.len());
        let mut params_size = 0u64;
        let mut samplers = 0u32;
        for u in desc.uniforms {
            match u.kind {
                UniformKind::Sampler => {
                    samplers += 1;
                    offsets.push(None);
                }
                UniformKind::Mat4 => {
                    offsets.push(Some(params_size));
                    params_size += 64;
                }
                _ => {
                    offsets.push(Some(params_size));
                    params_size += 16;
                }
            }
        }

        let mut entries = Vec::new();
        if params_size > 0 {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
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
        for i in 0..samplers {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2 + i,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            });
        }

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(desc.label),
                entries: &entries,
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.wgsl.into()),
            });

        let attributes: Vec<[wgpu::VertexAttribute; 1]> = (0..desc.attributes.len() as u32)
            .map(|i| {
                [wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x2,
                    offset: 0,
                    shader_location: i,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = attributes
            .iter()
            .map(|attr| wgpu::VertexBufferLayout {
                array_stride: 8,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attr,
            })
            .collect();

        let pipeline = |blend: Option<wgpu::BlendState>| {
            self.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(desc.label),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &shader,
                        entry_point: Some(desc.vertex_entry),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        buffers: &buffers,
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &shader,
                        entry_point: Some(desc.fragment_entry),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: TARGET_FORMAT,
                            blend,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleStrip,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
        };
        let opaque = pipeline(None);
        let blended = pipeline(Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING));

        let params = (params_size > 0).then(|| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label),
                size: params_size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });

        GpuProgram {
            desc,
            opaque,
            blended,
            layout,
            params,
            params_size,
            offsets,
            values: vec![None; desc.uniforms.len()],
        }
    }

    fn submit_pass(&self, load: wgpu::LoadOp<wgpu::Color>, record: impl FnOnce(&mut wgpu::RenderPass<'_>)) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mattecomp_pass_encoder"),
            });
        {
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mattecomp_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            record(&mut rp);
        }
        self.queue.submit(Some(encoder.finish()));
    }
}

impl GpuDevice for WgpuDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn compile_program(&mut self, desc: &'static ProgramDesc) -> CompositorResult<ProgramId> {
        desc.validate()?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let program = self.build_program(desc);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(CompositorError::shader(format!(
                "program '{}' failed to build: {err}",
                desc.label
            )));
        }
        let id = ProgramId(self.next_handle());
        self.programs.insert(id, program);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() && self.current == Some(program) {
            self.current = None;
        }
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs.get(&program)?.desc.attribute_index(name)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs.get(&program)?.desc.uniform_index(name)
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current = self.programs.contains_key(&program).then_some(program);
    }

    fn set_uniform(&mut self, program: ProgramId, location: u32, value: UniformValue) {
        let Some(p) = self.programs.get_mut(&program) else {
            return;
        };
        match p.desc.uniforms.get(location as usize) {
            Some(decl) if value.fits(decl.kind) => p.values[location as usize] = Some(value),
            Some(decl) => tracing::warn!(
                program = p.desc.label,
                uniform = decl.name,
                "uniform value does not match declared kind"
            ),
            None => tracing::warn!(program = p.desc.label, location, "uniform location out of range"),
        }
    }

    fn upload_texture(&mut self, bitmap: &Bitmap) -> CompositorResult<TextureId> {
        if !bitmap.is_valid() {
            return Err(CompositorError::asset("cannot upload an invalid bitmap"));
        }
        let texture = create_texture(&self.device, &self.queue, bitmap);
        let id = TextureId(self.next_handle());
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            for unit in self.units.iter_mut() {
                if *unit == Some(texture) {
                    *unit = None;
                }
            }
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        match self.units.get_mut(unit as usize) {
            Some(slot) => *slot = texture,
            None => tracing::warn!(unit, "texture unit out of range"),
        }
    }

    fn set_blend(&mut self, blend: Option<BlendFunc>) {
        self.blend = blend;
    }

    fn draw_quad(&mut self, attribs: &[QuadAttrib]) -> CompositorResult<()> {
        let program_id = self
            .current
            .ok_or_else(|| CompositorError::device("draw without a current program"))?;
        let program = self
            .programs
            .get(&program_id)
            .ok_or_else(|| CompositorError::device("current program was deleted"))?;

        if let Some(buffer) = &program.params {
            let mut bytes = vec![0u8; program.params_size as usize];
            for (offset, value) in program.offsets.iter().zip(&program.values) {
                let (Some(offset), Some(value)) = (offset, value) else {
                    continue;
                };
                let floats: Vec<f32> = match value {
                    UniformValue::Mat4(m) => m.0.to_vec(),
                    other => other.as_vec4().map(|v| v.to_vec()).unwrap_or_default(),
                };
                for (i, f) in floats.iter().enumerate() {
                    let at = *offset as usize + i * 4;
                    bytes[at..at + 4].copy_from_slice(&f.to_le_bytes());
                }
            }
            self.queue.write_buffer(buffer, 0, &bytes);
        }

        let vertex_buffers: Vec<wgpu::Buffer> = (0..program.desc.attributes.len() as u32)
            .map(|loc| {
                let data = attribs
                    .iter()
                    .find(|a| a.location == loc)
                    .map(|a| a.data)
                    .unwrap_or([[0.0; 2]; 4]);
                let bytes: Vec<u8> = data
                    .iter()
                    .flatten()
                    .flat_map(|f| f.to_le_bytes())
                    .collect();
                self.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("mattecomp_vertices"),
                        contents: &bytes,
                        usage: wgpu::BufferUsages::VERTEX,
                    })
            })
            .collect();

        let views: Vec<&wgpu::TextureView> = program
            .desc
            .uniforms
            .iter()
            .enumerate()
            .filter(|(_, u)| u.kind == UniformKind::Sampler)
            .map(|(i, _)| {
                let unit = match program.values[i] {
                    Some(UniformValue::Int(u)) if u >= 0 => u as usize,
                    _ => 0,
                };
                self.units
                    .get(unit)
                    .copied()
                    .flatten()
                    .and_then(|t| self.textures.get(&t))
                    .map(|t| &t.view)
                    .unwrap_or(&self.fallback.view)
            })
            .collect();

        let mut entries = Vec::with_capacity(views.len() + 2);
        if let Some(buffer) = &program.params {
            entries.push(wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: 1,
            resource: wgpu::BindingResource::Sampler(&self.sampler),
        });
        for (i, view) in views.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.desc.label),
            layout: &program.layout,
            entries: &entries,
        });

        let pipeline = match self.blend {
            Some(BlendFunc::OneOneMinusSrcAlpha) => &program.blended,
            None => &program.opaque,
        };
        self.submit_pass(wgpu::LoadOp::Load, |rp| {
            rp.set_pipeline(pipeline);
            rp.set_bind_group(0, &bind_group, &[]);
            for (slot, buffer) in vertex_buffers.iter().enumerate() {
                rp.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
            rp.draw(0..4, 0..1);
        });
        Ok(())
    }

    fn target_size(&self) -> OutputSize {
        self.size
    }

    fn resize_target(&mut self, size: OutputSize) -> CompositorResult<()> {
        if size.is_degenerate() {
            return Err(CompositorError::validation(
                "render target must be non-empty",
            ));
        }
        if size == self.size {
            return Ok(());
        }
        let (readback, bytes_per_row) = create_readback(&self.device, size)?;
        let (target, view) = create_target(&self.device, size);
        self.target = target;
        self.target_view = view;
        self.readback = readback;
        self.readback_bytes_per_row = bytes_per_row;
        self.size = size;
        Ok(())
    }

    fn clear(&mut self, rgba: [u8; 4]) {
        let [r, g, b, a] = rgba;
        let color = wgpu::Color {
            r: (r as f64) / 255.0,
            g: (g as f64) / 255.0,
            b: (b as f64) / 255.0,
            a: (a as f64) / 255.0,
        };
        self.submit_pass(wgpu::LoadOp::Clear(color), |_| {});
    }

    fn read_frame(&mut self) -> CompositorResult<FrameRGBA> {
        let (width, height) = (self.size.width, self.size.height);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mattecomp_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.readback_bytes_per_row),
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

        let buffer_slice = self.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| CompositorError::device(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| CompositorError::device("readback channel closed"))?
            .map_err(|e| CompositorError::device(format!("readback map failed: {e:?}")))?;

        let mapped = buffer_slice.get_mapped_range();
        let row_bytes = (width as usize) * 4;
        let padded_row_bytes = self.readback_bytes_per_row as usize;
        let mut out = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * padded_row_bytes;
            out.extend_from_slice(&mapped[start..start + row_bytes]);
        }
        drop(mapped);
        self.readback.unmap();

        Ok(FrameRGBA {
            width,
            height,
            data: out,
            premultiplied: true,
        })
    }
}

fn create_texture(device: &wgpu::Device, queue: &wgpu::Queue, bitmap: &Bitmap) -> GpuTexture {
    let extent = wgpu::Extent3d {
        width: bitmap.width,
        height: bitmap.height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("mattecomp_texture"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &bitmap.rgba8_premul,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(bitmap.width * 4),
            rows_per_image: Some(bitmap.height),
        },
        extent,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture {
        _texture: texture,
        view,
    }
}

fn create_target(device: &wgpu::Device, size: OutputSize) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("mattecomp_target"),
        size: wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn create_readback(device: &wgpu::Device, size: OutputSize) -> CompositorResult<(wgpu::Buffer, u32)> {
    let bytes_per_row_unpadded = size
        .width
        .checked_mul(4)
        .ok_or_else(|| CompositorError::device("render target width overflow"))?;
    let bytes_per_row = align_to(bytes_per_row_unpadded, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let buffer_size = (bytes_per_row as u64)
        .checked_mul(size.height as u64)
        .ok_or_else(|| CompositorError::device("readback buffer size overflow"))?;
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("mattecomp_readback"),
        size: buffer_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    Ok((buffer, bytes_per_row))
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}
