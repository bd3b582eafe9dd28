//! wgpu render device.
//!
//! Every pass is a fullscreen triangle into one colour attachment, one
//! command buffer per draw so the shared uniform buffer can be rewritten
//! between passes. Readback blits through an `Rgba32Float` texture so every
//! storage format comes back as plain `f32`.

use crate::FluidError;
use crate::device::{
    Blend, FilterMode, PassDescriptor, PassUniforms, ProgramId, RenderDevice, RenderTarget,
    TextureDescriptor, TextureFormat, TextureId,
};
use crate::programs::{Keywords, ProgramKind};
use crate::wgsl;
use glam::Vec4;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use wgpu::util::DeviceExt;

const READBACK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDescriptor,
}

pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    label: String,
    errors: Arc<Mutex<Option<String>>>,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_buffer: wgpu::Buffer,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    placeholder: wgpu::TextureView,
    textures: HashMap<TextureId, GpuTexture>,
    programs: Vec<(ProgramKind, Keywords)>,
    pipelines: HashMap<(ProgramId, wgpu::TextureFormat, Blend), wgpu::RenderPipeline>,
    readback_pipeline: Option<wgpu::RenderPipeline>,
    surface: GpuTexture,
    next_texture: u32,
}

impl WgpuDevice {
    pub async fn new() -> Result<Self, FluidError> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| FluidError::Gpu("No GPU adapter found".to_string()))?;

        let info = adapter.get_info();
        log::info!("Using GPU: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Ink Fluid GPU"),
                    required_features: adapter.features()
                        & wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES,
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|err| FluidError::Gpu(err.to_string()))?;

        let errors = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&errors);
        device.on_uncaptured_error(Box::new(move |error: wgpu::Error| {
            log::debug!("GPU validation error: {error}");
            if let Ok(mut slot) = sink.lock() {
                slot.get_or_insert_with(|| error.to_string());
            }
        }));

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Ink Fluid Programs"),
            source: wgpu::ShaderSource::Wgsl(wgsl::SHADER_SOURCE.into()),
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(
                            std::mem::size_of::<PassUniforms>() as u64,
                        ),
                    },
                    count: None,
                },
                texture_entry(1),
                sampler_entry(2),
                texture_entry(3),
                sampler_entry(4),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Pass Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Pass Uniforms"),
            contents: bytemuck::cast_slice(&[PassUniforms::default()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let sampler = |filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Field Sampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        };
        let linear_sampler = sampler(wgpu::FilterMode::Linear);
        let nearest_sampler = sampler(wgpu::FilterMode::Nearest);

        let placeholder = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("Unbound Slot"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        let surface = Self::allocate(&device, &TextureDescriptor {
            label: "surface",
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            filter: FilterMode::Nearest,
        });

        Ok(Self {
            adapter,
            device,
            queue,
            label: format!("wgpu {}", info.name),
            errors,
            module,
            bind_group_layout,
            pipeline_layout,
            uniform_buffer,
            linear_sampler,
            nearest_sampler,
            placeholder,
            textures: HashMap::new(),
            programs: Vec::new(),
            pipelines: HashMap::new(),
            readback_pipeline: None,
            surface,
            next_texture: 1,
        })
    }

    fn allocate(device: &wgpu::Device, desc: &TextureDescriptor) -> GpuTexture {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(desc.format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture {
            texture,
            view,
            desc: *desc,
        }
    }

    /// Error raised by the validation layer since the last call, if any.
    fn take_error(&self) -> Option<String> {
        self.errors.lock().ok().and_then(|mut slot| slot.take())
    }

    fn format_features(&self, format: wgpu::TextureFormat) -> wgpu::TextureFormatFeatures {
        self.adapter.get_texture_format_features(format)
    }

    fn build_pipeline(
        &self,
        entry_point: &str,
        keywords: Keywords,
        format: wgpu::TextureFormat,
        blend: Blend,
    ) -> wgpu::RenderPipeline {
        let constants = wgsl::constants(keywords);
        let blend = match blend {
            Blend::Replace => None,
            Blend::PremultipliedOver => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
        };

        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.module,
                    entry_point: "vs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.module,
                    entry_point,
                    compilation_options: wgpu::PipelineCompilationOptions {
                        constants: &constants,
                        ..Default::default()
                    },
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
    }

    fn pipeline(
        &mut self,
        program: ProgramId,
        format: wgpu::TextureFormat,
        blend: Blend,
    ) -> Result<&wgpu::RenderPipeline, FluidError> {
        let (kind, keywords) = self.program(program)?;
        let key = (program, format, blend);
        if !self.pipelines.contains_key(&key) {
            let pipeline = self.build_pipeline(wgsl::entry_point(kind), keywords, format, blend);
            if let Some(log) = self.take_error() {
                return Err(FluidError::ProgramLink { program: kind, log });
            }
            self.pipelines.insert(key, pipeline);
        }
        self.pipelines
            .get(&key)
            .ok_or(FluidError::UnknownProgram(program.0))
    }

    fn program(&self, id: ProgramId) -> Result<(ProgramKind, Keywords), FluidError> {
        self.programs
            .get(id.0 as usize)
            .copied()
            .ok_or(FluidError::UnknownProgram(id.0))
    }

    fn sampler_for(&self, filter: FilterMode) -> &wgpu::Sampler {
        match filter {
            FilterMode::Linear => &self.linear_sampler,
            FilterMode::Nearest => &self.nearest_sampler,
        }
    }

    fn encode_pass(
        &self,
        pipeline: &wgpu::RenderPipeline,
        bind_group: &wgpu::BindGroup,
        view: &wgpu::TextureView,
        clear: Option<[f32; 4]>,
    ) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Fluid Pass Encoder"),
            });

        let load = match clear {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            }),
            None => wgpu::LoadOp::Load,
        };

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Fluid Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn bind_group(&self, slots: [Option<(&wgpu::TextureView, FilterMode)>; 2]) -> wgpu::BindGroup {
        let [first, second] = slots.map(|slot| {
            slot.unwrap_or((&self.placeholder, FilterMode::Nearest))
        });
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(first.0),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(self.sampler_for(first.1)),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(second.0),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(self.sampler_for(second.1)),
                },
            ],
        })
    }

    /// Renders `source` into a float32 copy and maps it back to the host.
    fn read_back(&mut self, source: &GpuTexture) -> Result<Vec<Vec4>, FluidError> {
        let (width, height) = (source.desc.width, source.desc.height);
        if self.readback_pipeline.is_none() {
            let pipeline = self.build_pipeline(
                wgsl::READBACK_ENTRY_POINT,
                Keywords::NONE,
                READBACK_FORMAT,
                Blend::Replace,
            );
            self.readback_pipeline = Some(pipeline);
        }

        let staging = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Readback Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: READBACK_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let staging_view = staging.create_view(&wgpu::TextureViewDescriptor::default());

        let uniforms = PassUniforms {
            target_texel_size: [1.0 / width as f32, 1.0 / height as f32],
            ..Default::default()
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));
        let bind_group = self.bind_group([Some((&source.view, FilterMode::Nearest)), None]);
        let pipeline = self
            .readback_pipeline
            .as_ref()
            .ok_or_else(|| FluidError::Gpu("readback pipeline missing".to_string()))?;
        self.encode_pass(pipeline, &bind_group, &staging_view, None);

        let bytes_per_texel = 4 * std::mem::size_of::<f32>() as u32;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = (width * bytes_per_texel).div_ceil(align) * align;

        let read_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &staging,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &read_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = read_buffer.slice(..);
        let (sender, mut receiver) = oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .try_recv()
            .map_err(|err| FluidError::Gpu(format!("readback never completed: {err}")))?
            .map_err(|err| FluidError::Gpu(err.to_string()))?;

        let texels = {
            let data = buffer_slice.get_mapped_range();
            let floats: &[f32] = bytemuck::cast_slice(&data);
            let row_floats = (padded_row / 4) as usize;
            let mut texels = Vec::with_capacity((width * height) as usize);
            for row in floats.chunks(row_floats) {
                for texel in row[..width as usize * 4].chunks_exact(4) {
                    texels.push(Vec4::from_slice(texel));
                }
            }
            texels
        };
        read_buffer.unmap();
        Ok(texels)
    }
}

impl RenderDevice for WgpuDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn supports_half_float(&self) -> bool {
        self.format_features(wgpu::TextureFormat::Rgba16Float)
            .allowed_usages
            .contains(wgpu::TextureUsages::TEXTURE_BINDING)
    }

    fn supports_linear_filtering(&self) -> bool {
        self.format_features(wgpu::TextureFormat::Rgba16Float)
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE)
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn probe_render_target(&mut self, format: TextureFormat) -> bool {
        let features = self.format_features(wgpu_format(format));
        if !features
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
        {
            return false;
        }

        let _ = self.take_error();
        let probe = Self::allocate(&self.device, &TextureDescriptor {
            label: "format probe",
            width: 4,
            height: 4,
            format,
            filter: FilterMode::Nearest,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Format Probe"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Format Probe"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &probe.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(std::iter::once(encoder.finish()));
        probe.texture.destroy();

        match self.take_error() {
            Some(err) => {
                log::trace!("Render target probe for {format:?} failed: {err}");
                false
            }
            None => true,
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId, FluidError> {
        let max = self.max_texture_dimension();
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(FluidError::InvalidDimensions {
                width: desc.width,
                height: desc.height,
            });
        }

        let texture = Self::allocate(&self.device, desc);
        if let Some(err) = self.take_error() {
            return Err(FluidError::Gpu(err));
        }

        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(id, texture);
        log::trace!(
            "Created {} texture {:?} {}x{} {:?}",
            desc.label,
            id,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(id)
    }

    fn release_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.textures.remove(&id) {
            texture.texture.destroy();
        }
    }

    fn compile_program(
        &mut self,
        kind: ProgramKind,
        keywords: Keywords,
    ) -> Result<ProgramId, FluidError> {
        let id = ProgramId(self.programs.len() as u32);
        self.programs.push((kind, keywords));
        // Build one pipeline now so link errors surface at setup, not mid-frame.
        let built = self
            .pipeline(id, wgpu::TextureFormat::Rgba16Float, Blend::Replace)
            .map(|_| ());
        if let Err(err) = built {
            self.programs.pop();
            return Err(err);
        }
        Ok(id)
    }

    fn draw(&mut self, pass: &PassDescriptor<'_>) -> Result<(), FluidError> {
        let (kind, _) = self.program(pass.program)?;

        for (_, binding) in pass.bindings {
            if pass.target == RenderTarget::Texture(binding.texture) {
                return Err(FluidError::FeedbackLoop {
                    texture: binding.texture.0,
                });
            }
            if !self.textures.contains_key(&binding.texture) {
                return Err(FluidError::UnknownTexture(binding.texture.0));
            }
        }

        let target = match pass.target {
            RenderTarget::Texture(id) => self
                .textures
                .get(&id)
                .ok_or(FluidError::UnknownTexture(id.0))?,
            RenderTarget::Surface => &self.surface,
        };
        let format = wgpu_format(target.desc.format);
        let mut uniforms = pass.uniforms;
        uniforms.target_texel_size = [
            1.0 / target.desc.width as f32,
            1.0 / target.desc.height as f32,
        ];

        self.pipeline(pass.program, format, pass.blend)?;

        let slots = wgsl::inputs(kind).map(|sampler| {
            sampler
                .and_then(|sampler| pass.binding(sampler))
                .and_then(|binding| self.textures.get(&binding.texture))
                .map(|texture| (&texture.view, texture.desc.filter))
        });
        let bind_group = self.bind_group(slots);
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let view = match pass.target {
            RenderTarget::Texture(id) => self
                .textures
                .get(&id)
                .map(|texture| &texture.view)
                .ok_or(FluidError::UnknownTexture(id.0))?,
            RenderTarget::Surface => &self.surface.view,
        };
        let pipeline = self
            .pipelines
            .get(&(pass.program, format, pass.blend))
            .ok_or(FluidError::UnknownProgram(pass.program.0))?;
        self.encode_pass(pipeline, &bind_group, view, pass.clear);

        match self.take_error() {
            Some(err) => Err(FluidError::Gpu(err)),
            None => Ok(()),
        }
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        let surface = Self::allocate(&self.device, &TextureDescriptor {
            label: "surface",
            width: width.max(1),
            height: height.max(1),
            format: TextureFormat::Rgba8Unorm,
            filter: FilterMode::Nearest,
        });
        let previous = std::mem::replace(&mut self.surface, surface);
        previous.texture.destroy();
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface.desc.width, self.surface.desc.height)
    }

    fn read_texture(&mut self, id: TextureId) -> Result<Vec<Vec4>, FluidError> {
        let texture = self
            .textures
            .remove(&id)
            .ok_or(FluidError::UnknownTexture(id.0))?;
        let result = self.read_back(&texture);
        self.textures.insert(id, texture);
        result
    }

    fn read_surface(&mut self) -> Result<Vec<Vec4>, FluidError> {
        let surface = std::mem::replace(
            &mut self.surface,
            Self::allocate(&self.device, &TextureDescriptor {
                label: "surface",
                width: 1,
                height: 1,
                format: TextureFormat::Rgba8Unorm,
                filter: FilterMode::Nearest,
            }),
        );
        let result = self.read_back(&surface);
        let placeholder = std::mem::replace(&mut self.surface, surface);
        placeholder.texture.destroy();
        result
    }

    fn texture_count(&self) -> usize {
        self.textures.len()
    }
}
