// wgpu-based GPU render surface
// Per-format draw passes over cached plane textures, plus the zero-copy
// hardware-surface path with CPU-readback fallback

use std::sync::Arc;

use crate::frame::{
    chroma_dimensions, DeviceSurface, FrameData, FrameError, PixelFormat, Plane, SurfaceViews,
    VideoFrame,
};

use super::texture::TextureCache;
use super::{DestRect, Extent, RendererError};

/// WGSL shader for planar 4:2:0 frames (three single-channel planes)
const PLANAR_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.position = vec4<f32>(input.position, 0.0, 1.0);
    output.tex_coord = input.tex_coord;
    return output;
}

@group(0) @binding(0) var y_texture: texture_2d<f32>;
@group(0) @binding(1) var u_texture: texture_2d<f32>;
@group(0) @binding(2) var v_texture: texture_2d<f32>;
@group(0) @binding(3) var plane_sampler: sampler;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let y = textureSample(y_texture, plane_sampler, input.tex_coord).r;
    let u = textureSample(u_texture, plane_sampler, input.tex_coord).r - 0.5;
    let v = textureSample(v_texture, plane_sampler, input.tex_coord).r - 0.5;

    // BT.601 YUV to RGB conversion
    let r = y + 1.402 * v;
    let g = y - 0.344 * u - 0.714 * v;
    let b = y + 1.772 * u;

    return vec4<f32>(r, g, b, 1.0);
}
"#;

/// WGSL shader for semi-planar 4:2:0 frames (luma plane + interleaved chroma)
const SEMI_PLANAR_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.position = vec4<f32>(input.position, 0.0, 1.0);
    output.tex_coord = input.tex_coord;
    return output;
}

@group(0) @binding(0) var y_texture: texture_2d<f32>;
@group(0) @binding(1) var uv_texture: texture_2d<f32>;
@group(0) @binding(2) var plane_sampler: sampler;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let y = textureSample(y_texture, plane_sampler, input.tex_coord).r;
    let uv = textureSample(uv_texture, plane_sampler, input.tex_coord).rg - vec2<f32>(0.5, 0.5);

    // BT.601 YUV to RGB conversion
    let r = y + 1.402 * uv.y;
    let g = y - 0.344 * uv.x - 0.714 * uv.y;
    let b = y + 1.772 * uv.x;

    return vec4<f32>(r, g, b, 1.0);
}
"#;

/// WGSL shader for packed BGRA frames
const PACKED_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.position = vec4<f32>(input.position, 0.0, 1.0);
    output.tex_coord = input.tex_coord;
    return output;
}

@group(0) @binding(0) var frame_texture: texture_2d<f32>;
@group(0) @binding(1) var frame_sampler: sampler;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(frame_texture, frame_sampler, input.tex_coord);
}
"#;

/// Conversion pass, selected by plane count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// 3-plane pass for planar 4:2:0
    Planar,
    /// 2-plane pass for semi-planar 4:2:0 (also used for bound hardware surfaces)
    SemiPlanar,
    /// single-texture pass for packed RGB
    Packed,
}

impl PassKind {
    /// Pass for a software pixel format. Hardware surfaces are bound
    /// directly and do not go through this dispatch; anything else
    /// unrecognized draws nothing.
    pub fn for_format(format: PixelFormat) -> Option<PassKind> {
        match format {
            PixelFormat::I420 => Some(PassKind::Planar),
            PixelFormat::Nv12 => Some(PassKind::SemiPlanar),
            PixelFormat::Bgra => Some(PassKind::Packed),
            PixelFormat::Surface => None,
        }
    }

    /// Number of shader-resource views the pass binds.
    pub fn view_count(&self) -> usize {
        match self {
            PassKind::Planar => 3,
            PassKind::SemiPlanar => 2,
            PassKind::Packed => 1,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 2],
    tex_coord: [f32; 2],
}

impl Vertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &Self::ATTRIBUTES,
    };
}

/// Map a surface-pixel point into normalized device coordinates.
fn point_to_ndc(x: i32, y: i32, target_width: u32, target_height: u32) -> [f32; 2] {
    [
        2.0 * x as f32 / target_width as f32 - 1.0,
        1.0 - 2.0 * y as f32 / target_height as f32,
    ]
}

/// Textured quad (triangle strip) covering `dest` within a surface of the
/// given extent.
fn quad_vertices(dest: DestRect, extent: Extent) -> [Vertex; 4] {
    let left = dest.x;
    let top = dest.y;
    let right = dest.x + dest.width as i32;
    let bottom = dest.y + dest.height as i32;
    [
        Vertex {
            position: point_to_ndc(left, top, extent.width, extent.height),
            tex_coord: [0.0, 0.0],
        },
        Vertex {
            position: point_to_ndc(right, top, extent.width, extent.height),
            tex_coord: [1.0, 0.0],
        },
        Vertex {
            position: point_to_ndc(left, bottom, extent.width, extent.height),
            tex_coord: [0.0, 1.0],
        },
        Vertex {
            position: point_to_ndc(right, bottom, extent.width, extent.height),
            tex_coord: [1.0, 1.0],
        },
    ]
}

/// An in-flight frame: acquired back buffer plus its command encoder.
pub struct FrameCtx {
    output: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
}

/// GPU render surface owning device, queue, swap chain and the per-format
/// pipelines.
pub struct GpuSurface {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    config: Option<wgpu::SurfaceConfiguration>,

    planar_pipeline: wgpu::RenderPipeline,
    planar_layout: wgpu::BindGroupLayout,
    semi_planar_pipeline: wgpu::RenderPipeline,
    semi_planar_layout: wgpu::BindGroupLayout,
    packed_pipeline: wgpu::RenderPipeline,
    packed_layout: wgpu::BindGroupLayout,

    vertex_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    cache: TextureCache,
    extent: Extent,
}

impl GpuSurface {
    /// Create a surface bound to `window`.
    ///
    /// Initialization order is strict: device, then shader/pipeline
    /// resources, then the vertex buffer, then the swap chain, then the
    /// sampler, then the initial extent. Any failing step aborts creation;
    /// no partial surface is retained.
    pub fn create(window: Arc<winit::window::Window>, adapter_id: Option<u32>) -> Result<Self, RendererError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| RendererError::InitError(format!("Failed to create surface: {}", e)))?;

        let adapter = select_adapter(&instance, &surface, adapter_id)?;
        log::info!("Using GPU adapter: {:?}", adapter.get_info().name);

        // Combined NV12 textures need an optional device feature; request it
        // when the adapter has it, otherwise the texture cache splits planes.
        let required_features = adapter.features() & wgpu::Features::TEXTURE_FORMAT_NV12;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Frameview Device"),
            required_features,
            ..Default::default()
        }))
        .map_err(|e| RendererError::InitError(format!("Failed to create device: {}", e)))?;

        let capabilities = surface.get_capabilities(&adapter);
        let format = capabilities
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(capabilities.formats[0]);

        // Shader and pipeline resources
        let (planar_layout, planar_pipeline) = build_pass(
            &device,
            "Planar",
            PLANAR_SHADER,
            PassKind::Planar.view_count(),
            format,
        );
        let (semi_planar_layout, semi_planar_pipeline) = build_pass(
            &device,
            "SemiPlanar",
            SEMI_PLANAR_SHADER,
            PassKind::SemiPlanar.view_count(),
            format,
        );
        let (packed_layout, packed_pipeline) = build_pass(
            &device,
            "Packed",
            PACKED_SHADER,
            PassKind::Packed.view_count(),
            format,
        );

        // Vertex buffer for the destination quad
        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Quad Vertex Buffer"),
            size: (4 * std::mem::size_of::<Vertex>()) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Swap chain
        let present_mode = if capabilities
            .present_modes
            .contains(&wgpu::PresentMode::Mailbox)
        {
            wgpu::PresentMode::Mailbox
        } else if capabilities
            .present_modes
            .contains(&wgpu::PresentMode::Immediate)
        {
            wgpu::PresentMode::Immediate
        } else {
            wgpu::PresentMode::Fifo // always supported
        };
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        // Sampler state
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Frame Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        let extent = Extent::new(config.width, config.height);
        log::info!("GPU surface initialized at {}x{}", extent.width, extent.height);

        Ok(Self {
            device,
            queue,
            surface,
            config: Some(config),
            planar_pipeline,
            planar_layout,
            semi_planar_pipeline,
            semi_planar_layout,
            packed_pipeline,
            packed_layout,
            vertex_buffer,
            sampler,
            cache: TextureCache::new(),
            extent,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Resize the swap chain. No-op when dimensions are unchanged or no
    /// swap chain is configured.
    pub fn resize(&mut self, width: u32, height: u32) {
        let Some(config) = self.config.as_mut() else {
            return;
        };
        if !self.extent.should_resize(width, height) {
            return;
        }
        config.width = width.max(1);
        config.height = height.max(1);
        self.surface.configure(&self.device, config);
        self.extent = Extent::new(config.width, config.height);
        log::debug!("Surface resized to {}x{}", config.width, config.height);
    }

    /// Acquire the back buffer and bind blend state + render target for this
    /// frame (a clear pass; draw passes then load).
    pub fn begin(&self) -> Result<FrameCtx, RendererError> {
        let output = self.surface.get_current_texture().map_err(|e| {
            RendererError::RenderError(format!("Failed to get surface texture: {}", e))
        })?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        Ok(FrameCtx {
            output,
            view,
            encoder,
        })
    }

    /// One textured-quad draw mapping `dest` into NDC relative to the
    /// current surface extent.
    pub fn draw_texture(
        &self,
        ctx: &mut FrameCtx,
        pass_kind: PassKind,
        bind_group: &wgpu::BindGroup,
        dest: DestRect,
    ) {
        let vertices = quad_vertices(dest, self.extent);
        self.queue
            .write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(&vertices));

        let mut pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Draw Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &ctx.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_pipeline(match pass_kind {
            PassKind::Planar => &self.planar_pipeline,
            PassKind::SemiPlanar => &self.semi_planar_pipeline,
            PassKind::Packed => &self.packed_pipeline,
        });
        pass.set_bind_group(0, bind_group, &[]);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.draw(0..4, 0..1);
    }

    /// Submit the recorded frame and flip the swap chain.
    pub fn present(&self, ctx: FrameCtx) {
        let FrameCtx {
            output, encoder, ..
        } = ctx;
        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
    }

    /// Upload `frame` and draw it filling the surface.
    ///
    /// Hardware frames skip the texture cache: the device surface is bound
    /// directly as shader-readable views, and only when that bind fails is
    /// the surface read back into a software frame and sent through the
    /// normal plane path.
    pub fn render_frame(&mut self, frame: &VideoFrame) -> Result<(), RendererError> {
        if let FrameData::Surface { surface, index } = frame.data() {
            match surface.bind_views(*index) {
                Ok(views) => return self.render_bound_surface(&views),
                Err(e) => {
                    log::debug!("Zero-copy bind failed ({}), reading surface back", e);
                    let software = surface
                        .read_back(*index)
                        .map_err(|e| RendererError::RenderError(e.to_string()))?;
                    return self.render_software(&software);
                }
            }
        }
        self.render_software(frame)
    }

    fn render_software(&mut self, frame: &VideoFrame) -> Result<(), RendererError> {
        let Some(pass_kind) = PassKind::for_format(frame.format()) else {
            // Unrecognized formats draw nothing.
            return Ok(());
        };
        let layout = match pass_kind {
            PassKind::Planar => &self.planar_layout,
            PassKind::SemiPlanar => &self.semi_planar_layout,
            PassKind::Packed => &self.packed_layout,
        };
        self.cache.ensure(
            &self.device,
            layout,
            &self.sampler,
            frame.format(),
            frame.width(),
            frame.height(),
        )?;
        self.cache.update(&self.queue, frame)?;

        let bind_group = self
            .cache
            .bind_group()
            .ok_or_else(|| RendererError::RenderError("texture set missing bind group".into()))?;
        let mut ctx = self.begin()?;
        self.draw_texture(
            &mut ctx,
            pass_kind,
            bind_group,
            DestRect::full(self.extent.width, self.extent.height),
        );
        self.present(ctx);
        Ok(())
    }

    /// Draw directly from zero-copy surface views with the 2-plane pass.
    fn render_bound_surface(&mut self, views: &SurfaceViews) -> Result<(), RendererError> {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bound Surface Bind Group"),
            layout: &self.semi_planar_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&views.luma),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&views.chroma),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        let mut ctx = self.begin()?;
        self.draw_texture(
            &mut ctx,
            PassKind::SemiPlanar,
            &bind_group,
            DestRect::full(self.extent.width, self.extent.height),
        );
        self.present(ctx);
        Ok(())
    }
}

fn select_adapter(
    instance: &wgpu::Instance,
    surface: &wgpu::Surface<'_>,
    adapter_id: Option<u32>,
) -> Result<wgpu::Adapter, RendererError> {
    // Preferred adapter by device id; a missing id falls back to the
    // default hardware adapter rather than failing.
    if let Some(id) = adapter_id {
        if let Some(adapter) = instance
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .find(|a| a.get_info().device == id && a.is_surface_supported(surface))
        {
            return Ok(adapter);
        }
        log::warn!("Adapter {} not found, falling back to default", id);
    }

    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: Some(surface),
        force_fallback_adapter: false,
    }))
    .map_err(|e| RendererError::GpuNotAvailable(format!("Failed to request adapter: {}", e)))
}

fn build_pass(
    device: &wgpu::Device,
    name: &str,
    shader_source: &str,
    texture_count: usize,
    surface_format: wgpu::TextureFormat,
) -> (wgpu::BindGroupLayout, wgpu::RenderPipeline) {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&format!("{} Shader", name)),
        source: wgpu::ShaderSource::Wgsl(shader_source.into()),
    });

    let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..texture_count)
        .map(|i| wgpu::BindGroupLayoutEntry {
            binding: i as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        })
        .collect();
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: texture_count as u32,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{} Bind Group Layout", name)),
        entries: &entries,
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{} Pipeline Layout", name)),
        bind_group_layouts: &[&layout],
        immediate_size: 0,
    });

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&format!("{} Pipeline", name)),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[Vertex::LAYOUT],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: surface_format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    });

    (layout, pipeline)
}

/// A decoded-frame pool living in device memory: an NV12 array texture whose
/// layers hold individual frames, referenced by array index.
///
/// This is the concrete `DeviceSurface` a GPU decoder hands to the
/// presenter. `bind_views` is the zero-copy path; `read_back` exists for
/// devices (and callers) that reject arbitrary slice binds.
pub struct ArrayTextureSurface {
    device: wgpu::Device,
    queue: wgpu::Queue,
    texture: wgpu::Texture,
    layers: u32,
    width: u32,
    height: u32,
}

impl ArrayTextureSurface {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        width: u32,
        height: u32,
        layers: u32,
    ) -> Result<Self, RendererError> {
        if !device
            .features()
            .contains(wgpu::Features::TEXTURE_FORMAT_NV12)
        {
            return Err(RendererError::GpuNotAvailable(
                "device lacks combined NV12 texture support".into(),
            ));
        }
        if width % 2 != 0 || height % 2 != 0 || layers == 0 {
            return Err(RendererError::AllocError(format!(
                "invalid surface pool geometry {}x{}x{}",
                width, height, layers
            )));
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Decode Surface Pool"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::NV12,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[
                wgpu::TextureFormat::R8Unorm,
                wgpu::TextureFormat::Rg8Unorm,
            ],
        });
        Ok(Self {
            device: device.clone(),
            queue: queue.clone(),
            texture,
            layers,
            width,
            height,
        })
    }

    /// The underlying pool texture, for the decoder to write into.
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    fn read_plane(
        &self,
        aspect: wgpu::TextureAspect,
        index: u32,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<Plane, FrameError> {
        // Copy rows are padded to wgpu's buffer alignment; the padded pitch
        // is carried as the plane stride rather than repacked.
        let tight = width * bytes_per_pixel;
        let padded = tight.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Surface Readback"),
            size: (padded * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: index,
                },
                aspect,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::Wait);
        rx.recv()
            .map_err(|_| FrameError::ReadbackFailed("map callback dropped".into()))?
            .map_err(|e| FrameError::ReadbackFailed(e.to_string()))?;

        let data = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(Plane::new(data, padded as usize))
    }
}

impl DeviceSurface for ArrayTextureSurface {
    fn bind_views(&self, index: u32) -> Result<SurfaceViews, FrameError> {
        if index >= self.layers {
            return Err(FrameError::BindFailed(format!(
                "layer {} out of range ({} layers)",
                index, self.layers
            )));
        }
        let luma = self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Surface Luma View"),
            format: Some(wgpu::TextureFormat::R8Unorm),
            dimension: Some(wgpu::TextureViewDimension::D2),
            aspect: wgpu::TextureAspect::Plane0,
            base_array_layer: index,
            array_layer_count: Some(1),
            ..Default::default()
        });
        let chroma = self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Surface Chroma View"),
            format: Some(wgpu::TextureFormat::Rg8Unorm),
            dimension: Some(wgpu::TextureViewDimension::D2),
            aspect: wgpu::TextureAspect::Plane1,
            base_array_layer: index,
            array_layer_count: Some(1),
            ..Default::default()
        });
        Ok(SurfaceViews { luma, chroma })
    }

    fn read_back(&self, index: u32) -> Result<VideoFrame, FrameError> {
        if index >= self.layers {
            return Err(FrameError::ReadbackFailed(format!(
                "layer {} out of range ({} layers)",
                index, self.layers
            )));
        }
        let (chroma_w, chroma_h) = chroma_dimensions(self.width, self.height);
        let y = self.read_plane(wgpu::TextureAspect::Plane0, index, self.width, self.height, 1)?;
        let uv = self.read_plane(wgpu::TextureAspect::Plane1, index, chroma_w, chroma_h, 2)?;
        Ok(VideoFrame::nv12(self.width, self.height, None, y, uv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_view_counts() {
        // 3-plane input binds exactly 3 views, 2-plane input exactly 2.
        assert_eq!(
            PassKind::for_format(PixelFormat::I420).unwrap().view_count(),
            3
        );
        assert_eq!(
            PassKind::for_format(PixelFormat::Nv12).unwrap().view_count(),
            2
        );
        assert_eq!(
            PassKind::for_format(PixelFormat::Bgra).unwrap().view_count(),
            1
        );
        assert!(PassKind::for_format(PixelFormat::Surface).is_none());
    }

    #[test]
    fn test_point_to_ndc_corners() {
        assert_eq!(point_to_ndc(0, 0, 640, 480), [-1.0, 1.0]);
        assert_eq!(point_to_ndc(640, 480, 640, 480), [1.0, -1.0]);
        assert_eq!(point_to_ndc(320, 240, 640, 480), [0.0, 0.0]);
    }

    #[test]
    fn test_quad_covers_dest_rect() {
        let quad = quad_vertices(DestRect::full(640, 480), Extent::new(640, 480));
        assert_eq!(quad[0].position, [-1.0, 1.0]);
        assert_eq!(quad[1].position, [1.0, 1.0]);
        assert_eq!(quad[2].position, [-1.0, -1.0]);
        assert_eq!(quad[3].position, [1.0, -1.0]);
        assert_eq!(quad[0].tex_coord, [0.0, 0.0]);
        assert_eq!(quad[3].tex_coord, [1.0, 1.0]);
    }

    #[test]
    fn test_quad_maps_partial_rect() {
        let dest = DestRect {
            x: 160,
            y: 120,
            width: 320,
            height: 240,
        };
        let quad = quad_vertices(dest, Extent::new(640, 480));
        assert_eq!(quad[0].position, [-0.5, 0.5]);
        assert_eq!(quad[3].position, [0.5, -0.5]);
    }
}
