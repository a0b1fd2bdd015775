//! GPU time warp through wgpu, on Vulkan or OpenGL
//!
//! The distortion mesh is a static vertex buffer; only the per-eye start
//! and end transforms change each refresh. Eye buffers are uploaded into a
//! two-layer texture array when a new stereo frame arrives and re-warped
//! from there on every later vsync until the renderer catches up.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::core::error::Error;
use crate::core::types::{Mat3, Result};
use crate::display::{PngDump, VsyncTick};
use crate::frame::{EyeImage, StereoFrame};
use crate::math::scanout_fraction;
use crate::render::context::{GpuContext, GraphicsApi};
use crate::render::pipeline::display::{DisplayPipeline, fit_viewport};
use crate::render::profiler::{GpuPass, GpuProfiler};
use crate::warp::backend::{WarpBackend, WarpJob};
use crate::warp::distortion::DistortionMesh;

const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Dump readbacks allowed in flight before new dumps are skipped
const MAX_PENDING_DUMPS: usize = 2;

/// One distortion mesh vertex
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct WarpVertex {
    /// Clip-space position in the side-by-side output
    position: [f32; 2],
    tangent_r: [f32; 2],
    tangent_g: [f32; 2],
    tangent_b: [f32; 2],
    /// Scan-out fraction of the vertex column
    fraction: f32,
    eye: u32,
}

impl WarpVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 6] = wgpu::vertex_attr_array![
        0 => Float32x2,
        1 => Float32x2,
        2 => Float32x2,
        3 => Float32x2,
        4 => Float32,
        5 => Uint32,
    ];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Matches `WarpUniforms` in timewarp.wgsl; mat3x3 columns are 16-byte aligned
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct WarpUniforms {
    start: [[[f32; 4]; 3]; 2],
    end: [[[f32; 4]; 3]; 2],
    chromatic: u32,
    _pad: [u32; 3],
}

fn padded_columns(m: &Mat3) -> [[f32; 4]; 3] {
    [m.x_axis, m.y_axis, m.z_axis].map(|c| [c.x, c.y, c.z, 0.0])
}

impl WarpUniforms {
    fn from_job(job: &WarpJob<'_>) -> Self {
        Self {
            start: job.start.each_ref().map(padded_columns),
            end: job.end.each_ref().map(padded_columns),
            chromatic: job.chromatic_aberration as u32,
            _pad: [0; 3],
        }
    }
}

/// Vertices and triangle indices for both eyes of `mesh`
fn mesh_geometry(mesh: &DistortionMesh) -> (Vec<WarpVertex>, Vec<u32>) {
    let cols = mesh.cols();
    let rows = mesh.rows();
    let per_eye = (cols + 1) * (rows + 1);
    let mut vertices = Vec::with_capacity(per_eye as usize * 2);
    let mut indices = Vec::with_capacity((cols * rows * 6 * 2) as usize);

    for eye in 0..2usize {
        for row in 0..=rows {
            for col in 0..=cols {
                let x = col as f32 / cols as f32;
                let y = row as f32 / rows as f32;
                let [r, g, b] = mesh.coords(eye, col, row);
                vertices.push(WarpVertex {
                    position: [-1.0 + eye as f32 + x, 1.0 - 2.0 * y],
                    tangent_r: r.to_array(),
                    tangent_g: g.to_array(),
                    tangent_b: b.to_array(),
                    fraction: scanout_fraction(eye, x),
                    eye: eye as u32,
                });
            }
        }

        let base = eye as u32 * per_eye;
        for row in 0..rows {
            for col in 0..cols {
                let tl = base + row * (cols + 1) + col;
                let tr = tl + 1;
                let bl = tl + cols + 1;
                let br = bl + 1;
                indices.extend_from_slice(&[tl, bl, tr, tr, bl, br]);
            }
        }
    }
    (vertices, indices)
}

/// Eye buffer texture array and the frame it currently holds
struct EyeTextures {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    resolution: (u32, u32),
    frame_index: Option<u64>,
}

impl EyeTextures {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("eye_textures"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 2,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("eye_textures_view"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });
        Self {
            texture,
            view,
            resolution: (width, height),
            frame_index: None,
        }
    }

    fn upload(&mut self, queue: &wgpu::Queue, frame: &StereoFrame) {
        let (width, height) = self.resolution;
        for (layer, eye) in frame.eyes.iter().enumerate() {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &self.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d { x: 0, y: 0, z: layer as u32 },
                    aspect: wgpu::TextureAspect::All,
                },
                eye.as_bytes(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * 4),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
        self.frame_index = Some(frame.index);
    }
}

/// Warp pipeline and its static resources
pub struct GpuTimeWarp {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    eyes: EyeTextures,
    bind_group: wgpu::BindGroup,
    output: wgpu::Texture,
    output_view: wgpu::TextureView,
    output_size: (u32, u32),
}

impl GpuTimeWarp {
    pub fn new(device: &wgpu::Device, mesh: &DistortionMesh, eye_width: u32, eye_height: u32) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("timewarp_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/timewarp.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("timewarp_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("timewarp_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("eye_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("timewarp_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[WarpVertex::layout()],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: OUTPUT_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview_mask: None,
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timewarp_uniforms"),
            size: std::mem::size_of::<WarpUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let (vertices, indices) = mesh_geometry(mesh);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("distortion_mesh_vertices"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("distortion_mesh_indices"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let output_size = (eye_width * 2, eye_height);
        let output = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("timewarp_output"),
            size: wgpu::Extent3d {
                width: output_size.0,
                height: output_size.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OUTPUT_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());

        // Placeholder until the first frame fixes the eye buffer resolution
        let eyes = EyeTextures::new(device, 1, 1);
        let bind_group = Self::create_bind_group(device, &bind_group_layout, &uniform_buffer, &eyes.view, &sampler);

        Self {
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            eyes,
            bind_group,
            output,
            output_view,
            output_size,
        }
    }

    fn create_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        uniforms: &wgpu::Buffer,
        eyes: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("timewarp_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(eyes),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }

    /// Upload the frame's eye buffers unless they are already resident.
    /// Returns true when an upload happened.
    pub fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, frame: &StereoFrame) -> bool {
        if self.eyes.frame_index == Some(frame.index) {
            return false;
        }
        let resolution = (frame.eyes[0].width(), frame.eyes[0].height());
        if resolution != self.eyes.resolution {
            log::debug!("Eye textures resized to {}x{}", resolution.0, resolution.1);
            self.eyes = EyeTextures::new(device, resolution.0, resolution.1);
            self.bind_group = Self::create_bind_group(
                device,
                &self.bind_group_layout,
                &self.uniform_buffer,
                &self.eyes.view,
                &self.sampler,
            );
        }
        self.eyes.upload(queue, frame);
        true
    }

    /// Record the warp pass into the offscreen output
    pub fn encode(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        job: &WarpJob<'_>,
        timestamp_writes: Option<wgpu::RenderPassTimestampWrites<'_>>,
    ) {
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&WarpUniforms::from_job(job)));

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("timewarp_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.output_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..self.index_count, 0, 0..1);
    }

    pub fn output_view(&self) -> &wgpu::TextureView {
        &self.output_view
    }

    pub fn output_size(&self) -> (u32, u32) {
        self.output_size
    }

    /// Blocking readback of the offscreen output
    /// Record a copy of the output into a fresh mappable buffer
    fn encode_readback(&self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder) -> Readback {
        let (width, height) = self.output_size;
        let bytes_per_row = (width * 4).div_ceil(256) * 256;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timewarp_readback"),
            size: (bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.output,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        Readback {
            buffer,
            width,
            height,
            bytes_per_row,
            mapped: Arc::new(OnceLock::new()),
        }
    }

    /// Copy the current output back to the CPU, waiting for the GPU
    pub fn read_output(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<EyeImage> {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("timewarp_readback_encoder"),
        });
        let readback = self.encode_readback(device, &mut encoder);
        queue.submit(std::iter::once(encoder.finish()));

        readback.map();
        device
            .poll(wgpu::PollType::Wait { submission_index: None, timeout: None })
            .map_err(|e| Error::Gpu(e.to_string()))?;
        readback
            .take()
            .unwrap_or_else(|| Err(Error::Gpu("Readback was not mapped".into())))
    }
}

/// Output copy in flight to the CPU
struct Readback {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    bytes_per_row: u32,
    /// Set by the map callback
    mapped: Arc<OnceLock<bool>>,
}

impl Readback {
    /// Request the mapping. Must come after the copy has been submitted.
    fn map(&self) {
        let mapped = self.mapped.clone();
        self.buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = mapped.set(result.is_ok());
        });
    }

    /// The image once the mapping has completed, None while it is pending
    fn take(&self) -> Option<Result<EyeImage>> {
        let ok = *self.mapped.get()?;
        if !ok {
            return Some(Err(Error::Gpu("Readback mapping failed".into())));
        }
        let data = self.buffer.slice(..).get_mapped_range();
        let image = EyeImage::from_padded_rows(self.width, self.height, self.bytes_per_row, &data)
            .ok_or_else(|| Error::Gpu("Readback buffer too small".into()));
        drop(data);
        self.buffer.unmap();
        Some(image)
    }
}

/// A PNG dump waiting for its readback
struct PendingDump {
    tick: VsyncTick,
    readback: Readback,
}

/// Window presentation of the warped output
struct SurfaceBlit {
    pipeline: DisplayPipeline,
    bind_group: wgpu::BindGroup,
}

/// The Vulkan and OpenGL paths
pub struct GpuBackend {
    name: &'static str,
    context: GpuContext,
    warp: GpuTimeWarp,
    blit: Option<SurfaceBlit>,
    profiler: GpuProfiler,
    dump: Option<PngDump>,
    pending_dumps: VecDeque<PendingDump>,
    presented: bool,
}

impl GpuBackend {
    /// Build the warp on `context`. A context with a surface presents there,
    /// a headless one only renders to the offscreen output.
    pub fn new(context: GpuContext, mesh: &DistortionMesh, eye_width: u32, eye_height: u32) -> Self {
        let warp = GpuTimeWarp::new(&context.device, mesh, eye_width, eye_height);
        let blit = context.format().map(|format| {
            let pipeline = DisplayPipeline::new(&context.device, format);
            let bind_group = pipeline.create_bind_group(&context.device, warp.output_view());
            SurfaceBlit { pipeline, bind_group }
        });
        let profiler = GpuProfiler::new(&context.device, &context.queue, context.timestamps);
        let name = context.api.name();
        log::info!(
            "GPU warp ready: {} mesh {}x{}, output {}x{}{}",
            name,
            mesh.cols(),
            mesh.rows(),
            eye_width * 2,
            eye_height,
            if blit.is_some() { "" } else { " (headless)" }
        );

        Self {
            name,
            context,
            warp,
            blit,
            profiler,
            dump: None,
            pending_dumps: VecDeque::new(),
            presented: false,
        }
    }

    /// Headless backend on a fresh device
    pub fn headless(api: GraphicsApi, mesh: &DistortionMesh, eye_width: u32, eye_height: u32) -> Result<Self> {
        let context = pollster::block_on(GpuContext::headless(api))?;
        Ok(Self::new(context, mesh, eye_width, eye_height))
    }

    pub fn with_dump(mut self, dump: PngDump) -> Self {
        self.dump = Some(dump);
        self
    }

    /// Hand finished dump readbacks to the PNG writer. Never waits on the GPU.
    fn collect_dumps(&mut self) {
        let Some(dump) = &self.dump else { return };
        while let Some(pending) = self.pending_dumps.front() {
            let Some(result) = pending.readback.take() else { break };
            match result {
                Ok(image) => dump.submit(image, pending.tick),
                Err(e) => log::warn!("Dump readback for vsync {} failed: {}", pending.tick.index, e),
            }
            self.pending_dumps.pop_front();
        }
    }
}

impl WarpBackend for GpuBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn warp_and_present(&mut self, job: &WarpJob<'_>) -> Result<()> {
        let device = &self.context.device;
        let queue = &self.context.queue;

        if self.warp.prepare(device, queue, job.frame) {
            log::trace!("Uploaded eye buffers of frame {}", job.frame.index);
        }

        let surface_texture = match &self.blit {
            Some(_) => Some(self.context.get_current_texture()?),
            None => None,
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("timewarp_encoder"),
        });

        self.warp.encode(
            queue,
            &mut encoder,
            job,
            self.profiler.render_pass_timestamp_writes(GpuPass::Warp),
        );

        if let (Some(blit), Some(frame)) = (&self.blit, &surface_texture) {
            let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
            let (src_w, src_h) = self.warp.output_size();
            let viewport = fit_viewport(src_w, src_h, frame.texture.width(), frame.texture.height());
            blit.pipeline.render(
                &mut encoder,
                &view,
                viewport,
                &blit.bind_group,
                self.profiler.render_pass_timestamp_writes(GpuPass::Display),
            );
        }

        // Dump readbacks ride along with the frame; at most a few in flight
        let dump_readback = self
            .dump
            .as_ref()
            .filter(|d| d.is_due(job.tick) && self.pending_dumps.len() < MAX_PENDING_DUMPS)
            .map(|_| self.warp.encode_readback(device, &mut encoder));

        self.profiler.resolve(&mut encoder);
        queue.submit(std::iter::once(encoder.finish()));

        if let Some(readback) = dump_readback {
            readback.map();
            self.pending_dumps.push_back(PendingDump {
                tick: job.tick,
                readback,
            });
        }

        match surface_texture {
            Some(frame) => frame.present(),
            // Headless: a present means the GPU finished the warp
            None => {
                device
                    .poll(wgpu::PollType::Wait { submission_index: None, timeout: None })
                    .map_err(|e| Error::Gpu(e.to_string()))?;
            }
        }
        self.profiler.read_results(device);
        self.presented = true;

        if !self.pending_dumps.is_empty() {
            device
                .poll(wgpu::PollType::Poll)
                .map_err(|e| Error::Gpu(e.to_string()))?;
            self.collect_dumps();
        }
        Ok(())
    }

    fn capture(&mut self) -> Option<EyeImage> {
        if !self.presented {
            return None;
        }
        match self.warp.read_output(&self.context.device, &self.context.queue) {
            Ok(image) => Some(image),
            Err(e) => {
                log::warn!("GPU capture failed: {}", e);
                None
            }
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.context.resize(width, height);
    }

    fn gpu_time_ms(&self) -> Option<f32> {
        self.profiler
            .is_enabled()
            .then(|| self.profiler.latest_timings().warp_ms)
    }
}
