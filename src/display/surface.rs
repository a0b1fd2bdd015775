//! Window output for the CPU warp

use crate::core::error::Error;
use crate::core::types::Result;
use crate::display::sink::{FrameSink, PngDump};
use crate::display::vsync::VsyncTick;
use crate::frame::EyeImage;
use crate::render::context::GpuContext;
use crate::render::pipeline::display::{DisplayPipeline, fit_viewport};

/// Upload target for CPU-warped frames
struct UploadTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    size: (u32, u32),
}

/// Shows CPU-warped frames in a window: each present uploads the image
/// and blits it to the surface with the display pipeline.
pub struct SurfaceSink {
    context: GpuContext,
    pipeline: DisplayPipeline,
    upload: Option<UploadTexture>,
    last: Option<EyeImage>,
    dump: Option<PngDump>,
}

impl SurfaceSink {
    pub fn new(context: GpuContext) -> Result<Self> {
        let format = context
            .format()
            .ok_or_else(|| Error::Gpu("SurfaceSink needs a windowed context".into()))?;
        let pipeline = DisplayPipeline::new(&context.device, format);
        Ok(Self {
            context,
            pipeline,
            upload: None,
            last: None,
            dump: None,
        })
    }

    pub fn with_dump(mut self, dump: PngDump) -> Self {
        self.dump = Some(dump);
        self
    }

    /// (Re)create the upload texture when the frame size changes
    fn ensure_upload(&mut self, width: u32, height: u32) {
        let stale = self.upload.as_ref().is_none_or(|u| u.size != (width, height));
        if stale {
            let device = &self.context.device;
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("cpu_warp_upload"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let bind_group = self.pipeline.create_bind_group(device, &view);
            self.upload = Some(UploadTexture {
                texture,
                bind_group,
                size: (width, height),
            });
        }
    }
}

impl FrameSink for SurfaceSink {
    fn present(&mut self, frame: &EyeImage, tick: VsyncTick) -> Result<()> {
        let (width, height) = (frame.width(), frame.height());
        self.ensure_upload(width, height);
        let Some(upload) = self.upload.as_ref() else {
            return Err(Error::Gpu("Upload texture missing".into()));
        };

        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &upload.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frame.as_bytes(),
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

        let output = self.context.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let viewport = fit_viewport(width, height, output.texture.width(), output.texture.height());

        let mut encoder = self.context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("surface_sink_encoder"),
        });
        self.pipeline.render(&mut encoder, &view, viewport, &upload.bind_group, None);
        self.context.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        if let Some(dump) = &self.dump {
            dump.maybe_write(frame, tick);
        }

        match self.last.as_mut() {
            Some(last) if last.width() == width && last.height() == height => {
                last.pixels_mut().copy_from_slice(frame.pixels());
            }
            _ => self.last = Some(frame.clone()),
        }
        Ok(())
    }

    fn last_frame(&self) -> Option<&EyeImage> {
        self.last.as_ref()
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.context.resize(width, height);
    }
}
