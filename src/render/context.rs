//! GPU context management using wgpu

use std::sync::Arc;
use winit::window::Window;

use crate::core::error::Error;

/// Which native graphics API the GPU warp runs on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphicsApi {
    Vulkan,
    OpenGl,
}

impl GraphicsApi {
    pub fn backends(self) -> wgpu::Backends {
        match self {
            Self::Vulkan => wgpu::Backends::VULKAN,
            Self::OpenGl => wgpu::Backends::GL,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vulkan => "vulkan",
            Self::OpenGl => "opengl",
        }
    }
}

/// Window surface and its configuration
pub struct SurfaceTarget {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

/// GPU rendering context
pub struct GpuContext {
    pub api: GraphicsApi,
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// None when running headless
    pub surface: Option<SurfaceTarget>,
    /// Whether timestamp queries were enabled on the device
    pub timestamps: bool,
}

impl GpuContext {
    /// Create a context without a window (offscreen warp target only)
    pub async fn headless(api: GraphicsApi) -> Result<Self, Error> {
        let instance = Self::create_instance(api);
        let adapter = Self::request_adapter(&instance, None, api).await?;
        let (device, queue, timestamps) = Self::request_device(&adapter).await?;

        Ok(Self {
            api,
            instance,
            adapter,
            device,
            queue,
            surface: None,
            timestamps,
        })
    }

    /// Create a context presenting to `window`. With `vsync` the surface uses
    /// FIFO presentation so `present` is paced by the real display.
    pub async fn with_window(api: GraphicsApi, window: Arc<Window>, vsync: bool) -> Result<Self, Error> {
        let instance = Self::create_instance(api);

        let surface = instance.create_surface(window.clone())
            .map_err(|e| Error::Gpu(e.to_string()))?;

        let adapter = Self::request_adapter(&instance, Some(&surface), api).await?;
        let (device, queue, timestamps) = Self::request_device(&adapter).await?;

        let size = window.inner_size();
        let capabilities = surface.get_capabilities(&adapter);
        // Warped pixels are already display-encoded, keep the swapchain from encoding again
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| capabilities.formats.first().copied())
            .ok_or_else(|| Error::Gpu("Surface reports no formats".into()))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: capabilities.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };

        surface.configure(&device, &config);
        log::info!(
            "Surface {}x{} {:?} {:?}",
            config.width, config.height, config.format, config.present_mode
        );

        Ok(Self {
            api,
            instance,
            adapter,
            device,
            queue,
            surface: Some(SurfaceTarget { surface, config }),
            timestamps,
        })
    }

    fn create_instance(api: GraphicsApi) -> wgpu::Instance {
        let instance_desc = wgpu::InstanceDescriptor {
            backends: api.backends(),
            ..Default::default()
        };
        wgpu::Instance::new(&instance_desc)
    }

    async fn request_adapter(
        instance: &wgpu::Instance,
        surface: Option<&wgpu::Surface<'static>>,
        api: GraphicsApi,
    ) -> Result<wgpu::Adapter, Error> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Gpu(format!("No suitable {} adapter found: {:?}", api.name(), e)))?;

        let info = adapter.get_info();
        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);
        Ok(adapter)
    }

    async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue, bool), Error> {
        let timestamps = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if timestamps {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };

        let device_desc = wgpu::DeviceDescriptor {
            label: Some("atw_device"),
            required_features,
            // GL adapters often fall short of the default limits
            required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                .using_resolution(adapter.limits()),
            memory_hints: wgpu::MemoryHints::Performance,
            experimental_features: Default::default(),
            trace: Default::default(),
        };

        let (device, queue) = adapter
            .request_device(&device_desc)
            .await
            .map_err(|e| Error::Gpu(e.to_string()))?;

        if !timestamps {
            log::info!("Timestamp queries unavailable, GPU warp timing disabled");
        }
        Ok((device, queue, timestamps))
    }

    /// Resize the surface
    pub fn resize(&mut self, width: u32, height: u32) {
        if let Some(target) = &mut self.surface {
            if width > 0 && height > 0 {
                target.config.width = width;
                target.config.height = height;
                target.surface.configure(&self.device, &target.config);
            }
        }
    }

    /// Get current surface texture for rendering
    pub fn get_current_texture(&self) -> Result<wgpu::SurfaceTexture, Error> {
        let target = self
            .surface
            .as_ref()
            .ok_or_else(|| Error::Gpu("No surface in headless mode".into()))?;
        match target.surface.get_current_texture() {
            Ok(texture) => Ok(texture),
            Err(e) => {
                // Outdated or lost swapchains come back after a reconfigure
                log::debug!("Surface texture unavailable ({}), reconfiguring", e);
                target.surface.configure(&self.device, &target.config);
                target
                    .surface
                    .get_current_texture()
                    .map_err(|e| Error::Gpu(e.to_string()))
            }
        }
    }

    /// Get surface size
    pub fn size(&self) -> Option<(u32, u32)> {
        self.surface.as_ref().map(|t| (t.config.width, t.config.height))
    }

    /// Get surface format
    pub fn format(&self) -> Option<wgpu::TextureFormat> {
        self.surface.as_ref().map(|t| t.config.format)
    }
}
