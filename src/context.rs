use crate::error::{Error, Result};

/// Headless GPU device and queue used by every engine component.
///
/// All heavy work in this crate runs as compute dispatches issued from one
/// logical host worker; the context is created once and shared by
/// reference. Readbacks (`poll(Maintain::Wait)`) are the only points where
/// the host blocks on the GPU.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Acquire a high-performance adapter with no surface and raised
    /// storage-buffer limits (distance volumes at 256^3 exceed the
    /// downlevel default binding size).
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or(Error::NoAdapter)?;

        let mut required_limits = wgpu::Limits::downlevel_defaults();
        required_limits.max_buffer_size = 1 << 30;
        required_limits.max_storage_buffer_binding_size = 1 << 30;
        required_limits.max_compute_invocations_per_workgroup = 256;
        required_limits.max_compute_workgroup_size_x = 256;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("workspace-tsdf device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                    memory_hints: wgpu::MemoryHints::MemoryUsage,
                },
                None,
            )
            .await?;

        log::debug!("acquired GPU device: {:?}", adapter.get_info().name);

        Ok(Self { device, queue })
    }

    /// Like [`GpuContext::new`] but returns `None` when no adapter exists.
    /// Used by tests so they skip cleanly on machines without a GPU.
    pub fn try_new() -> Option<Self> {
        match Self::new() {
            Ok(ctx) => Some(ctx),
            Err(err) => {
                log::warn!("GPU context unavailable: {err}");
                None
            }
        }
    }
}
