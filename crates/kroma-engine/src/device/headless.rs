use anyhow::{Context, Result};

use super::GpuInit;

/// Device and queue without a surface.
///
/// Used for offscreen work and by the GPU integration tests.
pub struct HeadlessGpu {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

/// Requests an adapter and device that are not bound to any window.
///
/// Fails when no adapter is available (for example on CI machines without a
/// GPU or software rasterizer).
pub async fn request_headless(init: &GpuInit) -> Result<HeadlessGpu> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: init.backends,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .context("no GPU adapter available")?;

    let (device, queue) = adapter
        .request_device(&init.device_descriptor())
        .await
        .context("failed to create headless wgpu device/queue")?;

    log::info!("headless device on {:?}", adapter.get_info().name);

    Ok(HeadlessGpu {
        adapter,
        device,
        queue,
    })
}
