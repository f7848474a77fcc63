use std::path::PathBuf;

use anyhow::{Context, Result};
use kroma_engine::render::{GraphicsPipeline, GraphicsPipelineDescription, Shader, Stage};

/// Offscreen color format the scene is rendered into.
pub const SCENE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const SHADER_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/resources/shaders");

fn shader(file: &str) -> PathBuf {
    PathBuf::from(SHADER_DIR).join(file)
}

/// Offscreen render target the batch draws into.
pub struct SceneTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

impl SceneTarget {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("kroma scene target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SCENE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            size: (width, height),
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

impl Drop for SceneTarget {
    fn drop(&mut self) {
        self.texture.destroy();
    }
}

/// Fullscreen pass that samples the scene onto the swapchain.
pub struct Composite {
    pipeline: GraphicsPipeline,
    sampler: wgpu::Sampler,
    bind_group: wgpu::BindGroup,
}

impl Composite {
    pub fn new(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        scene: &SceneTarget,
    ) -> Result<Self> {
        let vs = Shader::from_file(device, Stage::Vertex, &shader("composite.vert.wgsl"), "main")?;
        let fs = Shader::from_file(device, Stage::Fragment, &shader("composite.frag.wgsl"), "main")?;

        let mut desc = GraphicsPipelineDescription::new("kroma composite pipeline", format, &vs, &fs);
        desc.num_samplers = 1;
        let pipeline =
            GraphicsPipeline::new(device, &desc).context("failed to create composite pipeline")?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("kroma scene sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let bind_group = Self::bind(device, &pipeline, &sampler, scene);

        Ok(Self {
            pipeline,
            sampler,
            bind_group,
        })
    }

    /// Rebinds after the scene target was recreated.
    pub fn rebind(&mut self, device: &wgpu::Device, scene: &SceneTarget) {
        self.bind_group = Self::bind(device, &self.pipeline, &self.sampler, scene);
    }

    fn bind(
        device: &wgpu::Device,
        pipeline: &GraphicsPipeline,
        sampler: &wgpu::Sampler,
        scene: &SceneTarget,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kroma composite bind group"),
            layout: &pipeline.bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(scene.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }

    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_pipeline(self.pipeline.raw());
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}
