use anyhow::{Context, Result};

use super::shader::{Shader, Stage};
use crate::gpu::validated;

/// Fixed-function and programmable state for one render pipeline.
pub struct GraphicsPipelineDescription<'a> {
    pub label: &'a str,
    pub topology: wgpu::PrimitiveTopology,
    pub front_face: wgpu::FrontFace,
    pub cull_mode: Option<wgpu::Face>,
    pub polygon_mode: wgpu::PolygonMode,

    /// Color target format.
    pub format: wgpu::TextureFormat,

    pub vertex_shader: &'a Shader,
    pub fragment_shader: &'a Shader,

    /// Straight-alpha blending when set; replace otherwise.
    pub enable_blend: bool,

    pub vertex_buffers: &'a [wgpu::VertexBufferLayout<'a>],

    /// Samplers the fragment stage is expected to declare.
    pub num_samplers: u32,
}

impl<'a> GraphicsPipelineDescription<'a> {
    /// Triangle list, counter-clockwise, no culling, no blending.
    pub fn new(
        label: &'a str,
        format: wgpu::TextureFormat,
        vertex_shader: &'a Shader,
        fragment_shader: &'a Shader,
    ) -> Self {
        Self {
            label,
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            format,
            vertex_shader,
            fragment_shader,
            enable_blend: false,
            vertex_buffers: &[],
            num_samplers: 0,
        }
    }
}

/// Owned render pipeline. Depth is never attached; all drawing is 2D in submission order.
pub struct GraphicsPipeline {
    pipeline: wgpu::RenderPipeline,
}

impl GraphicsPipeline {
    pub fn new(device: &wgpu::Device, desc: &GraphicsPipelineDescription<'_>) -> Result<Self> {
        let vs = desc.vertex_shader;
        let fs = desc.fragment_shader;

        anyhow::ensure!(
            vs.stage() == Stage::Vertex,
            "{}: vertex slot holds a {:?} shader",
            desc.label,
            vs.stage()
        );
        anyhow::ensure!(
            fs.stage() == Stage::Fragment,
            "{}: fragment slot holds a {:?} shader",
            desc.label,
            fs.stage()
        );

        let declared = fs.reflection().num_samplers;
        anyhow::ensure!(
            declared == desc.num_samplers,
            "{}: fragment shader declares {declared} samplers, description expects {}",
            desc.label,
            desc.num_samplers
        );

        let vs_attrs = vs.reflection().vertex_attributes.len();
        let provided: usize = desc.vertex_buffers.iter().map(|b| b.attributes.len()).sum();
        if vs_attrs != provided {
            log::warn!(
                "{}: vertex shader has {vs_attrs} inputs but layouts provide {provided}",
                desc.label
            );
        }

        // Shaders that bind nothing get an explicit empty layout; otherwise let
        // wgpu derive the bind group layouts from the modules.
        let binds_nothing = [vs.reflection(), fs.reflection()].iter().all(|r| {
            r.num_uniform_buffers == 0
                && r.num_samplers == 0
                && r.num_sampled_textures == 0
                && r.num_storage_textures == 0
                && r.num_storage_buffers() == 0
        });
        let explicit_layout = binds_nothing.then(|| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &[],
                immediate_size: 0,
            })
        });

        let blend = desc.enable_blend.then_some(wgpu::BlendState::ALPHA_BLENDING);

        let pipeline = validated(device, desc.label, || {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: explicit_layout.as_ref(),

                vertex: wgpu::VertexState {
                    module: vs.module(),
                    entry_point: Some(vs.entry_point()),
                    compilation_options: Default::default(),
                    buffers: desc.vertex_buffers,
                },

                fragment: Some(wgpu::FragmentState {
                    module: fs.module(),
                    entry_point: Some(fs.entry_point()),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: desc.format,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),

                primitive: wgpu::PrimitiveState {
                    topology: desc.topology,
                    strip_index_format: None,
                    front_face: desc.front_face,
                    cull_mode: desc.cull_mode,
                    polygon_mode: desc.polygon_mode,
                    unclipped_depth: false,
                    conservative: false,
                },

                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        })?;

        log::debug!("created graphics pipeline '{}'", desc.label);
        Ok(Self { pipeline })
    }

    pub fn raw(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }

    /// Bind group layout `index` of a pipeline created with a derived layout.
    pub fn bind_group_layout(&self, index: u32) -> wgpu::BindGroupLayout {
        self.pipeline.get_bind_group_layout(index)
    }
}

/// Builds the batch pipeline from the `2d` shader pair, with the vertex layout
/// taken from vertex-shader reflection.
pub fn create_batch_pipeline(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
) -> Result<GraphicsPipeline> {
    let vs = Shader::from_file(
        device,
        Stage::Vertex,
        &super::shader::shader_path("2d.vert.wgsl"),
        "main",
    )?;
    let fs = Shader::from_file(
        device,
        Stage::Fragment,
        &super::shader::shader_path("2d.frag.wgsl"),
        "main",
    )?;

    for a in &vs.reflection().vertex_attributes {
        log::debug!(
            "2d vertex attribute: location={} format={:?} offset={}",
            a.shader_location,
            a.format,
            a.offset
        );
    }

    let layouts = [vs.reflection().vertex_buffer_layout()];
    let mut desc = GraphicsPipelineDescription::new("kroma 2d pipeline", format, &vs, &fs);
    desc.vertex_buffers = &layouts;
    desc.enable_blend = true;

    GraphicsPipeline::new(device, &desc).context("failed to create 2d pipeline")
}
