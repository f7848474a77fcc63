//! Shader loading and reflection.
//!
//! Shaders are WGSL files read from disk at runtime, one stage per file. Before
//! a module reaches wgpu it is parsed and validated with `naga`; the parsed
//! module is also walked to recover binding counts, the compute workgroup size
//! and, for vertex shaders, a tightly packed vertex layout.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use naga::{AddressSpace, Binding, ImageClass, ScalarKind, StorageAccess, TypeInner, VectorSize};

use crate::gpu::validated;

/// Directory holding the engine's shader sources.
pub const SHADER_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/resources/shaders");

/// Resolves `file` inside [`SHADER_DIR`].
pub fn shader_path(file: &str) -> PathBuf {
    Path::new(SHADER_DIR).join(file)
}

/// Pipeline stage a shader file is compiled for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Stage {
    Vertex,
    Fragment,
    Compute,
}

impl Stage {
    fn to_naga(self) -> naga::ShaderStage {
        match self {
            Stage::Vertex => naga::ShaderStage::Vertex,
            Stage::Fragment => naga::ShaderStage::Fragment,
            Stage::Compute => naga::ShaderStage::Compute,
        }
    }
}

/// One storage buffer declared by a module.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct StorageBinding {
    pub group: u32,
    pub binding: u32,
    pub read_only: bool,
}

/// Resource usage recovered from a shader module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderReflection {
    pub num_uniform_buffers: u32,
    pub num_samplers: u32,
    pub num_sampled_textures: u32,
    pub num_storage_textures: u32,
    pub num_readonly_storage_buffers: u32,
    pub num_readwrite_storage_buffers: u32,

    /// Storage buffers ordered by `(group, binding)`.
    pub storage_buffers: Vec<StorageBinding>,

    /// `@workgroup_size` of a compute entry point.
    pub workgroup_size: Option<[u32; 3]>,

    /// Vertex inputs in location order, packed into buffer slot 0.
    pub vertex_attributes: Vec<wgpu::VertexAttribute>,
}

impl ShaderReflection {
    pub fn num_storage_buffers(&self) -> u32 {
        self.num_readonly_storage_buffers + self.num_readwrite_storage_buffers
    }

    /// Byte stride of one vertex: the packed size of all attributes.
    pub fn stride(&self) -> u64 {
        self.vertex_attributes.iter().map(|a| a.format.size()).sum()
    }

    /// Per-vertex buffer layout built from the reflected attributes.
    pub fn vertex_buffer_layout(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride(),
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.vertex_attributes,
        }
    }
}

/// Reads a shader source file.
pub fn load_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read shader source {}", path.display()))
}

/// Parses, validates and reflects a WGSL module.
///
/// `entry_point` must exist with the given `stage`.
pub fn reflect_wgsl(source: &str, stage: Stage, entry_point: &str) -> Result<ShaderReflection> {
    let module =
        naga::front::wgsl::parse_str(source).map_err(|e| anyhow!("WGSL parse error: {e}"))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("WGSL validation error: {e}"))?;

    let ep = module
        .entry_points
        .iter()
        .find(|ep| ep.name == entry_point && ep.stage == stage.to_naga())
        .with_context(|| format!("no {stage:?} entry point named '{entry_point}'"))?;

    let mut out = ShaderReflection::default();

    for (_, var) in module.global_variables.iter() {
        match var.space {
            AddressSpace::Uniform => out.num_uniform_buffers += 1,
            AddressSpace::Storage { access } => {
                let read_only = !access.contains(StorageAccess::STORE);
                if read_only {
                    out.num_readonly_storage_buffers += 1;
                } else {
                    out.num_readwrite_storage_buffers += 1;
                }
                if let Some(rb) = &var.binding {
                    out.storage_buffers.push(StorageBinding {
                        group: rb.group,
                        binding: rb.binding,
                        read_only,
                    });
                }
            }
            AddressSpace::Handle => match &module.types[var.ty].inner {
                TypeInner::Sampler { .. } => out.num_samplers += 1,
                TypeInner::Image {
                    class: ImageClass::Storage { .. },
                    ..
                } => out.num_storage_textures += 1,
                TypeInner::Image { .. } => out.num_sampled_textures += 1,
                _ => {}
            },
            _ => {}
        }
    }

    out.storage_buffers.sort();

    if stage == Stage::Compute {
        out.workgroup_size = Some(ep.workgroup_size);
    }

    if stage == Stage::Vertex {
        out.vertex_attributes = reflect_vertex_inputs(&module, &ep.function);
    }

    Ok(out)
}

fn reflect_vertex_inputs(module: &naga::Module, function: &naga::Function) -> Vec<wgpu::VertexAttribute> {
    let mut inputs: Vec<(u32, naga::Handle<naga::Type>)> = Vec::new();

    for arg in &function.arguments {
        match &arg.binding {
            Some(Binding::Location { location, .. }) => inputs.push((*location, arg.ty)),
            Some(Binding::BuiltIn(_)) => {}
            None => {
                // Struct-typed input: bindings live on the members.
                if let TypeInner::Struct { members, .. } = &module.types[arg.ty].inner {
                    for m in members {
                        if let Some(Binding::Location { location, .. }) = &m.binding {
                            inputs.push((*location, m.ty));
                        }
                    }
                }
            }
        }
    }

    inputs.sort_by_key(|(location, _)| *location);

    let mut attributes = Vec::with_capacity(inputs.len());
    let mut offset = 0u64;
    for (location, ty) in inputs {
        match vertex_format(&module.types[ty].inner) {
            Some(format) => {
                attributes.push(wgpu::VertexAttribute {
                    format,
                    offset,
                    shader_location: location,
                });
                offset += format.size();
            }
            None => log::warn!("unsupported vertex attribute format at location {location}; skipped"),
        }
    }
    attributes
}

/// Maps 32-bit scalar and vector inputs to vertex formats.
fn vertex_format(inner: &TypeInner) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat as F;

    let (scalar, components) = match *inner {
        TypeInner::Scalar(scalar) => (scalar, 1),
        TypeInner::Vector { size, scalar } => {
            let n = match size {
                VectorSize::Bi => 2,
                VectorSize::Tri => 3,
                VectorSize::Quad => 4,
            };
            (scalar, n)
        }
        _ => return None,
    };

    if scalar.width != 4 {
        return None;
    }

    let format = match (scalar.kind, components) {
        (ScalarKind::Float, 1) => F::Float32,
        (ScalarKind::Float, 2) => F::Float32x2,
        (ScalarKind::Float, 3) => F::Float32x3,
        (ScalarKind::Float, 4) => F::Float32x4,
        (ScalarKind::Sint, 1) => F::Sint32,
        (ScalarKind::Sint, 2) => F::Sint32x2,
        (ScalarKind::Sint, 3) => F::Sint32x3,
        (ScalarKind::Sint, 4) => F::Sint32x4,
        (ScalarKind::Uint, 1) => F::Uint32,
        (ScalarKind::Uint, 2) => F::Uint32x2,
        (ScalarKind::Uint, 3) => F::Uint32x3,
        (ScalarKind::Uint, 4) => F::Uint32x4,
        _ => return None,
    };
    Some(format)
}

/// A compiled shader module together with its reflection data.
pub struct Shader {
    module: wgpu::ShaderModule,
    stage: Stage,
    entry_point: String,
    reflection: ShaderReflection,
}

impl Shader {
    /// Loads, reflects and compiles the shader at `path`.
    pub fn from_file(
        device: &wgpu::Device,
        stage: Stage,
        path: &Path,
        entry_point: &str,
    ) -> Result<Self> {
        let source = load_source(path)?;
        let label = path.display().to_string();
        Self::from_source(device, stage, &label, &source, entry_point)
            .with_context(|| format!("failed to create shader {label}"))
    }

    /// Reflects and compiles an in-memory WGSL source.
    pub fn from_source(
        device: &wgpu::Device,
        stage: Stage,
        label: &str,
        source: &str,
        entry_point: &str,
    ) -> Result<Self> {
        let reflection = reflect_wgsl(source, stage, entry_point)?;

        let module = validated(device, label, || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        })?;

        log::debug!(
            "shader '{label}' ({stage:?}): {} vertex attributes, {} samplers, {} storage buffers",
            reflection.vertex_attributes.len(),
            reflection.num_samplers,
            reflection.num_storage_buffers()
        );

        Ok(Self {
            module,
            stage,
            entry_point: entry_point.to_owned(),
            reflection,
        })
    }

    pub fn module(&self) -> &wgpu::ShaderModule {
        &self.module
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }
}
