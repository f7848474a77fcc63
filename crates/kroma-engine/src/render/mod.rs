//! GPU rendering subsystem.
//!
//! Convention:
//! - geometry is submitted in clip space (see `coords`)
//! - components borrow the device/queue through `RenderCtx` per call and own
//!   their buffers and pipelines exclusively

pub mod batch;
mod ctx;
pub mod pipeline;
pub mod shader;

pub use batch::{BatchConfig, BatchRenderer, QuadBatch, QuadSink, Vertex2D};
pub use ctx::{RenderCtx, RenderTarget};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineDescription};
pub use shader::{Shader, ShaderReflection, Stage, StorageBinding};
