//! GPU memory primitives.
//!
//! - `transfer`: staging-buffer upload/download between host and device memory
//! - `buffer`: owning wrappers around device buffers, built on `transfer`
//! - `validated`: error-scoped creation of device objects

mod buffer;
mod error;
mod scope;
pub mod transfer;

pub use buffer::{BufferKind, GpuBuffer};
pub use error::TransferError;
pub use scope::validated;
