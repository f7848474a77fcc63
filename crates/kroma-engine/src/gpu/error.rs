/// Failure modes of the staging-buffer transfer protocol.
///
/// Preconditions are checked before any GPU allocation, so the `Empty`,
/// `Misaligned`, `OutOfBounds` and `MissingUsage` variants never leave work
/// on the queue.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transfer range is empty")]
    Empty,

    #[error("transfer range {offset}+{size} is not aligned to {align} bytes")]
    Misaligned { offset: u64, size: u64, align: u64 },

    #[error("transfer range {offset}+{size} exceeds buffer size {capacity}")]
    OutOfBounds { offset: u64, size: u64, capacity: u64 },

    #[error("buffer is missing required usage {0:?}")]
    MissingUsage(wgpu::BufferUsages),

    #[error("failed to map staging buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("device poll failed while waiting for read-back: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("map callback was dropped before completion")]
    CallbackDropped,
}
