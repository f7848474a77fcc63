//! Staging-buffer uploads and read-backs.
//!
//! Every transfer creates a short-lived host-visible buffer, records a single
//! buffer-to-buffer copy into its own command encoder, and submits it. Uploads
//! rely on queue order for visibility to later submissions. Downloads block the
//! calling thread until the device has finished the copy.

use std::sync::mpsc;

use super::TransferError;

/// Checks the `[offset, offset + size)` range against `buffer` and the copy alignment.
fn check_range(
    buffer: &wgpu::Buffer,
    offset: u64,
    size: u64,
    usage: wgpu::BufferUsages,
) -> Result<(), TransferError> {
    if size == 0 {
        return Err(TransferError::Empty);
    }

    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    if offset % align != 0 || size % align != 0 {
        return Err(TransferError::Misaligned { offset, size, align });
    }

    let capacity = buffer.size();
    if offset.checked_add(size).is_none_or(|end| end > capacity) {
        return Err(TransferError::OutOfBounds {
            offset,
            size,
            capacity,
        });
    }

    if !buffer.usage().contains(usage) {
        return Err(TransferError::MissingUsage(usage));
    }

    Ok(())
}

/// Copies `data` into `buffer` at `offset` through a staging buffer.
///
/// `buffer` must carry `COPY_DST`. The copy is submitted before returning; any
/// later submission on `queue` observes the new contents.
pub fn upload(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    data: &[u8],
    offset: u64,
) -> Result<(), TransferError> {
    let size = data.len() as u64;
    check_range(buffer, offset, size, wgpu::BufferUsages::COPY_DST)?;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("kroma upload staging"),
        size,
        usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: true,
    });

    // Mapped view must be dropped before unmap.
    {
        let mut mapped = staging.slice(..).get_mapped_range_mut();
        mapped.copy_from_slice(data);
    }
    staging.unmap();

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("kroma upload encoder"),
    });
    encoder.copy_buffer_to_buffer(&staging, 0, buffer, offset, size);
    queue.submit(std::iter::once(encoder.finish()));

    log::trace!("uploaded {size} bytes at offset {offset}");
    Ok(())
}

/// Reads the first `size` bytes of `buffer` back to host memory.
///
/// This is a blocking stage: the calling thread waits until the device has
/// drained all outstanding work and the staging buffer is mapped. `buffer`
/// must carry `COPY_SRC`.
pub fn download(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<u8>, TransferError> {
    check_range(buffer, 0, size, wgpu::BufferUsages::COPY_SRC)?;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("kroma download staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("kroma download encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    device.poll(wgpu::PollType::wait_indefinitely())?;
    rx.recv().map_err(|_| TransferError::CallbackDropped)??;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();

    log::trace!("downloaded {size} bytes");
    Ok(bytes)
}

/// Typed variant of [`upload`] for `Pod` slices.
pub fn upload_pod<T: bytemuck::Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    items: &[T],
    offset: u64,
) -> Result<(), TransferError> {
    upload(device, queue, buffer, bytemuck::cast_slice(items), offset)
}

/// Typed variant of [`download`] returning the first `count` elements of `buffer`.
pub fn download_pod<T: bytemuck::Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>, TransferError> {
    let size = (count * std::mem::size_of::<T>()) as u64;
    let bytes = download(device, queue, buffer, size)?;
    // The mapped bytes carry no alignment guarantee for `T`.
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}
