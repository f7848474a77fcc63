use anyhow::{Context, Result};

use super::transfer;

/// What a [`GpuBuffer`] is bound as.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
    /// Storage buffer; always copyable in both directions so it can be read back.
    Storage,
}

impl BufferKind {
    /// Device usages for a buffer of this kind.
    ///
    /// Every kind is a transfer destination; storage buffers are also a
    /// transfer source for read-back.
    pub fn usages(self) -> wgpu::BufferUsages {
        use wgpu::BufferUsages as U;
        match self {
            BufferKind::Vertex => U::VERTEX | U::COPY_DST,
            BufferKind::Index => U::INDEX | U::COPY_DST,
            BufferKind::Uniform => U::UNIFORM | U::COPY_DST,
            BufferKind::Storage => U::STORAGE | U::COPY_DST | U::COPY_SRC,
        }
    }
}

/// Exclusively owned device buffer plus its element-count metadata.
///
/// The device buffer is released by [`destroy`](Self::destroy) or on drop,
/// whichever comes first.
#[derive(Debug)]
pub struct GpuBuffer {
    buffer: Option<wgpu::Buffer>,
    kind: BufferKind,
    size: u64,
    count: u32,
}

impl GpuBuffer {
    /// Allocates a `size`-byte buffer of `kind`, uploading `data` when provided.
    ///
    /// `count` is the number of logical elements (vertices, indices, particles)
    /// the buffer holds; it is bookkeeping only.
    pub fn create(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        kind: BufferKind,
        label: &str,
        data: Option<&[u8]>,
        size: u64,
        count: u32,
    ) -> Result<Self> {
        anyhow::ensure!(size > 0, "{label}: buffer size must be non-zero");

        let max = device.limits().max_buffer_size;
        anyhow::ensure!(
            size <= max,
            "{label}: buffer size {size} exceeds device limit {max}"
        );

        if let Some(bytes) = data {
            anyhow::ensure!(
                bytes.len() as u64 <= size,
                "{label}: initial data ({} bytes) larger than buffer ({size} bytes)",
                bytes.len()
            );
        }

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: kind.usages(),
            mapped_at_creation: false,
        });

        // Constructed before the upload so a failed upload still releases the buffer.
        let out = Self {
            buffer: Some(buffer),
            kind,
            size,
            count,
        };

        if let Some(bytes) = data.filter(|b| !b.is_empty()) {
            if let Some(buffer) = out.buffer.as_ref() {
                transfer::upload(device, queue, buffer, bytes, 0)
                    .with_context(|| format!("{label}: initial upload failed"))?;
            }
        }

        log::debug!("created {kind:?} buffer '{label}': {size} bytes, {count} elements");
        Ok(out)
    }

    /// Releases the device buffer and zeroes the metadata.
    ///
    /// Safe to call any number of times.
    pub fn destroy(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.destroy();
        }
        self.size = 0;
        self.count = 0;
    }

    /// The live device buffer, or `None` once destroyed.
    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.as_ref()
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_alive(&self) -> bool {
        self.buffer.is_some()
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_accepts_uploads() {
        for kind in [
            BufferKind::Vertex,
            BufferKind::Index,
            BufferKind::Uniform,
            BufferKind::Storage,
        ] {
            assert!(kind.usages().contains(wgpu::BufferUsages::COPY_DST), "{kind:?}");
        }
    }

    #[test]
    fn only_storage_supports_read_back() {
        assert!(BufferKind::Storage.usages().contains(wgpu::BufferUsages::COPY_SRC));
        assert!(!BufferKind::Vertex.usages().contains(wgpu::BufferUsages::COPY_SRC));
        assert!(!BufferKind::Index.usages().contains(wgpu::BufferUsages::COPY_SRC));
    }

    #[test]
    fn kind_maps_to_binding_usage() {
        assert!(BufferKind::Vertex.usages().contains(wgpu::BufferUsages::VERTEX));
        assert!(BufferKind::Index.usages().contains(wgpu::BufferUsages::INDEX));
        assert!(BufferKind::Uniform.usages().contains(wgpu::BufferUsages::UNIFORM));
        assert!(BufferKind::Storage.usages().contains(wgpu::BufferUsages::STORAGE));
    }
}
