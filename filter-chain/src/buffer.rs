//! Host-visible GPU buffers.

use std::sync::Arc;

use crate::backend::{BufferDescriptor, BufferUsage};
use crate::disposer::{DeferredDisposer, DeferredResource};
use crate::error::{FilterChainError, Result};
use crate::types::BufferHandle;

/// A host-visible buffer used as vertex or uniform storage.
///
/// Destruction is deferred through the [`DeferredDisposer`] when dropped.
pub struct Buffer {
    disposer: Arc<DeferredDisposer>,
    handle: BufferHandle,
    size: u64,
    usage: BufferUsage,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .finish()
    }
}

impl Buffer {
    /// Create a buffer of `size` bytes.
    pub fn new(disposer: &Arc<DeferredDisposer>, size: u64, usage: BufferUsage) -> Result<Self> {
        if size == 0 {
            return Err(FilterChainError::config("buffer size must be non-zero"));
        }
        let handle = disposer
            .backend()
            .create_buffer(&BufferDescriptor { size, usage })?;
        Ok(Self {
            disposer: Arc::clone(disposer),
            handle,
            size,
            usage,
        })
    }

    /// Backend handle.
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Buffer usage.
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Map the buffer for CPU writes. It is unmapped when the guard drops.
    pub fn map(&self) -> Result<BufferMapping<'_>> {
        self.disposer.backend().map_buffer(self.handle)?;
        Ok(BufferMapping { buffer: self })
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.disposer.defer(DeferredResource::Buffer(self.handle));
    }
}

/// A mapped [`Buffer`].
pub struct BufferMapping<'a> {
    buffer: &'a Buffer,
}

impl BufferMapping<'_> {
    /// Write raw bytes at `offset`. Writes past the end are dropped with an
    /// error log.
    pub fn write(&mut self, offset: u64, data: &[u8]) {
        if offset + data.len() as u64 > self.buffer.size {
            log::error!(
                "Buffer write of {} bytes at {} exceeds size {}",
                data.len(),
                offset,
                self.buffer.size
            );
            return;
        }
        self.buffer
            .disposer
            .backend()
            .write_mapped(self.buffer.handle, offset, data);
    }

    /// Write a slice of plain-old-data values at `offset`.
    pub fn write_slice<T: bytemuck::Pod>(&mut self, offset: u64, values: &[T]) {
        self.write(offset, bytemuck::cast_slice(values));
    }
}

impl Drop for BufferMapping<'_> {
    fn drop(&mut self) {
        self.buffer
            .disposer
            .backend()
            .unmap_buffer(self.buffer.handle);
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, ObjectKind};

    #[test]
    fn test_write_through_mapping() {
        let backend = Arc::new(DummyBackend::new());
        let disposer = Arc::new(DeferredDisposer::new(backend.clone(), 2));
        let buffer = Buffer::new(&disposer, 16, BufferUsage::Vertex).unwrap();
        {
            let mut mapping = buffer.map().unwrap();
            mapping.write_slice(4, &[1.0f32, 2.0]);
        }
        let contents = backend.buffer_contents(buffer.handle()).unwrap();
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&contents);
        assert_eq!(floats, vec![0.0, 1.0, 2.0, 0.0]);
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_drop_is_deferred() {
        let backend = Arc::new(DummyBackend::new());
        let disposer = Arc::new(DeferredDisposer::new(backend.clone(), 2));
        let buffer = Buffer::new(&disposer, 64, BufferUsage::Uniform).unwrap();
        drop(buffer);
        assert_eq!(backend.live_count(ObjectKind::Buffer), 1);
        disposer.notify_sync_index(0);
        assert_eq!(backend.live_count(ObjectKind::Buffer), 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        let backend = Arc::new(DummyBackend::new());
        let disposer = Arc::new(DeferredDisposer::new(backend, 2));
        assert!(Buffer::new(&disposer, 0, BufferUsage::Uniform).is_err());
    }
}
