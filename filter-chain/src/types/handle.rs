//! Opaque GPU object handles.
//!
//! Every backend object is identified by a plain 64-bit handle. The Vulkan
//! backend stores the raw `Vk*` handle value, the dummy backend hands out
//! sequential ids. A zero handle is the null handle.

macro_rules! define_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
            pub struct $name(pub u64);

            impl $name {
                /// The null handle.
                pub const NULL: Self = Self(0);

                /// Returns true if this is the null handle.
                pub fn is_null(self) -> bool {
                    self.0 == 0
                }

                /// Raw handle value.
                pub fn raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

define_handle! {
    /// Handle to a GPU buffer.
    BufferHandle;
    /// Handle to a GPU image.
    ImageHandle;
    /// Handle to an image view.
    ImageViewHandle;
    /// Handle to a device memory allocation.
    MemoryHandle;
    /// Handle to a render pass object.
    RenderPassHandle;
    /// Handle to a framebuffer object.
    FramebufferHandle;
    /// Handle to a sampler.
    SamplerHandle;
    /// Handle to a descriptor-set layout.
    DescriptorSetLayoutHandle;
    /// Handle to a descriptor pool.
    DescriptorPoolHandle;
    /// Handle to a descriptor set.
    DescriptorSetHandle;
    /// Handle to a pipeline layout.
    PipelineLayoutHandle;
    /// Handle to a graphics pipeline.
    PipelineHandle;
    /// Handle to an externally owned command buffer.
    CommandBufferHandle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handles() {
        assert!(ImageHandle::NULL.is_null());
        assert!(ImageHandle::default().is_null());
        assert!(!ImageViewHandle(7).is_null());
        assert_eq!(PipelineHandle(42).raw(), 42);
    }
}
