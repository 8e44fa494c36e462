//! Vulkan backend implementation using ash.
//!
//! The backend works on a device owned by the caller: the filter chain is
//! embedded into an existing renderer, which keeps ownership of the instance,
//! device, queues, swapchain and command buffers. The backend only creates
//! and destroys the objects the chain itself needs.
//!
//! # Memory
//!
//! - Buffers are host-visible (`CpuToGpu`) allocations from gpu-allocator,
//!   persistently mapped, so map/unmap only validate the mapping.
//! - Render target images use dedicated `vkAllocateMemory` allocations. The
//!   chain keeps an allocation across resizes when the new image fits, which
//!   needs the raw memory handle and its size.

mod allocator;
mod conversion;
mod layout;

use std::collections::HashMap;
use std::ffi::CString;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use parking_lot::Mutex;

use crate::error::{FilterChainError, Result};
use crate::types::{
    BufferHandle, CommandBufferHandle, DescriptorPoolHandle, DescriptorSetHandle,
    DescriptorSetLayoutHandle, FramebufferHandle, ImageHandle, ImageLayout, ImageViewHandle,
    MemoryHandle, PipelineHandle, PipelineLayoutHandle, RenderPassHandle, SamplerDescriptor,
    SamplerHandle, ScissorRect, ShaderStageFlags, Size2D, TextureFormat, Viewport,
};

use super::{
    BufferDescriptor, BufferUsage, DescriptorBinding, DescriptorWrite, FilterBackend,
    GraphicsPipelineDescriptor, ImageDescriptor, MemoryRequirements, PushConstantRange,
};

use allocator::{create_allocator, find_memory_type};
use conversion::{
    convert_address_mode, convert_descriptor_type, convert_filter_mode,
    convert_mipmap_filter_mode, convert_shader_stage_flags, convert_texture_format, from_vk,
    to_vk,
};
use layout::{color_range, image_barrier};

/// Vertex stride of the filter quad: `vec2` position + `vec2` texcoord.
const VERTEX_STRIDE: u32 = 16;

fn vk_error(what: &str, e: vk::Result) -> FilterChainError {
    match e {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            FilterChainError::OutOfMemory
        }
        _ => FilterChainError::resource(format!("Failed to {}: {:?}", what, e)),
    }
}

/// Vulkan GPU backend over a caller-owned device.
pub struct VulkanBackend {
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    min_uniform_alignment: u64,
    allocator: Mutex<Option<Allocator>>,
    buffer_allocations: Mutex<HashMap<u64, Allocation>>,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("min_uniform_alignment", &self.min_uniform_alignment)
            .field("buffers", &self.buffer_allocations.lock().len())
            .finish_non_exhaustive()
    }
}

impl VulkanBackend {
    /// Create a backend for `device`, created from `physical_device`.
    ///
    /// The device must stay alive for as long as the backend and every
    /// object created through it.
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
    ) -> Result<Self> {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let allocator = create_allocator(instance, physical_device, device.clone())?;

        log::info!(
            "Vulkan filter chain backend ready (min UBO alignment: {})",
            properties.limits.min_uniform_buffer_offset_alignment
        );

        Ok(Self {
            device,
            memory_properties,
            min_uniform_alignment: properties.limits.min_uniform_buffer_offset_alignment,
            allocator: Mutex::new(Some(allocator)),
            buffer_allocations: Mutex::new(HashMap::new()),
        })
    }

    /// Get the underlying device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    fn create_shader_module(&self, words: &[u32]) -> Result<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(words);
        unsafe { self.device.create_shader_module(&create_info, None) }
            .map_err(|e| vk_error("create shader module", e))
    }

    fn barrier(
        &self,
        cmd: vk::CommandBuffer,
        barrier: vk::ImageMemoryBarrier<'_>,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                old_layout.src_stage(),
                new_layout.dst_stage(),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let allocations: Vec<_> = self.buffer_allocations.lock().drain().collect();
        if !allocations.is_empty() {
            log::warn!(
                "VulkanBackend dropped with {} live buffers",
                allocations.len()
            );
        }
        let mut allocator = self.allocator.lock();
        if let Some(allocator) = allocator.as_mut() {
            for (buffer, allocation) in allocations {
                if let Err(e) = allocator.free(allocation) {
                    log::error!("Failed to free buffer allocation: {}", e);
                }
                unsafe { self.device.destroy_buffer(to_vk(buffer), None) };
            }
        }
        allocator.take();
    }
}

impl FilterBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn min_uniform_buffer_offset_alignment(&self) -> u64 {
        self.min_uniform_alignment
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle> {
        let usage = match descriptor.usage {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        };
        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| vk_error("create buffer", e))?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut allocator = self.allocator.lock();
            let Some(allocator) = allocator.as_mut() else {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(FilterChainError::Backend("allocator is gone".to_string()));
            };
            allocator.allocate(&AllocationCreateDesc {
                name: "filter chain buffer",
                requirements,
                location: gpu_allocator::MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(FilterChainError::resource(format!(
                    "Failed to allocate buffer memory: {}",
                    e
                )));
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            if let Some(allocator) = self.allocator.lock().as_mut() {
                let _ = allocator.free(allocation);
            }
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(vk_error("bind buffer memory", e));
        }

        let handle = from_vk(buffer);
        self.buffer_allocations.lock().insert(handle, allocation);
        Ok(BufferHandle(handle))
    }

    fn map_buffer(&self, buffer: BufferHandle) -> Result<()> {
        let allocations = self.buffer_allocations.lock();
        match allocations.get(&buffer.0) {
            Some(allocation) if allocation.mapped_ptr().is_some() => Ok(()),
            Some(_) => Err(FilterChainError::Backend(
                "Buffer is not mapped for CPU access".to_string(),
            )),
            None => Err(FilterChainError::Backend(format!(
                "Unknown buffer {:#x}",
                buffer.0
            ))),
        }
    }

    fn write_mapped(&self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let mut allocations = self.buffer_allocations.lock();
        let Some(slice) = allocations
            .get_mut(&buffer.0)
            .and_then(|a| a.mapped_slice_mut())
        else {
            log::error!("write to unmapped buffer {:#x}", buffer.0);
            return;
        };
        let start = offset as usize;
        let Some(dst) = slice.get_mut(start..start + data.len()) else {
            log::error!(
                "write of {} bytes at {} exceeds buffer {:#x}",
                data.len(),
                offset,
                buffer.0
            );
            return;
        };
        dst.copy_from_slice(data);
    }

    fn unmap_buffer(&self, _buffer: BufferHandle) {
        // Persistently mapped.
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        if buffer.is_null() {
            return;
        }
        if let Some(allocation) = self.buffer_allocations.lock().remove(&buffer.0)
            && let Some(allocator) = self.allocator.lock().as_mut()
            && let Err(e) = allocator.free(allocation)
        {
            log::error!("Failed to free buffer allocation: {}", e);
        }
        unsafe { self.device.destroy_buffer(to_vk(buffer.0), None) };
    }

    fn create_image(
        &self,
        descriptor: &ImageDescriptor,
    ) -> Result<(ImageHandle, MemoryRequirements)> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_texture_format(descriptor.format))
            .extent(vk::Extent3D {
                width: descriptor.size.width,
                height: descriptor.size.height,
                depth: 1,
            })
            .mip_levels(descriptor.mip_levels.max(1))
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| vk_error("create image", e))?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let Some(memory_type) = find_memory_type(
            &self.memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) else {
            unsafe { self.device.destroy_image(image, None) };
            return Err(FilterChainError::resource(
                "No device-local memory type for render target",
            ));
        };

        Ok((
            ImageHandle(from_vk(image)),
            MemoryRequirements {
                size: requirements.size,
                memory_type,
            },
        ))
    }

    fn destroy_image(&self, image: ImageHandle) {
        unsafe { self.device.destroy_image(to_vk(image.0), None) };
    }

    fn allocate_memory(&self, requirements: &MemoryRequirements) -> Result<MemoryHandle> {
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(requirements.memory_type);
        let memory = unsafe { self.device.allocate_memory(&allocate_info, None) }
            .map_err(|e| vk_error("allocate image memory", e))?;
        Ok(MemoryHandle(from_vk(memory)))
    }

    fn free_memory(&self, memory: MemoryHandle) {
        unsafe { self.device.free_memory(to_vk(memory.0), None) };
    }

    fn bind_image_memory(&self, image: ImageHandle, memory: MemoryHandle) -> Result<()> {
        unsafe {
            self.device
                .bind_image_memory(to_vk(image.0), to_vk(memory.0), 0)
        }
        .map_err(|e| vk_error("bind image memory", e))
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        format: TextureFormat,
        base_level: u32,
        level_count: u32,
    ) -> Result<ImageViewHandle> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(to_vk(image.0))
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(convert_texture_format(format))
            .components(vk::ComponentMapping::default())
            .subresource_range(color_range(base_level, level_count));
        let view = unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(|e| vk_error("create image view", e))?;
        Ok(ImageViewHandle(from_vk(view)))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        unsafe { self.device.destroy_image_view(to_vk(view.0), None) };
    }

    fn create_render_pass(&self, format: TextureFormat) -> Result<RenderPassHandle> {
        let attachments = [vk::AttachmentDescription::default()
            .format(convert_texture_format(format))
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses);
        let render_pass = unsafe { self.device.create_render_pass(&create_info, None) }
            .map_err(|e| vk_error("create render pass", e))?;
        Ok(RenderPassHandle(from_vk(render_pass)))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        unsafe { self.device.destroy_render_pass(to_vk(render_pass.0), None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        attachment: ImageViewHandle,
        size: Size2D,
    ) -> Result<FramebufferHandle> {
        let attachments = [to_vk::<vk::ImageView>(attachment.0)];
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(to_vk(render_pass.0))
            .attachments(&attachments)
            .width(size.width)
            .height(size.height)
            .layers(1);
        let framebuffer = unsafe { self.device.create_framebuffer(&create_info, None) }
            .map_err(|e| vk_error("create framebuffer", e))?;
        Ok(FramebufferHandle(from_vk(framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        unsafe { self.device.destroy_framebuffer(to_vk(framebuffer.0), None) };
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<SamplerHandle> {
        let address = convert_address_mode(descriptor.address_mode);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(descriptor.filter))
            .min_filter(convert_filter_mode(descriptor.filter))
            .mipmap_mode(convert_mipmap_filter_mode(descriptor.mipmap_filter))
            .address_mode_u(address)
            .address_mode_v(address)
            .address_mode_w(address)
            .mip_lod_bias(0.0)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .compare_enable(false)
            .compare_op(vk::CompareOp::NEVER)
            .min_lod(descriptor.lod_min_clamp)
            .max_lod(descriptor.lod_max_clamp.unwrap_or(vk::LOD_CLAMP_NONE))
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(|e| vk_error("create sampler", e))?;
        Ok(SamplerHandle(from_vk(sampler)))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        unsafe { self.device.destroy_sampler(to_vk(sampler.0), None) };
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> Result<DescriptorSetLayoutHandle> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(convert_descriptor_type(b.ty))
                    .descriptor_count(1)
                    .stage_flags(convert_shader_stage_flags(b.stages))
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(|e| vk_error("create descriptor set layout", e))?;
        Ok(DescriptorSetLayoutHandle(from_vk(layout)))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        unsafe {
            self.device
                .destroy_descriptor_set_layout(to_vk(layout.0), None)
        };
    }

    fn create_descriptor_pool(
        &self,
        bindings: &[DescriptorBinding],
        max_sets: u32,
    ) -> Result<DescriptorPoolHandle> {
        let mut counts: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for binding in bindings {
            *counts.entry(convert_descriptor_type(binding.ty)).or_default() += max_sets;
        }
        let pool_sizes: Vec<vk::DescriptorPoolSize> = counts
            .into_iter()
            .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count,
            })
            .collect();

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { self.device.create_descriptor_pool(&pool_info, None) }
            .map_err(|e| vk_error("create descriptor pool", e))?;
        Ok(DescriptorPoolHandle(from_vk(pool)))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        unsafe { self.device.destroy_descriptor_pool(to_vk(pool.0), None) };
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle> {
        let layouts = [to_vk::<vk::DescriptorSetLayout>(layout.0)];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(to_vk(pool.0))
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| vk_error("allocate descriptor set", e))?;
        sets.first()
            .map(|set| DescriptorSetHandle(from_vk(*set)))
            .ok_or_else(|| FilterChainError::resource("No descriptor set allocated"))
    }

    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        let buffer_infos: Vec<Option<vk::DescriptorBufferInfo>> = writes
            .iter()
            .map(|w| match *w {
                DescriptorWrite::UniformBuffer {
                    buffer,
                    offset,
                    range,
                    ..
                } => Some(vk::DescriptorBufferInfo {
                    buffer: to_vk(buffer.0),
                    offset,
                    range,
                }),
                _ => None,
            })
            .collect();
        let image_infos: Vec<Option<vk::DescriptorImageInfo>> = writes
            .iter()
            .map(|w| match *w {
                DescriptorWrite::CombinedImageSampler {
                    view,
                    layout,
                    sampler,
                    ..
                } => Some(vk::DescriptorImageInfo {
                    sampler: to_vk(sampler.0),
                    image_view: to_vk(view.0),
                    image_layout: layout.to_vk(),
                }),
                DescriptorWrite::SampledImage { view, layout, .. } => {
                    Some(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: to_vk(view.0),
                        image_layout: layout.to_vk(),
                    })
                }
                DescriptorWrite::Sampler { sampler, .. } => Some(vk::DescriptorImageInfo {
                    sampler: to_vk(sampler.0),
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                }),
                DescriptorWrite::UniformBuffer { .. } => None,
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet<'_>> = writes
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let ty = match w {
                    DescriptorWrite::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
                    DescriptorWrite::CombinedImageSampler { .. } => {
                        vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                    }
                    DescriptorWrite::SampledImage { .. } => vk::DescriptorType::SAMPLED_IMAGE,
                    DescriptorWrite::Sampler { .. } => vk::DescriptorType::SAMPLER,
                };
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(to_vk(set.0))
                    .dst_binding(w.binding())
                    .dst_array_element(0)
                    .descriptor_type(ty);
                if let Some(info) = &buffer_infos[i] {
                    write.buffer_info(std::slice::from_ref(info))
                } else if let Some(info) = &image_infos[i] {
                    write.image_info(std::slice::from_ref(info))
                } else {
                    write
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    fn create_pipeline_layout(
        &self,
        set_layout: DescriptorSetLayoutHandle,
        push_constants: Option<PushConstantRange>,
    ) -> Result<PipelineLayoutHandle> {
        let set_layouts = [to_vk::<vk::DescriptorSetLayout>(set_layout.0)];
        let ranges: Vec<vk::PushConstantRange> = push_constants
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: convert_shader_stage_flags(range.stages),
                offset: 0,
                size: range.size,
            })
            .collect();
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&ranges);
        let layout = unsafe { self.device.create_pipeline_layout(&create_info, None) }
            .map_err(|e| vk_error("create pipeline layout", e))?;
        Ok(PipelineLayoutHandle(from_vk(layout)))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        unsafe { self.device.destroy_pipeline_layout(to_vk(layout.0), None) };
    }

    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor<'_>,
    ) -> Result<PipelineHandle> {
        let vertex_entry = CString::new(descriptor.vertex_entry).map_err(|e| {
            FilterChainError::config(format!("Invalid vertex entry point name: {}", e))
        })?;
        let fragment_entry = CString::new(descriptor.fragment_entry).map_err(|e| {
            FilterChainError::config(format!("Invalid fragment entry point name: {}", e))
        })?;

        let vertex_module = self.create_shader_module(descriptor.vertex_spirv)?;
        let fragment_module = match self.create_shader_module(descriptor.fragment_spirv) {
            Ok(module) => module,
            Err(e) => {
                unsafe { self.device.destroy_shader_module(vertex_module, None) };
                return Err(e);
            }
        };

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(&vertex_entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(&fragment_entry),
        ];

        let binding_descriptions = [vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(VERTEX_STRIDE)
            .input_rate(vk::VertexInputRate::VERTEX)];
        let attribute_descriptions = [
            vk::VertexInputAttributeDescription::default()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(0),
            vk::VertexInputAttributeDescription::default()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(8),
        ];
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_STRIP)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(to_vk(descriptor.layout.0))
            .render_pass(to_vk(descriptor.render_pass.0))
            .subpass(0);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        // Shader modules are baked into the pipeline; destroy them now.
        unsafe {
            self.device.destroy_shader_module(vertex_module, None);
            self.device.destroy_shader_module(fragment_module, None);
        }

        let pipelines = pipelines.map_err(|(_, e)| vk_error("create graphics pipeline", e))?;
        pipelines
            .first()
            .map(|p| PipelineHandle(from_vk(*p)))
            .ok_or_else(|| FilterChainError::resource("No pipeline created"))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        unsafe { self.device.destroy_pipeline(to_vk(pipeline.0), None) };
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| FilterChainError::Backend(format!("Failed to wait idle: {:?}", e)))
    }

    fn cmd_transition_image(
        &self,
        cmd: CommandBufferHandle,
        image: ImageHandle,
        levels: u32,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        let barrier = image_barrier(
            to_vk(image.0),
            color_range(0, levels.max(1)),
            old_layout,
            new_layout,
        );
        self.barrier(to_vk(cmd.0), barrier, old_layout, new_layout);
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: CommandBufferHandle,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        size: Size2D,
    ) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(to_vk(render_pass.0))
            .framebuffer(to_vk(framebuffer.0))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: size.width,
                    height: size.height,
                },
            });
        unsafe {
            self.device
                .cmd_begin_render_pass(to_vk(cmd.0), &begin_info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&self, cmd: CommandBufferHandle) {
        unsafe { self.device.cmd_end_render_pass(to_vk(cmd.0)) };
    }

    fn cmd_bind_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        unsafe {
            self.device.cmd_bind_pipeline(
                to_vk(cmd.0),
                vk::PipelineBindPoint::GRAPHICS,
                to_vk(pipeline.0),
            )
        };
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                to_vk(cmd.0),
                vk::PipelineBindPoint::GRAPHICS,
                to_vk(layout.0),
                0,
                &[to_vk(set.0)],
                &[],
            )
        };
    }

    fn cmd_push_constants(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStageFlags,
        data: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(
                to_vk(cmd.0),
                to_vk(layout.0),
                convert_shader_stage_flags(stages),
                0,
                data,
            )
        };
    }

    fn cmd_bind_vertex_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle, offset: u64) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(to_vk(cmd.0), 0, &[to_vk(buffer.0)], &[offset])
        };
    }

    fn cmd_set_viewport(&self, cmd: CommandBufferHandle, viewport: &Viewport) {
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device.cmd_set_viewport(to_vk(cmd.0), 0, &[vk_viewport]) };
    }

    fn cmd_set_scissor(&self, cmd: CommandBufferHandle, scissor: &ScissorRect) {
        let rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        unsafe { self.device.cmd_set_scissor(to_vk(cmd.0), 0, &[rect]) };
    }

    fn cmd_draw(&self, cmd: CommandBufferHandle, vertex_count: u32, first_vertex: u32) {
        unsafe {
            self.device
                .cmd_draw(to_vk(cmd.0), vertex_count, 1, first_vertex, 0)
        };
    }

    fn cmd_generate_mipmaps(
        &self,
        cmd: CommandBufferHandle,
        image: ImageHandle,
        size: Size2D,
        levels: u32,
    ) {
        let vk_cmd: vk::CommandBuffer = to_vk(cmd.0);
        let vk_image: vk::Image = to_vk(image.0);

        // Level 0 was just rendered; the rest hold nothing yet.
        self.barrier(
            vk_cmd,
            image_barrier(
                vk_image,
                color_range(0, 1),
                ImageLayout::ColorAttachment,
                ImageLayout::TransferSrc,
            ),
            ImageLayout::ColorAttachment,
            ImageLayout::TransferSrc,
        );
        if levels > 1 {
            self.barrier(
                vk_cmd,
                image_barrier(
                    vk_image,
                    color_range(1, levels - 1),
                    ImageLayout::Undefined,
                    ImageLayout::TransferDst,
                ),
                ImageLayout::Undefined,
                ImageLayout::TransferDst,
            );
        }

        let mut src_width = size.width as i32;
        let mut src_height = size.height as i32;
        for level in 1..levels {
            let dst_width = (src_width / 2).max(1);
            let dst_height = (src_height / 2).max(1);
            let subresource = |mip_level| vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level,
                base_array_layer: 0,
                layer_count: 1,
            };
            let blit = vk::ImageBlit {
                src_subresource: subresource(level - 1),
                src_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: src_width,
                        y: src_height,
                        z: 1,
                    },
                ],
                dst_subresource: subresource(level),
                dst_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: dst_width,
                        y: dst_height,
                        z: 1,
                    },
                ],
            };
            unsafe {
                self.device.cmd_blit_image(
                    vk_cmd,
                    vk_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                )
            };
            self.barrier(
                vk_cmd,
                image_barrier(
                    vk_image,
                    color_range(level, 1),
                    ImageLayout::TransferDst,
                    ImageLayout::TransferSrc,
                ),
                ImageLayout::TransferDst,
                ImageLayout::TransferSrc,
            );
            src_width = dst_width;
            src_height = dst_height;
        }

        self.barrier(
            vk_cmd,
            image_barrier(
                vk_image,
                color_range(0, levels.max(1)),
                ImageLayout::TransferSrc,
                ImageLayout::ShaderReadOnly,
            ),
            ImageLayout::TransferSrc,
            ImageLayout::ShaderReadOnly,
        );
    }

    fn cmd_clear_image(&self, cmd: CommandBufferHandle, image: ImageHandle, levels: u32) {
        let clear = vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 0.0],
        };
        unsafe {
            self.device.cmd_clear_color_image(
                to_vk(cmd.0),
                to_vk(image.0),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear,
                &[color_range(0, levels.max(1))],
            )
        };
    }

    fn cmd_copy_image(
        &self,
        cmd: CommandBufferHandle,
        src: ImageHandle,
        src_layout: ImageLayout,
        dst: ImageHandle,
        size: Size2D,
    ) {
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageCopy {
            src_subresource: subresource,
            src_offset: vk::Offset3D::default(),
            dst_subresource: subresource,
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: size.width,
                height: size.height,
                depth: 1,
            },
        };
        unsafe {
            self.device.cmd_copy_image(
                to_vk(cmd.0),
                to_vk(src.0),
                src_layout.to_vk(),
                to_vk(dst.0),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        image: ImageHandle,
        size: Size2D,
    ) {
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: size.width,
                height: size.height,
                depth: 1,
            },
        };
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                to_vk(cmd.0),
                to_vk(buffer.0),
                to_vk(image.0),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }
}
