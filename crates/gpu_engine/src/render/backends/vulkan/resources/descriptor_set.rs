//! Descriptor set layouts, the bindless texture set and push descriptor writes
//!
//! Every per-frame resource is bound with `VK_KHR_push_descriptor`, so the
//! only descriptor pool in the renderer backs the texture table. Binding
//! numbers are shared with `common.glsl`.

use ash::extensions::khr;
use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Binding numbers of the global push-descriptor set
pub mod bindings {
    /// Camera and sun uniform data
    pub const VIEW_DATA: u32 = 0;
    /// Vertex buffer, pulled by index
    pub const VERTICES: u32 = 1;
    /// Depth pyramid sampled by the late cull
    pub const DEPTH_PYRAMID: u32 = 2;
    /// Render objects
    pub const RENDER_OBJECTS: u32 = 3;
    /// Object transforms
    pub const TRANSFORMS: u32 = 4;
    /// Materials
    pub const MATERIALS: u32 = 5;
    /// Indirect draw records written by culling
    pub const INDIRECT_DRAW: u32 = 6;
    /// Draw count written by culling
    pub const INDIRECT_COUNT: u32 = 7;
    /// Per-object visibility from the previous frame
    pub const VISIBILITY: u32 = 8;
    /// Surfaces
    pub const SURFACES: u32 = 9;
    /// Meshlets
    pub const MESHLETS: u32 = 10;
    /// Meshlet vertex and triangle indices
    pub const MESHLET_DATA: u32 = 11;
    /// Indirect task records, mesh path only
    pub const INDIRECT_TASK: u32 = 12;
}

/// Shader stages that see each global binding
///
/// The mesh path swaps the vertex stage for task and mesh stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingVisibility {
    /// Whether the task/mesh path is active
    pub mesh_shading: bool,
}

impl BindingVisibility {
    /// Visibility for the active geometry path
    pub fn new(mesh_shading: bool) -> Self {
        Self { mesh_shading }
    }

    fn geometry(&self) -> vk::ShaderStageFlags {
        if self.mesh_shading {
            vk::ShaderStageFlags::MESH_EXT | vk::ShaderStageFlags::TASK_EXT
        } else {
            vk::ShaderStageFlags::VERTEX
        }
    }

    /// Stages of `binding`, empty for numbers outside the global set
    pub fn stages(&self, binding: u32) -> vk::ShaderStageFlags {
        use vk::ShaderStageFlags as S;
        match binding {
            bindings::VIEW_DATA => self.geometry() | S::FRAGMENT | S::COMPUTE,
            bindings::VERTICES => self.geometry(),
            bindings::DEPTH_PYRAMID | bindings::INDIRECT_COUNT | bindings::VISIBILITY => S::COMPUTE,
            bindings::RENDER_OBJECTS | bindings::TRANSFORMS => S::COMPUTE | S::VERTEX | self.geometry(),
            bindings::MATERIALS => S::FRAGMENT,
            bindings::INDIRECT_DRAW => S::COMPUTE | S::VERTEX,
            bindings::SURFACES | bindings::MESHLETS | bindings::MESHLET_DATA => S::COMPUTE | self.geometry(),
            bindings::INDIRECT_TASK if self.mesh_shading => S::COMPUTE | S::MESH_EXT | S::TASK_EXT,
            // Written by the shared culling shaders on both paths
            bindings::INDIRECT_TASK => S::COMPUTE,
            _ => S::empty(),
        }
    }
}

/// Binding records of the global set for the active path
pub fn global_bindings(visibility: BindingVisibility) -> Vec<vk::DescriptorSetLayoutBinding> {
    (bindings::VIEW_DATA..=bindings::INDIRECT_TASK)
        .map(|binding| {
            let descriptor_type = match binding {
                bindings::VIEW_DATA => vk::DescriptorType::UNIFORM_BUFFER,
                bindings::DEPTH_PYRAMID => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                _ => vk::DescriptorType::STORAGE_BUFFER,
            };
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(1)
                .stage_flags(visibility.stages(binding))
                .build()
        })
        .collect()
}

/// Descriptor set layout builder for creating reusable layouts
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
    push_descriptor: bool,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            push_descriptor: false,
        }
    }

    /// Add a binding of `count` descriptors
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Add prebuilt binding records
    pub fn add_bindings(mut self, bindings: impl IntoIterator<Item = vk::DescriptorSetLayoutBinding>) -> Self {
        self.bindings.extend(bindings);
        self
    }

    /// Add a storage image binding
    pub fn add_storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1, stage_flags)
    }

    /// Mark the layout for `vkCmdPushDescriptorSetKHR`
    pub fn push_descriptor(mut self) -> Self {
        self.push_descriptor = true;
        self
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let flags = if self.push_descriptor {
            vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR
        } else {
            vk::DescriptorSetLayoutCreateFlags::empty()
        };
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .flags(flags)
            .bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }.map_err(|e| {
            log::error!("[PIPELINE] Descriptor set layout with {} bindings failed: {:?}", self.bindings.len(), e);
            VulkanError::Api(e)
        })?;

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
            bindings: self.bindings,
        })
    }
}

impl Default for DescriptorSetLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Pool holding the single bindless texture set
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
}

impl DescriptorPool {
    /// Pool with room for one set of `texture_count` combined image samplers
    pub fn for_textures(device: Device, texture_count: u32) -> VulkanResult<Self> {
        let pool_sizes = [vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(texture_count.max(1))
            .build()];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self { pool, device })
    }

    /// Allocate one set of `layout`
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.map_err(VulkanError::Api)?;
        sets.into_iter().next().ok_or(VulkanError::InvalidOperation {
            reason: "descriptor set allocation returned nothing".to_string(),
        })
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Write every `(view, sampler)` pair into consecutive elements of `binding`
pub fn write_texture_array(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    textures: &[(vk::ImageView, vk::Sampler)],
) {
    let image_infos: Vec<vk::DescriptorImageInfo> = textures
        .iter()
        .map(|&(image_view, sampler)| vk::DescriptorImageInfo {
            sampler,
            image_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        })
        .collect();

    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(&image_infos);

    unsafe { device.update_descriptor_sets(&[write.build()], &[]) };
}

/// Write records for one `vkCmdPushDescriptorSetKHR`
///
/// Image infos are owned here so the records never outlive them; buffer
/// records come precomputed from their buffers.
#[derive(Default)]
pub struct PushDescriptorWrites {
    writes: Vec<vk::WriteDescriptorSet>,
    images: Vec<(u32, vk::DescriptorType, Box<vk::DescriptorImageInfo>)>,
}

impl PushDescriptorWrites {
    /// Empty write list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a precomputed buffer record
    ///
    /// The record borrows its buffer info from the owning buffer, which must
    /// outlive the push.
    pub fn buffer(mut self, write: vk::WriteDescriptorSet) -> Self {
        self.writes.push(write);
        self
    }

    /// Add several precomputed buffer records
    pub fn buffers(mut self, writes: impl IntoIterator<Item = vk::WriteDescriptorSet>) -> Self {
        self.writes.extend(writes);
        self
    }

    /// Add a storage image in `GENERAL` layout
    pub fn storage_image(mut self, binding: u32, view: vk::ImageView) -> Self {
        self.images.push((
            binding,
            vk::DescriptorType::STORAGE_IMAGE,
            Box::new(vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout: vk::ImageLayout::GENERAL,
            }),
        ));
        self
    }

    /// Add a combined image sampler in `layout`
    pub fn sampled_image(mut self, binding: u32, view: vk::ImageView, sampler: vk::Sampler, layout: vk::ImageLayout) -> Self {
        self.images.push((
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Box::new(vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: layout,
            }),
        ));
        self
    }

    /// Number of write records
    pub fn len(&self) -> usize {
        self.writes.len() + self.images.len()
    }

    /// Whether nothing would be written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, images after buffers
    pub fn records(&self) -> Vec<vk::WriteDescriptorSet> {
        let mut records = self.writes.clone();
        records.extend(self.images.iter().map(|(binding, descriptor_type, info)| {
            vk::WriteDescriptorSet::builder()
                .dst_binding(*binding)
                .descriptor_type(*descriptor_type)
                .image_info(std::slice::from_ref(info.as_ref()))
                .build()
        }));
        records
    }

    /// Push the records into set 0 of `layout`
    pub fn push(
        &self,
        loader: &khr::PushDescriptor,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
    ) {
        let records = self.records();
        unsafe { loader.cmd_push_descriptor_set(command_buffer, bind_point, layout, 0, &records) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_path_keeps_task_binding_compute_only() {
        let bindings = global_bindings(BindingVisibility::new(false));
        assert_eq!(bindings.len(), 13);
        let task = bindings[bindings::INDIRECT_TASK as usize];
        assert_eq!(task.stage_flags, vk::ShaderStageFlags::COMPUTE);
        assert!(bindings.iter().all(|b| !b.stage_flags.is_empty()));
    }

    #[test]
    fn test_mesh_path_exposes_task_binding() {
        let bindings = global_bindings(BindingVisibility::new(true));
        assert_eq!(bindings.len(), 13);
        let task = bindings[bindings::INDIRECT_TASK as usize];
        assert_eq!(task.descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert!(task.stage_flags.contains(vk::ShaderStageFlags::TASK_EXT));
    }

    #[test]
    fn test_binding_types() {
        let bindings = global_bindings(BindingVisibility::new(false));
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(
            bindings[bindings::DEPTH_PYRAMID as usize].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(
            bindings[bindings::VISIBILITY as usize].descriptor_type,
            vk::DescriptorType::STORAGE_BUFFER
        );
    }

    #[test]
    fn test_stages_follow_geometry_path() {
        let vertex = BindingVisibility::new(false);
        let mesh = BindingVisibility::new(true);
        use vk::ShaderStageFlags as S;

        assert_eq!(vertex.stages(bindings::VIEW_DATA), S::VERTEX | S::FRAGMENT | S::COMPUTE);
        assert_eq!(
            mesh.stages(bindings::VIEW_DATA),
            S::MESH_EXT | S::TASK_EXT | S::FRAGMENT | S::COMPUTE
        );
        assert_eq!(vertex.stages(bindings::VERTICES), S::VERTEX);
        assert_eq!(mesh.stages(bindings::VERTICES), S::MESH_EXT | S::TASK_EXT);
        assert_eq!(mesh.stages(bindings::SURFACES), S::COMPUTE | S::MESH_EXT | S::TASK_EXT);
        assert_eq!(vertex.stages(bindings::MATERIALS), S::FRAGMENT);
        assert_eq!(vertex.stages(bindings::INDIRECT_DRAW), S::COMPUTE | S::VERTEX);
        assert_eq!(vertex.stages(bindings::VISIBILITY), S::COMPUTE);
        assert_eq!(vertex.stages(bindings::INDIRECT_TASK), S::COMPUTE);
    }

    #[test]
    fn test_push_writes_keep_image_infos() {
        let writes = PushDescriptorWrites::new()
            .storage_image(0, vk::ImageView::null())
            .sampled_image(1, vk::ImageView::null(), vk::Sampler::null(), vk::ImageLayout::GENERAL);
        let records = writes.records();

        assert_eq!(writes.len(), 2);
        assert_eq!(records[0].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(records[1].dst_binding, 1);
        assert_eq!(records[1].descriptor_count, 1);
        let info = unsafe { &*records[1].p_image_info };
        assert_eq!(info.image_layout, vk::ImageLayout::GENERAL);
    }
}
