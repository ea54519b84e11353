//! Bottom-level acceleration structures, one per surface
//!
//! Built once after the scene upload from LOD 0 of every surface. All
//! structures live in one storage buffer and are built with one scratch
//! buffer, both sub-allocated at 256-byte offsets.

use std::sync::Arc;

use ash::extensions::khr;
use ash::{vk, Device};

use super::buffer::{AllocatedBuffer, MemoryLocation};
use crate::render::backends::vulkan::rendering::commands::CommandPool;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::scene::{SceneData, Vertex};

/// Alignment of every structure and scratch region
pub const ACCELERATION_ALIGNMENT: u64 = 256;

/// Round `value` up to a multiple of `alignment` (a power of two)
pub fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Aligned offsets of consecutive regions and the total size they span
pub fn pack_regions(sizes: impl IntoIterator<Item = u64>) -> (Vec<u64>, u64) {
    let mut total = 0;
    let offsets = sizes
        .into_iter()
        .map(|size| {
            let offset = total;
            total = align_up(offset + size, ACCELERATION_ALIGNMENT);
            offset
        })
        .collect();
    (offsets, total)
}

/// Geometry of one surface's LOD 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SurfaceGeometry {
    first_index: u32,
    triangle_count: u32,
    vertex_offset: u32,
    max_vertex: u32,
}

fn surface_geometry(scene: &SceneData) -> Vec<SurfaceGeometry> {
    scene
        .surfaces
        .iter()
        .enumerate()
        .map(|(i, surface)| {
            let lod = surface.lods[0];
            SurfaceGeometry {
                first_index: lod.first_index,
                triangle_count: lod.index_count / 3,
                vertex_offset: surface.vertex_offset.max(0) as u32,
                max_vertex: scene.primitive_vertex_counts.get(i).copied().unwrap_or(0).saturating_sub(1),
            }
        })
        .filter(|geometry| geometry.triangle_count > 0)
        .collect()
}

/// Acceleration structures of every surface plus their backing storage
pub struct BottomLevelStructures {
    loader: khr::AccelerationStructure,
    structures: Vec<vk::AccelerationStructureKHR>,
    _storage: AllocatedBuffer,
}

impl BottomLevelStructures {
    /// Build one structure per surface from the uploaded vertex and index buffers
    pub fn build(
        device: &Device,
        allocator: &Arc<vk_mem::Allocator>,
        loader: &khr::AccelerationStructure,
        pool: &CommandPool,
        queue: vk::Queue,
        scene: &SceneData,
        vertices: &AllocatedBuffer,
        indices: &AllocatedBuffer,
    ) -> VulkanResult<Self> {
        let geometries_src = surface_geometry(scene);
        if geometries_src.is_empty() {
            return Err(VulkanError::EmptySceneData { what: "triangles for acceleration structures" });
        }

        let vertex_address = vertices.device_address(device);
        let index_address = indices.device_address(device);

        let geometries: Vec<vk::AccelerationStructureGeometryKHR> = geometries_src
            .iter()
            .map(|geometry| {
                let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
                    .vertex_format(vk::Format::R32G32B32_SFLOAT)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR { device_address: vertex_address })
                    .vertex_stride(std::mem::size_of::<Vertex>() as u64)
                    .max_vertex(geometry.max_vertex)
                    .index_type(vk::IndexType::UINT32)
                    .index_data(vk::DeviceOrHostAddressConstKHR { device_address: index_address })
                    .build();
                vk::AccelerationStructureGeometryKHR::builder()
                    .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                    .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
                    .flags(vk::GeometryFlagsKHR::OPAQUE)
                    .build()
            })
            .collect();

        let build_sizes: Vec<vk::AccelerationStructureBuildSizesInfoKHR> = geometries
            .iter()
            .zip(&geometries_src)
            .map(|(geometry, src)| {
                let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
                    .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
                    .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
                    .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                    .geometries(std::slice::from_ref(geometry));
                unsafe {
                    loader.get_acceleration_structure_build_sizes(
                        vk::AccelerationStructureBuildTypeKHR::DEVICE,
                        &build_info,
                        &[src.triangle_count],
                    )
                }
            })
            .collect();

        let (storage_offsets, storage_size) =
            pack_regions(build_sizes.iter().map(|sizes| sizes.acceleration_structure_size));
        let (scratch_offsets, scratch_size) = pack_regions(build_sizes.iter().map(|sizes| sizes.build_scratch_size));

        let storage = AllocatedBuffer::new(
            allocator.clone(),
            storage_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            "acceleration structure storage",
        )?;
        let scratch = AllocatedBuffer::new(
            allocator.clone(),
            scratch_size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            "acceleration structure scratch",
        )?;
        let scratch_address = scratch.device_address(device);

        let mut blas = Self {
            loader: loader.clone(),
            structures: Vec::with_capacity(geometries.len()),
            _storage: storage,
        };

        for (sizes, &offset) in build_sizes.iter().zip(&storage_offsets) {
            let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
                .buffer(blas._storage.handle())
                .offset(offset)
                .size(sizes.acceleration_structure_size)
                .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL);
            let structure = unsafe {
                loader
                    .create_acceleration_structure(&create_info, None)
                    .map_err(VulkanError::Api)?
            };
            blas.structures.push(structure);
        }

        let build_infos: Vec<vk::AccelerationStructureBuildGeometryInfoKHR> = geometries
            .iter()
            .zip(&blas.structures)
            .zip(&scratch_offsets)
            .map(|((geometry, &structure), &offset)| {
                vk::AccelerationStructureBuildGeometryInfoKHR::builder()
                    .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
                    .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
                    .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                    .dst_acceleration_structure(structure)
                    .geometries(std::slice::from_ref(geometry))
                    .scratch_data(vk::DeviceOrHostAddressKHR { device_address: scratch_address + offset })
                    .build()
            })
            .collect();

        let ranges: Vec<[vk::AccelerationStructureBuildRangeInfoKHR; 1]> = geometries_src
            .iter()
            .map(|geometry| {
                [vk::AccelerationStructureBuildRangeInfoKHR {
                    primitive_count: geometry.triangle_count,
                    primitive_offset: geometry.first_index * std::mem::size_of::<u32>() as u32,
                    first_vertex: geometry.vertex_offset,
                    transform_offset: 0,
                }]
            })
            .collect();
        let range_refs: Vec<&[vk::AccelerationStructureBuildRangeInfoKHR]> = ranges.iter().map(|r| &r[..]).collect();

        pool.one_time_submit(queue, |command_buffer| {
            unsafe { loader.cmd_build_acceleration_structures(command_buffer, &build_infos, &range_refs) };
            Ok(())
        })?;

        log::info!(
            "[UPLOAD] Built {} acceleration structures ({} bytes, {} bytes scratch)",
            blas.structures.len(),
            storage_size,
            scratch_size
        );

        Ok(blas)
    }

    /// Number of structures
    pub fn len(&self) -> usize {
        self.structures.len()
    }

    /// Whether no structure was built
    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// Structure handles in surface order
    pub fn handles(&self) -> &[vk::AccelerationStructureKHR] {
        &self.structures
    }
}

impl Drop for BottomLevelStructures {
    fn drop(&mut self) {
        unsafe {
            for &structure in &self.structures {
                self.loader.destroy_acceleration_structure(structure, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::builder::cube_mesh;
    use crate::scene::{Material, MeshTransform, SceneBuilder};

    #[test]
    fn test_regions_start_aligned() {
        let (offsets, total) = pack_regions([100, 256, 1]);
        assert_eq!(offsets, vec![0, 256, 512]);
        assert_eq!(total, 768);
        assert!(offsets.iter().all(|offset| offset % ACCELERATION_ALIGNMENT == 0));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn test_surface_geometry_uses_lod_zero() {
        let (vertices, indices) = cube_mesh();
        let mut builder = SceneBuilder::new();
        let material = builder.add_material(Material::default());
        builder.add_mesh(&vertices, &indices, material);
        let second = builder.add_mesh(&vertices, &indices, material);
        builder.add_object(second, MeshTransform::default());
        let scene = builder.build();

        let geometry = surface_geometry(&scene);
        assert_eq!(geometry.len(), 2);
        assert_eq!(geometry[0].triangle_count, 12);
        assert_eq!(geometry[1].first_index, 36);
        assert_eq!(geometry[1].vertex_offset, 24);
        assert_eq!(geometry[1].max_vertex, 23);
    }
}
