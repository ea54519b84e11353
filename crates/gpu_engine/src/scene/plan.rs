//! Buffer sizing and upload preconditions, computed before touching the GPU

use std::mem::size_of;

use super::{IndirectDrawData, IndirectTaskData, SceneData};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Byte size of every persistent scene buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferSizes {
    /// Vertex buffer
    pub vertices: u64,
    /// Index buffer
    pub indices: u64,
    /// Render-object buffer
    pub render_objects: u64,
    /// Surface buffer
    pub surfaces: u64,
    /// Material buffer
    pub materials: u64,
    /// Transform buffer
    pub transforms: u64,
    /// Meshlet buffer, 0 when the mesh path is off
    pub meshlets: u64,
    /// Meshlet data buffer, 0 when the mesh path is off
    pub meshlet_data: u64,
    /// One indirect draw record per object
    pub indirect_draw: u64,
    /// One indirect task record per object
    pub indirect_task: u64,
    /// A single `u32` counter
    pub indirect_count: u64,
    /// One `u32` flag per object
    pub visibility: u64,
}

/// Validated description of a scene upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenePlan {
    /// Buffer sizes in bytes
    pub sizes: BufferSizes,
    /// Number of render objects, also the maximum draw count
    pub object_count: u32,
    /// Textures the bindless table will expose
    pub texture_count: u32,
    /// Whether meshlet buffers are part of the upload
    pub mesh_shading: bool,
}

/// Object ids a task record can address; the top 8 bits carry the LOD
pub const MAX_TASK_OBJECTS: u32 = 1 << 24;

fn check_object_count(object_count: u32, mesh_shading: bool) -> VulkanResult<()> {
    if mesh_shading && object_count >= MAX_TASK_OBJECTS {
        log::error!("[UPLOAD] {} render objects exceed the mesh path limit of {}", object_count, MAX_TASK_OBJECTS - 1);
        return Err(VulkanError::InvalidOperation {
            reason: format!("{} render objects do not fit in a 24-bit task object id", object_count),
        });
    }
    Ok(())
}

fn byte_size<T>(items: &[T]) -> u64 {
    (items.len() * size_of::<T>()) as u64
}

fn require(size: u64, what: &'static str) -> VulkanResult<u64> {
    if size == 0 {
        log::error!("[UPLOAD] Scene has no {}", what);
        return Err(VulkanError::EmptySceneData { what });
    }
    Ok(size)
}

impl ScenePlan {
    /// Size every buffer and check the scene can be rendered
    ///
    /// Fails on the first empty array, when no texture is loaded, and on the
    /// mesh path when object ids would overflow [`MAX_TASK_OBJECTS`]. A failed
    /// plan never leaves GPU objects behind.
    pub fn new(scene: &SceneData, mesh_shading: bool, texture_count: u32) -> VulkanResult<Self> {
        let object_count = scene.object_count();
        check_object_count(object_count, mesh_shading)?;

        let mut sizes = BufferSizes {
            vertices: require(byte_size(&scene.vertices), "vertices")?,
            indices: require(byte_size(&scene.indices), "indices")?,
            render_objects: require(byte_size(&scene.render_objects), "render objects")?,
            surfaces: require(byte_size(&scene.surfaces), "surfaces")?,
            materials: require(byte_size(&scene.materials), "materials")?,
            transforms: require(byte_size(&scene.transforms), "transforms")?,
            indirect_draw: object_count as u64 * IndirectDrawData::STRIDE as u64,
            indirect_task: object_count as u64 * IndirectTaskData::STRIDE as u64,
            indirect_count: size_of::<u32>() as u64,
            visibility: object_count as u64 * size_of::<u32>() as u64,
            ..BufferSizes::default()
        };

        if mesh_shading {
            sizes.meshlets = require(byte_size(&scene.meshlets), "meshlets")?;
            sizes.meshlet_data = require(byte_size(&scene.meshlet_data), "meshlet data")?;
        }

        if texture_count == 0 {
            log::error!("[UPLOAD] No textures loaded, refusing to create an empty texture table");
            return Err(VulkanError::NoTextures);
        }

        Ok(Self { sizes, object_count, texture_count, mesh_shading })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::builder::cube_mesh;
    use crate::scene::{Material, MeshTransform, SceneBuilder};

    fn one_cube_scene() -> SceneData {
        let (vertices, indices) = cube_mesh();
        let mut builder = SceneBuilder::new();
        let material = builder.add_material(Material::default());
        let surface = builder.add_mesh(&vertices, &indices, material);
        builder.add_object(surface, MeshTransform::default());
        builder.add_object(surface, MeshTransform::from_position([3.0, 0.0, 0.0]));
        builder.build()
    }

    #[test]
    fn test_sizes_follow_scene_arrays() {
        let scene = one_cube_scene();
        let plan = ScenePlan::new(&scene, false, 1).unwrap();

        assert_eq!(plan.object_count, 2);
        assert_eq!(plan.sizes.vertices, 24 * 32);
        assert_eq!(plan.sizes.indices, 36 * 4);
        assert_eq!(plan.sizes.indirect_draw, 2 * 24);
        assert_eq!(plan.sizes.indirect_task, 2 * 16);
        assert_eq!(plan.sizes.visibility, 8);
        assert_eq!(plan.sizes.indirect_count, 4);
        assert_eq!(plan.sizes.meshlets, 0);
    }

    #[test]
    fn test_mesh_path_includes_meshlets() {
        let scene = one_cube_scene();
        let plan = ScenePlan::new(&scene, true, 1).unwrap();
        assert_eq!(plan.sizes.meshlets, scene.meshlets.len() as u64 * 48);
        assert!(plan.sizes.meshlet_data > 0);
    }

    #[test]
    fn test_empty_arrays_are_rejected() {
        let mut scene = one_cube_scene();
        scene.materials.clear();
        assert!(matches!(
            ScenePlan::new(&scene, false, 1),
            Err(VulkanError::EmptySceneData { what: "materials" })
        ));

        let empty = SceneData::default();
        assert!(matches!(
            ScenePlan::new(&empty, false, 1),
            Err(VulkanError::EmptySceneData { what: "vertices" })
        ));
    }

    #[test]
    fn test_missing_meshlets_only_matter_on_mesh_path() {
        let mut scene = one_cube_scene();
        scene.meshlets.clear();
        assert!(ScenePlan::new(&scene, false, 1).is_ok());
        assert!(matches!(
            ScenePlan::new(&scene, true, 1),
            Err(VulkanError::EmptySceneData { what: "meshlets" })
        ));
    }

    #[test]
    fn test_task_object_ids_limited_to_24_bits_on_mesh_path() {
        assert!(check_object_count(MAX_TASK_OBJECTS - 1, true).is_ok());
        assert!(matches!(
            check_object_count(MAX_TASK_OBJECTS, true),
            Err(VulkanError::InvalidOperation { .. })
        ));
        assert!(check_object_count(u32::MAX, true).is_err());
        assert!(check_object_count(MAX_TASK_OBJECTS, false).is_ok());

        // Largest id still survives the shader's pack and unpack
        let packed = (MAX_TASK_OBJECTS - 1) | (7 << 24);
        assert_eq!(packed & 0x00ff_ffff, MAX_TASK_OBJECTS - 1);
        assert_eq!(packed >> 24, 7);
    }

    #[test]
    fn test_zero_textures_fails_before_any_pool_exists() {
        let scene = one_cube_scene();
        assert!(matches!(ScenePlan::new(&scene, false, 0), Err(VulkanError::NoTextures)));
    }
}
