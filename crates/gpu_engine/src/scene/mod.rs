//! GPU-resident scene records
//!
//! Every type here is `#[repr(C)]` and matches the std430 declarations in
//! `resources/shaders/common.glsl` byte for byte. The scene is uploaded once;
//! changing the set of objects means building a new [`SceneData`] and uploading
//! it again.

pub mod builder;
pub mod meshlets;
pub mod plan;

pub use builder::SceneBuilder;
pub use plan::{BufferSizes, ScenePlan};

use bytemuck::{Pod, Zeroable};

/// Maximum number of LODs a surface can carry
pub const MAX_LODS: usize = 8;

/// Vertex pulled by the vertex and mesh shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Texture coordinate U, packed next to the position
    pub uv_x: f32,
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate V
    pub uv_y: f32,
}

impl Vertex {
    /// Create a vertex
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, uv_x: uv[0], normal, uv_y: uv[1] }
    }
}

/// One level of detail of a surface
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct MeshLod {
    /// First index in the global index buffer
    pub first_index: u32,
    /// Number of indices in this LOD
    pub index_count: u32,
    /// First meshlet in the global meshlet buffer
    pub meshlet_offset: u32,
    /// Number of meshlets in this LOD
    pub meshlet_count: u32,
}

/// Drawable geometry: LODs, material and object-space bounding sphere
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Surface {
    /// LOD chain, finest first
    pub lods: [MeshLod; MAX_LODS],
    /// Number of valid entries in `lods`
    pub lod_count: u32,
    /// Added to every index before fetching a vertex
    pub vertex_offset: i32,
    /// Index into the material buffer
    pub material_id: u32,
    /// Padding to keep `center` 16-byte aligned
    pub _pad: u32,
    /// Bounding sphere centre in object space
    pub center: [f32; 3],
    /// Bounding sphere radius in object space
    pub radius: f32,
}

impl Default for Surface {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

/// A cluster of at most [`meshlets::MAX_VERTICES`] vertices and
/// [`meshlets::MAX_TRIANGLES`] triangles
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Meshlet {
    /// Bounding sphere centre in object space
    pub center: [f32; 3],
    /// Bounding sphere radius
    pub radius: f32,
    /// Average facing direction of the cluster's triangles
    pub cone_axis: [f32; 3],
    /// Back-face cone cutoff, 1.0 or more disables the cone test
    pub cone_cutoff: f32,
    /// Offset of the cluster's vertex and triangle data, in `u32` words
    pub data_offset: u32,
    /// Number of unique vertices
    pub vertex_count: u32,
    /// Number of triangles
    pub triangle_count: u32,
    /// Padding
    pub _pad: u32,
}

/// Per-object placement: translation, uniform scale and orientation
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshTransform {
    /// World-space translation
    pub position: [f32; 3],
    /// Uniform scale
    pub scale: f32,
    /// Orientation quaternion as `[x, y, z, w]`
    pub orientation: [f32; 4],
}

impl MeshTransform {
    /// Translation-only transform
    pub fn from_position(position: [f32; 3]) -> Self {
        Self { position, ..Self::default() }
    }

    /// Set the uniform scale
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }
}

impl Default for MeshTransform {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            scale: 1.0,
            orientation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Surface appearance
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Material {
    /// Base colour multiplier
    pub diffuse_color: [f32; 4],
    /// Specular exponent
    pub shininess: f32,
    /// Index of the diffuse texture in the bindless table
    pub diffuse_map: u32,
    /// Index of the specular texture in the bindless table
    pub specular_map: u32,
    /// Index of this material
    pub material_id: u32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            diffuse_color: [1.0; 4],
            shininess: 10.0,
            diffuse_map: 0,
            specular_map: 0,
            material_id: 0,
        }
    }
}

/// An instance of a surface; its index is its visibility slot
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct RenderObject {
    /// Index into the transform buffer
    pub transform_id: u32,
    /// Index into the surface buffer
    pub surface_id: u32,
}

/// Indirect indexed draw written by the culling shaders
///
/// The `VkDrawIndexedIndirectCommand` starts at byte 4, after `object_id`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct IndirectDrawData {
    /// Render object this draw belongs to
    pub object_id: u32,
    /// Indices to draw
    pub index_count: u32,
    /// Always 1
    pub instance_count: u32,
    /// First index of the chosen LOD
    pub first_index: u32,
    /// Vertex offset of the surface
    pub vertex_offset: i32,
    /// Unused, kept at 0
    pub first_instance: u32,
}

impl IndirectDrawData {
    /// Byte offset of the draw command inside the record
    pub const COMMAND_OFFSET: u64 = 4;
    /// Stride between records
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;
}

/// Indirect task-shader dispatch written by the culling shaders
///
/// The `VkDrawMeshTasksIndirectCommandEXT` starts at byte 4.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct IndirectTaskData {
    /// Render object in the low 24 bits, chosen LOD in the top 8
    pub object_id: u32,
    /// Task workgroups in X
    pub group_count_x: u32,
    /// Task workgroups in Y
    pub group_count_y: u32,
    /// Task workgroups in Z
    pub group_count_z: u32,
}

impl IndirectTaskData {
    /// Byte offset of the dispatch command inside the record
    pub const COMMAND_OFFSET: u64 = 4;
    /// Stride between records
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;
}

/// Everything the renderer uploads for one scene
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneData {
    /// Vertices of every surface
    pub vertices: Vec<Vertex>,
    /// Triangle-list indices, local to each surface's vertex range
    pub indices: Vec<u32>,
    /// Surfaces
    pub surfaces: Vec<Surface>,
    /// Meshlets of every surface LOD
    pub meshlets: Vec<Meshlet>,
    /// Meshlet vertex and triangle data
    pub meshlet_data: Vec<u32>,
    /// Object placements
    pub transforms: Vec<MeshTransform>,
    /// Materials
    pub materials: Vec<Material>,
    /// Instances to cull and draw
    pub render_objects: Vec<RenderObject>,
    /// Vertex count of each surface, used when building acceleration structures
    pub primitive_vertex_counts: Vec<u32>,
}

impl SceneData {
    /// Number of render objects, which is also the size of the visibility buffer
    pub fn object_count(&self) -> u32 {
        self.render_objects.len() as u32
    }
}

/// Anything that can hand the renderer a scene to upload
pub trait SceneProvider {
    /// The scene arrays
    fn scene(&self) -> &SceneData;
}

impl SceneProvider for SceneData {
    fn scene(&self) -> &SceneData {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_record_sizes_match_shader_layouts() {
        assert_eq!(size_of::<Vertex>(), 32);
        assert_eq!(size_of::<MeshLod>(), 16);
        assert_eq!(size_of::<Surface>(), 160);
        assert_eq!(size_of::<Meshlet>(), 48);
        assert_eq!(size_of::<MeshTransform>(), 32);
        assert_eq!(size_of::<Material>(), 32);
        assert_eq!(size_of::<RenderObject>(), 8);
        assert_eq!(size_of::<IndirectDrawData>(), 24);
        assert_eq!(size_of::<IndirectTaskData>(), 16);
    }

    #[test]
    fn test_indirect_command_offsets() {
        assert_eq!(IndirectDrawData::STRIDE, 24);
        assert_eq!(IndirectDrawData::COMMAND_OFFSET, 4);
        assert_eq!(IndirectTaskData::STRIDE, 16);
    }

    #[test]
    fn test_surface_center_offset() {
        let surface = Surface::default();
        let base = &surface as *const Surface as usize;
        let center = &surface.center as *const [f32; 3] as usize;
        assert_eq!(center - base, 144);
    }
}
