//! Incremental construction of [`SceneData`]

use super::meshlets::{bounding_sphere, build_meshlets};
use super::{Material, MeshLod, MeshTransform, RenderObject, SceneData, Surface, Vertex, MAX_LODS};
use crate::foundation::math::Vec3;

/// Builds a [`SceneData`] one mesh, material and object at a time
///
/// Surfaces get their bounding sphere, LOD table and meshlets computed here so
/// providers only supply raw triangles.
#[derive(Debug, Default)]
pub struct SceneBuilder {
    data: SceneData,
}

impl SceneBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a material, returning its index
    pub fn add_material(&mut self, mut material: Material) -> u32 {
        let id = self.data.materials.len() as u32;
        material.material_id = id;
        self.data.materials.push(material);
        id
    }

    /// Add a single-LOD mesh, returning its surface index
    pub fn add_mesh(&mut self, vertices: &[Vertex], indices: &[u32], material_id: u32) -> u32 {
        self.add_mesh_with_lods(vertices, &[indices], material_id)
    }

    /// Add a mesh with several index lists over the same vertices, finest first
    ///
    /// Extra LODs beyond [`MAX_LODS`] are ignored.
    pub fn add_mesh_with_lods(&mut self, vertices: &[Vertex], lods: &[&[u32]], material_id: u32) -> u32 {
        let surface_id = self.data.surfaces.len() as u32;
        let vertex_offset = self.data.vertices.len() as i32;

        let positions: Vec<Vec3> = vertices.iter().map(|v| Vec3::from(v.position)).collect();
        let (center, radius) = bounding_sphere(&positions);

        let mut surface = Surface {
            vertex_offset,
            material_id,
            center: center.into(),
            radius,
            ..Surface::default()
        };

        for (slot, indices) in surface.lods.iter_mut().zip(lods.iter().take(MAX_LODS)) {
            let meshlet_offset = self.data.meshlets.len() as u32;
            let meshlets = build_meshlets(vertices, indices, &mut self.data.meshlet_data);

            *slot = MeshLod {
                first_index: self.data.indices.len() as u32,
                index_count: indices.len() as u32,
                meshlet_offset,
                meshlet_count: meshlets.len() as u32,
            };

            self.data.indices.extend_from_slice(indices);
            self.data.meshlets.extend(meshlets);
            surface.lod_count += 1;
        }

        self.data.vertices.extend_from_slice(vertices);
        self.data.primitive_vertex_counts.push(vertices.len() as u32);
        self.data.surfaces.push(surface);
        surface_id
    }

    /// Place an instance of `surface_id`, returning its render-object index
    pub fn add_object(&mut self, surface_id: u32, transform: MeshTransform) -> u32 {
        let transform_id = self.data.transforms.len() as u32;
        self.data.transforms.push(transform);

        let object_id = self.data.render_objects.len() as u32;
        self.data.render_objects.push(RenderObject { transform_id, surface_id });
        object_id
    }

    /// Number of render objects added so far
    pub fn object_count(&self) -> usize {
        self.data.render_objects.len()
    }

    /// Finish building
    pub fn build(self) -> SceneData {
        self.data
    }
}

/// Unit cube centred on the origin with per-face normals and UVs
///
/// Triangle winding agrees with the stored normals.
pub fn cube_mesh() -> (Vec<Vertex>, Vec<u32>) {
    const FACES: [([f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, -1.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, up) in FACES {
        let n = Vec3::from(normal);
        let u = Vec3::from(up) * 0.5;
        // right x up = normal, so the triangles wind counter-clockwise around the normal
        let r = Vec3::from(up).cross(&n) * 0.5;
        let c = n * 0.5;
        let base = vertices.len() as u32;
        for (corner, uv) in [(c - r - u, [0.0, 1.0]), (c + r - u, [1.0, 1.0]), (c + r + u, [1.0, 0.0]), (c - r + u, [0.0, 0.0])] {
            vertices.push(Vertex::new(corner.into(), normal, uv));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_ranges_follow_insertion_order() {
        let (vertices, indices) = cube_mesh();
        let mut builder = SceneBuilder::new();
        let material = builder.add_material(Material::default());
        let a = builder.add_mesh(&vertices, &indices, material);
        let b = builder.add_mesh(&vertices, &indices, material);
        let scene = builder.build();

        assert_eq!((a, b), (0, 1));
        assert_eq!(scene.surfaces[1].vertex_offset, vertices.len() as i32);
        assert_eq!(scene.surfaces[1].lods[0].first_index, indices.len() as u32);
        assert_eq!(scene.surfaces[1].lods[0].index_count, 36);
        assert_eq!(scene.primitive_vertex_counts, vec![24, 24]);
    }

    #[test]
    fn test_cube_bounds() {
        let (vertices, indices) = cube_mesh();
        let mut builder = SceneBuilder::new();
        let surface = builder.add_mesh(&vertices, &indices, 0);
        let scene = builder.build();
        let s = scene.surfaces[surface as usize];
        assert!(Vec3::from(s.center).norm() < 1e-6);
        assert!((s.radius - 0.75f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_lods_are_capped() {
        let (vertices, indices) = cube_mesh();
        let lods: Vec<&[u32]> = (0..MAX_LODS + 2).map(|_| indices.as_slice()).collect();
        let mut builder = SceneBuilder::new();
        builder.add_mesh_with_lods(&vertices, &lods, 0);
        let scene = builder.build();
        assert_eq!(scene.surfaces[0].lod_count as usize, MAX_LODS);
    }

    #[test]
    fn test_objects_get_their_own_transforms() {
        let (vertices, indices) = cube_mesh();
        let mut builder = SceneBuilder::new();
        let surface = builder.add_mesh(&vertices, &indices, 0);
        builder.add_object(surface, MeshTransform::from_position([1.0, 0.0, 0.0]));
        let id = builder.add_object(surface, MeshTransform::from_position([2.0, 0.0, 0.0]));
        let scene = builder.build();
        assert_eq!(id, 1);
        assert_eq!(scene.render_objects[1], RenderObject { transform_id: 1, surface_id: 0 });
        assert_eq!(scene.object_count(), 2);
    }
}
