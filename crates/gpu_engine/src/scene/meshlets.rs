//! Greedy meshlet builder
//!
//! Splits a triangle list into clusters small enough for one mesh shader
//! workgroup. Each cluster's data in the shared `u32` stream is its vertex
//! indices followed by its local triangle indices packed four bytes per word.

use std::collections::HashMap;

use super::{Meshlet, Vertex};
use crate::foundation::math::Vec3;

/// Maximum unique vertices per meshlet
pub const MAX_VERTICES: usize = 64;

/// Maximum triangles per meshlet
pub const MAX_TRIANGLES: usize = 124;

struct Cluster {
    vertices: Vec<u32>,
    remap: HashMap<u32, u8>,
    triangles: Vec<u8>,
}

impl Cluster {
    fn new() -> Self {
        Self {
            vertices: Vec::with_capacity(MAX_VERTICES),
            remap: HashMap::with_capacity(MAX_VERTICES),
            triangles: Vec::with_capacity(MAX_TRIANGLES * 3),
        }
    }

    fn fits(&self, tri: &[u32]) -> bool {
        let new_vertices = tri
            .iter()
            .enumerate()
            .filter(|&(i, &v)| !self.remap.contains_key(&v) && !tri[..i].contains(&v))
            .count();
        self.vertices.len() + new_vertices <= MAX_VERTICES && self.triangles.len() / 3 < MAX_TRIANGLES
    }

    fn push(&mut self, tri: &[u32]) {
        for &v in tri {
            let next = self.vertices.len() as u8;
            let local = *self.remap.entry(v).or_insert(next);
            if local == next {
                self.vertices.push(v);
            }
            self.triangles.push(local);
        }
    }

    fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

/// Build meshlets for one index range
///
/// `indices` are local to `vertices`. Returns the meshlets and appends their
/// data to `data`; `data_offset` of each meshlet points into that stream.
pub fn build_meshlets(vertices: &[Vertex], indices: &[u32], data: &mut Vec<u32>) -> Vec<Meshlet> {
    let mut meshlets = Vec::new();
    let mut cluster = Cluster::new();

    for tri in indices.chunks_exact(3) {
        if !cluster.fits(tri) {
            meshlets.push(finish(&cluster, vertices, data));
            cluster = Cluster::new();
        }
        cluster.push(tri);
    }

    if !cluster.is_empty() {
        meshlets.push(finish(&cluster, vertices, data));
    }

    meshlets
}

fn finish(cluster: &Cluster, vertices: &[Vertex], data: &mut Vec<u32>) -> Meshlet {
    let data_offset = data.len() as u32;
    data.extend_from_slice(&cluster.vertices);
    data.extend(cluster.triangles.chunks(4).map(|chunk| {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        u32::from_le_bytes(word)
    }));

    let positions: Vec<Vec3> = cluster
        .vertices
        .iter()
        .map(|&v| Vec3::from(vertices[v as usize].position))
        .collect();
    let (center, radius) = bounding_sphere(&positions);

    let normals: Vec<Vec3> = cluster
        .triangles
        .chunks_exact(3)
        .filter_map(|t| {
            let a = positions[t[0] as usize];
            let b = positions[t[1] as usize];
            let c = positions[t[2] as usize];
            let n = (b - a).cross(&(c - a));
            (n.norm() > f32::EPSILON).then(|| n.normalize())
        })
        .collect();

    let (cone_axis, cone_cutoff) = normal_cone(&normals);

    Meshlet {
        center: center.into(),
        radius,
        cone_axis: cone_axis.into(),
        cone_cutoff,
        data_offset,
        vertex_count: cluster.vertices.len() as u32,
        triangle_count: (cluster.triangles.len() / 3) as u32,
        _pad: 0,
    }
}

/// Centre of the bounding box and the largest distance from it
pub fn bounding_sphere(points: &[Vec3]) -> (Vec3, f32) {
    if points.is_empty() {
        return (Vec3::zeros(), 0.0);
    }

    let (min, max) = points.iter().fold(
        (Vec3::repeat(f32::MAX), Vec3::repeat(f32::MIN)),
        |(min, max), p| (min.inf(p), max.sup(p)),
    );
    let center = (min + max) * 0.5;
    let radius = points.iter().map(|p| (p - center).norm()).fold(0.0, f32::max);
    (center, radius)
}

fn normal_cone(normals: &[Vec3]) -> (Vec3, f32) {
    let sum: Vec3 = normals.iter().sum();
    if normals.is_empty() || sum.norm() <= f32::EPSILON {
        return (Vec3::z(), 1.0);
    }

    let axis = sum.normalize();
    let min_dot = normals.iter().map(|n| n.dot(&axis)).fold(1.0, f32::min);
    if min_dot <= 0.1 {
        // Normals spread over (nearly) a hemisphere, nothing can be rejected
        return (axis, 1.0);
    }

    (axis, (1.0 - min_dot * min_dot).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: u32) -> (Vec<Vertex>, Vec<u32>) {
        let mut vertices = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                vertices.push(Vertex::new([x as f32, y as f32, 0.0], [0.0, 0.0, -1.0], [0.0, 0.0]));
            }
        }
        let mut indices = Vec::new();
        let row = n + 1;
        for y in 0..n {
            for x in 0..n {
                let i = y * row + x;
                indices.extend_from_slice(&[i, i + 1, i + row, i + 1, i + row + 1, i + row]);
            }
        }
        (vertices, indices)
    }

    #[test]
    fn test_meshlets_respect_limits_and_cover_all_triangles() {
        let (vertices, indices) = grid(20);
        let mut data = Vec::new();
        let meshlets = build_meshlets(&vertices, &indices, &mut data);

        assert!(meshlets.len() > 1);
        let total: u32 = meshlets.iter().map(|m| m.triangle_count).sum();
        assert_eq!(total as usize, indices.len() / 3);
        for m in &meshlets {
            assert!(m.vertex_count as usize <= MAX_VERTICES);
            assert!(m.triangle_count as usize <= MAX_TRIANGLES);
        }
    }

    #[test]
    fn test_meshlet_data_round_trips_triangles() {
        let (vertices, indices) = grid(2);
        let mut data = Vec::new();
        let meshlets = build_meshlets(&vertices, &indices, &mut data);
        assert_eq!(meshlets.len(), 1);

        let m = meshlets[0];
        let base = m.data_offset as usize;
        let verts = &data[base..base + m.vertex_count as usize];
        let packed: Vec<u8> = data[base + m.vertex_count as usize..]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();

        for (t, tri) in indices.chunks_exact(3).enumerate() {
            for k in 0..3 {
                assert_eq!(verts[packed[t * 3 + k] as usize], tri[k]);
            }
        }
    }

    #[test]
    fn test_flat_cluster_has_tight_cone() {
        let (vertices, indices) = grid(2);
        let mut data = Vec::new();
        let m = build_meshlets(&vertices, &indices, &mut data)[0];
        assert!(m.cone_cutoff < 1e-3);
        assert!((Vec3::from(m.cone_axis).norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_bounding_sphere_contains_points() {
        let points = [Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0)];
        let (center, radius) = bounding_sphere(&points);
        for p in &points {
            assert!((p - center).norm() <= radius + 1e-6);
        }
    }
}
