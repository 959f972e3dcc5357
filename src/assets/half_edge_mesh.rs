// Distributed under the GNU Affero General Public License v3.0 or later.
// See accompanying file LICENSE or https://www.gnu.org/licenses/agpl-3.0.html for details.

use std::collections::HashMap;

use glam::Vec3;

/// One directed edge of a face loop. `twin` is the opposite-direction edge on
/// the adjacent face; a hull mesh is closed, so every half edge has one.
#[derive(Debug, Clone, Copy)]
pub struct HalfEdge {
    pub origin: u32,
    pub twin: u32,
    pub next: u32,
    pub face: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct HullFace {
    pub half_edge: u32,
}

/// Convex hull topology for the narrowphase. Vertices are object-space;
/// world-space copies are produced per test by the caller.
#[derive(Debug, Clone)]
pub struct HalfEdgeMesh {
    vertices: Vec<Vec3>,
    half_edges: Vec<HalfEdge>,
    faces: Vec<HullFace>,
}

impl HalfEdgeMesh {
    /// Builds the half-edge structure from polygon faces (counter-clockwise
    /// when viewed from outside). Panics on open or non-manifold input.
    pub fn new(vertices: Vec<Vec3>, face_indices: &[Vec<u32>]) -> Self {
        let mut half_edges: Vec<HalfEdge> = Vec::new();
        let mut faces: Vec<HullFace> = Vec::with_capacity(face_indices.len());
        let mut edge_map: HashMap<(u32, u32), u32> = HashMap::new();

        for (face_idx, polygon) in face_indices.iter().enumerate() {
            assert!(
                polygon.len() >= 3,
                "hull face {} has fewer than 3 vertices",
                face_idx
            );

            let base = half_edges.len() as u32;
            faces.push(HullFace { half_edge: base });

            let count = polygon.len() as u32;
            for (i, &origin) in polygon.iter().enumerate() {
                let next_in_face = base + ((i as u32 + 1) % count);
                let dest = polygon[(i + 1) % polygon.len()];

                let edge_idx = half_edges.len() as u32;
                half_edges.push(HalfEdge {
                    origin,
                    twin: u32::MAX,
                    next: next_in_face,
                    face: face_idx as u32,
                });

                if let Some(&twin_idx) = edge_map.get(&(dest, origin)) {
                    half_edges[edge_idx as usize].twin = twin_idx;
                    half_edges[twin_idx as usize].twin = edge_idx;
                } else {
                    let existing = edge_map.insert((origin, dest), edge_idx);
                    assert!(
                        existing.is_none(),
                        "duplicate directed edge {} -> {} in hull",
                        origin,
                        dest
                    );
                }
            }
        }

        for (i, edge) in half_edges.iter().enumerate() {
            assert!(
                edge.twin != u32::MAX,
                "hull is not closed: half edge {} has no twin",
                i
            );
        }

        HalfEdgeMesh {
            vertices,
            half_edges,
            faces,
        }
    }

    /// Axis-aligned box hull centered at the origin.
    pub fn box_hull(half_extents: Vec3) -> Self {
        let h = half_extents;
        let vertices = vec![
            Vec3::new(-h.x, -h.y, -h.z),
            Vec3::new(h.x, -h.y, -h.z),
            Vec3::new(-h.x, h.y, -h.z),
            Vec3::new(h.x, h.y, -h.z),
            Vec3::new(-h.x, -h.y, h.z),
            Vec3::new(h.x, -h.y, h.z),
            Vec3::new(-h.x, h.y, h.z),
            Vec3::new(h.x, h.y, h.z),
        ];
        let faces = [
            vec![4, 5, 7, 6], // +z
            vec![0, 2, 3, 1], // -z
            vec![1, 3, 7, 5], // +x
            vec![0, 4, 6, 2], // -x
            vec![2, 6, 7, 3], // +y
            vec![0, 1, 5, 4], // -y
        ];
        Self::new(vertices, &faces)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertex(&self, idx: usize) -> Vec3 {
        self.vertices[idx]
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Vertex indices of a face, in loop order.
    pub fn face_vertex_indices(&self, face: usize) -> FaceVertexIter<'_> {
        let first = self.faces[face].half_edge;
        FaceVertexIter {
            mesh: self,
            first,
            current: Some(first),
        }
    }

    /// Outward face normal computed from caller-supplied (e.g. world-space)
    /// vertex positions matching this mesh's vertex indexing.
    pub fn face_normal(&self, face: usize, positions: &[Vec3]) -> Vec3 {
        // Newell's method; robust for any convex polygon winding.
        let mut normal = Vec3::ZERO;
        let mut indices = self.face_vertex_indices(face);
        let first = indices.next().unwrap() as usize;
        let mut prev = first;
        for idx in indices {
            let idx = idx as usize;
            normal += (positions[prev] - positions[idx]).cross(positions[prev] + positions[idx]);
            prev = idx;
        }
        normal += (positions[prev] - positions[first]).cross(positions[prev] + positions[first]);
        normal.normalize()
    }

    /// Unique undirected edges as (origin, dest) vertex index pairs.
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.half_edges
            .iter()
            .enumerate()
            .filter(|(i, edge)| (*i as u32) < edge.twin)
            .map(|(_, edge)| {
                let dest = self.half_edges[edge.next as usize].origin;
                (edge.origin, dest)
            })
    }
}

pub struct FaceVertexIter<'a> {
    mesh: &'a HalfEdgeMesh,
    first: u32,
    current: Option<u32>,
}

impl Iterator for FaceVertexIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let current = self.current?;
        let edge = self.mesh.half_edges[current as usize];
        let next = edge.next;
        self.current = if next == self.first { None } else { Some(next) };
        Some(edge.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn box_hull_topology() {
        let hull = HalfEdgeMesh::box_hull(Vec3::ONE);
        assert_eq!(hull.vertex_count(), 8);
        assert_eq!(hull.face_count(), 6);
        // A cube has 12 unique edges.
        assert_eq!(hull.edges().count(), 12);
        for face in 0..hull.face_count() {
            assert_eq!(hull.face_vertex_indices(face).count(), 4);
        }
    }

    #[test]
    fn box_hull_face_normals_point_outward() {
        let hull = HalfEdgeMesh::box_hull(Vec3::new(1.0, 2.0, 3.0));
        let positions: Vec<Vec3> = (0..hull.vertex_count()).map(|i| hull.vertex(i)).collect();

        for face in 0..hull.face_count() {
            let normal = hull.face_normal(face, &positions);
            assert_relative_eq!(normal.length(), 1.0, epsilon = 1e-5);

            let center: Vec3 = hull
                .face_vertex_indices(face)
                .map(|i| positions[i as usize])
                .sum::<Vec3>()
                / 4.0;
            assert!(normal.dot(center) > 0.0, "face {} normal points inward", face);
        }
    }

    #[test]
    #[should_panic]
    fn open_mesh_is_rejected() {
        let vertices = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        HalfEdgeMesh::new(vertices, &[vec![0, 1, 2]]);
    }
}
