// Distributed under the GNU Affero General Public License v3.0 or later.
// See accompanying file LICENSE or https://www.gnu.org/licenses/agpl-3.0.html for details.

use glam::{Vec3, Vec4};

use crate::assets::half_edge_mesh::HalfEdgeMesh;

const AXIS_EPSILON: f32 = 1e-6;
/// An edge-pair axis must beat both face axes by this margin; face contacts
/// give fuller manifolds and more stable stacking.
const FACE_BIAS: f32 = 1e-4;

/// World-space view of a hull for one narrowphase test. `vertices` holds the
/// transformed copies of every mesh vertex, in mesh index order.
pub struct CollisionMesh<'a> {
    pub mesh: &'a HalfEdgeMesh,
    pub vertices: &'a [Vec3],
    pub center: Vec3,
}

#[derive(Debug, Clone, Copy)]
pub struct Plane {
    pub point: Vec3,
    pub normal: Vec3,
}

/// Up to four contact points sharing one normal. `points[i].xyz` lies on the
/// reference surface, `points[i].w` is the penetration depth, and the normal
/// points from the reference hull toward the other body.
#[derive(Debug, Clone, Copy)]
pub struct Manifold {
    pub points: [Vec4; 4],
    pub num_points: u32,
    pub normal: Vec3,
    pub a_is_reference: bool,
}

struct FaceQuery {
    separation: f32,
    face: usize,
}

struct EdgeQuery {
    separation: f32,
    axis: Vec3,
    edge_a: (Vec3, Vec3),
    edge_b: (Vec3, Vec3),
}

fn lowest_along(vertices: &[Vec3], dir: Vec3) -> f32 {
    vertices.iter().map(|v| dir.dot(*v)).fold(f32::INFINITY, f32::min)
}

fn highest_along(vertices: &[Vec3], dir: Vec3) -> f32 {
    vertices
        .iter()
        .map(|v| dir.dot(*v))
        .fold(f32::NEG_INFINITY, f32::max)
}

fn face_anchor(hull: &CollisionMesh, face: usize) -> Vec3 {
    let first = hull.mesh.face_vertex_indices(face).next().unwrap();
    hull.vertices[first as usize]
}

/// Largest separation achievable along any face normal of `of`, measured
/// against the vertices of `against`. Positive means a separating plane.
fn face_query(of: &CollisionMesh, against: &CollisionMesh) -> FaceQuery {
    let mut best = FaceQuery {
        separation: f32::NEG_INFINITY,
        face: 0,
    };

    for face in 0..of.mesh.face_count() {
        let normal = of.mesh.face_normal(face, of.vertices);
        let d = normal.dot(face_anchor(of, face));
        let separation = lowest_along(against.vertices, normal) - d;

        if separation > best.separation {
            best.separation = separation;
            best.face = face;
        }
    }

    best
}

/// Largest separation along any cross product of an edge of `a` with an edge
/// of `b`. Axes are oriented outward from `a`.
fn edge_query(a: &CollisionMesh, b: &CollisionMesh) -> Option<EdgeQuery> {
    let mut best: Option<EdgeQuery> = None;

    for (a0, a1) in a.mesh.edges() {
        let pa0 = a.vertices[a0 as usize];
        let pa1 = a.vertices[a1 as usize];
        let da = pa1 - pa0;

        for (b0, b1) in b.mesh.edges() {
            let pb0 = b.vertices[b0 as usize];
            let pb1 = b.vertices[b1 as usize];
            let db = pb1 - pb0;

            let cross = da.cross(db);
            if cross.length_squared() < AXIS_EPSILON {
                continue; // near-parallel edges, covered by face axes
            }
            let mut axis = cross.normalize();

            let midpoint = 0.5 * (pa0 + pa1);
            if axis.dot(midpoint - a.center) < 0.0 {
                axis = -axis;
            }

            let separation = lowest_along(b.vertices, axis) - highest_along(a.vertices, axis);

            if best.as_ref().is_none_or(|q| separation > q.separation) {
                best = Some(EdgeQuery {
                    separation,
                    axis,
                    edge_a: (pa0, pa1),
                    edge_b: (pb0, pb1),
                });
            }
        }
    }

    best
}

/// Closest points between two segments (RTCD 5.1.9).
fn closest_points_on_segments(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (Vec3, Vec3) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;

    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    let (s, t);
    if a <= AXIS_EPSILON && e <= AXIS_EPSILON {
        return (p1, p2);
    }
    if a <= AXIS_EPSILON {
        s = 0.0;
        t = (f / e).clamp(0.0, 1.0);
    } else {
        let c = d1.dot(r);
        if e <= AXIS_EPSILON {
            t = 0.0;
            s = (-c / a).clamp(0.0, 1.0);
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;

            let mut s_val = if denom.abs() > AXIS_EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t_val = (b * s_val + f) / e;

            if t_val < 0.0 {
                t_val = 0.0;
                s_val = (-c / a).clamp(0.0, 1.0);
            } else if t_val > 1.0 {
                t_val = 1.0;
                s_val = ((b - c) / a).clamp(0.0, 1.0);
            }
            s = s_val;
            t = t_val;
        }
    }

    (p1 + d1 * s, p2 + d2 * t)
}

/// Sutherland-Hodgman clip of `polygon` against the half-space
/// `dot(p - plane_point, inward) >= 0`.
fn clip_against_plane(polygon: &mut Vec<Vec3>, scratch: &mut Vec<Vec3>, plane_point: Vec3, inward: Vec3) {
    scratch.clear();
    for i in 0..polygon.len() {
        let current = polygon[i];
        let next = polygon[(i + 1) % polygon.len()];

        let d_current = (current - plane_point).dot(inward);
        let d_next = (next - plane_point).dot(inward);

        if d_current >= 0.0 {
            scratch.push(current);
        }
        if d_current * d_next < 0.0 {
            let t = d_current / (d_current - d_next);
            scratch.push(current.lerp(next, t));
        }
    }
    std::mem::swap(polygon, scratch);
}

fn clipped_face_manifold(
    reference: &CollisionMesh,
    ref_face: usize,
    incident: &CollisionMesh,
    a_is_reference: bool,
) -> Option<Manifold> {
    let normal = reference.mesh.face_normal(ref_face, reference.vertices);
    let d_ref = normal.dot(face_anchor(reference, ref_face));

    // Incident face: the most anti-parallel face of the other hull.
    let mut incident_face = 0;
    let mut lowest_dot = f32::INFINITY;
    for face in 0..incident.mesh.face_count() {
        let dot = incident.mesh.face_normal(face, incident.vertices).dot(normal);
        if dot < lowest_dot {
            lowest_dot = dot;
            incident_face = face;
        }
    }

    let mut polygon: Vec<Vec3> = incident
        .mesh
        .face_vertex_indices(incident_face)
        .map(|i| incident.vertices[i as usize])
        .collect();
    let mut scratch: Vec<Vec3> = Vec::with_capacity(polygon.len() + 4);

    // Clip against the side planes of the reference face. The face winding is
    // counter-clockwise seen from outside, so the interior of each side plane
    // is to the left of its edge.
    let ref_indices: Vec<u32> = reference.mesh.face_vertex_indices(ref_face).collect();
    for k in 0..ref_indices.len() {
        let v0 = reference.vertices[ref_indices[k] as usize];
        let v1 = reference.vertices[ref_indices[(k + 1) % ref_indices.len()] as usize];
        let inward = normal.cross(v1 - v0);
        clip_against_plane(&mut polygon, &mut scratch, v0, inward);
        if polygon.is_empty() {
            return None;
        }
    }

    // Keep penetrating points, deepest first, projected onto the reference
    // face so the stored point lies on the reference body.
    let mut candidates: Vec<(Vec3, f32)> = polygon
        .iter()
        .filter_map(|p| {
            let signed = normal.dot(*p) - d_ref;
            (signed < 0.0).then(|| (*p - normal * signed, -signed))
        })
        .collect();
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    candidates.truncate(4);

    let mut points = [Vec4::ZERO; 4];
    for (i, (point, depth)) in candidates.iter().enumerate() {
        points[i] = Vec4::new(point.x, point.y, point.z, *depth);
    }

    Some(Manifold {
        points,
        num_points: candidates.len() as u32,
        normal,
        a_is_reference,
    })
}

/// Full SAT between two convex hulls: face normals of both hulls plus all
/// edge-pair cross axes. Returns the clipped reference-face manifold, or a
/// single edge-edge contact when an edge axis has strictly the least overlap.
pub fn intersect_hulls(a: &CollisionMesh, b: &CollisionMesh) -> Option<Manifold> {
    let query_a = face_query(a, b);
    if query_a.separation > 0.0 {
        return None;
    }
    let query_b = face_query(b, a);
    if query_b.separation > 0.0 {
        return None;
    }

    let edge = edge_query(a, b);
    if let Some(edge) = &edge {
        if edge.separation > 0.0 {
            return None;
        }
    }

    let best_face_separation = query_a.separation.max(query_b.separation);
    if let Some(edge) = edge {
        if edge.separation > best_face_separation + FACE_BIAS {
            let (on_a, _on_b) = closest_points_on_segments(
                edge.edge_a.0,
                edge.edge_a.1,
                edge.edge_b.0,
                edge.edge_b.1,
            );
            let depth = -edge.separation;
            let mut points = [Vec4::ZERO; 4];
            points[0] = Vec4::new(on_a.x, on_a.y, on_a.z, depth);
            return Some(Manifold {
                points,
                num_points: 1,
                normal: edge.axis,
                a_is_reference: true,
            });
        }
    }

    if query_a.separation >= query_b.separation {
        clipped_face_manifold(a, query_a.face, b, true)
    } else {
        clipped_face_manifold(b, query_b.face, a, false)
    }
}

/// Hull against an infinite plane: every vertex below the plane becomes a
/// candidate contact at its projection onto the plane; the four deepest
/// survive. The plane owns the contact frame.
pub fn intersect_hull_plane(plane: Plane, hull: &CollisionMesh) -> Option<Manifold> {
    let n = plane.normal;
    let d = n.dot(plane.point);

    let mut candidates: Vec<(Vec3, f32)> = hull
        .vertices
        .iter()
        .filter_map(|v| {
            let dist = n.dot(*v) - d;
            (dist < 0.0).then(|| (*v - n * dist, -dist))
        })
        .collect();
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    candidates.truncate(4);

    let mut points = [Vec4::ZERO; 4];
    for (i, (point, depth)) in candidates.iter().enumerate() {
        points[i] = Vec4::new(point.x, point.y, point.z, *depth);
    }

    Some(Manifold {
        points,
        num_points: candidates.len() as u32,
        normal: n,
        a_is_reference: false,
    })
}

/// Closest point on a hull's surface to a query point, with the outward
/// direction at that feature. `distance` is negative when the query point is
/// inside the hull.
pub struct HullClosestPoint {
    pub point: Vec3,
    pub distance: f32,
    pub normal: Vec3,
}

pub fn closest_point_on_hull(hull: &CollisionMesh, query: Vec3) -> HullClosestPoint {
    let mut best_face = 0;
    let mut best_separation = f32::NEG_INFINITY;
    for face in 0..hull.mesh.face_count() {
        let normal = hull.mesh.face_normal(face, hull.vertices);
        let separation = normal.dot(query) - normal.dot(face_anchor(hull, face));
        if separation > best_separation {
            best_separation = separation;
            best_face = face;
        }
    }

    let face_normal = hull.mesh.face_normal(best_face, hull.vertices);
    let projected = query - face_normal * best_separation;

    if best_separation <= 0.0 {
        // Inside: surface point on the least-penetrated face.
        return HullClosestPoint {
            point: projected,
            distance: best_separation,
            normal: face_normal,
        };
    }

    // Outside: clamp the face-plane projection into the face polygon.
    let indices: Vec<u32> = hull.mesh.face_vertex_indices(best_face).collect();
    let mut inside_face = true;
    for k in 0..indices.len() {
        let v0 = hull.vertices[indices[k] as usize];
        let v1 = hull.vertices[indices[(k + 1) % indices.len()] as usize];
        let inward = face_normal.cross(v1 - v0);
        if (projected - v0).dot(inward) < 0.0 {
            inside_face = false;
            break;
        }
    }

    if inside_face {
        return HullClosestPoint {
            point: projected,
            distance: best_separation,
            normal: face_normal,
        };
    }

    let mut closest = projected;
    let mut closest_dist_sq = f32::INFINITY;
    for k in 0..indices.len() {
        let v0 = hull.vertices[indices[k] as usize];
        let v1 = hull.vertices[indices[(k + 1) % indices.len()] as usize];
        let candidate = closest_point_on_segment(query, v0, v1);
        let dist_sq = (query - candidate).length_squared();
        if dist_sq < closest_dist_sq {
            closest_dist_sq = dist_sq;
            closest = candidate;
        }
    }

    let distance = closest_dist_sq.sqrt();
    let normal = if distance > AXIS_EPSILON {
        (query - closest) / distance
    } else {
        face_normal
    };

    HullClosestPoint {
        point: closest,
        distance,
        normal,
    }
}

fn closest_point_on_segment(query: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let ab = b - a;
    let t = if ab.length_squared() <= AXIS_EPSILON {
        0.0
    } else {
        ((query - a).dot(ab) / ab.length_squared()).clamp(0.0, 1.0)
    };
    a + ab * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::half_edge_mesh::HalfEdgeMesh;
    use approx::assert_relative_eq;
    use glam::Quat;
    use std::f32::consts::FRAC_PI_4;

    fn world_mesh<'a>(
        mesh: &'a HalfEdgeMesh,
        vertices: &'a mut Vec<Vec3>,
        position: Vec3,
        rotation: Quat,
    ) -> CollisionMesh<'a> {
        vertices.clear();
        vertices.extend((0..mesh.vertex_count()).map(|i| position + rotation * mesh.vertex(i)));
        CollisionMesh {
            mesh,
            vertices,
            center: position,
        }
    }

    #[test]
    fn stacked_cubes_produce_four_point_face_manifold() {
        let cube = HalfEdgeMesh::box_hull(Vec3::splat(0.5));
        let mut verts_a = Vec::new();
        let mut verts_b = Vec::new();
        let a = world_mesh(&cube, &mut verts_a, Vec3::new(0.0, 0.0, 0.5), Quat::IDENTITY);
        let b = world_mesh(&cube, &mut verts_b, Vec3::new(0.0, 0.0, 1.4), Quat::IDENTITY);

        let manifold = intersect_hulls(&a, &b).expect("overlapping cubes must collide");
        assert_eq!(manifold.num_points, 4);
        assert!(manifold.a_is_reference);
        assert_relative_eq!(manifold.normal.z, 1.0, epsilon = 1e-4);
        for i in 0..4 {
            let point = manifold.points[i as usize];
            // Points lie on the reference (lower) cube's top face.
            assert_relative_eq!(point.z, 1.0, epsilon = 1e-4);
            assert_relative_eq!(point.w, 0.1, epsilon = 1e-4);
        }
    }

    #[test]
    fn separated_cubes_produce_nothing() {
        let cube = HalfEdgeMesh::box_hull(Vec3::splat(0.5));
        let mut verts_a = Vec::new();
        let mut verts_b = Vec::new();
        let a = world_mesh(&cube, &mut verts_a, Vec3::ZERO, Quat::IDENTITY);
        let b = world_mesh(&cube, &mut verts_b, Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY);

        assert!(intersect_hulls(&a, &b).is_none());
    }

    #[test]
    fn crossed_edges_produce_single_edge_contact() {
        let cube = HalfEdgeMesh::box_hull(Vec3::ONE);
        let mut verts_a = Vec::new();
        let mut verts_b = Vec::new();
        // A's top feature is an edge along x, B's bottom feature an edge
        // along y; they cross with a small vertical overlap.
        let a = world_mesh(
            &cube,
            &mut verts_a,
            Vec3::ZERO,
            Quat::from_axis_angle(Vec3::X, FRAC_PI_4),
        );
        let b = world_mesh(
            &cube,
            &mut verts_b,
            Vec3::new(0.0, 0.0, 2.7),
            Quat::from_axis_angle(Vec3::Y, FRAC_PI_4),
        );

        let manifold = intersect_hulls(&a, &b).expect("crossed cubes must collide");
        assert_eq!(manifold.num_points, 1);
        assert_relative_eq!(manifold.normal.z.abs(), 1.0, epsilon = 1e-3);

        let expected_depth = 2.0 * std::f32::consts::SQRT_2 - 2.7;
        assert_relative_eq!(manifold.points[0].w, expected_depth, epsilon = 1e-3);
    }

    #[test]
    fn hull_on_plane_keeps_deepest_vertices() {
        let cube = HalfEdgeMesh::box_hull(Vec3::splat(0.5));
        let mut verts = Vec::new();
        let hull = world_mesh(&cube, &mut verts, Vec3::new(0.0, 0.0, 0.4), Quat::IDENTITY);

        let plane = Plane {
            point: Vec3::ZERO,
            normal: Vec3::Z,
        };
        let manifold = intersect_hull_plane(plane, &hull).expect("sunken cube must collide");
        assert_eq!(manifold.num_points, 4);
        for i in 0..4 {
            let point = manifold.points[i as usize];
            assert_relative_eq!(point.z, 0.0, epsilon = 1e-5);
            assert_relative_eq!(point.w, 0.1, epsilon = 1e-5);
        }
    }

    #[test]
    fn hovering_hull_misses_plane() {
        let cube = HalfEdgeMesh::box_hull(Vec3::splat(0.5));
        let mut verts = Vec::new();
        let hull = world_mesh(&cube, &mut verts, Vec3::new(0.0, 0.0, 0.6), Quat::IDENTITY);

        let plane = Plane {
            point: Vec3::ZERO,
            normal: Vec3::Z,
        };
        assert!(intersect_hull_plane(plane, &hull).is_none());
    }

    #[test]
    fn closest_point_outside_face_region() {
        let cube = HalfEdgeMesh::box_hull(Vec3::splat(1.0));
        let mut verts = Vec::new();
        let hull = world_mesh(&cube, &mut verts, Vec3::ZERO, Quat::IDENTITY);

        let result = closest_point_on_hull(&hull, Vec3::new(0.0, 0.0, 3.0));
        assert_relative_eq!(result.distance, 2.0, epsilon = 1e-5);
        assert_relative_eq!(result.point.z, 1.0, epsilon = 1e-5);
        assert_relative_eq!(result.normal.z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn closest_point_inside_hull_is_negative_distance() {
        let cube = HalfEdgeMesh::box_hull(Vec3::splat(1.0));
        let mut verts = Vec::new();
        let hull = world_mesh(&cube, &mut verts, Vec3::ZERO, Quat::IDENTITY);

        let result = closest_point_on_hull(&hull, Vec3::new(0.0, 0.0, 0.75));
        assert!(result.distance < 0.0);
        assert_relative_eq!(result.distance, -0.25, epsilon = 1e-5);
        assert_relative_eq!(result.point.z, 1.0, epsilon = 1e-5);
    }
}
