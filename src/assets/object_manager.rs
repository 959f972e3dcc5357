use glam::Vec3;

use crate::assets::aabb::Aabb;
use crate::assets::half_edge_mesh::HalfEdgeMesh;

/// Collision shape attached to an object id. The rank values canonicalize
/// narrowphase pair ordering: a pair is sorted by ascending rank and
/// dispatched on the bitwise OR of the two ranks.
#[derive(Debug, Clone)]
pub enum CollisionPrimitive {
    Sphere { radius: f32 },
    Plane,
    Hull { mesh: HalfEdgeMesh },
}

impl CollisionPrimitive {
    pub fn rank(&self) -> u32 {
        match self {
            CollisionPrimitive::Sphere { .. } => 1,
            CollisionPrimitive::Hull { .. } => 2,
            CollisionPrimitive::Plane => 4,
        }
    }
}

/// Mass and surface properties shared by every instance of an object id.
#[derive(Debug, Clone, Copy)]
pub struct RigidBodyMetadata {
    pub inv_mass: f32,
    /// Diagonal of the inverse body-space inertia tensor; a zero component
    /// locks rotation about that axis.
    pub inv_inertia_tensor: Vec3,
    pub mu_s: f32,
    pub mu_d: f32,
    pub restitution: f32,
}

impl RigidBodyMetadata {
    pub fn fixed() -> Self {
        RigidBodyMetadata {
            inv_mass: 0.0,
            inv_inertia_tensor: Vec3::ZERO,
            mu_s: 0.5,
            mu_d: 0.5,
            restitution: 0.0,
        }
    }
}

/// Read-only catalogue of collision geometry and body metadata, shared by
/// every world. Built once by the host before any world is initialized.
#[derive(Default)]
pub struct ObjectManager {
    aabbs: Vec<Aabb>,
    primitives: Vec<CollisionPrimitive>,
    metadata: Vec<RigidBodyMetadata>,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an object and returns its id.
    pub fn add_object(
        &mut self,
        aabb: Aabb,
        primitive: CollisionPrimitive,
        metadata: RigidBodyMetadata,
    ) -> u32 {
        let id = self.primitives.len() as u32;
        self.aabbs.push(aabb);
        self.primitives.push(primitive);
        self.metadata.push(metadata);
        id
    }

    /// Convenience for the common case of an infinite static plane with
    /// object-space normal +z. The AABB is a large finite slab; infinities
    /// would poison the broadphase surface-area math.
    pub fn add_plane(&mut self, metadata: RigidBodyMetadata) -> u32 {
        const PLANE_EXTENT: f32 = 1.0e5;
        let aabb = Aabb::new(
            Vec3::new(-PLANE_EXTENT, -PLANE_EXTENT, -PLANE_EXTENT),
            Vec3::new(PLANE_EXTENT, PLANE_EXTENT, 0.0),
        );
        self.add_object(aabb, CollisionPrimitive::Plane, metadata)
    }

    pub fn add_sphere(&mut self, radius: f32, metadata: RigidBodyMetadata) -> u32 {
        let aabb = Aabb::new(Vec3::splat(-radius), Vec3::splat(radius));
        self.add_object(aabb, CollisionPrimitive::Sphere { radius }, metadata)
    }

    pub fn add_hull(&mut self, mesh: HalfEdgeMesh, metadata: RigidBodyMetadata) -> u32 {
        let points: Vec<Vec3> = (0..mesh.vertex_count()).map(|i| mesh.vertex(i)).collect();
        let aabb = Aabb::from_points(&points);
        self.add_object(aabb, CollisionPrimitive::Hull { mesh }, metadata)
    }

    pub fn aabb(&self, object_id: u32) -> Aabb {
        self.aabbs[object_id as usize]
    }

    pub fn primitive(&self, object_id: u32) -> &CollisionPrimitive {
        &self.primitives[object_id as usize]
    }

    pub fn metadata(&self, object_id: u32) -> RigidBodyMetadata {
        self.metadata[object_id as usize]
    }

    pub fn object_count(&self) -> usize {
        self.primitives.len()
    }
}
