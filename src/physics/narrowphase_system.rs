use bevy_ecs::prelude::*;
use glam::{Vec3, Vec4};
use rayon::prelude::*;

use crate::assets::object_manager::CollisionPrimitive;
use crate::components::object_id_component::ObjectIdComponent;
use crate::components::transform_component::TransformComponent;
use crate::physics::collision_event::{CollisionEvent, CollisionEvents};
use crate::physics::sat::{self, CollisionMesh, Plane};
use crate::physics::scratch_arena::ScratchArena;
use crate::physics::solver_resource::{
    CandidateCollision, CandidateCollisions, Contact, ObjectData, SolverData,
};

#[derive(Default)]
pub struct NarrowphaseSystem {}

impl NarrowphaseSystem {
    /// Resolves every candidate pair to contacts. Candidates are independent,
    /// so they are processed in parallel; contact and event appends go
    /// through the atomic buffers on `SolverData` / `CollisionEvents`.
    pub fn run_narrowphase(
        candidates: Res<CandidateCollisions>,
        bodies: Query<(&TransformComponent, &ObjectIdComponent)>,
        solver: Res<SolverData>,
        objects: Res<ObjectData>,
        events: Res<CollisionEvents>,
        scratch: Res<ScratchArena>,
    ) {
        candidates.pairs.par_iter().for_each(|candidate| {
            Self::test_pair(candidate, &bodies, &solver, &objects, &events, &scratch);
        });
    }

    fn test_pair(
        candidate: &CandidateCollision,
        bodies: &Query<(&TransformComponent, &ObjectIdComponent)>,
        solver: &SolverData,
        objects: &ObjectData,
        events: &CollisionEvents,
        scratch: &ScratchArena,
    ) {
        let Ok((transform_a, object_a)) = bodies.get(candidate.a) else {
            return;
        };
        let Ok((transform_b, object_b)) = bodies.get(candidate.b) else {
            return;
        };

        let mut entity_a = candidate.a;
        let mut entity_b = candidate.b;
        let mut transform_a = *transform_a;
        let mut transform_b = *transform_b;
        let mut prim_a = objects.manager.primitive(object_a.0);
        let mut prim_b = objects.manager.primitive(object_b.0);

        // Canonical order: lower primitive rank first. The dispatch key is
        // the OR of the two rank bits.
        if prim_a.rank() > prim_b.rank() {
            std::mem::swap(&mut entity_a, &mut entity_b);
            std::mem::swap(&mut transform_a, &mut transform_b);
            std::mem::swap(&mut prim_a, &mut prim_b);
        }

        match prim_a.rank() | prim_b.rank() {
            // sphere | sphere
            1 => {
                let (CollisionPrimitive::Sphere { radius: radius_a },
                     CollisionPrimitive::Sphere { radius: radius_b }) = (prim_a, prim_b)
                else {
                    unreachable!();
                };

                let to_b = transform_b.position - transform_a.position;
                let dist = to_b.length();

                if dist > 0.0 && dist < radius_a + radius_b {
                    let normal = to_b / dist;
                    let mid = transform_a.position + to_b * 0.5;
                    solver.add_contact(single_point_contact(
                        entity_a,
                        entity_b,
                        mid,
                        dist * 0.5,
                        normal,
                    ));
                    events.record(CollisionEvent {
                        a: candidate.a,
                        b: candidate.b,
                    });
                }
            }
            // hull | hull
            2 => {
                let (CollisionPrimitive::Hull { mesh: mesh_a },
                     CollisionPrimitive::Hull { mesh: mesh_b }) = (prim_a, prim_b)
                else {
                    unreachable!();
                };

                let hull_a = transform_hull(mesh_a, &transform_a, scratch);
                let hull_b = transform_hull(mesh_b, &transform_b, scratch);

                if let Some(manifold) = sat::intersect_hulls(&hull_a, &hull_b) {
                    let (reference, alternate) = if manifold.a_is_reference {
                        (entity_a, entity_b)
                    } else {
                        (entity_b, entity_a)
                    };
                    solver.add_contact(Contact {
                        reference,
                        alternate,
                        points: manifold.points,
                        num_points: manifold.num_points,
                        normal: manifold.normal,
                        lambda_n: 0.0,
                    });
                    events.record(CollisionEvent {
                        a: candidate.a,
                        b: candidate.b,
                    });
                }
            }
            // sphere | hull
            3 => {
                let (CollisionPrimitive::Sphere { radius },
                     CollisionPrimitive::Hull { mesh }) = (prim_a, prim_b)
                else {
                    unreachable!();
                };

                let hull = transform_hull(mesh, &transform_b, scratch);
                let closest = sat::closest_point_on_hull(&hull, transform_a.position);

                if closest.distance < *radius {
                    // The hull owns the contact frame; its outward surface
                    // direction points at the sphere.
                    solver.add_contact(single_point_contact(
                        entity_b,
                        entity_a,
                        closest.point,
                        radius - closest.distance,
                        closest.normal,
                    ));
                    events.record(CollisionEvent {
                        a: candidate.a,
                        b: candidate.b,
                    });
                }
            }
            // plane | plane: planes are static, nothing to do
            4 => {}
            // sphere | plane
            5 => {
                let CollisionPrimitive::Sphere { radius } = prim_a else {
                    unreachable!();
                };

                let plane_normal = transform_b.rotation * Vec3::Z;
                let t = plane_normal.dot(transform_a.position)
                    - plane_normal.dot(transform_b.position);

                if t < *radius {
                    // Contact frame of the sphere: the normal runs from the
                    // sphere into the plane, the point is the sphere's deepest
                    // point, and the depth is the surface overlap, so the
                    // positional solve separates the pair.
                    let normal = -plane_normal;
                    solver.add_contact(single_point_contact(
                        entity_a,
                        entity_b,
                        transform_a.position + normal * *radius,
                        radius - t,
                        normal,
                    ));
                    events.record(CollisionEvent {
                        a: candidate.a,
                        b: candidate.b,
                    });
                }
            }
            // hull | plane
            6 => {
                let CollisionPrimitive::Hull { mesh } = prim_a else {
                    unreachable!();
                };

                let hull = transform_hull(mesh, &transform_a, scratch);
                let plane_normal = transform_b.rotation * Vec3::Z;
                let plane = Plane {
                    point: transform_b.position,
                    normal: plane_normal,
                };

                if let Some(manifold) = sat::intersect_hull_plane(plane, &hull) {
                    solver.add_contact(Contact {
                        // Plane is always reference
                        reference: entity_b,
                        alternate: entity_a,
                        points: manifold.points,
                        num_points: manifold.num_points,
                        normal: manifold.normal,
                        lambda_n: 0.0,
                    });
                    events.record(CollisionEvent {
                        a: candidate.a,
                        b: candidate.b,
                    });
                }
            }
            key => unreachable!("unhandled narrowphase dispatch key {}", key),
        }
    }
}

fn single_point_contact(
    reference: Entity,
    alternate: Entity,
    point: Vec3,
    depth: f32,
    normal: Vec3,
) -> Contact {
    let mut points = [Vec4::ZERO; 4];
    points[0] = Vec4::new(point.x, point.y, point.z, depth);
    Contact {
        reference,
        alternate,
        points,
        num_points: 1,
        normal,
        lambda_n: 0.0,
    }
}

/// World-space copy of a hull's vertices from the substep scratch arena.
/// Scale applies before rotation.
fn transform_hull<'a>(
    mesh: &'a crate::assets::half_edge_mesh::HalfEdgeMesh,
    transform: &TransformComponent,
    scratch: &'a ScratchArena,
) -> CollisionMesh<'a> {
    let vertices = scratch.alloc_vertices(mesh.vertex_count());
    for (i, slot) in vertices.iter_mut().enumerate() {
        *slot = transform.position + transform.rotation * (transform.scale * mesh.vertex(i));
    }
    CollisionMesh {
        mesh,
        vertices,
        center: transform.position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::half_edge_mesh::HalfEdgeMesh;
    use crate::assets::object_manager::{ObjectManager, RigidBodyMetadata};
    use crate::physics::solver_resource::CandidateCollisions;
    use approx::assert_relative_eq;
    use glam::Quat;
    use std::sync::Arc;

    fn dynamic_metadata() -> RigidBodyMetadata {
        RigidBodyMetadata {
            inv_mass: 1.0,
            inv_inertia_tensor: Vec3::splat(2.5),
            mu_s: 0.5,
            mu_d: 0.5,
            restitution: 0.4,
        }
    }

    struct TestWorld {
        world: World,
        schedule: Schedule,
    }

    impl TestWorld {
        fn new(objects: ObjectManager) -> Self {
            let mut world = World::new();
            world.insert_resource(SolverData::new(64, 0.01, 1, Vec3::new(0.0, 0.0, -10.0)));
            world.insert_resource(ObjectData {
                manager: Arc::new(objects),
            });
            world.insert_resource(CollisionEvents::with_capacity(64));
            world.insert_resource(ScratchArena::with_capacity(1024));
            world.init_resource::<CandidateCollisions>();

            let mut schedule = Schedule::default();
            schedule.add_systems(NarrowphaseSystem::run_narrowphase);
            TestWorld { world, schedule }
        }

        fn spawn(&mut self, object_id: u32, position: Vec3, rotation: Quat) -> Entity {
            self.world
                .spawn((
                    TransformComponent {
                        position,
                        rotation,
                        scale: Vec3::ONE,
                    },
                    ObjectIdComponent(object_id),
                ))
                .id()
        }

        fn queue(&mut self, a: Entity, b: Entity) {
            self.world
                .resource_mut::<CandidateCollisions>()
                .pairs
                .push(CandidateCollision { a, b });
        }

        fn run_pair(&mut self, a: Entity, b: Entity) {
            self.queue(a, b);
            self.schedule.run(&mut self.world);
        }

        fn contacts(&mut self) -> Vec<Contact> {
            self.world
                .resource_mut::<SolverData>()
                .contacts()
                .to_vec()
        }
    }

    #[test]
    fn touching_spheres_collide_at_midpoint() {
        let mut objects = ObjectManager::new();
        let sphere = objects.add_sphere(1.0, dynamic_metadata());
        let mut test = TestWorld::new(objects);

        let a = test.spawn(sphere, Vec3::ZERO, Quat::IDENTITY);
        let b = test.spawn(sphere, Vec3::new(1.5, 0.0, 0.0), Quat::IDENTITY);
        test.run_pair(a, b);

        let contacts = test.contacts();
        assert_eq!(contacts.len(), 1);
        let contact = contacts[0];
        assert_eq!(contact.num_points, 1);
        assert_eq!(contact.reference, a);
        assert_relative_eq!(contact.normal.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(contact.points[0].x, 0.75, epsilon = 1e-5);
        assert_relative_eq!(contact.points[0].w, 0.75, epsilon = 1e-5);
        assert_eq!(test.world.resource::<CollisionEvents>().len(), 1);
    }

    #[test]
    fn separated_spheres_do_not_collide() {
        let mut objects = ObjectManager::new();
        let sphere = objects.add_sphere(1.0, dynamic_metadata());
        let mut test = TestWorld::new(objects);

        let a = test.spawn(sphere, Vec3::ZERO, Quat::IDENTITY);
        let b = test.spawn(sphere, Vec3::new(3.0, 0.0, 0.0), Quat::IDENTITY);
        test.run_pair(a, b);

        assert!(test.contacts().is_empty());
        assert!(test.world.resource::<CollisionEvents>().is_empty());
    }

    #[test]
    fn sphere_on_plane_contact_pushes_apart() {
        let mut objects = ObjectManager::new();
        let sphere = objects.add_sphere(1.0, dynamic_metadata());
        let plane = objects.add_plane(RigidBodyMetadata::fixed());
        let mut test = TestWorld::new(objects);

        let ball = test.spawn(sphere, Vec3::new(0.0, 0.0, 0.9), Quat::IDENTITY);
        let ground = test.spawn(plane, Vec3::ZERO, Quat::IDENTITY);
        test.run_pair(ball, ground);

        let contacts = test.contacts();
        assert_eq!(contacts.len(), 1);
        let contact = contacts[0];
        // Sphere owns the frame; normal runs into the plane.
        assert_eq!(contact.reference, ball);
        assert_eq!(contact.alternate, ground);
        assert_relative_eq!(contact.normal.z, -1.0, epsilon = 1e-5);
        assert_relative_eq!(contact.points[0].z, -0.1, epsilon = 1e-5);
        // Surface overlap, not center distance.
        assert_relative_eq!(contact.points[0].w, 0.1, epsilon = 1e-5);
    }

    #[test]
    fn plane_pair_is_ignored() {
        let mut objects = ObjectManager::new();
        let plane = objects.add_plane(RigidBodyMetadata::fixed());
        let mut test = TestWorld::new(objects);

        let a = test.spawn(plane, Vec3::ZERO, Quat::IDENTITY);
        let b = test.spawn(plane, Vec3::ZERO, Quat::IDENTITY);
        test.run_pair(a, b);

        assert!(test.contacts().is_empty());
    }

    #[test]
    fn hull_pair_uses_own_meshes_and_plane_is_reference() {
        let mut objects = ObjectManager::new();
        // Distinct hull sizes so a shared-mesh mixup would show up in depths.
        let small = objects.add_hull(HalfEdgeMesh::box_hull(Vec3::splat(0.5)), dynamic_metadata());
        let large = objects.add_hull(HalfEdgeMesh::box_hull(Vec3::splat(1.0)), dynamic_metadata());
        let plane = objects.add_plane(RigidBodyMetadata::fixed());
        let mut test = TestWorld::new(objects);

        let lower = test.spawn(large, Vec3::new(0.0, 0.0, 1.0), Quat::IDENTITY);
        let upper = test.spawn(small, Vec3::new(0.0, 0.0, 2.4), Quat::IDENTITY);
        let ground = test.spawn(plane, Vec3::ZERO, Quat::IDENTITY);

        test.queue(lower, upper);
        test.queue(lower, ground);
        test.schedule.run(&mut test.world);

        let contacts = test.contacts();
        assert_eq!(contacts.len(), 2);

        // Hull/hull: small cube bottom (z = 1.9) against large cube top
        // (z = 2.0), overlap 0.1.
        let hull_contact = contacts
            .iter()
            .find(|c| c.reference == lower && c.alternate == upper)
            .expect("hull/hull contact");
        assert_eq!(hull_contact.num_points, 4);
        assert_relative_eq!(hull_contact.points[0].w, 0.1, epsilon = 1e-4);

        let plane_contact = contacts
            .iter()
            .find(|c| c.alternate == lower)
            .expect("hull/plane contact");
        assert_eq!(plane_contact.reference, ground);
        assert_eq!(plane_contact.num_points, 4);
        assert_relative_eq!(plane_contact.normal.z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn sphere_against_hull_face() {
        let mut objects = ObjectManager::new();
        let sphere = objects.add_sphere(0.5, dynamic_metadata());
        let hull = objects.add_hull(HalfEdgeMesh::box_hull(Vec3::ONE), dynamic_metadata());
        let mut test = TestWorld::new(objects);

        let ball = test.spawn(sphere, Vec3::new(0.0, 0.0, 1.4), Quat::IDENTITY);
        let cube = test.spawn(hull, Vec3::ZERO, Quat::IDENTITY);
        test.run_pair(ball, cube);

        let contacts = test.contacts();
        assert_eq!(contacts.len(), 1);
        let contact = contacts[0];
        assert_eq!(contact.reference, cube);
        assert_eq!(contact.alternate, ball);
        assert_relative_eq!(contact.normal.z, 1.0, epsilon = 1e-5);
        assert_relative_eq!(contact.points[0].z, 1.0, epsilon = 1e-5);
        assert_relative_eq!(contact.points[0].w, 0.1, epsilon = 1e-5);
    }
}
