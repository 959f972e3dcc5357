use bevy_ecs::prelude::*;
use glam::Mat3;

use crate::assets::aabb::Aabb;
use crate::components::broadphase_leaf_component::BroadphaseLeaf;
use crate::components::collision_aabb_component::CollisionAabbComponent;
use crate::components::object_id_component::ObjectIdComponent;
use crate::components::transform_component::TransformComponent;
use crate::components::velocity_component::VelocityComponent;
use crate::physics::dynamic_aabb_tree::BroadphaseBvh;
use crate::physics::solver_resource::{
    CandidateCollision, CandidateCollisions, ObjectData, SolverData,
};

/// How far beyond the current-velocity sweep the AABB is padded, so overlap
/// pairs found once per step stay valid across every substep.
const EXPANSION_FACTOR: f32 = 2.0;
/// Acceleration bound backing the minimum padding.
const MAX_ACCEL: f32 = 100.0;

#[derive(Default)]
pub struct BroadphaseSystem {}

impl BroadphaseSystem {
    /// Writes each body's swept world-space AABB for the upcoming step.
    pub fn update_collision_aabbs(
        mut query: Query<(
            &TransformComponent,
            &VelocityComponent,
            &ObjectIdComponent,
            &mut CollisionAabbComponent,
        )>,
        objects: Res<ObjectData>,
        solver: Res<SolverData>,
    ) {
        let delta_t = solver.delta_t;
        let min_pos_change = MAX_ACCEL * delta_t * delta_t;

        for (transform, velocity, object_id, mut out_aabb) in query.iter_mut() {
            let obj_aabb = objects.manager.aabb(object_id.0);
            let rot_mat = Mat3::from_quat(transform.rotation);

            // Rotate the object-space box axis by axis (RTCD 4.2.6); summing
            // the smaller/larger of the two products per term avoids building
            // the eight corners.
            let mut world_aabb = Aabb::new(transform.position, transform.position);
            for i in 0..3 {
                for j in 0..3 {
                    let e = rot_mat.col(j)[i] * obj_aabb.min[j];
                    let f = rot_mat.col(j)[i] * obj_aabb.max[j];
                    if e < f {
                        world_aabb.min[i] += e;
                        world_aabb.max[i] += f;
                    } else {
                        world_aabb.min[i] += f;
                        world_aabb.max[i] += e;
                    }
                }
            }

            // Expand by the step's sweep so the pairs survive all substeps.
            for i in 0..3 {
                let pos_delta = EXPANSION_FACTOR * velocity.translational[i] * delta_t;

                let min_delta = pos_delta - min_pos_change;
                let max_delta = pos_delta + min_pos_change;

                if min_delta < 0.0 {
                    world_aabb.min[i] += min_delta;
                }
                if max_delta > 0.0 {
                    world_aabb.max[i] += max_delta;
                }
            }

            out_aabb.0 = world_aabb;
        }
    }

    /// Copies the per-entity swept AABBs into the reserved tree leaves.
    pub fn update_tree_leaves(
        query: Query<(&BroadphaseLeaf, &CollisionAabbComponent)>,
        mut bvh: ResMut<BroadphaseBvh>,
    ) {
        for (leaf, aabb) in &query {
            bvh.update_leaf(leaf.0, aabb.0);
        }
    }

    /// Refits (or rebuilds after a reset) the tree over all active leaves.
    pub fn update_bvh(mut bvh: ResMut<BroadphaseBvh>) {
        bvh.update_tree();
    }

    /// Emits each distinct overlapping pair exactly once as a candidate.
    /// The fat tree boxes over-report, so candidates are confirmed against
    /// the precise swept AABBs; the lower-numbered leaf owns the emission.
    pub fn find_overlaps(
        query: Query<(Entity, &BroadphaseLeaf, &CollisionAabbComponent)>,
        aabbs: Query<&CollisionAabbComponent>,
        bvh: Res<BroadphaseBvh>,
        mut candidates: ResMut<CandidateCollisions>,
    ) {
        for (entity, leaf, aabb) in &query {
            bvh.find_overlaps(leaf.0, aabb.0, |other_entity, other_leaf| {
                if other_leaf <= leaf.0 {
                    return;
                }
                let Ok(other_aabb) = aabbs.get(other_entity) else {
                    return;
                };
                if aabb.0.intersects(&other_aabb.0) {
                    candidates.pairs.push(CandidateCollision {
                        a: entity,
                        b: other_entity,
                    });
                }
            });
        }
    }

    /// Terminal stage of the step: drops the step's candidate pairs.
    pub fn clear_candidates(mut candidates: ResMut<CandidateCollisions>) {
        candidates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::{Quat, Vec3};
    use std::f32::consts::FRAC_PI_4;

    // The rotation projection should match the brute-force corner transform.
    #[test]
    fn rotated_box_projection_matches_corners() {
        let obj_aabb = Aabb::new(Vec3::new(-1.0, -2.0, -0.5), Vec3::new(1.0, 2.0, 0.5));
        let rotation = Quat::from_axis_angle(Vec3::Z, FRAC_PI_4);
        let position = Vec3::new(3.0, -1.0, 2.0);

        let rot_mat = Mat3::from_quat(rotation);
        let mut world_aabb = Aabb::new(position, position);
        for i in 0..3 {
            for j in 0..3 {
                let e = rot_mat.col(j)[i] * obj_aabb.min[j];
                let f = rot_mat.col(j)[i] * obj_aabb.max[j];
                if e < f {
                    world_aabb.min[i] += e;
                    world_aabb.max[i] += f;
                } else {
                    world_aabb.min[i] += f;
                    world_aabb.max[i] += e;
                }
            }
        }

        let mut corner_min = Vec3::splat(f32::INFINITY);
        let mut corner_max = Vec3::splat(f32::NEG_INFINITY);
        for x in [obj_aabb.min.x, obj_aabb.max.x] {
            for y in [obj_aabb.min.y, obj_aabb.max.y] {
                for z in [obj_aabb.min.z, obj_aabb.max.z] {
                    let world = position + rotation * Vec3::new(x, y, z);
                    corner_min = corner_min.min(world);
                    corner_max = corner_max.max(world);
                }
            }
        }

        for i in 0..3 {
            assert_relative_eq!(world_aabb.min[i], corner_min[i], epsilon = 1e-4);
            assert_relative_eq!(world_aabb.max[i], corner_max[i], epsilon = 1e-4);
        }
    }
}
