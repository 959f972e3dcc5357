use bevy_ecs::prelude::*;
use glam::{Quat, Vec3};

use crate::assets::object_manager::RigidBodyMetadata;
use crate::components::object_id_component::ObjectIdComponent;
use crate::components::substep_state_component::{
    SubstepPrevState, SubstepStartState, SubstepVelocityState,
};
use crate::components::transform_component::TransformComponent;
use crate::components::velocity_component::VelocityComponent;
use crate::physics::solver_resource::{Contact, ObjectData, SolverData};

pub struct SolverSystem {}

impl SolverSystem {
    /// Substep integration: gravity, gyroscopic angular drift, and the
    /// pose advance. Records the prev/start/velocity snapshots the rest of
    /// the substep measures against.
    pub fn substep_rigid_bodies(
        mut query: Query<(
            &mut TransformComponent,
            &mut VelocityComponent,
            &ObjectIdComponent,
            &mut SubstepPrevState,
            &mut SubstepStartState,
            &mut SubstepVelocityState,
        )>,
        solver: Res<SolverData>,
        objects: Res<ObjectData>,
    ) {
        let h = solver.h;

        for (mut transform, mut velocity, object_id, mut prev, mut start, mut vel_state) in
            query.iter_mut()
        {
            let metadata = objects.manager.metadata(object_id.0);
            let inv_i = metadata.inv_inertia_tensor;
            let inv_m = metadata.inv_mass;

            prev.prev_position = transform.position;
            prev.prev_rotation = transform.rotation;

            vel_state.prev_translational = velocity.translational;
            vel_state.prev_angular = velocity.angular;

            if inv_m > 0.0 {
                velocity.translational += h * solver.gravity;
            }

            transform.position += h * velocity.translational;

            let inertia = Vec3::new(
                if inv_i.x == 0.0 { 0.0 } else { 1.0 / inv_i.x },
                if inv_i.y == 0.0 { 0.0 } else { 1.0 / inv_i.y },
                if inv_i.z == 0.0 { 0.0 } else { 1.0 / inv_i.z },
            );

            // No external torque; only the gyroscopic term.
            let i_angular = inertia * velocity.angular;
            let angular =
                velocity.angular + h * (inv_i * -velocity.angular.cross(i_angular));
            velocity.angular = angular;

            let delta = pure_quat(0.5 * h * angular) * transform.rotation;
            transform.rotation = (transform.rotation + delta).normalize();

            start.start_position = transform.position;
            start.start_rotation = transform.rotation;
        }
    }

    /// XPBD positional pass. Contacts can share endpoints, so the contact
    /// array is walked serially inside this single stage; the final normal
    /// multiplier is stored back for the velocity pass.
    pub fn solve_positions(
        mut bodies: Query<(
            &mut TransformComponent,
            &SubstepPrevState,
            &SubstepStartState,
            &ObjectIdComponent,
        )>,
        mut solver: ResMut<SolverData>,
        objects: Res<ObjectData>,
    ) {
        for contact in solver.contacts_mut() {
            let Ok([(mut t1, prev1, start1, id1), (mut t2, prev2, start2, id2)]) =
                bodies.get_many_mut([contact.reference, contact.alternate])
            else {
                continue;
            };

            let meta1 = objects.manager.metadata(id1.0);
            let meta2 = objects.manager.metadata(id2.0);

            let mut lambda_n = 0.0;
            let mut lambda_t = 0.0;

            let mut p1 = t1.position;
            let mut p2 = t2.position;
            let mut q1 = t1.rotation;
            let mut q2 = t2.rotation;

            for i in 0..contact.num_points as usize {
                let (r1, r2) = local_space_contacts(start1, start2, contact, i);

                handle_contact_constraint(
                    &mut p1,
                    &mut p2,
                    &mut q1,
                    &mut q2,
                    prev1,
                    prev2,
                    &meta1,
                    &meta2,
                    r1,
                    r2,
                    contact.normal,
                    &mut lambda_n,
                    &mut lambda_t,
                );
            }

            t1.position = p1;
            t2.position = p2;
            t1.rotation = q1;
            t2.rotation = q2;

            contact.lambda_n = lambda_n;
        }
    }

    /// Recovers velocities from the solved positional state.
    pub fn set_velocities(
        mut query: Query<(&TransformComponent, &SubstepPrevState, &mut VelocityComponent)>,
        solver: Res<SolverData>,
    ) {
        let h = solver.h;

        for (transform, prev, mut velocity) in query.iter_mut() {
            velocity.translational = (transform.position - prev.prev_position) / h;

            let delta_q = transform.rotation * prev.prev_rotation.inverse();
            let angular = 2.0 / h * Vec3::new(delta_q.x, delta_q.y, delta_q.z);
            velocity.angular = if delta_q.w > 0.0 { angular } else { -angular };
        }
    }

    /// Post-solve velocity corrections: dynamic friction against the stored
    /// normal multiplier, then restitution against the pre-substep normal
    /// speed. Serial for the same reason as `solve_positions`. Ends the
    /// substep's contact lifetime.
    pub fn solve_velocities(
        mut bodies: Query<(
            &TransformComponent,
            &SubstepStartState,
            &SubstepVelocityState,
            &mut VelocityComponent,
            &ObjectIdComponent,
        )>,
        mut solver: ResMut<SolverData>,
        objects: Res<ObjectData>,
    ) {
        let h = solver.h;
        let restitution_threshold = solver.restitution_threshold;

        for contact in solver.contacts() {
            let Ok(
                [
                    (t1, start1, prev_vel1, mut vel1, id1),
                    (t2, start2, prev_vel2, mut vel2, id2),
                ],
            ) = bodies.get_many_mut([contact.reference, contact.alternate])
            else {
                continue;
            };

            let meta1 = objects.manager.metadata(id1.0);
            let meta2 = objects.manager.metadata(id2.0);

            let q1 = t1.rotation;
            let q2 = t2.rotation;

            let mut v1 = vel1.translational;
            let mut omega1 = vel1.angular;
            let mut v2 = vel2.translational;
            let mut omega2 = vel2.angular;

            let mu_d = 0.5 * (meta1.mu_d + meta2.mu_d);
            let restitution = meta1.restitution.min(meta2.restitution);

            // h * mu_d * |f_n| in the paper
            let dynamic_friction_magnitude = mu_d * contact.lambda_n.abs() / h;

            for i in 0..contact.num_points as usize {
                let (r1, r2) = local_space_contacts(start1, start2, contact, i);
                let n = contact.normal;

                let v = (v1 + omega1.cross(r1)) - (v2 + omega2.cross(r2));

                let vn = n.dot(v);
                let vt = v - n * vn;
                let vt_len = vt.length();

                if vt_len != 0.0 && dynamic_friction_magnitude != 0.0 {
                    let corrected_magnitude = -dynamic_friction_magnitude.min(vt_len);

                    let delta_world = vt / vt_len;
                    let delta_local1 = q1.inverse() * delta_world;
                    let delta_local2 = q2.inverse() * delta_world;

                    apply_velocity_update(
                        &mut v1,
                        &mut v2,
                        &mut omega1,
                        &mut omega2,
                        r1,
                        r2,
                        &meta1,
                        &meta2,
                        delta_world,
                        delta_local1,
                        delta_local2,
                        corrected_magnitude,
                    );
                }

                let v_bar = (prev_vel1.prev_translational + prev_vel1.prev_angular.cross(r1))
                    - (prev_vel2.prev_translational + prev_vel2.prev_angular.cross(r2));
                let vn_bar = n.dot(v_bar);

                let e = if vn_bar.abs() <= restitution_threshold {
                    0.0
                } else {
                    restitution
                };
                let restitution_magnitude = (-e * vn_bar).min(0.0) - vn;

                let n_local1 = q1.inverse() * n;
                let n_local2 = q2.inverse() * n;

                apply_velocity_update(
                    &mut v1,
                    &mut v2,
                    &mut omega1,
                    &mut omega2,
                    r1,
                    r2,
                    &meta1,
                    &meta2,
                    n,
                    n_local1,
                    n_local2,
                    restitution_magnitude,
                );
            }

            vel1.translational = v1;
            vel1.angular = omega1;
            vel2.translational = v2;
            vel2.angular = omega2;
        }

        solver.clear_contacts();
    }
}

fn pure_quat(v: Vec3) -> Quat {
    Quat::from_xyzw(v.x, v.y, v.z, 0.0)
}

/// Effective inverse mass of an impulse applied at local offset `local`
/// along local direction `n`.
fn generalized_inverse_mass(local: Vec3, inv_m: f32, inv_i: Vec3, n: Vec3) -> f32 {
    let lxn = local.cross(n);
    inv_m + (inv_i * lxn).dot(lxn)
}

/// Localizes contact point `point_idx` against both bodies' post-integration
/// frames. The point on the alternate body sits one penetration depth behind
/// the stored reference-surface point.
fn local_space_contacts(
    start1: &SubstepStartState,
    start2: &SubstepStartState,
    contact: &Contact,
    point_idx: usize,
) -> (Vec3, Vec3) {
    let contact1 = contact.points[point_idx].truncate();
    let penetration_depth = contact.points[point_idx].w;

    let contact2 = contact1 - contact.normal * penetration_depth;

    let r1 = start1.start_rotation.inverse() * (contact1 - start1.start_position);
    let r2 = start2.start_rotation.inverse() * (contact2 - start2.start_position);

    (r1, r2)
}

/// One XPBD positional update of magnitude `c` along `n_world`. When
/// `min_lambda` is set (static friction), the multiplier still accumulates
/// but an update that drops it below the bound is not applied: the contact
/// has left the friction cone.
#[allow(clippy::too_many_arguments)]
fn apply_positional_update(
    x1: &mut Vec3,
    x2: &mut Vec3,
    q1: &mut Quat,
    q2: &mut Quat,
    r1: Vec3,
    r2: Vec3,
    meta1: &RigidBodyMetadata,
    meta2: &RigidBodyMetadata,
    n_world: Vec3,
    n1: Vec3,
    n2: Vec3,
    c: f32,
    alpha_tilde: f32,
    lambda: &mut f32,
    min_lambda: Option<f32>,
) {
    let w1 = generalized_inverse_mass(r1, meta1.inv_mass, meta1.inv_inertia_tensor, n1);
    let w2 = generalized_inverse_mass(r2, meta2.inv_mass, meta2.inv_inertia_tensor, n2);

    let w_sum = w1 + w2 + alpha_tilde;
    if w_sum <= f32::EPSILON {
        return; // both endpoints static
    }

    let delta_lambda = (-c - alpha_tilde * *lambda) / w_sum;
    *lambda += delta_lambda;
    if let Some(min_lambda) = min_lambda
        && *lambda < min_lambda
    {
        return;
    }

    let p = delta_lambda * n_world;

    *x1 += p * meta1.inv_mass;
    *x2 -= p * meta2.inv_mass;

    let r1_x_p = r1.cross(delta_lambda * n1);
    let r2_x_p = r2.cross(delta_lambda * n2);

    // The renormalizations are not in the paper, but the updated rotations
    // are read back immediately within the same pass.
    *q1 = (*q1 + pure_quat(0.5 * (meta1.inv_inertia_tensor * r1_x_p)) * *q1).normalize();
    *q2 = (*q2 - pure_quat(0.5 * (meta2.inv_inertia_tensor * r2_x_p)) * *q2).normalize();
}

/// Non-penetration plus static friction for one contact point.
#[allow(clippy::too_many_arguments)]
fn handle_contact_constraint(
    x1: &mut Vec3,
    x2: &mut Vec3,
    q1: &mut Quat,
    q2: &mut Quat,
    prev1: &SubstepPrevState,
    prev2: &SubstepPrevState,
    meta1: &RigidBodyMetadata,
    meta2: &RigidBodyMetadata,
    r1: Vec3,
    r2: Vec3,
    n_world: Vec3,
    lambda_n: &mut f32,
    lambda_t: &mut f32,
) {
    let p1 = *q1 * r1 + *x1;
    let p2 = *q2 * r2 + *x2;

    let d = (p1 - p2).dot(n_world);
    if d <= 0.0 {
        return;
    }

    let p1_hat = prev1.prev_rotation * r1 + prev1.prev_position;
    let p2_hat = prev2.prev_rotation * r2 + prev2.prev_position;

    let n_local1 = q1.inverse() * n_world;
    let n_local2 = q2.inverse() * n_world;

    apply_positional_update(
        x1, x2, q1, q2, r1, r2, meta1, meta2, n_world, n_local1, n_local2, d, 0.0, lambda_n,
        None,
    );

    // Static friction: cancel this substep's tangential drift, but only
    // while the accumulated tangential multiplier stays inside the cone.
    let delta_p = (p1 - p1_hat) - (p2 - p2_hat);
    let delta_p_t = delta_p - delta_p.dot(n_world) * n_world;

    let tangential_magnitude = delta_p_t.length();

    if tangential_magnitude > 0.0 {
        let tangent_dir = delta_p_t / tangential_magnitude;
        let tangent_local1 = q1.inverse() * tangent_dir;
        let tangent_local2 = q2.inverse() * tangent_dir;

        let mu_s = 0.5 * (meta1.mu_s + meta2.mu_s);

        apply_positional_update(
            x1,
            x2,
            q1,
            q2,
            r1,
            r2,
            meta1,
            meta2,
            tangent_dir,
            tangent_local1,
            tangent_local2,
            tangential_magnitude,
            0.0,
            lambda_t,
            Some(*lambda_n * mu_s),
        );
    }
}

/// Velocity-space counterpart of the positional update; shared by dynamic
/// friction and restitution.
#[allow(clippy::too_many_arguments)]
fn apply_velocity_update(
    v1: &mut Vec3,
    v2: &mut Vec3,
    omega1: &mut Vec3,
    omega2: &mut Vec3,
    r1: Vec3,
    r2: Vec3,
    meta1: &RigidBodyMetadata,
    meta2: &RigidBodyMetadata,
    delta_v_world: Vec3,
    delta_v_local1: Vec3,
    delta_v_local2: Vec3,
    delta_v_magnitude: f32,
) {
    let w1 = generalized_inverse_mass(r1, meta1.inv_mass, meta1.inv_inertia_tensor, delta_v_local1);
    let w2 = generalized_inverse_mass(r2, meta2.inv_mass, meta2.inv_inertia_tensor, delta_v_local2);

    let w_sum = w1 + w2;
    if w_sum <= f32::EPSILON {
        return; // both endpoints static
    }

    let magnitude = delta_v_magnitude / w_sum;

    *v1 += delta_v_world * magnitude * meta1.inv_mass;
    *v2 -= delta_v_world * magnitude * meta2.inv_mass;

    *omega1 += meta1.inv_inertia_tensor * r1.cross(delta_v_local1 * magnitude);
    *omega2 -= meta2.inv_inertia_tensor * r2.cross(delta_v_local2 * magnitude);
}
