use std::sync::Arc;

use bevy_ecs::prelude::*;
use glam::{Vec3, Vec4};

use crate::assets::object_manager::ObjectManager;
use crate::physics::append_buffer::AppendBuffer;

/// Solver record for one manifold. `points[i].xyz` is a world-space contact
/// point on the reference body; `points[i].w` is the penetration depth along
/// `normal`, which points from the reference body toward the alternate body.
#[derive(Debug, Clone, Copy)]
pub struct Contact {
    pub reference: Entity,
    pub alternate: Entity,
    pub points: [Vec4; 4],
    pub num_points: u32,
    pub normal: Vec3,
    pub lambda_n: f32,
}

/// Overlapping-AABB pair emitted by the broadphase, consumed by the
/// narrowphase during every substep of the step.
#[derive(Debug, Clone, Copy)]
pub struct CandidateCollision {
    pub a: Entity,
    pub b: Entity,
}

#[derive(Resource, Default)]
pub struct CandidateCollisions {
    pub pairs: Vec<CandidateCollision>,
}

impl CandidateCollisions {
    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}

/// Per-world solver singleton: the contact buffer plus the step constants
/// derived from the configured time step and gravity.
#[derive(Resource)]
pub struct SolverData {
    contacts: AppendBuffer<Contact>,
    pub delta_t: f32,
    /// Substep length, `delta_t / num_substeps`.
    pub h: f32,
    pub num_substeps: u32,
    pub gravity: Vec3,
    pub gravity_magnitude: f32,
    /// Normal speeds below this are treated as resting contact (e = 0).
    pub restitution_threshold: f32,
}

impl SolverData {
    pub fn new(
        max_contacts_per_world: usize,
        delta_t: f32,
        num_substeps: u32,
        gravity: Vec3,
    ) -> Self {
        let h = delta_t / num_substeps as f32;
        let gravity_magnitude = gravity.length();
        SolverData {
            contacts: AppendBuffer::with_capacity(max_contacts_per_world),
            delta_t,
            h,
            num_substeps,
            gravity,
            gravity_magnitude,
            restitution_threshold: 2.0 * gravity_magnitude * h,
        }
    }

    /// Parallel-safe append from the narrowphase. Overflow panics.
    pub fn add_contact(&self, contact: Contact) {
        debug_assert!(contact.reference != contact.alternate);
        debug_assert!(contact.num_points >= 1 && contact.num_points <= 4);
        debug_assert!((contact.normal.length_squared() - 1.0).abs() < 1e-3);
        debug_assert!(
            (0..contact.num_points as usize).all(|i| contact.points[i].w >= 0.0),
            "contact inserted with negative penetration depth"
        );
        self.contacts.push(contact);
    }

    pub fn num_contacts(&self) -> usize {
        self.contacts.len()
    }

    pub fn contacts(&mut self) -> &[Contact] {
        self.contacts.as_slice()
    }

    pub fn contacts_mut(&mut self) -> &mut [Contact] {
        self.contacts.as_mut_slice()
    }

    pub fn clear_contacts(&mut self) {
        self.contacts.clear();
    }
}

/// Per-world handle to the shared read-only object catalogue.
#[derive(Resource, Clone)]
pub struct ObjectData {
    pub manager: Arc<ObjectManager>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn substep_constants() {
        let solver = SolverData::new(16, 0.02, 4, Vec3::new(0.0, 0.0, -10.0));
        assert_relative_eq!(solver.h, 0.005);
        assert_relative_eq!(solver.gravity_magnitude, 10.0);
        assert_relative_eq!(solver.restitution_threshold, 0.1);
    }

    #[test]
    fn contact_buffer_round_trip() {
        let mut solver = SolverData::new(4, 0.01, 1, Vec3::ZERO);
        solver.add_contact(Contact {
            reference: Entity::from_bits(1),
            alternate: Entity::from_bits(2),
            points: [Vec4::ZERO; 4],
            num_points: 1,
            normal: Vec3::Z,
            lambda_n: 0.0,
        });
        assert_eq!(solver.num_contacts(), 1);
        solver.clear_contacts();
        assert_eq!(solver.num_contacts(), 0);
    }
}
