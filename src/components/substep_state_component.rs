use bevy_ecs::component::Component;
use glam::{Quat, Vec3};

/// Pose at the start of the current substep, before integration. The
/// positional solver measures static-friction displacement against it and
/// the velocity reconstruction differentiates against it.
#[derive(Component, Debug, Clone, Copy)]
pub struct SubstepPrevState {
    pub prev_position: Vec3,
    pub prev_rotation: Quat,
}

impl Default for SubstepPrevState {
    fn default() -> Self {
        SubstepPrevState {
            prev_position: Vec3::ZERO,
            prev_rotation: Quat::IDENTITY,
        }
    }
}

/// Pose immediately after integration; the reference frame in which contact
/// points are localized for the rest of the substep.
#[derive(Component, Debug, Clone, Copy)]
pub struct SubstepStartState {
    pub start_position: Vec3,
    pub start_rotation: Quat,
}

impl Default for SubstepStartState {
    fn default() -> Self {
        SubstepStartState {
            start_position: Vec3::ZERO,
            start_rotation: Quat::IDENTITY,
        }
    }
}

/// Velocities at the start of the substep; the restitution reference.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct SubstepVelocityState {
    pub prev_translational: Vec3,
    pub prev_angular: Vec3,
}
