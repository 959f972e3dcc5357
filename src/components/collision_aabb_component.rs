use bevy_ecs::component::Component;

use crate::assets::aabb::Aabb;

/// World-space AABB conservatively bounding the body's motion over the
/// current step. Written once per step before the broadphase runs.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct CollisionAabbComponent(pub Aabb);
