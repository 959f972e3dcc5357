use bevy_ecs::component::Component;

use crate::physics::dynamic_aabb_tree::LeafId;

/// Handle of the broadphase leaf reserved for this entity at registration.
#[derive(Component, Debug, Clone, Copy)]
pub struct BroadphaseLeaf(pub LeafId);
