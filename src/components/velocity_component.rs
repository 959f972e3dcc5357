use bevy_ecs::component::Component;
use glam::Vec3;

#[derive(Component, Debug, Clone, Copy, Default)]
pub struct VelocityComponent {
    pub translational: Vec3,
    pub angular: Vec3,
}
