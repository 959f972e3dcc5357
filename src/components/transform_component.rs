use bevy_ecs::component::Component;
use glam::{Quat, Vec3};

#[derive(Component, Debug, Clone, Copy)]
pub struct TransformComponent {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for TransformComponent {
    fn default() -> Self {
        TransformComponent {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl TransformComponent {
    pub fn from_position(position: Vec3) -> Self {
        TransformComponent {
            position,
            ..Default::default()
        }
    }
}
