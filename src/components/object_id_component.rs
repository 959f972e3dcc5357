use bevy_ecs::component::Component;

/// Index into the shared [`ObjectManager`](crate::ObjectManager) catalogue.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectIdComponent(pub u32);
