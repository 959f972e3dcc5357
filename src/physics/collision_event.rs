use bevy_ecs::prelude::*;

use crate::physics::append_buffer::AppendBuffer;

/// Observation record for a pair that produced contact this substep. The
/// buffer survives until the cleanup stage so hosts can inspect it after
/// the step; it is not consumed by the solver.
#[derive(Debug, Clone, Copy)]
pub struct CollisionEvent {
    pub a: Entity,
    pub b: Entity,
}

#[derive(Resource)]
pub struct CollisionEvents {
    events: AppendBuffer<CollisionEvent>,
}

impl CollisionEvents {
    pub fn with_capacity(capacity: usize) -> Self {
        CollisionEvents {
            events: AppendBuffer::with_capacity(capacity),
        }
    }

    /// Parallel-safe append from the narrowphase.
    pub fn record(&self, event: CollisionEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&mut self) -> impl Iterator<Item = &CollisionEvent> {
        self.events.as_slice().iter()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Cleanup stage wired by `setup_cleanup_tasks`.
pub fn clear_collision_events(mut events: ResMut<CollisionEvents>) {
    events.clear();
}
