use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use bevy_ecs::prelude::*;
use glam::Vec3;

/// Per-world bump arena backing narrowphase scratch (world-space hull
/// vertices). Allocations are handed out by a relaxed fetch-add on the
/// cursor and released en masse by `reset` at the end of each substep.
/// Exhaustion is a sizing bug and panics.
#[derive(Resource)]
pub struct ScratchArena {
    storage: Box<[UnsafeCell<Vec3>]>,
    cursor: AtomicUsize,
}

// Safety: concurrent `alloc_vertices` calls receive disjoint ranges of
// `storage`; `reset` requires `&mut self`.
unsafe impl Sync for ScratchArena {}

impl ScratchArena {
    pub fn with_capacity(vertex_capacity: usize) -> Self {
        let mut storage = Vec::with_capacity(vertex_capacity);
        storage.resize_with(vertex_capacity, || UnsafeCell::new(Vec3::ZERO));
        ScratchArena {
            storage: storage.into_boxed_slice(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bump-allocates an uninitialized vertex slice valid until `reset`.
    pub fn alloc_vertices(&self, count: usize) -> &mut [Vec3] {
        let start = self.cursor.fetch_add(count, Ordering::Relaxed);
        assert!(
            start + count <= self.storage.len(),
            "scratch arena overflow: {} vertices requested, {} of {} in use",
            count,
            start,
            self.storage.len()
        );
        // Safety: [start, start + count) is exclusively ours.
        unsafe {
            let base = self.storage.as_ptr().add(start) as *mut Vec3;
            std::slice::from_raw_parts_mut(base, count)
        }
    }

    pub fn in_use(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    pub fn reset(&mut self) {
        *self.cursor.get_mut() = 0;
    }
}

/// Terminal substep stage: releases all narrowphase scratch at once.
pub fn reset_scratch(mut scratch: ResMut<ScratchArena>) {
    scratch.reset();
}
