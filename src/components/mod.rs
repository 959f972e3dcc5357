pub mod broadphase_leaf_component;
pub mod collision_aabb_component;
pub mod object_id_component;
pub mod substep_state_component;
pub mod transform_component;
pub mod velocity_component;
