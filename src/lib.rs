// Distributed under the GNU Affero General Public License v3.0 or later.
// See accompanying file LICENSE or https://www.gnu.org/licenses/agpl-3.0.html for details.

pub mod assets;
pub mod components;
pub mod physics;

pub use assets::aabb::Aabb;
pub use assets::half_edge_mesh::HalfEdgeMesh;
pub use assets::object_manager::{CollisionPrimitive, ObjectManager, RigidBodyMetadata};
pub use components::broadphase_leaf_component::BroadphaseLeaf;
pub use components::collision_aabb_component::CollisionAabbComponent;
pub use components::object_id_component::ObjectIdComponent;
pub use components::substep_state_component::{
    SubstepPrevState, SubstepStartState, SubstepVelocityState,
};
pub use components::transform_component::TransformComponent;
pub use components::velocity_component::VelocityComponent;
pub use physics::RigidBodyPhysicsSystem;
pub use physics::collision_event::{CollisionEvent, CollisionEvents};
pub use physics::dynamic_aabb_tree::LeafId;
pub use physics::solver_resource::{CandidateCollision, CandidateCollisions, Contact, SolverData};
