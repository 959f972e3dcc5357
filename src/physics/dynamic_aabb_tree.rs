// Distributed under the GNU Affero General Public License v3.0 or later.
// See accompanying file LICENSE or https://www.gnu.org/licenses/agpl-3.0.html for details.

use bevy_ecs::entity::Entity;
use bevy_ecs::prelude::Resource;

use crate::assets::aabb::Aabb;

pub type NodeId = usize;

/// Persistent broadphase leaf handle, reserved once per registered entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LeafId(u32);

impl LeafId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

const FAT_MARGIN: f32 = 0.1;

#[derive(Debug, Default)]
struct Node {
    aabb: Aabb,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    height: i32,
    leaf: Option<LeafId>, // Some => leaf node
}

#[derive(Debug)]
struct LeafSlot {
    entity: Entity,
    aabb: Aabb,
    node: Option<NodeId>,
}

/// Dynamic-AABB broadphase index. Leaf slots are preallocated up to the
/// configured maximum; the tree itself is incrementally refitted (leaves are
/// reinserted only when they escape their fat node box) and fully rebuilt
/// after a world reset.
#[derive(Resource, Debug)]
pub struct BroadphaseBvh {
    nodes: Vec<Node>,
    root: Option<NodeId>,
    free_list: Vec<NodeId>,
    leaves: Vec<LeafSlot>,
    max_leaves: usize,
    rebuild_pending: bool,
}

impl BroadphaseBvh {
    pub fn with_capacity(max_dynamic_objects: usize) -> Self {
        BroadphaseBvh {
            nodes: Vec::with_capacity(2 * max_dynamic_objects),
            root: None,
            free_list: Vec::new(),
            leaves: Vec::with_capacity(max_dynamic_objects),
            max_leaves: max_dynamic_objects,
            rebuild_pending: false,
        }
    }

    /// Reserves a persistent leaf for an entity. Exhausting the preallocated
    /// slots is a configuration error and panics.
    pub fn reserve_leaf(&mut self, entity: Entity) -> LeafId {
        assert!(
            self.leaves.len() < self.max_leaves,
            "broadphase leaf capacity {} exhausted",
            self.max_leaves
        );
        let id = LeafId(self.leaves.len() as u32);
        self.leaves.push(LeafSlot {
            entity,
            aabb: Aabb::default(),
            node: None,
        });
        id
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn leaf_entity(&self, leaf: LeafId) -> Entity {
        self.leaves[leaf.index()].entity
    }

    /// Drops all leaf reservations and the tree; used at world reset.
    pub fn clear_leaves(&mut self) {
        self.leaves.clear();
        self.nodes.clear();
        self.free_list.clear();
        self.root = None;
    }

    /// Requests a full rebuild on the next `update_tree` call.
    pub fn rebuild_on_update(&mut self) {
        self.rebuild_pending = true;
    }

    /// Writes the current world AABB into a leaf slot. The tree is not
    /// touched until `update_tree`.
    pub fn update_leaf(&mut self, leaf: LeafId, aabb: Aabb) {
        self.leaves[leaf.index()].aabb = aabb;
    }

    /// Refits or rebuilds the tree over all reserved leaves.
    pub fn update_tree(&mut self) {
        if self.rebuild_pending {
            self.rebuild_pending = false;
            self.nodes.clear();
            self.free_list.clear();
            self.root = None;
            for slot in &mut self.leaves {
                slot.node = None;
            }
        }

        for leaf_idx in 0..self.leaves.len() {
            let leaf = LeafId(leaf_idx as u32);
            let aabb = self.leaves[leaf_idx].aabb;
            match self.leaves[leaf_idx].node {
                Some(node_id) => {
                    if self.nodes[node_id].aabb.contains(&aabb) {
                        continue; // still inside fat box, no reinsertion needed
                    }
                    self.remove(node_id);
                    self.insert_leaf(node_id, aabb.expand(FAT_MARGIN));
                }
                None => {
                    let node_id = self.allocate_node();
                    self.nodes[node_id].leaf = Some(leaf);
                    self.leaves[leaf_idx].node = Some(node_id);
                    self.insert_leaf(node_id, aabb.expand(FAT_MARGIN));
                }
            }
        }
    }

    /// Invokes the callback for every other leaf whose fat node box overlaps
    /// `aabb`. The caller applies the precise AABB test and the pair
    /// canonicalization.
    pub fn find_overlaps<F>(&self, leaf: LeafId, aabb: Aabb, mut callback: F)
    where
        F: FnMut(Entity, LeafId),
    {
        if let Some(root) = self.root {
            self.query_node(root, leaf, &aabb, &mut callback);
        }
    }

    fn query_node<F>(&self, node_id: NodeId, skip: LeafId, aabb: &Aabb, callback: &mut F)
    where
        F: FnMut(Entity, LeafId),
    {
        let node = &self.nodes[node_id];

        if !node.aabb.intersects(aabb) {
            return;
        }

        if let Some(leaf) = node.leaf {
            if leaf != skip {
                callback(self.leaves[leaf.index()].entity, leaf);
            }
        } else {
            self.query_node(node.left.unwrap(), skip, aabb, callback);
            self.query_node(node.right.unwrap(), skip, aabb, callback);
        }
    }

    fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id].left.is_none()
    }

    fn remove(&mut self, leaf: NodeId) {
        if self.root == Some(leaf) {
            self.root = None;
            return;
        }

        let parent = self.nodes[leaf].parent.unwrap();
        let grand_parent = self.nodes[parent].parent;

        let sibling = if self.nodes[parent].left == Some(leaf) {
            self.nodes[parent].right.unwrap()
        } else {
            self.nodes[parent].left.unwrap()
        };

        if let Some(gp) = grand_parent {
            // Replace parent with sibling in grandparent
            if self.nodes[gp].left == Some(parent) {
                self.nodes[gp].left = Some(sibling);
            } else {
                self.nodes[gp].right = Some(sibling);
            }

            self.nodes[sibling].parent = Some(gp);
            self.fix_upwards(gp);
        } else {
            // Parent was root
            self.root = Some(sibling);
            self.nodes[sibling].parent = None;
        }

        self.nodes[leaf].parent = None;
        self.free_node(parent);
    }

    fn insert_leaf(&mut self, leaf: NodeId, aabb: Aabb) {
        self.nodes[leaf].aabb = aabb;
        self.nodes[leaf].left = None;
        self.nodes[leaf].right = None;
        self.nodes[leaf].height = 0;

        if self.root.is_none() {
            self.root = Some(leaf);
            self.nodes[leaf].parent = None;
            return;
        }

        // 1. Find best sibling
        let mut index = self.root.unwrap();

        while !self.is_leaf(index) {
            let left = self.nodes[index].left.unwrap();
            let right = self.nodes[index].right.unwrap();

            let area = self.nodes[index].aabb.area();

            let combined = self.nodes[index].aabb.union(&aabb);
            let combined_area = combined.area();

            // Cost of creating new parent here
            let cost = 2.0 * combined_area;

            // Minimum cost of pushing down
            let inheritance_cost = 2.0 * (combined_area - area);

            let cost_left = {
                let union = self.nodes[left].aabb.union(&aabb);
                if self.is_leaf(left) {
                    union.area() + inheritance_cost
                } else {
                    union.area() - self.nodes[left].aabb.area() + inheritance_cost
                }
            };

            let cost_right = {
                let union = self.nodes[right].aabb.union(&aabb);
                if self.is_leaf(right) {
                    union.area() + inheritance_cost
                } else {
                    union.area() - self.nodes[right].aabb.area() + inheritance_cost
                }
            };

            if cost < cost_left && cost < cost_right {
                break; // create new parent here instead of descending
            } else if cost_left < cost_right {
                index = left;
            } else {
                index = right;
            }
        }

        let sibling = index;
        let old_parent = self.nodes[sibling].parent;

        // 2. Create new parent
        let new_parent = self.allocate_node();

        self.nodes[new_parent].parent = old_parent;
        self.nodes[new_parent].aabb = self.nodes[sibling].aabb.union(&aabb);
        self.nodes[new_parent].height = self.nodes[sibling].height + 1;
        self.nodes[new_parent].left = Some(sibling);
        self.nodes[new_parent].right = Some(leaf);
        self.nodes[new_parent].leaf = None;

        self.nodes[sibling].parent = Some(new_parent);
        self.nodes[leaf].parent = Some(new_parent);

        if let Some(parent) = old_parent {
            if self.nodes[parent].left == Some(sibling) {
                self.nodes[parent].left = Some(new_parent);
            } else {
                self.nodes[parent].right = Some(new_parent);
            }
        } else {
            self.root = Some(new_parent);
        }

        // 3. Walk upward fixing AABBs/heights
        self.fix_upwards(new_parent);
    }

    fn update_node(&mut self, node: NodeId) {
        let left = self.nodes[node].left.unwrap();
        let right = self.nodes[node].right.unwrap();

        self.nodes[node].height = 1 + self.nodes[left].height.max(self.nodes[right].height);
        self.nodes[node].aabb = self.nodes[left].aabb.union(&self.nodes[right].aabb);
    }

    fn fix_upwards(&mut self, mut index: NodeId) {
        loop {
            self.update_node(index);

            // Check balance
            let left = self.nodes[index].left.unwrap();
            let right = self.nodes[index].right.unwrap();
            let balance = self.nodes[left].height as isize - self.nodes[right].height as isize;

            // Perform rotation if needed, get new root of this subtree
            index = if balance > 1 {
                self.rotate_right(index)
            } else if balance < -1 {
                self.rotate_left(index)
            } else {
                index
            };

            if let Some(parent) = self.nodes[index].parent {
                index = parent;
            } else {
                break;
            }
        }
    }

    fn rotate_right(&mut self, node: NodeId) -> NodeId {
        let left = self.nodes[node].left.unwrap();
        let left_right = self.nodes[left].right;

        // Left becomes new parent
        self.nodes[left].parent = self.nodes[node].parent;
        self.nodes[node].parent = Some(left);

        self.nodes[left].right = Some(node);
        self.nodes[node].left = left_right;

        if let Some(lr) = left_right {
            self.nodes[lr].parent = Some(node);
        }

        if let Some(parent) = self.nodes[left].parent {
            if self.nodes[parent].left == Some(node) {
                self.nodes[parent].left = Some(left);
            } else {
                self.nodes[parent].right = Some(left);
            }
        } else {
            self.root = Some(left);
        }

        self.update_node(node);
        self.update_node(left);
        left
    }

    fn rotate_left(&mut self, node: NodeId) -> NodeId {
        let right = self.nodes[node].right.unwrap();
        let right_left = self.nodes[right].left;

        // Right becomes new parent
        self.nodes[right].parent = self.nodes[node].parent;
        self.nodes[node].parent = Some(right);

        self.nodes[right].left = Some(node);
        self.nodes[node].right = right_left;

        if let Some(rl) = right_left {
            self.nodes[rl].parent = Some(node);
        }

        if let Some(parent) = self.nodes[right].parent {
            if self.nodes[parent].left == Some(node) {
                self.nodes[parent].left = Some(right);
            } else {
                self.nodes[parent].right = Some(right);
            }
        } else {
            self.root = Some(right);
        }

        self.update_node(node);
        self.update_node(right);
        right
    }

    fn allocate_node(&mut self) -> NodeId {
        if let Some(id) = self.free_list.pop() {
            self.nodes[id] = Node::default();
            id
        } else {
            let id = self.nodes.len();
            self.nodes.push(Node::default());
            id
        }
    }

    fn free_node(&mut self, id: NodeId) {
        self.free_list.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn entity(bits: u64) -> Entity {
        Entity::from_bits(bits)
    }

    fn unit_box_at(center: Vec3) -> Aabb {
        Aabb::new(center - Vec3::splat(0.5), center + Vec3::splat(0.5))
    }

    fn collect_overlaps(tree: &BroadphaseBvh, leaf: LeafId, aabb: Aabb) -> Vec<LeafId> {
        let mut found = Vec::new();
        tree.find_overlaps(leaf, aabb, |_, other| found.push(other));
        found.sort();
        found
    }

    #[test]
    fn overlapping_leaves_are_reported() {
        let mut tree = BroadphaseBvh::with_capacity(8);
        let a = tree.reserve_leaf(entity(1));
        let b = tree.reserve_leaf(entity(2));
        let c = tree.reserve_leaf(entity(3));

        tree.update_leaf(a, unit_box_at(Vec3::ZERO));
        tree.update_leaf(b, unit_box_at(Vec3::new(0.4, 0.0, 0.0)));
        tree.update_leaf(c, unit_box_at(Vec3::new(10.0, 0.0, 0.0)));
        tree.update_tree();

        let hits = collect_overlaps(&tree, a, unit_box_at(Vec3::ZERO));
        assert_eq!(hits, vec![b]);
    }

    #[test]
    fn refit_follows_moving_leaf() {
        let mut tree = BroadphaseBvh::with_capacity(4);
        let a = tree.reserve_leaf(entity(1));
        let b = tree.reserve_leaf(entity(2));

        tree.update_leaf(a, unit_box_at(Vec3::ZERO));
        tree.update_leaf(b, unit_box_at(Vec3::new(20.0, 0.0, 0.0)));
        tree.update_tree();
        assert!(collect_overlaps(&tree, a, unit_box_at(Vec3::ZERO)).is_empty());

        // Move b across the world onto a; far outside its old fat box.
        tree.update_leaf(b, unit_box_at(Vec3::new(0.1, 0.0, 0.0)));
        tree.update_tree();
        assert_eq!(
            collect_overlaps(&tree, a, unit_box_at(Vec3::ZERO)),
            vec![b]
        );
    }

    #[test]
    fn rebuild_after_reset() {
        let mut tree = BroadphaseBvh::with_capacity(4);
        let a = tree.reserve_leaf(entity(1));
        tree.update_leaf(a, unit_box_at(Vec3::ZERO));
        tree.update_tree();

        tree.rebuild_on_update();
        tree.clear_leaves();
        assert_eq!(tree.leaf_count(), 0);

        let a2 = tree.reserve_leaf(entity(7));
        let b2 = tree.reserve_leaf(entity(8));
        tree.update_leaf(a2, unit_box_at(Vec3::ZERO));
        tree.update_leaf(b2, unit_box_at(Vec3::new(0.2, 0.0, 0.0)));
        tree.update_tree();

        assert_eq!(
            collect_overlaps(&tree, a2, unit_box_at(Vec3::ZERO)),
            vec![b2]
        );
    }

    #[test]
    #[should_panic(expected = "broadphase leaf capacity")]
    fn leaf_exhaustion_panics() {
        let mut tree = BroadphaseBvh::with_capacity(1);
        tree.reserve_leaf(entity(1));
        tree.reserve_leaf(entity(2));
    }

    #[test]
    fn random_cloud_matches_brute_force() {
        use rand::Rng;
        let mut rng = rand::rng();

        let count = 64;
        let mut tree = BroadphaseBvh::with_capacity(count);
        let mut boxes = Vec::with_capacity(count);
        for i in 0..count {
            let leaf = tree.reserve_leaf(entity(i as u64 + 1));
            let center = Vec3::new(
                rng.random_range(-10.0..10.0),
                rng.random_range(-10.0..10.0),
                rng.random_range(-10.0..10.0),
            );
            let aabb = unit_box_at(center);
            tree.update_leaf(leaf, aabb);
            boxes.push((leaf, aabb));
        }
        tree.update_tree();

        // Fat boxes may over-report; the precise filter is the caller's job,
        // so apply it here the way find_overlaps callers do.
        let mut tree_pairs = Vec::new();
        for (leaf, aabb) in &boxes {
            tree.find_overlaps(*leaf, *aabb, |_, other| {
                if other > *leaf && aabb.intersects(&boxes[other.index()].1) {
                    tree_pairs.push((*leaf, other));
                }
            });
        }
        tree_pairs.sort();

        let mut brute_pairs = Vec::new();
        for i in 0..count {
            for j in (i + 1)..count {
                if boxes[i].1.intersects(&boxes[j].1) {
                    brute_pairs.push((boxes[i].0, boxes[j].0));
                }
            }
        }

        assert_eq!(tree_pairs, brute_pairs);
    }
}
