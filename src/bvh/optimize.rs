//! Insertion-based tree optimization.
//!
//! Implements "Fast Insertion-Based Optimization of Bounding Volume
//! Hierarchies", Bittner et al.: repeatedly snip out a random interior
//! node, then reinsert its two subtrees at the globally best positions
//! found by a branch-and-bound search. Operates on the verbose layout,
//! which carries the parent links the relinking needs.

use crate::bvh::Bvh;
use crate::layout::verbose::VerboseNode;
use crate::{BVH_FAR, INVALID};

/// Task capacity of the best-position search.
const SEARCH_STACK: usize = 512;

/// Give up picking a reinsertion candidate after this many draws; tiny
/// trees have no node with a non-root parent and grandparent.
const PICK_ATTEMPTS: u32 = 128;

impl Bvh {
    /// Run `iterations` rounds of subtree reinsertion on the verbose
    /// layout. Convert to [`crate::bvh::Layout::Verbose`] first and back to
    /// the primary layout afterwards.
    ///
    /// The SAH cost of the tree never increases across rounds, but a
    /// single round need not decrease it; callers typically run many
    /// (up to millions of) iterations.
    pub fn optimize(&mut self, iterations: u32) {
        crate::scope!("optimize");
        assert!(
            !self.verbose_nodes.is_empty(),
            "optimize operates on the verbose layout; convert first"
        );
        for _ in 0..iterations {
            self.optimize_step();
        }
    }

    /// Reinsert one random subtree.
    fn optimize_step(&mut self) {
        let used = self.verbose_nodes.len() as u32;
        if used < 8 {
            return; // nothing snippable in a stub tree
        }
        // Draw until we find an interior node whose parent and grandparent
        // both exist and are not the root; the snip rewires two levels up.
        let mut node_id = 0;
        let mut valid = false;
        for _ in 0..PICK_ATTEMPTS {
            let mut seed = self.opt_seed;
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            self.opt_seed = seed;
            node_id = 2 + seed % (used - 2);
            let node = &self.verbose_nodes[node_id as usize];
            if node.parent == 0 || node.is_leaf() {
                continue;
            }
            if self.verbose_nodes[node.parent as usize].parent == 0 {
                continue;
            }
            valid = true;
            break;
        }
        if !valid {
            return;
        }

        // Snip out N and its parent P: relink grandparent X1 directly to
        // N's sibling X2, then restore ancestor bounds.
        let n_id = node_id;
        let p_id = self.verbose_nodes[n_id as usize].parent;
        let p = self.verbose_nodes[p_id as usize];
        let x1 = p.parent;
        let x2 = if p.left == n_id { p.right } else { p.left };
        if self.verbose_nodes[x1 as usize].left == p_id {
            self.verbose_nodes[x1 as usize].left = x2;
        } else {
            self.verbose_nodes[x1 as usize].right = x2;
        }
        self.verbose_nodes[x2 as usize].parent = x1;
        self.link_siblings(x1);
        let left = self.verbose_nodes[n_id as usize].left;
        let right = self.verbose_nodes[n_id as usize].right;
        self.refit_up_verbose(x1);
        // The freed slots P and N become the new parents of the two
        // reinserted subtrees.
        self.reinsert_verbose(left, p_id, x1);
        self.reinsert_verbose(right, n_id, x1);
    }

    /// Update bounding boxes of the given node and all its ancestors.
    fn refit_up_verbose(&mut self, mut node_idx: u32) {
        while node_idx != INVALID {
            let node = self.verbose_nodes[node_idx as usize];
            let left = self.verbose_nodes[node.left as usize].aabb();
            let right = self.verbose_nodes[node.right as usize].aabb();
            self.verbose_nodes[node_idx as usize].set_aabb(left.union(&right));
            node_idx = node.parent;
        }
    }

    /// Refresh the mutual sibling links of an interior node's children.
    fn link_siblings(&mut self, node_idx: u32) {
        let node = self.verbose_nodes[node_idx as usize];
        self.verbose_nodes[node.left as usize].sibling = node.right;
        self.verbose_nodes[node.right as usize].sibling = node.left;
    }

    /// Find the position in the tree where inserting the subtree `l_id`
    /// increases the total SAH cost the least.
    ///
    /// Best-first branch-and-bound: tasks carry the accumulated
    /// enlargement of all ancestors on the path ("induced cost"); a
    /// candidate whose induced cost alone already exceeds the best total
    /// cannot improve and its subtree is pruned.
    fn find_best_position(&self, l_id: u32) -> u32 {
        let l_aabb = self.verbose_nodes[l_id as usize].aabb();
        let l_area = l_aabb.half_area();
        const EPSILON: f32 = 1e-10;
        let mut task_node = [0u32; SEARCH_STACK];
        let mut task_ci = [0f32; SEARCH_STACK];
        let mut task_inv_ci = [0f32; SEARCH_STACK];
        let mut tasks = 1usize;
        task_node[0] = 0; // root
        task_ci[0] = 0.0;
        task_inv_ci[0] = 1.0 / EPSILON;
        let mut best_cost = BVH_FAR;
        let mut best_node = 0u32;
        while tasks > 0 {
            // Pop the task with the smallest induced cost.
            let mut max_inv_ci = 0.0;
            let mut best_task = 0usize;
            for j in 0..tasks {
                if task_inv_ci[j] > max_inv_ci {
                    max_inv_ci = task_inv_ci[j];
                    best_task = j;
                }
            }
            let x_id = task_node[best_task];
            let induced = task_ci[best_task];
            tasks -= 1;
            task_node[best_task] = task_node[tasks];
            task_ci[best_task] = task_ci[tasks];
            task_inv_ci[best_task] = task_inv_ci[tasks];

            if induced + l_area >= best_cost {
                break; // no remaining task can win
            }
            let x = &self.verbose_nodes[x_id as usize];
            let direct = x.aabb().union(&l_aabb).half_area();
            let total = induced + direct;
            if total < best_cost {
                best_cost = total;
                best_node = x_id;
            }
            let child_induced = total - x.aabb().half_area();
            if child_induced + l_area < best_cost && !x.is_leaf() {
                task_node[tasks] = x.left;
                task_ci[tasks] = child_induced;
                task_inv_ci[tasks] = 1.0 / (child_induced + EPSILON);
                tasks += 1;
                task_node[tasks] = x.right;
                task_ci[tasks] = child_induced;
                task_inv_ci[tasks] = 1.0 / (child_induced + EPSILON);
                tasks += 1;
            }
        }
        best_node
    }

    /// Insert subtree `l_id` above the best position found, reusing the
    /// freed node `n_id` as the new shared parent; `origin` is the
    /// fallback position when the search lands next to the root.
    fn reinsert_verbose(&mut self, l_id: u32, n_id: u32, origin: u32) {
        let mut best = self.find_best_position(l_id);
        if best == 0 || self.verbose_nodes[best as usize].parent == 0 {
            best = origin;
        }
        let x1 = self.verbose_nodes[best as usize].parent;
        let merged = self.verbose_nodes[best as usize]
            .aabb()
            .union(&self.verbose_nodes[l_id as usize].aabb());
        {
            let n = &mut self.verbose_nodes[n_id as usize];
            n.left = best;
            n.right = l_id;
            n.set_aabb(merged);
            n.parent = x1;
        }
        if self.verbose_nodes[x1 as usize].left == best {
            self.verbose_nodes[x1 as usize].left = n_id;
        } else {
            self.verbose_nodes[x1 as usize].right = n_id;
        }
        self.link_siblings(x1);
        self.verbose_nodes[best as usize].parent = n_id;
        self.verbose_nodes[l_id as usize].parent = n_id;
        self.link_siblings(n_id);
        self.refit_up_verbose(n_id);
    }
}

/// Parent-link consistency check for the verbose layout, used by tests.
pub(crate) fn verbose_links_consistent(nodes: &[VerboseNode]) -> bool {
    for (i, node) in nodes.iter().enumerate() {
        if i == 1 || node.is_leaf() {
            continue; // slot 1 is the reserved, unreachable node
        }
        let (l, r) = (node.left as usize, node.right as usize);
        if nodes[l].parent != i as u32 || nodes[r].parent != i as u32 {
            return false;
        }
        if nodes[l].sibling != node.right || nodes[r].sibling != node.left {
            return false;
        }
        let union = nodes[l].aabb().union(&nodes[r].aabb());
        if !node.aabb().contains_aabb(&union) {
            return false;
        }
    }
    true
}
