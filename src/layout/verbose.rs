//! The verbose layout: explicit child, parent and sibling links.
//!
//! This format exists primarily for the insertion-based optimizer, which
//! relinks subtrees and therefore needs to walk upwards.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::aabb::Aabb;
use crate::bvh::node::BvhNode;
use crate::bvh::Bvh;
use crate::INVALID;

/// A primary node plus explicit links, 48 bytes.
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct VerboseNode {
    pub min: Vec3,
    pub left: u32,
    pub max: Vec3,
    pub right: u32,
    pub prim_count: u32,
    pub first_index: u32,
    /// Parent node index; [`INVALID`] for the root.
    pub parent: u32,
    /// The other child of this node's parent; [`INVALID`] for the root.
    pub sibling: u32,
}

impl VerboseNode {
    #[inline(always)]
    pub fn is_leaf(&self) -> bool {
        self.prim_count > 0
    }

    #[inline(always)]
    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.min.into(), self.max.into())
    }

    #[inline(always)]
    pub fn set_aabb(&mut self, aabb: Aabb) {
        self.min = aabb.min.into();
        self.max = aabb.max.into();
    }
}

impl Bvh {
    /// Copy every primary node into the verbose array in place (node `i`
    /// keeps index `i`) and fill in the parent and sibling links.
    pub(crate) fn convert_to_verbose(&mut self) {
        assert!(self.used_nodes > 0, "convert called before build");
        self.verbose_nodes.clear();
        self.verbose_nodes
            .resize(self.used_nodes as usize, VerboseNode::default());

        // (node, parent, sibling) triples; depth bounded by the builders.
        let mut stack = [(0u32, 0u32, 0u32); 128];
        let mut stack_ptr = 0usize;
        let (mut node_idx, mut parent, mut sibling) = (0u32, INVALID, INVALID);
        loop {
            let node = self.nodes[node_idx as usize];
            let out = &mut self.verbose_nodes[node_idx as usize];
            out.min = node.min;
            out.max = node.max;
            out.prim_count = node.prim_count;
            out.parent = parent;
            out.sibling = sibling;
            if node.is_leaf() {
                out.first_index = node.first_index;
                if stack_ptr == 0 {
                    break;
                }
                stack_ptr -= 1;
                (node_idx, parent, sibling) = stack[stack_ptr];
            } else {
                out.left = node.first_index;
                out.right = node.first_index + 1;
                stack[stack_ptr] = (node.first_index + 1, node_idx, node.first_index);
                stack_ptr += 1;
                parent = node_idx;
                sibling = node.first_index + 1;
                node_idx = node.first_index;
            }
        }
    }

    /// Rebuild the primary array from the verbose one, restoring the
    /// contiguous-sibling allocation (children of the root start at
    /// slot 2, node 1 stays unused).
    pub(crate) fn convert_verbose_to_wald(&mut self) {
        let used_verbose = self.verbose_nodes.len();
        assert!(used_verbose > 0, "no verbose layout to convert from");
        if self.nodes.len() < used_verbose {
            self.nodes = bytemuck::zeroed_vec(used_verbose);
        }
        let mut src_stack = [0u32; 128];
        let mut dst_stack = [0u32; 128];
        let mut stack_ptr = 0usize;
        let (mut src_idx, mut dst_idx) = (0u32, 0u32);
        let mut new_node_ptr = 2u32;
        loop {
            let src = self.verbose_nodes[src_idx as usize];
            let dst = &mut self.nodes[dst_idx as usize];
            dst.min = src.min;
            dst.max = src.max;
            if src.is_leaf() {
                dst.prim_count = src.prim_count;
                dst.first_index = src.first_index;
                if stack_ptr == 0 {
                    break;
                }
                stack_ptr -= 1;
                src_idx = src_stack[stack_ptr];
                dst_idx = dst_stack[stack_ptr];
            } else {
                dst.prim_count = 0;
                dst.first_index = new_node_ptr;
                src_idx = src.left;
                dst_idx = new_node_ptr;
                src_stack[stack_ptr] = src.right;
                dst_stack[stack_ptr] = new_node_ptr + 1;
                stack_ptr += 1;
                new_node_ptr += 2;
            }
        }
        self.nodes[1] = BvhNode::default();
        self.used_nodes = new_node_ptr;
    }
}
