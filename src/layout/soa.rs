//! SoA variant of the Aila-Laine layout: the two child AABBs are stored
//! as four-lane x, y and z vectors so a SIMD traversal can slab-test both
//! children with three fused multiplies. The traversal here is the scalar
//! reference; a vectorized one must return identical results.

use bytemuck::{Pod, Zeroable};
use glam::{vec4, Vec4};

use crate::bvh::Bvh;
use crate::ray::Ray;
use crate::triangle::intersect_tri;
use crate::BVH_FAR;

/// 64-byte node; each lane vector holds
/// `(left min, left max, right min, right max)` for one axis.
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct SoaNode {
    pub xxxx: Vec4,
    pub yyyy: Vec4,
    pub zzzz: Vec4,
    pub left: u32,
    pub right: u32,
    pub prim_count: u32,
    pub first_index: u32,
}

impl SoaNode {
    #[inline(always)]
    pub fn is_leaf(&self) -> bool {
        self.prim_count > 0
    }
}

impl Bvh {
    /// Same pre-order walk as the Aila-Laine conversion, transposing the
    /// child bounds into per-axis lanes.
    pub(crate) fn convert_to_soa(&mut self) {
        assert!(self.used_nodes > 0, "convert called before build");
        self.soa_nodes.clear();
        self.soa_nodes
            .resize(self.used_nodes as usize, SoaNode::default());

        let mut stack = [(0u32, 0u32); 64];
        let mut stack_ptr = 0usize;
        let mut new_node = 0u32;
        let mut node_idx = 0u32;
        loop {
            let node = self.nodes[node_idx as usize];
            let idx = new_node;
            new_node += 1;
            if node.is_leaf() {
                self.soa_nodes[idx as usize].prim_count = node.prim_count;
                self.soa_nodes[idx as usize].first_index = node.first_index;
                if stack_ptr == 0 {
                    break;
                }
                stack_ptr -= 1;
                let (patch_slot, right_src) = stack[stack_ptr];
                node_idx = right_src;
                self.soa_nodes[patch_slot as usize].right = new_node;
            } else {
                let left = self.nodes[node.first_index as usize];
                let right = self.nodes[node.first_index as usize + 1];
                let out = &mut self.soa_nodes[idx as usize];
                out.xxxx = vec4(left.min.x, left.max.x, right.min.x, right.max.x);
                out.yyyy = vec4(left.min.y, left.max.y, right.min.y, right.max.y);
                out.zzzz = vec4(left.min.z, left.max.z, right.min.z, right.max.z);
                out.left = new_node; // right patched when popped
                stack[stack_ptr] = (idx, node.first_index + 1);
                stack_ptr += 1;
                node_idx = node.first_index;
            }
        }
        self.soa_nodes.truncate(new_node as usize);
    }

    pub(crate) fn intersect_soa(&self, ray: &mut Ray, verts: &[Vec4]) -> u32 {
        assert!(!self.soa_nodes.is_empty(), "no SoA layout; convert first");
        let mut stack = [0u32; 64];
        let mut stack_ptr = 0usize;
        let mut node_idx = 0u32;
        let mut steps = 0u32;
        loop {
            steps += 1;
            let node = &self.soa_nodes[node_idx as usize];
            if node.is_leaf() {
                for i in 0..node.prim_count {
                    let prim = self.primitive_indices[(node.first_index + i) as usize];
                    intersect_tri(ray, verts, prim);
                }
                if stack_ptr == 0 {
                    break;
                }
                stack_ptr -= 1;
                node_idx = stack[stack_ptr];
                continue;
            }
            let mut near_dist = slab_lanes(ray, node, 0, 1);
            let mut far_dist = slab_lanes(ray, node, 2, 3);
            let mut near = node.left;
            let mut far = node.right;
            if near_dist > far_dist {
                core::mem::swap(&mut near_dist, &mut far_dist);
                core::mem::swap(&mut near, &mut far);
            }
            if near_dist == BVH_FAR {
                if stack_ptr == 0 {
                    break;
                }
                stack_ptr -= 1;
                node_idx = stack[stack_ptr];
            } else {
                node_idx = near;
                if far_dist != BVH_FAR {
                    stack[stack_ptr] = far;
                    stack_ptr += 1;
                }
            }
        }
        steps
    }
}

/// Slab test against the child whose min/max live in lanes `lo`/`hi`.
#[inline(always)]
fn slab_lanes(ray: &Ray, node: &SoaNode, lo: usize, hi: usize) -> f32 {
    let tx1 = (node.xxxx[lo] - ray.origin.x) * ray.inv_direction.x;
    let tx2 = (node.xxxx[hi] - ray.origin.x) * ray.inv_direction.x;
    let ty1 = (node.yyyy[lo] - ray.origin.y) * ray.inv_direction.y;
    let ty2 = (node.yyyy[hi] - ray.origin.y) * ray.inv_direction.y;
    let tz1 = (node.zzzz[lo] - ray.origin.z) * ray.inv_direction.z;
    let tz2 = (node.zzzz[hi] - ray.origin.z) * ray.inv_direction.z;
    let tmin = tx1.min(tx2).max(ty1.min(ty2)).max(tz1.min(tz2));
    let tmax = tx1.max(tx2).min(ty1.max(ty2)).min(tz1.max(tz2));
    if tmax >= tmin && tmin < ray.hit.t && tmax >= 0.0 {
        tmin
    } else {
        BVH_FAR
    }
}
