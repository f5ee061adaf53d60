//! Basic binned-SAH builder.
//!
//! This is the reference builder; it yields a decent tree suitable for ray
//! tracing on the CPU. For GPU rendering, convert the result to one of the
//! wide layouts after construction.

use bytemuck::zeroed_vec;
use glam::{Vec3A, Vec4};

use crate::aabb::Aabb;
use crate::bvh::node::{BvhNode, Fragment};
use crate::bvh::Bvh;
use crate::BVH_FAR;

/// Bin count per axis for both builders.
pub const BINS: usize = 8;

/// Subdivision stack depth; a binned build of 2^32 primitives stays far
/// below this.
pub(crate) const TASK_STACK: usize = 256;

impl Bvh {
    /// Build the primary layout over a triangle soup with a top-down
    /// binned-SAH subdivision.
    ///
    /// `verts` holds three `Vec4` vertices per triangle. Allocates on first
    /// use and reuses the arrays on subsequent builds, which requires the
    /// tree to still be rebuildable (no conversion has happened).
    pub fn build(&mut self, verts: &[Vec4]) {
        crate::scope!("build");
        assert!(
            !verts.is_empty() && verts.len() % 3 == 0,
            "expected a non-empty vertex array with three vertices per triangle"
        );
        assert!(self.rebuildable, "tree was converted; build a fresh Bvh");
        let prim_count = (verts.len() / 3) as u32;
        // 2N slots is the upper limit for a binary tree with the reserved
        // slot; grow (or shrink) the pools to match this scene.
        let space_needed = prim_count as usize * 2;
        if self.nodes.len() != space_needed || self.primitive_indices.len() != prim_count as usize {
            self.nodes = zeroed_vec(space_needed);
            self.primitive_indices = zeroed_vec(prim_count as usize);
            self.fragments = zeroed_vec(prim_count as usize);
        }
        self.tri_count = prim_count;
        self.idx_count = prim_count;
        self.refittable = true;

        // Assign all triangles to the root; node 1 remains unused so
        // sibling pairs stay aligned to cache lines.
        let mut root_aabb = Aabb::empty();
        for i in 0..prim_count {
            let frag = Fragment::from_primitive(verts, i);
            root_aabb = root_aabb.union(&frag.aabb());
            self.fragments[i as usize] = frag;
            self.primitive_indices[i as usize] = i;
        }
        self.nodes[0] = BvhNode {
            min: root_aabb.min.into(),
            first_index: 0,
            max: root_aabb.max.into(),
            prim_count,
        };
        self.nodes[1] = BvhNode::default();
        let mut new_node_ptr = 2u32;

        // Axes thinner than this are not worth splitting along.
        let min_dim = root_aabb.diagonal() * 1e-20;

        let mut task = [0u32; TASK_STACK];
        let mut task_count = 0usize;
        let mut node_idx = 0usize;
        loop {
            loop {
                let node = self.nodes[node_idx];
                // Bin the fragment centroids on all three axes at once.
                let mut bin_aabb = [[Aabb::empty(); BINS]; 3];
                let mut bin_count = [[0u32; BINS]; 3];
                let node_min = Vec3A::from(node.min);
                let rpd3 = Vec3A::splat(BINS as f32) / node.aabb().diagonal();
                for i in 0..node.prim_count {
                    let fi = self.primitive_indices[(node.first_index + i) as usize] as usize;
                    let frag = self.fragments[fi];
                    let centroid = (Vec3A::from(frag.min) + Vec3A::from(frag.max)) * 0.5;
                    let bin = ((centroid - node_min) * rpd3)
                        .as_ivec3()
                        .clamp(glam::IVec3::ZERO, glam::IVec3::splat(BINS as i32 - 1));
                    for a in 0..3 {
                        let b = bin[a] as usize;
                        bin_aabb[a][b] = bin_aabb[a][b].union(&frag.aabb());
                        bin_count[a][b] += 1;
                    }
                }

                // Sweep the bins from both sides to get per-plane bounds and
                // counts, then pick the cheapest of the 7 candidate planes.
                let mut split_cost = BVH_FAR;
                let (mut best_axis, mut best_pos) = (0usize, 0usize);
                let (mut best_l, mut best_r) = (Aabb::empty(), Aabb::empty());
                for a in 0..3 {
                    if node.max[a] - node.min[a] <= min_dim[a] {
                        continue;
                    }
                    let mut l_box = [Aabb::empty(); BINS - 1];
                    let mut r_box = [Aabb::empty(); BINS - 1];
                    let mut anl = [BVH_FAR; BINS - 1];
                    let mut anr = [BVH_FAR; BINS - 1];
                    let (mut l_acc, mut r_acc) = (Aabb::empty(), Aabb::empty());
                    let (mut l_n, mut r_n) = (0u32, 0u32);
                    for i in 0..BINS - 1 {
                        l_acc = l_acc.union(&bin_aabb[a][i]);
                        l_box[i] = l_acc;
                        r_acc = r_acc.union(&bin_aabb[a][BINS - 1 - i]);
                        r_box[BINS - 2 - i] = r_acc;
                        l_n += bin_count[a][i];
                        r_n += bin_count[a][BINS - 1 - i];
                        anl[i] = if l_n == 0 {
                            BVH_FAR
                        } else {
                            l_acc.half_area() * l_n as f32
                        };
                        anr[BINS - 2 - i] = if r_n == 0 {
                            BVH_FAR
                        } else {
                            r_acc.half_area() * r_n as f32
                        };
                    }
                    for i in 0..BINS - 1 {
                        let cost = anl[i] + anr[i];
                        if cost < split_cost {
                            split_cost = cost;
                            best_axis = a;
                            best_pos = i;
                            best_l = l_box[i];
                            best_r = r_box[i];
                        }
                    }
                }
                if split_cost >= node.node_cost() {
                    break; // not splitting is better
                }

                // In-place two-pointer partition of the leaf's index range.
                let mut src = node.first_index;
                let mut j = node.first_index + node.prim_count;
                let rpd = rpd3[best_axis];
                let node_min_a = node_min[best_axis];
                for _ in 0..node.prim_count {
                    let fi = self.primitive_indices[src as usize] as usize;
                    let frag = &self.fragments[fi];
                    let centroid = (frag.min[best_axis] + frag.max[best_axis]) * 0.5;
                    let bin = (((centroid - node_min_a) * rpd) as i32).clamp(0, BINS as i32 - 1);
                    if bin as usize <= best_pos {
                        src += 1;
                    } else {
                        j -= 1;
                        self.primitive_indices.swap(src as usize, j as usize);
                    }
                }
                let left_count = src - node.first_index;
                let right_count = node.prim_count - left_count;
                if left_count == 0 || right_count == 0 {
                    break; // coincident centroids defeated the partition
                }

                // Children always go in a contiguous pair.
                let left_child = new_node_ptr;
                new_node_ptr += 2;
                self.nodes[left_child as usize] = BvhNode {
                    min: best_l.min.into(),
                    first_index: node.first_index,
                    max: best_l.max.into(),
                    prim_count: left_count,
                };
                self.nodes[left_child as usize + 1] = BvhNode {
                    min: best_r.min.into(),
                    first_index: j,
                    max: best_r.max.into(),
                    prim_count: right_count,
                };
                self.nodes[node_idx].first_index = left_child;
                self.nodes[node_idx].prim_count = 0;

                // Descend into the left subtree, queue the right.
                task[task_count] = left_child + 1;
                task_count += 1;
                node_idx = left_child as usize;
            }
            if task_count == 0 {
                break;
            }
            task_count -= 1;
            node_idx = task[task_count] as usize;
        }
        self.used_nodes = new_node_ptr;
    }
}
