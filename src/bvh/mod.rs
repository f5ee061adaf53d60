//! The BVH object: builders, refitting, optimization, layout conversion
//! and traversal dispatch.

pub mod builder;
pub mod node;
pub mod optimize;
pub mod sbvh;
pub mod traverse;

use std::collections::HashSet;

use glam::Vec4;

use crate::aabb::Aabb;
use crate::layout::aila_laine::AilaLaineNode;
use crate::layout::soa::SoaNode;
use crate::layout::verbose::VerboseNode;
use crate::layout::wide::WideNode;
use crate::ray::Ray;
use crate::BVH_FAR;
use node::{BvhNode, Fragment};

/// SAH cost multiplier for intersecting the primitives of a leaf.
pub const SAH_LEAF_COST: f32 = 2.0;
/// SAH cost multiplier for traversing an inner node.
pub const SAH_TRAVERSAL_COST: f32 = 3.0;

/// The concrete in-memory encodings of a BVH tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// The primary 32-byte build-time layout; root at node 0, node 1 unused.
    Wald32,
    /// 64-byte nodes storing both child AABBs in the parent.
    AilaLaine,
    /// Same data as [`Layout::AilaLaine`] with child AABBs in SoA lanes.
    AltSoa,
    /// Nodes with explicit left/right/parent/sibling links, for the optimizer.
    Verbose,
    /// 4-wide nodes produced by collapsing the binary tree.
    Wide4,
    /// 8-wide nodes produced by collapsing the binary tree.
    Wide8,
    /// Quantized 4-wide GPU format with embedded triangle data.
    Wide4Gpu,
}

/// A BVH over a triangle soup, owning its node, index and fragment arrays.
///
/// The vertex array is owned by the caller and passed to every operation
/// that reads geometry. A `Bvh` starts empty; the first [`Bvh::build`] or
/// [`Bvh::build_hq`] sizes all arrays, subsequent builds reuse them.
/// Layout conversions populate the per-layout node arrays and make the
/// tree non-rebuildable, since a rebuild would silently desynchronize the
/// converted copies.
pub struct Bvh {
    /// Node pool in the primary layout. The root is always node 0; node 1
    /// stays unused so sibling pairs share a 64-byte cache line.
    pub nodes: Vec<BvhNode>,
    /// Number of node slots handed out by the most recent build.
    pub used_nodes: u32,
    /// Mapping from leaf slots to original primitive indices.
    pub primitive_indices: Vec<u32>,
    /// Per-primitive bounds; may outnumber primitives after spatial splits.
    pub fragments: Vec<Fragment>,
    /// Number of input triangles.
    pub tri_count: u32,
    /// Number of entries in `primitive_indices`; exceeds `tri_count` for
    /// a spatial-split tree.
    pub idx_count: u32,

    pub aila_laine_nodes: Vec<AilaLaineNode>,
    pub soa_nodes: Vec<SoaNode>,
    pub verbose_nodes: Vec<VerboseNode>,
    pub wide4_nodes: Vec<WideNode<4>>,
    pub wide8_nodes: Vec<WideNode<8>>,
    /// The 4-wide GPU format as raw 16-byte blocks.
    pub gpu4_blocks: Vec<Vec4>,

    /// Rebuilds are safe only while no layout conversion has happened.
    pub rebuildable: bool,
    /// Refits are safe only while the tree has no spatial splits.
    pub refittable: bool,
    /// xorshift32 state for the optimizer's subtree picks. Deterministic;
    /// reseed for reproducible optimization sequences.
    pub opt_seed: u32,
}

impl Default for Bvh {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            used_nodes: 0,
            primitive_indices: Vec::new(),
            fragments: Vec::new(),
            tri_count: 0,
            idx_count: 0,
            aila_laine_nodes: Vec::new(),
            soa_nodes: Vec::new(),
            verbose_nodes: Vec::new(),
            wide4_nodes: Vec::new(),
            wide8_nodes: Vec::new(),
            gpu4_blocks: Vec::new(),
            rebuildable: true,
            refittable: true,
            opt_seed: 0x12345678,
        }
    }
}

impl Bvh {
    /// Determine the SAH cost of the tree, normalized by the root area.
    /// This provides an indication of the quality of the BVH: lower is better.
    pub fn sah_cost(&self) -> f32 {
        self.sah_cost_node(0)
    }

    fn sah_cost_node(&self, node_idx: u32) -> f32 {
        let node = &self.nodes[node_idx as usize];
        if node.is_leaf() {
            return SAH_LEAF_COST * node.half_area() * node.prim_count as f32;
        }
        let cost = SAH_TRAVERSAL_COST * node.half_area()
            + self.sah_cost_node(node.first_index)
            + self.sah_cost_node(node.first_index + 1);
        if node_idx == 0 {
            cost / node.half_area()
        } else {
            cost
        }
    }

    /// Determine the number of reachable nodes in the primary layout.
    /// Typically `used_nodes - 1` since node 1 is always unused, but some
    /// conversions may leave additional gaps.
    pub fn node_count(&self) -> u32 {
        self.node_count_from(0)
    }

    fn node_count_from(&self, node_idx: u32) -> u32 {
        let node = &self.nodes[node_idx as usize];
        let mut count = 1;
        if !node.is_leaf() {
            count += self.node_count_from(node.first_index)
                + self.node_count_from(node.first_index + 1);
        }
        count
    }

    /// Recompute all node bounds from the current vertex positions.
    ///
    /// For animated meshes where the topology remains intact. Repeated
    /// refitting tends to degrade the tree and slow down ray tracing;
    /// rebuild when that happens.
    ///
    /// Panics if the tree was built with spatial splits: clipped fragments
    /// cannot be reconstructed from vertex positions alone.
    pub fn refit(&mut self, verts: &[Vec4]) {
        assert!(
            self.refittable,
            "refit is not possible for a tree with spatial splits"
        );
        assert!(self.used_nodes > 0, "refit called before build");
        // Children are always allocated after their parent, so a reverse
        // sweep sees both children before every inner node.
        for i in (0..self.used_nodes as usize).rev() {
            if i == 1 {
                continue; // reserved slot
            }
            let node = self.nodes[i];
            if node.is_leaf() {
                let mut aabb = Aabb::empty();
                for j in 0..node.prim_count {
                    let prim = self.primitive_indices[(node.first_index + j) as usize];
                    let vert_idx = prim as usize * 3;
                    aabb.extend(verts[vert_idx].truncate().into());
                    aabb.extend(verts[vert_idx + 1].truncate().into());
                    aabb.extend(verts[vert_idx + 2].truncate().into());
                }
                self.nodes[i].set_aabb(aabb);
            } else {
                let left = self.nodes[node.first_index as usize].aabb();
                let right = self.nodes[node.first_index as usize + 1].aabb();
                self.nodes[i].set_aabb(left.union(&right));
            }
        }
    }

    /// Populate the `to` layout from the `from` layout.
    ///
    /// `verts` is only read by the conversion that embeds triangle data
    /// (4-wide to the GPU format). After any conversion the tree is no
    /// longer rebuildable. Unsupported pairs panic.
    pub fn convert(&mut self, from: Layout, to: Layout, verts: &[Vec4]) {
        match (from, to) {
            (Layout::Wald32, Layout::AilaLaine) => self.convert_to_aila_laine(),
            (Layout::Wald32, Layout::AltSoa) => self.convert_to_soa(),
            (Layout::Wald32, Layout::Verbose) => self.convert_to_verbose(),
            (Layout::Wald32, Layout::Wide4) => self.convert_to_wide4(),
            (Layout::Wald32, Layout::Wide8) => self.convert_to_wide8(),
            (Layout::Wide4, Layout::Wide4Gpu) => self.convert_wide4_to_gpu(verts),
            (Layout::Verbose, Layout::Wald32) => self.convert_verbose_to_wald(),
            _ => panic!("unsupported layout conversion {from:?} -> {to:?}"),
        }
        // Hard to guarantee safe rebuilds once layouts have diverged.
        self.rebuildable = false;
    }

    /// Intersect a ray with the tree in the given layout.
    ///
    /// Intersection details land in `ray.hit`; the returned value is the
    /// number of nodes visited, useful for heatmap visualization of the
    /// tree structure. The layout must have been built or converted to.
    pub fn intersect(&self, ray: &mut Ray, verts: &[Vec4], layout: Layout) -> u32 {
        match layout {
            Layout::Wald32 => self.intersect_wald32(ray, verts),
            Layout::AilaLaine => self.intersect_aila_laine(ray, verts),
            Layout::AltSoa => self.intersect_soa(ray, verts),
            Layout::Wide4 => self.intersect_wide4(ray, verts),
            Layout::Wide8 => self.intersect_wide8(ray, verts),
            _ => panic!("no traversal for layout {layout:?}"),
        }
    }

    /// Check structural invariants of the primary layout against the
    /// vertex soup. Debug aid; panics on violation.
    pub fn validate(&self, verts: &[Vec4]) {
        assert!(self.used_nodes > 0, "validate called before build");
        let mut discovered = HashSet::new();
        let mut leaf_slots = 0u32;
        let mut max_depth = 0u32;
        self.validate_impl(verts, 0, 0, &mut discovered, &mut leaf_slots, &mut max_depth);
        // Every original primitive must be reachable through some leaf.
        for prim in 0..self.tri_count {
            assert!(
                discovered.contains(&prim),
                "primitive {prim} not referenced by any leaf"
            );
        }
        if self.refittable {
            // Without spatial splits the leaf slots are a permutation.
            assert_eq!(leaf_slots, self.tri_count);
            assert_eq!(discovered.len() as u32, self.tri_count);
        } else {
            assert!(leaf_slots <= self.idx_count);
        }
        if max_depth > 64 {
            log::warn!(
                "bvh depth is {max_depth}; a depth beyond the traversal stack of 64 \
                 indicates something pathological in the scene"
            );
        }
    }

    fn validate_impl(
        &self,
        verts: &[Vec4],
        node_idx: u32,
        depth: u32,
        discovered: &mut HashSet<u32>,
        leaf_slots: &mut u32,
        max_depth: &mut u32,
    ) {
        *max_depth = (*max_depth).max(depth);
        let node = &self.nodes[node_idx as usize];
        if node.is_leaf() {
            let mut tight = Aabb::empty();
            for i in 0..node.prim_count {
                let prim = self.primitive_indices[(node.first_index + i) as usize];
                discovered.insert(prim);
                *leaf_slots += 1;
                if self.refittable {
                    let frag = Fragment::from_primitive(verts, prim);
                    tight = tight.union(&frag.aabb());
                    assert!(
                        node.aabb().contains_aabb(&frag.aabb()),
                        "primitive {prim} does not fit in leaf {node_idx}"
                    );
                }
            }
            if self.refittable {
                assert_eq!(
                    tight,
                    node.aabb(),
                    "leaf {node_idx} bounds are not tight over its primitives"
                );
            }
        } else {
            let left = &self.nodes[node.first_index as usize];
            let right = &self.nodes[node.first_index as usize + 1];
            assert!(
                node.aabb().contains_aabb(&left.aabb())
                    && node.aabb().contains_aabb(&right.aabb()),
                "children of node {node_idx} are not contained in it"
            );
            self.validate_impl(verts, node.first_index, depth + 1, discovered, leaf_slots, max_depth);
            self.validate_impl(
                verts,
                node.first_index + 1,
                depth + 1,
                discovered,
                leaf_slots,
                max_depth,
            );
        }
    }

    /// True when the slab test reports a hit for the root bounds; cheap
    /// whole-tree rejection for callers batching rays.
    pub fn root_hit(&self, ray: &Ray) -> bool {
        self.nodes[0].aabb().intersect_ray(ray) < BVH_FAR
    }
}
