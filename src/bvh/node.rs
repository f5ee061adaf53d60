use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::aabb::Aabb;
use crate::triangle::tri_bounds;

/// A node in the primary BVH layout, can be an inner node or leaf.
///
/// The 'traditional' 32-byte layout as proposed by Ingo Wald: when aligned
/// to a cache line boundary, two of these fit together. Sibling nodes are
/// always allocated as a contiguous pair, so an inner node only stores the
/// index of its left child.
#[derive(Default, Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct BvhNode {
    pub min: Vec3,
    /// For an inner node, the index of the left child (the right child is at
    /// `first_index + 1`). For a leaf, the index of the first entry of this
    /// leaf in the primitive index array.
    pub first_index: u32,
    pub max: Vec3,
    /// Number of primitives contained in this node.
    /// If prim_count is 0, this is an inner node, otherwise a leaf.
    pub prim_count: u32,
}

impl BvhNode {
    #[inline(always)]
    pub fn is_leaf(&self) -> bool {
        self.prim_count > 0 // empty leaves do not exist
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

    #[inline(always)]
    pub fn half_area(&self) -> f32 {
        self.aabb().half_area()
    }

    /// SAH cost of keeping this node a leaf over its current primitives.
    #[inline(always)]
    pub fn node_cost(&self) -> f32 {
        self.half_area() * self.prim_count as f32
    }
}

/// The bounds of an input primitive, 32 bytes.
///
/// The name 'Fragment' is from "Parallel Spatial Splits in Bounding Volume
/// Hierarchies", Fuetterling et al., and refers to the potential splitting
/// of these boxes during spatial-split construction.
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct Fragment {
    pub min: Vec3,
    /// Index of the original primitive.
    pub primitive_id: u32,
    pub max: Vec3,
    /// Non-zero if this fragment is the result of clipping.
    pub clipped: u32,
}

impl Fragment {
    /// The fragment of triangle `prim` of the vertex soup: its bounds, the
    /// originating primitive id and no clipping.
    #[inline(always)]
    pub fn from_primitive(verts: &[Vec4], prim: u32) -> Self {
        let (bmin, bmax) = tri_bounds(verts, prim);
        Fragment {
            min: bmin.into(),
            primitive_id: prim,
            max: bmax.into(),
            clipped: 0,
        }
    }

    #[inline(always)]
    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.min.into(), self.max.into())
    }

    /// A fragment clipped away entirely has its min left at the far sentinel.
    #[inline(always)]
    pub fn valid_box(&self) -> bool {
        self.min.x < crate::BVH_FAR
    }
}
