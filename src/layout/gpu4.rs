//! The 4-wide GPU format: 64 bytes per node, child bounds quantized to
//! bytes relative to the parent box, triangle data embedded in the same
//! buffer right behind each node. The buffer is a flat sequence of
//! 16-byte blocks; u32 words are bit-reinterpreted into f32 lanes, no
//! byte swapping (little-endian assumed).
//!
//! Node layout:
//! - block 0: parent min xyz, 4 quantized child x-min bytes
//! - block 1: parent extent xyz / 255, 4 quantized child x-max bytes
//! - block 2: 4x y-min, 4x y-max, 4x z-min, 4x z-max bytes
//! - block 3: 4 child info words
//!
//! A child info word is 0 for an empty slot. With the MSB set the child
//! is a leaf: bits 30..16 carry the triangle count and bits 15..0 the
//! offset from the node start to its triangle data, in blocks. With the
//! MSB clear it is the absolute block offset of the child node.
//! Leaf triangles are three `Vec4` vertices each; the w lane of the
//! first vertex carries the original primitive index, bit-reinterpreted.

use bytemuck::zeroed_vec;
use glam::{vec4, Vec3, Vec3A, Vec4};

use crate::aabb::Aabb;
use crate::bvh::Bvh;

/// Leaf flag of a child info word.
pub const GPU4_LEAF: u32 = 0x8000_0000;

impl Bvh {
    /// Convert the 4-wide layout into the GPU format. Reads `verts` to
    /// embed the triangle data by value.
    pub(crate) fn convert_wide4_to_gpu(&mut self, verts: &[Vec4]) {
        crate::scope!("convert_wide4_to_gpu");
        assert!(
            !self.wide4_nodes.is_empty(),
            "the GPU format is converted from the 4-wide layout; convert to that first"
        );
        // A 'block' is 16 bytes: four per node plus three per triangle,
        // stored in one buffer.
        let blocks_needed = self.used_nodes as usize * 4 + 6 * self.tri_count as usize;
        let mut data: Vec<Vec4> = zeroed_vec(blocks_needed);

        let mut stack = [0u32; 128];
        let mut stack_ptr = 0usize;
        let mut node_idx = 0u32;
        let mut new_ptr = 0u32;
        // Float-lane position where the parent expects this node's offset.
        let mut patch_pos = 0u32;
        loop {
            let node = self.wide4_nodes[node_idx as usize];
            // A leaf root cannot be expressed; the smallest tree is one node.
            assert!(!node.is_leaf(), "GPU conversion expects an interior root");
            let base = new_ptr;
            new_ptr += 4;
            data[base as usize] = vec4(node.min.x, node.min.y, node.min.z, 0.0);
            let ext = (node.max - node.min) * (1.0 / 255.0);
            data[base as usize + 1] = vec4(ext.x, ext.y, ext.z, 0.0);

            // Leaf children first: their triangles go right behind this
            // node, so the relative offsets stay small.
            let mut child_info = [0u32; 4];
            for i in 0..4 {
                let child_idx = node.child[i];
                if child_idx == 0 {
                    continue; // empty slot
                }
                let child = self.wide4_nodes[child_idx as usize];
                if !child.is_leaf() {
                    continue;
                }
                child_info[i] = (new_ptr - base) | (child.prim_count << 16) | GPU4_LEAF;
                for j in 0..child.prim_count {
                    let prim = self.primitive_indices[(child.first_index + j) as usize];
                    let mut v0 = verts[prim as usize * 3];
                    v0.w = f32::from_bits(prim);
                    data[new_ptr as usize] = v0;
                    data[new_ptr as usize + 1] = verts[prim as usize * 3 + 1];
                    data[new_ptr as usize + 2] = verts[prim as usize * 3 + 2];
                    new_ptr += 3;
                }
            }
            // Interior children are emitted later; remember which lane of
            // block 3 to patch with their final position.
            for i in 0..4 {
                let child_idx = node.child[i];
                if child_idx == 0 || self.wide4_nodes[child_idx as usize].is_leaf() {
                    continue;
                }
                stack[stack_ptr] = (base + 3) * 4 + i as u32;
                stack[stack_ptr + 1] = child_idx;
                stack_ptr += 2;
            }

            // Quantize the child bounds relative to this node: floor the
            // mins and ceil the maxes so the byte boxes stay conservative.
            let extent = node.max - node.min;
            let scale = Vec3::new(
                if extent.x > 1e-10 { 254.999 / extent.x } else { 0.0 },
                if extent.y > 1e-10 { 254.999 / extent.y } else { 0.0 },
                if extent.z > 1e-10 { 254.999 / extent.z } else { 0.0 },
            );
            let mut qmin = [[0u8; 4]; 3];
            let mut qmax = [[0u8; 4]; 3];
            for i in 0..4 {
                let child_idx = node.child[i];
                if child_idx == 0 {
                    continue;
                }
                let child = &self.wide4_nodes[child_idx as usize];
                for a in 0..3 {
                    let rel_min = (child.min[a] - node.min[a]) * scale[a];
                    let rel_max = (child.max[a] - node.min[a]) * scale[a];
                    qmin[a][i] = rel_min.floor() as u8;
                    qmax[a][i] = rel_max.ceil() as u8;
                }
            }
            write_lane_bits(&mut data, base, 3, u32::from_le_bytes(qmin[0]));
            write_lane_bits(&mut data, base + 1, 3, u32::from_le_bytes(qmax[0]));
            data[base as usize + 2] = vec4(
                f32::from_bits(u32::from_le_bytes(qmin[1])),
                f32::from_bits(u32::from_le_bytes(qmax[1])),
                f32::from_bits(u32::from_le_bytes(qmin[2])),
                f32::from_bits(u32::from_le_bytes(qmax[2])),
            );
            data[base as usize + 3] = vec4(
                f32::from_bits(child_info[0]),
                f32::from_bits(child_info[1]),
                f32::from_bits(child_info[2]),
                f32::from_bits(child_info[3]),
            );

            // Tell the parent where this node ended up.
            if patch_pos > 0 {
                write_lane_bits(&mut data, patch_pos >> 2, (patch_pos & 3) as usize, base);
            }
            if stack_ptr == 0 {
                break;
            }
            stack_ptr -= 1;
            node_idx = stack[stack_ptr];
            stack_ptr -= 1;
            patch_pos = stack[stack_ptr];
        }
        data.truncate(new_ptr as usize);
        self.gpu4_blocks = data;
    }
}

#[inline(always)]
fn write_lane_bits(data: &mut [Vec4], block: u32, lane: usize, bits: u32) {
    data[block as usize][lane] = f32::from_bits(bits);
}

/// Decoded view of one GPU node, the reference for what a traversal
/// kernel reads back out of the block buffer.
pub struct Gpu4NodeView {
    pub min: Vec3A,
    /// Parent extent already divided by 255; a quantized byte times this
    /// plus `min` yields the dequantized coordinate.
    pub ext: Vec3A,
    pub child_info: [u32; 4],
    pub child_aabb: [Aabb; 4],
}

impl Gpu4NodeView {
    /// Decode the node starting at 16-byte block `block` of the buffer.
    pub fn decode(data: &[Vec4], block: u32) -> Self {
        let b = block as usize;
        let min = Vec3A::new(data[b].x, data[b].y, data[b].z);
        let ext = Vec3A::new(data[b + 1].x, data[b + 1].y, data[b + 1].z);
        let xmin = data[b].w.to_bits().to_le_bytes();
        let xmax = data[b + 1].w.to_bits().to_le_bytes();
        let ymin = data[b + 2].x.to_bits().to_le_bytes();
        let ymax = data[b + 2].y.to_bits().to_le_bytes();
        let zmin = data[b + 2].z.to_bits().to_le_bytes();
        let zmax = data[b + 2].w.to_bits().to_le_bytes();
        let mut child_info = [0u32; 4];
        let mut child_aabb = [Aabb::empty(); 4];
        for i in 0..4 {
            child_info[i] = data[b + 3][i].to_bits();
            child_aabb[i] = Aabb::new(
                min + Vec3A::new(xmin[i] as f32, ymin[i] as f32, zmin[i] as f32) * ext,
                min + Vec3A::new(xmax[i] as f32, ymax[i] as f32, zmax[i] as f32) * ext,
            );
        }
        Self {
            min,
            ext,
            child_info,
            child_aabb,
        }
    }

    #[inline(always)]
    pub fn is_empty_slot(&self, i: usize) -> bool {
        self.child_info[i] == 0
    }

    #[inline(always)]
    pub fn is_leaf(&self, i: usize) -> bool {
        self.child_info[i] & GPU4_LEAF != 0
    }

    /// Triangle count and absolute block offset of a leaf child's data.
    #[inline(always)]
    pub fn leaf_tris(&self, node_block: u32, i: usize) -> (u32, u32) {
        let info = self.child_info[i];
        ((info >> 16) & 0x7fff, node_block + (info & 0xffff))
    }

    /// Absolute block offset of an interior child node.
    #[inline(always)]
    pub fn child_block(&self, i: usize) -> u32 {
        self.child_info[i] & 0x7fff_ffff
    }
}
