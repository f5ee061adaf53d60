//! Shallow 4-wide and 8-wide layouts, produced by collapsing the binary
//! tree: each inner node repeatedly adopts the children of whichever of
//! its children has the largest surface area, until the slots run out.
//! Fewer, fatter nodes mean shorter traversal paths.

use glam::{Vec3, Vec4};

use crate::aabb::Aabb;
use crate::bvh::Bvh;
use crate::ray::Ray;
use crate::triangle::intersect_tri;
use crate::BVH_FAR;

/// A node with up to `W` children. Wide nodes share index space with the
/// primary array they were collapsed from, so child 0 never occurs and
/// doubles as the empty-slot marker.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct WideNode<const W: usize> {
    pub min: Vec3,
    pub first_index: u32,
    pub max: Vec3,
    pub prim_count: u32,
    pub child: [u32; W],
    pub child_count: u32,
}

impl<const W: usize> Default for WideNode<W> {
    fn default() -> Self {
        Self {
            min: Vec3::ZERO,
            first_index: 0,
            max: Vec3::ZERO,
            prim_count: 0,
            child: [0; W],
            child_count: 0,
        }
    }
}

impl<const W: usize> WideNode<W> {
    #[inline(always)]
    pub fn is_leaf(&self) -> bool {
        self.prim_count > 0
    }

    #[inline(always)]
    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.min.into(), self.max.into())
    }
}

/// Mirror the primary nodes one-to-one, then greedily widen every inner
/// node. Collapsing never worsens SAH: a child's own box is only ever
/// replaced by the pair of tighter boxes below it. Adopted-out nodes
/// leave gaps in the array; indices stay those of the primary layout.
fn collapse<const W: usize>(nodes: &[crate::bvh::node::BvhNode], used: u32) -> Vec<WideNode<W>> {
    let mut wide: Vec<WideNode<W>> = vec![WideNode::default(); used as usize];
    for i in 0..used as usize {
        if i == 1 {
            continue;
        }
        let orig = &nodes[i];
        let node = &mut wide[i];
        node.min = orig.min;
        node.max = orig.max;
        if orig.is_leaf() {
            node.prim_count = orig.prim_count;
            node.first_index = orig.first_index;
        } else {
            node.child[0] = orig.first_index;
            node.child[1] = orig.first_index + 1;
            node.child_count = 2;
        }
    }
    let mut stack = [0u32; 128];
    let mut stack_ptr = 1usize;
    let mut node_idx = 0usize;
    stack[0] = 0; // root
    loop {
        loop {
            // Adopt the children of the largest interior child that still
            // fits in the remaining slots.
            let node = &wide[node_idx];
            let mut best_child = None;
            let mut best_area = 0.0;
            for i in 0..node.child_count as usize {
                let child = &wide[node.child[i] as usize];
                if !child.is_leaf()
                    && node.child_count - 1 + child.child_count <= W as u32
                {
                    let area = child.aabb().half_area();
                    if area > best_area {
                        best_child = Some(i);
                        best_area = area;
                    }
                }
            }
            let Some(best) = best_child else {
                break; // could not adopt
            };
            let adopted = wide[wide[node_idx].child[best] as usize];
            let node = &mut wide[node_idx];
            node.child[best] = adopted.child[0];
            for i in 1..adopted.child_count as usize {
                node.child[node.child_count as usize] = adopted.child[i];
                node.child_count += 1;
            }
        }
        // Done with this node; proceed with its children.
        let node = wide[node_idx];
        for i in 0..node.child_count as usize {
            if !wide[node.child[i] as usize].is_leaf() {
                stack[stack_ptr] = node.child[i];
                stack_ptr += 1;
            }
        }
        if stack_ptr == 0 {
            break;
        }
        stack_ptr -= 1;
        node_idx = stack[stack_ptr] as usize;
    }
    wide
}

/// Unordered stack traversal of a wide layout; every hit child is queued.
/// Kept simple on purpose, the wide layouts mainly exist as conversion
/// sources for GPU formats.
fn intersect_wide<const W: usize>(
    nodes: &[WideNode<W>],
    primitive_indices: &[u32],
    ray: &mut Ray,
    verts: &[Vec4],
) -> u32 {
    let mut stack = [0u32; 128];
    let mut stack_ptr = 0usize;
    let mut node_idx = 0u32;
    let mut steps = 0u32;
    loop {
        steps += 1;
        let node = &nodes[node_idx as usize];
        if node.is_leaf() {
            for i in 0..node.prim_count {
                let prim = primitive_indices[(node.first_index + i) as usize];
                intersect_tri(ray, verts, prim);
            }
        } else {
            for i in 0..node.child_count as usize {
                let child = &nodes[node.child[i] as usize];
                if child.aabb().intersect_ray(ray) < BVH_FAR {
                    stack[stack_ptr] = node.child[i];
                    stack_ptr += 1;
                }
            }
        }
        if stack_ptr == 0 {
            break;
        }
        stack_ptr -= 1;
        node_idx = stack[stack_ptr];
    }
    steps
}

impl Bvh {
    pub(crate) fn convert_to_wide4(&mut self) {
        assert!(self.used_nodes > 0, "convert called before build");
        self.wide4_nodes = collapse(&self.nodes, self.used_nodes);
    }

    pub(crate) fn convert_to_wide8(&mut self) {
        assert!(self.used_nodes > 0, "convert called before build");
        self.wide8_nodes = collapse(&self.nodes, self.used_nodes);
    }

    pub(crate) fn intersect_wide4(&self, ray: &mut Ray, verts: &[Vec4]) -> u32 {
        assert!(
            !self.wide4_nodes.is_empty(),
            "no 4-wide layout; convert first"
        );
        intersect_wide(&self.wide4_nodes, &self.primitive_indices, ray, verts)
    }

    pub(crate) fn intersect_wide8(&self, ray: &mut Ray, verts: &[Vec4]) -> u32 {
        assert!(
            !self.wide8_nodes.is_empty(),
            "no 8-wide layout; convert first"
        );
        intersect_wide(&self.wide8_nodes, &self.primitive_indices, ray, verts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::Layout;
    use crate::test_util::geometry::random_triangles;
    use glam::vec3a;

    fn assert_wide_invariants<const W: usize>(nodes: &[WideNode<W>]) {
        let mut stack = vec![0u32];
        while let Some(idx) = stack.pop() {
            let node = &nodes[idx as usize];
            if node.is_leaf() {
                continue;
            }
            assert!(node.child_count >= 2 && node.child_count <= W as u32);
            for i in 0..node.child_count as usize {
                let child = &nodes[node.child[i] as usize];
                assert!(
                    node.aabb().contains_aabb(&child.aabb()),
                    "wide child escapes its parent"
                );
                stack.push(node.child[i]);
            }
        }
    }

    #[test]
    fn test_collapse_invariants() {
        let verts = random_triangles(1024, 51);
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        bvh.convert(Layout::Wald32, Layout::Wide4, &verts);
        bvh.convert(Layout::Wald32, Layout::Wide8, &verts);
        assert_wide_invariants(&bvh.wide4_nodes);
        assert_wide_invariants(&bvh.wide8_nodes);
    }

    #[test]
    fn test_wide_traversal_matches_primary() {
        let verts = random_triangles(1024, 53);
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        bvh.convert(Layout::Wald32, Layout::Wide4, &verts);
        bvh.convert(Layout::Wald32, Layout::Wide8, &verts);
        for i in 0..64u32 {
            let x = crate::test_util::sampling::hash_noise(i, 11);
            let y = crate::test_util::sampling::hash_noise(i, 12);
            let mut a = Ray::new(vec3a(x, y, -1.0), vec3a(0.0, 0.0, 1.0));
            let mut b = a;
            let mut c = a;
            bvh.intersect(&mut a, &verts, Layout::Wald32);
            bvh.intersect(&mut b, &verts, Layout::Wide4);
            bvh.intersect(&mut c, &verts, Layout::Wide8);
            assert_eq!(a.hit.prim, b.hit.prim);
            assert_eq!(a.hit.prim, c.hit.prim);
        }
    }

    #[test]
    fn test_wide8_is_no_deeper_than_wide4() {
        fn depth<const W: usize>(nodes: &[WideNode<W>], idx: u32) -> u32 {
            let node = &nodes[idx as usize];
            if node.is_leaf() {
                return 1;
            }
            let mut max = 0;
            for i in 0..node.child_count as usize {
                max = max.max(depth(nodes, node.child[i]));
            }
            max + 1
        }
        let verts = random_triangles(2048, 55);
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        bvh.convert(Layout::Wald32, Layout::Wide4, &verts);
        bvh.convert(Layout::Wald32, Layout::Wide8, &verts);
        assert!(depth(&bvh.wide8_nodes, 0) <= depth(&bvh.wide4_nodes, 0));
    }
}
