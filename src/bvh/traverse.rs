//! Single-ray traversal of the primary layout.

use glam::Vec4;

use crate::bvh::Bvh;
use crate::ray::Ray;
use crate::triangle::intersect_tri;
use crate::BVH_FAR;

/// Traversal stack depth; enough for any tree the builders produce.
pub(crate) const TRAVERSAL_STACK: usize = 64;

impl Bvh {
    /// Ordered near-child-first traversal of the primary layout.
    /// Returns the number of nodes visited.
    pub(crate) fn intersect_wald32(&self, ray: &mut Ray, verts: &[Vec4]) -> u32 {
        assert!(self.used_nodes > 0, "intersect called before build");
        let mut stack = [0u32; TRAVERSAL_STACK];
        let mut stack_ptr = 0usize;
        let mut node_idx = 0u32;
        let mut steps = 0u32;
        loop {
            steps += 1;
            let node = &self.nodes[node_idx as usize];
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
            let mut near = node.first_index;
            let mut far = node.first_index + 1;
            let mut near_dist = self.nodes[near as usize].aabb().intersect_ray(ray);
            let mut far_dist = self.nodes[far as usize].aabb().intersect_ray(ray);
            if near_dist > far_dist {
                core::mem::swap(&mut near_dist, &mut far_dist);
                core::mem::swap(&mut near, &mut far);
            }
            if near_dist == BVH_FAR {
                // missed both child nodes
                if stack_ptr == 0 {
                    break;
                }
                stack_ptr -= 1;
                node_idx = stack[stack_ptr];
            } else {
                // continue with the nearest; queue the far child if hit
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

#[cfg(test)]
mod tests {
    use crate::bvh::{Bvh, Layout};
    use crate::ray::Ray;
    use crate::test_util::geometry::{random_triangles, two_triangles, unit_triangle};
    use crate::BVH_FAR;
    use glam::vec3a;

    #[test]
    fn test_single_triangle_hit() {
        let verts = unit_triangle();
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        let mut ray = Ray::new(vec3a(0.25, 0.25, -1.0), vec3a(0.0, 0.0, 1.0));
        let steps = bvh.intersect(&mut ray, &verts, Layout::Wald32);
        assert_eq!(ray.hit.t, 1.0);
        assert_eq!(ray.hit.u, 0.25);
        assert_eq!(ray.hit.v, 0.25);
        assert_eq!(ray.hit.prim, 0);
        assert!(steps >= 1);
    }

    #[test]
    fn test_parallel_ray_misses() {
        let verts = unit_triangle();
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        let mut ray = Ray::new(vec3a(0.0, 0.0, 1.0), vec3a(1.0, 0.0, 0.0));
        bvh.intersect(&mut ray, &verts, Layout::Wald32);
        assert_eq!(ray.hit.t, BVH_FAR);
    }

    #[test]
    fn test_second_triangle_needs_descent() {
        let verts = two_triangles();
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        let mut ray = Ray::new(vec3a(4.25, 0.25, -1.0), vec3a(0.0, 0.0, 1.0));
        let steps = bvh.intersect(&mut ray, &verts, Layout::Wald32);
        assert_eq!(ray.hit.prim, 1);
        assert!(steps >= 2);
    }

    #[test]
    fn test_repeated_intersection_only_tightens() {
        let verts = random_triangles(512, 21);
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        let mut ray = Ray::new(vec3a(0.5, 0.5, -1.0), vec3a(0.0488, 0.0, 0.9988));
        bvh.intersect(&mut ray, &verts, Layout::Wald32);
        let first_t = ray.hit.t;
        bvh.intersect(&mut ray, &verts, Layout::Wald32);
        assert!(ray.hit.t <= first_t);
    }

    #[test]
    fn test_pruning_beats_brute_force() {
        let verts = random_triangles(8192, 42);
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        let mut ray = Ray::new(vec3a(0.5, 0.5, -1.0), vec3a(0.0488, 0.0, 0.9988));
        let steps = bvh.intersect(&mut ray, &verts, Layout::Wald32);
        assert!(ray.hit.t < 10.0, "a packed scene should be hit");
        assert!(
            steps < bvh.tri_count / 4,
            "step count {steps} is not sublinear in {} triangles",
            bvh.tri_count
        );
    }

    #[test]
    fn test_sbvh_traversal_matches_reference() {
        let verts = random_triangles(1024, 8);
        let mut reference = Bvh::default();
        reference.build(&verts);
        let mut sbvh = Bvh::default();
        sbvh.build_hq(&verts);
        for i in 0..64u32 {
            let x = crate::test_util::sampling::hash_noise(i, 100);
            let y = crate::test_util::sampling::hash_noise(i, 200);
            let mut a = Ray::new(vec3a(x, y, -1.0), vec3a(0.0, 0.0, 1.0));
            let mut b = a;
            reference.intersect(&mut a, &verts, Layout::Wald32);
            sbvh.intersect(&mut b, &verts, Layout::Wald32);
            assert_eq!(a.hit.prim, b.hit.prim);
            if a.hit.prim != crate::INVALID {
                assert!((a.hit.t - b.hit.t).abs() <= 1e-4 * a.hit.t.max(1.0));
            }
        }
    }
}
