#[cfg(test)]
mod tests {

    use glam::{vec3a, vec4, Vec3A, Vec4};
    use wbvh::{
        aabb::Aabb,
        bvh::{node::BvhNode, Bvh, Layout},
        ray::Ray,
        test_util::{
            geometry::{random_triangles, two_triangles, unit_triangle},
            sampling::hash_noise,
        },
        triangle::intersect_tri,
        BVH_FAR, INVALID,
    };

    /// Closest hit over every triangle, no acceleration structure.
    fn brute_force(ray: &mut Ray, verts: &[Vec4]) {
        for prim in 0..(verts.len() / 3) as u32 {
            intersect_tri(ray, verts, prim);
        }
    }

    fn scene_rays(count: u32, seed: u32) -> Vec<Ray> {
        (0..count)
            .map(|i| {
                let x = hash_noise(i, seed);
                let y = hash_noise(i, seed + 1);
                let dx = hash_noise(i, seed + 2) * 0.2 - 0.1;
                let dy = hash_noise(i, seed + 3) * 0.2 - 0.1;
                Ray::new(vec3a(x, y, -1.0), vec3a(dx, dy, 1.0))
            })
            .collect()
    }

    #[test]
    fn single_triangle_boundary_case() {
        let verts = unit_triangle();
        let mut bvh = Bvh::default();
        bvh.build(&verts);

        let mut hit = Ray::new(vec3a(0.25, 0.25, -1.0), vec3a(0.0, 0.0, 1.0));
        bvh.intersect(&mut hit, &verts, Layout::Wald32);
        assert_eq!(
            (hit.hit.t, hit.hit.u, hit.hit.v, hit.hit.prim),
            (1.0, 0.25, 0.25, 0)
        );

        let mut parallel = Ray::new(vec3a(0.0, 0.0, 1.0), vec3a(1.0, 0.0, 0.0));
        bvh.intersect(&mut parallel, &verts, Layout::Wald32);
        assert_eq!(parallel.hit.t, BVH_FAR);
        assert_eq!(parallel.hit.prim, INVALID);
    }

    #[test]
    fn disjoint_triangles_boundary_case() {
        let verts = two_triangles();
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        let mut ray = Ray::new(vec3a(4.25, 0.25, -1.0), vec3a(0.0, 0.0, 1.0));
        let steps = bvh.intersect(&mut ray, &verts, Layout::Wald32);
        assert_eq!(ray.hit.prim, 1);
        assert!(steps >= 2);
    }

    #[test]
    fn packed_scene_traversal_is_sublinear() {
        let verts = random_triangles(8192, 0);
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        bvh.validate(&verts);
        let mut ray = Ray::new(vec3a(0.5, 0.5, -1.0), vec3a(0.0488, 0.0, 0.9988));
        let steps = bvh.intersect(&mut ray, &verts, Layout::Wald32);
        assert!(ray.hit.t < 10.0);
        assert!(steps < bvh.tri_count / 8);

        // And the result agrees with testing every triangle.
        let mut reference = Ray::new(vec3a(0.5, 0.5, -1.0), vec3a(0.0488, 0.0, 0.9988));
        brute_force(&mut reference, &verts);
        assert_eq!(ray.hit.prim, reference.hit.prim);
        assert_eq!(ray.hit.t, reference.hit.t);
    }

    #[test]
    fn all_layouts_agree_on_hits() {
        let verts = random_triangles(2048, 71);
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        bvh.convert(Layout::Wald32, Layout::AilaLaine, &verts);
        bvh.convert(Layout::Wald32, Layout::AltSoa, &verts);
        bvh.convert(Layout::Wald32, Layout::Wide4, &verts);
        bvh.convert(Layout::Wald32, Layout::Wide8, &verts);
        let layouts = [
            Layout::AilaLaine,
            Layout::AltSoa,
            Layout::Wide4,
            Layout::Wide8,
        ];
        for ray in scene_rays(128, 1000) {
            let mut reference = ray;
            bvh.intersect(&mut reference, &verts, Layout::Wald32);
            for layout in layouts {
                let mut probe = ray;
                bvh.intersect(&mut probe, &verts, layout);
                assert_eq!(
                    probe.hit.prim, reference.hit.prim,
                    "{layout:?} disagrees with the primary layout"
                );
                if reference.hit.prim != INVALID {
                    let scale = reference.hit.t.max(1.0);
                    assert!((probe.hit.t - reference.hit.t).abs() <= 1e-4 * scale);
                }
            }
        }
    }

    #[test]
    fn sbvh_agrees_with_brute_force() {
        let verts = random_triangles(4096, 77);
        let mut bvh = Bvh::default();
        bvh.build_hq(&verts);
        bvh.validate(&verts);
        for ray in scene_rays(64, 2000) {
            let mut fast = ray;
            let mut slow = ray;
            bvh.intersect(&mut fast, &verts, Layout::Wald32);
            brute_force(&mut slow, &verts);
            assert_eq!(fast.hit.prim, slow.hit.prim);
        }
    }

    #[test]
    fn refit_then_intersect_is_stable() {
        let verts = random_triangles(1024, 83);
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        let mut before = Vec::new();
        for ray in scene_rays(64, 3000) {
            let mut probe = ray;
            bvh.intersect(&mut probe, &verts, Layout::Wald32);
            before.push((probe.hit.prim, probe.hit.t));
        }
        // Unchanged vertices: refit must be an observable no-op.
        bvh.refit(&verts);
        for (ray, (prim, t)) in scene_rays(64, 3000).into_iter().zip(before) {
            let mut probe = ray;
            bvh.intersect(&mut probe, &verts, Layout::Wald32);
            assert_eq!(probe.hit.prim, prim);
            assert_eq!(probe.hit.t, t);
        }
    }

    #[test]
    fn refit_tracks_scaled_scene() {
        let verts = random_triangles(512, 87);
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        let extent = bvh.nodes[0].aabb().diagonal();
        let scaled: Vec<Vec4> = verts.iter().map(|v| *v * 2.0).collect();
        bvh.refit(&scaled);
        bvh.validate(&scaled);
        let new_extent = bvh.nodes[0].aabb().diagonal();
        assert!((new_extent - extent * 2.0).abs().max_element() < 1e-3);
        // Traversal of the refitted tree matches brute force on the moved scene.
        for ray in scene_rays(32, 4000) {
            let mut fast = ray;
            let mut slow = ray;
            bvh.intersect(&mut fast, &scaled, Layout::Wald32);
            brute_force(&mut slow, &scaled);
            assert_eq!(fast.hit.prim, slow.hit.prim);
        }
    }

    /// Hand-build a valid but pathological left-deep chain, then check the
    /// optimizer repairs it without changing any intersection result.
    #[test]
    fn optimizer_repairs_a_degenerate_chain() {
        let verts = random_triangles(64, 91);
        let tri_count = (verts.len() / 3) as u32;
        let mut bvh = Bvh::default();
        bvh.tri_count = tri_count;
        bvh.idx_count = tri_count;
        bvh.primitive_indices = (0..tri_count).collect();
        bvh.nodes = vec![BvhNode::default(); tri_count as usize * 2];

        let aabbs: Vec<Aabb> = (0..tri_count)
            .map(|i| {
                let v = i as usize * 3;
                let mut aabb = Aabb::from_point(verts[v].truncate().into());
                aabb.extend(verts[v + 1].truncate().into());
                aabb.extend(verts[v + 2].truncate().into());
                aabb
            })
            .collect();
        let mut suffix = vec![Aabb::empty(); tri_count as usize + 1];
        for i in (0..tri_count as usize).rev() {
            suffix[i] = suffix[i + 1].union(&aabbs[i]);
        }

        // Left-deep chain: every interior pairs one leaf with the rest.
        let mut set_leaf = |nodes: &mut Vec<BvhNode>, idx: usize, prim: u32| {
            nodes[idx] = BvhNode {
                min: aabbs[prim as usize].min.into(),
                first_index: prim,
                max: aabbs[prim as usize].max.into(),
                prim_count: 1,
            };
        };
        let mut nodes = std::mem::take(&mut bvh.nodes);
        nodes[0] = BvhNode {
            min: suffix[0].min.into(),
            first_index: 2,
            max: suffix[0].max.into(),
            prim_count: 0,
        };
        let mut next = 2u32;
        for i in 0..tri_count - 1 {
            let pair = next;
            next += 2;
            set_leaf(&mut nodes, pair as usize, i);
            if i == tri_count - 2 {
                set_leaf(&mut nodes, pair as usize + 1, i + 1);
            } else {
                nodes[pair as usize + 1] = BvhNode {
                    min: suffix[i as usize + 1].min.into(),
                    first_index: next,
                    max: suffix[i as usize + 1].max.into(),
                    prim_count: 0,
                };
            }
        }
        bvh.nodes = nodes;
        bvh.used_nodes = next;
        bvh.validate(&verts);

        let bad_cost = bvh.sah_cost();
        let mut expected = Vec::new();
        for ray in scene_rays(32, 5000) {
            let mut probe = ray;
            bvh.intersect(&mut probe, &verts, Layout::Wald32);
            expected.push(probe.hit.prim);
        }

        bvh.convert(Layout::Wald32, Layout::Verbose, &verts);
        bvh.optimize(100);
        bvh.convert(Layout::Verbose, Layout::Wald32, &verts);
        let optimized_cost = bvh.sah_cost();
        assert!(
            optimized_cost <= bad_cost,
            "optimizer made the tree worse: {bad_cost} -> {optimized_cost}"
        );
        bvh.validate(&verts);
        for (ray, prim) in scene_rays(32, 5000).into_iter().zip(expected) {
            let mut probe = ray;
            bvh.intersect(&mut probe, &verts, Layout::Wald32);
            assert_eq!(probe.hit.prim, prim);
        }
    }

    #[test]
    fn vertex_w_lane_is_ignored() {
        let verts = random_triangles(256, 95);
        let mut garbage = verts.clone();
        for (i, v) in garbage.iter_mut().enumerate() {
            v.w = (i as f32) * 123.456 - 7.0;
        }
        let mut a = Bvh::default();
        a.build(&verts);
        let mut b = Bvh::default();
        b.build(&garbage);
        assert_eq!(a.used_nodes, b.used_nodes);
        for ray in scene_rays(32, 6000) {
            let mut ra = ray;
            let mut rb = ray;
            a.intersect(&mut ra, &verts, Layout::Wald32);
            b.intersect(&mut rb, &garbage, Layout::Wald32);
            assert_eq!(ra.hit.prim, rb.hit.prim);
            assert_eq!(ra.hit.t, rb.hit.t);
        }
    }

    #[test]
    fn hit_distance_is_idempotent_across_layouts() {
        let verts = random_triangles(1024, 99);
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        bvh.convert(Layout::Wald32, Layout::AilaLaine, &verts);
        let mut ray = Ray::new(vec3a(0.5, 0.5, -1.0), vec3a(0.02, 0.01, 1.0));
        bvh.intersect(&mut ray, &verts, Layout::Wald32);
        let t = ray.hit.t;
        // Re-running any traversal with the tightened ray never widens it.
        bvh.intersect(&mut ray, &verts, Layout::AilaLaine);
        assert!(ray.hit.t <= t);
        bvh.intersect(&mut ray, &verts, Layout::Wald32);
        assert!(ray.hit.t <= t);
    }

    #[test]
    fn gpu_conversion_full_pipeline() {
        let verts = random_triangles(777, 111);
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        bvh.convert(Layout::Wald32, Layout::Wide4, &verts);
        bvh.convert(Layout::Wide4, Layout::Wide4Gpu, &verts);
        assert!(!bvh.gpu4_blocks.is_empty());
        assert!(!bvh.rebuildable);
        // Root block: parent min must equal the tree bounds.
        let root = wbvh::layout::gpu4::Gpu4NodeView::decode(&bvh.gpu4_blocks, 0);
        assert_eq!(root.min, Vec3A::from(bvh.nodes[0].min));
    }

    #[test]
    fn degenerate_and_empty_lanes_do_not_crash() {
        // NaN-free degenerate input: duplicated points and zero-extent axes.
        let mut verts = Vec::new();
        for i in 0..32 {
            let x = i as f32;
            verts.extend([
                vec4(x, 0.0, 0.0, 0.0),
                vec4(x, 0.0, 0.0, 0.0),
                vec4(x, 0.0, 0.0, 0.0),
            ]);
        }
        let mut bvh = Bvh::default();
        bvh.build(&verts);
        let mut ray = Ray::new(vec3a(-1.0, 0.0, 0.0), vec3a(1.0, 0.0, 0.0));
        bvh.intersect(&mut ray, &verts, Layout::Wald32);
        // Implementation-defined result for degenerate geometry; the only
        // contract is that traversal terminates and does not panic.
    }
}
