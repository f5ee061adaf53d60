//! Spatial-split builder.
//!
//! Besides the object splits of the reference builder, this algorithm also
//! considers spatial splits, where primitives may be cut into multiple
//! parts. This increases primitive count but reduces overlap between
//! sibling nodes, typically yielding trees that traverse noticeably
//! faster. Construction is much more expensive, making it primarily
//! useful for static geometry.

use bytemuck::zeroed_vec;
use glam::{Vec3A, Vec4};

use crate::aabb::{half_area, Aabb};
use crate::bvh::builder::{BINS, TASK_STACK};
use crate::bvh::node::{BvhNode, Fragment};
use crate::bvh::Bvh;
use crate::BVH_FAR;

/// Spatial splits only pay off when the object-split children overlap by
/// more than this fraction of the root area.
const OVERLAP_THRESHOLD: f32 = 1e-5;

#[derive(Default, Clone, Copy)]
struct Task {
    node: u32,
    slice_start: u32,
    slice_end: u32,
}

impl Bvh {
    /// Build the primary layout with spatial splits (an SBVH).
    ///
    /// Straddling fragments are clipped into both children, so the
    /// primitive index array carries up to 25% slack and the resulting
    /// tree cannot be refitted.
    pub fn build_hq(&mut self, verts: &[Vec4]) {
        crate::scope!("build_hq");
        assert!(
            !verts.is_empty() && verts.len() % 3 == 0,
            "expected a non-empty vertex array with three vertices per triangle"
        );
        assert!(self.rebuildable, "tree was converted; build a fresh Bvh");
        let prim_count = (verts.len() / 3) as u32;
        let slack = prim_count >> 2; // for split prims
        let space_needed = prim_count as usize * 3;
        if self.nodes.len() != space_needed
            || self.primitive_indices.len() != (prim_count + slack) as usize
        {
            self.nodes = zeroed_vec(space_needed);
            self.primitive_indices = zeroed_vec((prim_count + slack) as usize);
            self.fragments = zeroed_vec((prim_count + slack) as usize);
        }
        self.primitive_indices.fill(0);
        self.tri_count = prim_count;
        self.idx_count = prim_count + slack;
        // Double buffer for the partition: spatial splits both reorder and
        // duplicate, which an in-place swap cannot express.
        let mut idx_b: Vec<u32> = zeroed_vec((prim_count + slack) as usize);

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
        // Fresh fragments produced by clipping go after the input ones.
        let mut next_frag = prim_count;

        let root_area = root_aabb.half_area();
        // Don't touch; carefully picked. Also the clipper's per-axis epsilon.
        let min_dim = root_aabb.diagonal() * 1e-7;

        let mut task = [Task::default(); TASK_STACK];
        let mut task_count = 0usize;
        let mut node_idx = 0usize;
        let mut slice_start = 0u32;
        let mut slice_end = prim_count + slack;
        loop {
            loop {
                let node = self.nodes[node_idx];

                // Find the optimal object split, exactly as in the binned
                // reference builder.
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

                // Consider a spatial split. Near-disjoint object-split
                // children cannot benefit from clipping, and the remaining
                // slack in this slice bounds how many duplicates we may
                // still produce.
                let mut spatial = false;
                let budget = slice_end - slice_start;
                let spatial_overlap = half_area(best_l.max - best_r.min) / root_area;
                if budget > node.prim_count
                    && split_cost < BVH_FAR
                    && spatial_overlap > OVERLAP_THRESHOLD
                {
                    for a in 0..3 {
                        if node.max[a] - node.min[a] <= min_dim[a] {
                            continue;
                        }
                        // Lay down bins of equal width across the node;
                        // classify every fragment by the bins of its min
                        // and max, clipping straddlers to each bin.
                        let mut s_bin_aabb = [Aabb::empty(); BINS];
                        let mut count_in = [0u32; BINS];
                        let mut count_out = [0u32; BINS];
                        let plane_dist =
                            (node.max[a] - node.min[a]) / (BINS as f32 * 0.9999);
                        let r_plane_dist = 1.0 / plane_dist;
                        let node_min_a = node.min[a];
                        for i in 0..node.prim_count {
                            let fi =
                                self.primitive_indices[(node.first_index + i) as usize] as usize;
                            let frag = self.fragments[fi];
                            let bin1 = (((frag.min[a] - node_min_a) * r_plane_dist) as i32)
                                .clamp(0, BINS as i32 - 1);
                            let bin2 = (((frag.max[a] - node_min_a) * r_plane_dist) as i32)
                                .clamp(0, BINS as i32 - 1);
                            count_in[bin1 as usize] += 1;
                            count_out[bin2 as usize] += 1;
                            if bin1 == bin2 {
                                // fragment fits in a single bin
                                s_bin_aabb[bin1 as usize] =
                                    s_bin_aabb[bin1 as usize].union(&frag.aabb());
                            } else {
                                for j in bin1..=bin2 {
                                    // clip fragment to each bin it overlaps
                                    let mut bmin = Vec3A::from(node.min);
                                    let mut bmax = Vec3A::from(node.max);
                                    bmin[a] = node_min_a + plane_dist * j as f32;
                                    // The last spanning bin snaps to the node
                                    // bound to sidestep accumulated rounding.
                                    bmax[a] = if j == BINS as i32 - 2 {
                                        node.max[a]
                                    } else {
                                        bmin[a] + plane_dist
                                    };
                                    if let Some(clipped) =
                                        clip_frag(verts, &frag, bmin, bmax, min_dim)
                                    {
                                        s_bin_aabb[j as usize] =
                                            s_bin_aabb[j as usize].union(&clipped.aabb());
                                    }
                                }
                            }
                        }
                        // Evaluate the candidate planes; entering/exiting
                        // counts give the total after duplication.
                        let mut l_box = [Aabb::empty(); BINS - 1];
                        let mut r_box = [Aabb::empty(); BINS - 1];
                        let mut anl = [BVH_FAR; BINS - 1];
                        let mut anr = [BVH_FAR; BINS - 1];
                        let mut nl = [0u32; BINS - 1];
                        let mut nr = [0u32; BINS - 1];
                        let (mut l_acc, mut r_acc) = (Aabb::empty(), Aabb::empty());
                        let (mut l_n, mut r_n) = (0u32, 0u32);
                        for i in 0..BINS - 1 {
                            l_acc = l_acc.union(&s_bin_aabb[i]);
                            l_box[i] = l_acc;
                            r_acc = r_acc.union(&s_bin_aabb[BINS - 1 - i]);
                            r_box[BINS - 2 - i] = r_acc;
                            l_n += count_in[i];
                            r_n += count_out[BINS - 1 - i];
                            nl[i] = l_n;
                            nr[BINS - 2 - i] = r_n;
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
                            if anl[i] + anr[i] < split_cost && nl[i] + nr[i] < budget {
                                spatial = true;
                                split_cost = anl[i] + anr[i];
                                best_axis = a;
                                best_pos = i;
                                best_l = l_box[i];
                                best_r = r_box[i];
                                // Child boxes share the split plane exactly.
                                best_l.max[a] = best_r.min[a];
                            }
                        }
                    }
                }

                if split_cost >= node.node_cost() {
                    break; // not splitting is better
                }

                // Double-buffered partition into the left and right ends of
                // this slice of the index array.
                let mut a_ptr = slice_start;
                let mut b_ptr = slice_end;
                let mut src = node.first_index;
                if spatial {
                    let plane_dist =
                        (node.max[best_axis] - node.min[best_axis]) / (BINS as f32 * 0.9999);
                    let r_plane_dist = 1.0 / plane_dist;
                    let node_min_a = node.min[best_axis];
                    for _ in 0..node.prim_count {
                        let frag_idx = self.primitive_indices[src as usize];
                        src += 1;
                        let frag = self.fragments[frag_idx as usize];
                        let bin1 = (((frag.min[best_axis] - node_min_a) * r_plane_dist) as i32)
                            .clamp(0, BINS as i32 - 1) as usize;
                        let bin2 = (((frag.max[best_axis] - node_min_a) * r_plane_dist) as i32)
                            .clamp(0, BINS as i32 - 1) as usize;
                        if bin2 <= best_pos {
                            idx_b[a_ptr as usize] = frag_idx;
                            a_ptr += 1;
                        } else if bin1 > best_pos {
                            b_ptr -= 1;
                            idx_b[b_ptr as usize] = frag_idx;
                        } else {
                            // Straddler: the left half reuses the original
                            // fragment slot, the right half gets a new one.
                            if let Some(right_frag) = clip_frag(
                                verts,
                                &frag,
                                best_r.min.max(node.min.into()),
                                best_r.max.min(node.max.into()),
                                min_dim,
                            ) {
                                self.fragments[next_frag as usize] = right_frag;
                                b_ptr -= 1;
                                idx_b[b_ptr as usize] = next_frag;
                                next_frag += 1;
                            }
                            if let Some(left_frag) = clip_frag(
                                verts,
                                &frag,
                                best_l.min.max(node.min.into()),
                                best_l.max.min(node.max.into()),
                                min_dim,
                            ) {
                                self.fragments[frag_idx as usize] = left_frag;
                                idx_b[a_ptr as usize] = frag_idx;
                                a_ptr += 1;
                            }
                        }
                    }
                } else {
                    // object partitioning
                    let rpd = rpd3[best_axis];
                    let node_min_a = node_min[best_axis];
                    for i in 0..node.prim_count {
                        let frag_idx = self.primitive_indices[(src + i) as usize];
                        let frag = &self.fragments[frag_idx as usize];
                        let centroid = (frag.min[best_axis] + frag.max[best_axis]) * 0.5;
                        let bin =
                            (((centroid - node_min_a) * rpd) as i32).clamp(0, BINS as i32 - 1);
                        if bin as usize <= best_pos {
                            idx_b[a_ptr as usize] = frag_idx;
                            a_ptr += 1;
                        } else {
                            b_ptr -= 1;
                            idx_b[b_ptr as usize] = frag_idx;
                        }
                    }
                }
                self.primitive_indices[slice_start as usize..slice_end as usize]
                    .copy_from_slice(&idx_b[slice_start as usize..slice_end as usize]);

                let left_count = a_ptr - slice_start;
                let right_count = slice_end - b_ptr;
                if left_count == 0 || right_count == 0 {
                    break;
                }
                let left_child = new_node_ptr;
                new_node_ptr += 2;
                self.nodes[left_child as usize] = BvhNode {
                    min: best_l.min.into(),
                    first_index: slice_start,
                    max: best_l.max.into(),
                    prim_count: left_count,
                };
                self.nodes[left_child as usize + 1] = BvhNode {
                    min: best_r.min.into(),
                    first_index: b_ptr,
                    max: best_r.max.into(),
                    prim_count: right_count,
                };
                self.nodes[node_idx].first_index = left_child;
                self.nodes[node_idx].prim_count = 0;

                // Split the remaining slack between the subtrees and
                // continue on the left.
                let mid = (a_ptr + b_ptr) >> 1;
                task[task_count] = Task {
                    node: left_child + 1,
                    slice_start: mid,
                    slice_end,
                };
                task_count += 1;
                slice_end = mid;
                node_idx = left_child as usize;
            }
            if task_count == 0 {
                break;
            }
            task_count -= 1;
            node_idx = task[task_count].node as usize;
            slice_start = task[task_count].slice_start;
            slice_end = task[task_count].slice_end;
        }
        // Leaves referenced fragment slots during construction; traversal
        // wants caller-facing primitive ids.
        for i in 0..(prim_count + slack) as usize {
            self.primitive_indices[i] = self.fragments[self.primitive_indices[i] as usize].primitive_id;
        }
        self.refittable = false; // clipped fragments cannot be refitted
        self.used_nodes = new_node_ptr;
    }
}

/// Sutherland-Hodgman clip of a fragment's triangle against the box
/// `[bmin, bmax]`, itself intersected with the fragment bounds.
///
/// Axes thinner than `min_dim` are skipped. The resulting bounds are
/// intersected with the clip box to guard against floating-point drift.
/// Returns `None` when the polygon is clipped away entirely.
pub(crate) fn clip_frag(
    verts: &[Vec4],
    orig: &Fragment,
    bmin: Vec3A,
    bmax: Vec3A,
    min_dim: Vec3A,
) -> Option<Fragment> {
    let bmin = bmin.max(orig.min.into());
    let bmax = bmax.min(orig.max.into());
    let extent = bmax - bmin;

    let vert_idx = orig.primitive_id as usize * 3;
    let mut vin = [Vec3A::ZERO; 10];
    let mut vout = [Vec3A::ZERO; 10];
    vin[0] = verts[vert_idx].truncate().into();
    vin[1] = verts[vert_idx + 1].truncate().into();
    vin[2] = verts[vert_idx + 2].truncate().into();
    let mut n_in = 3usize;
    for a in 0..3 {
        let eps = min_dim[a];
        if extent[a] <= eps {
            continue;
        }
        let (l, r) = (bmin[a], bmax[a]);
        let mut n_out = 0usize;
        for v in 0..n_in {
            let v0 = vin[v];
            let v1 = vin[(v + 1) % n_in];
            let v0_in = v0[a] >= l - eps;
            let v1_in = v1[a] >= l - eps;
            if !(v0_in || v1_in) {
                continue;
            } else if v0_in != v1_in {
                let mut c = v0 + (l - v0[a]) / (v1[a] - v0[a]) * (v1 - v0);
                c[a] = l; // land exactly on the plane
                vout[n_out] = c;
                n_out += 1;
            }
            if v1_in {
                vout[n_out] = v1;
                n_out += 1;
            }
        }
        n_in = 0;
        for v in 0..n_out {
            let v0 = vout[v];
            let v1 = vout[(v + 1) % n_out];
            let v0_in = v0[a] <= r + eps;
            let v1_in = v1[a] <= r + eps;
            if !(v0_in || v1_in) {
                continue;
            } else if v0_in != v1_in {
                let mut c = v0 + (r - v0[a]) / (v1[a] - v0[a]) * (v1 - v0);
                c[a] = r;
                vin[n_in] = c;
                n_in += 1;
            }
            if v1_in {
                vin[n_in] = v1;
                n_in += 1;
            }
        }
    }
    if n_in == 0 {
        return None;
    }
    let mut bounds = Aabb::empty();
    for v in vin.iter().take(n_in) {
        bounds.extend(*v);
    }
    Some(Fragment {
        min: bounds.min.max(bmin).into(),
        primitive_id: orig.primitive_id,
        max: bounds.max.min(bmax).into(),
        clipped: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::geometry::random_triangles;
    use glam::vec4;

    #[test]
    fn test_clip_to_own_bounds_is_identity() {
        let verts = crate::test_util::geometry::unit_triangle();
        let frag = Fragment::from_primitive(&verts, 0);
        let clipped = clip_frag(
            &verts,
            &frag,
            frag.min.into(),
            frag.max.into(),
            Vec3A::splat(1e-7),
        )
        .unwrap();
        assert_eq!(clipped.min, frag.min);
        assert_eq!(clipped.max, frag.max);
        assert_eq!(clipped.clipped, 1);
    }

    #[test]
    fn test_clip_away_returns_none() {
        let verts = crate::test_util::geometry::unit_triangle();
        let frag = Fragment::from_primitive(&verts, 0);
        let clipped = clip_frag(
            &verts,
            &frag,
            Vec3A::splat(5.0),
            Vec3A::splat(6.0),
            Vec3A::splat(1e-7),
        );
        assert!(clipped.is_none());
    }

    #[test]
    fn test_clip_halves_a_triangle() {
        let verts = crate::test_util::geometry::unit_triangle();
        let frag = Fragment::from_primitive(&verts, 0);
        let left = clip_frag(
            &verts,
            &frag,
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.5, 1.0, 0.0),
            Vec3A::splat(1e-7),
        )
        .unwrap();
        assert_eq!(left.max.x, 0.5);
        assert_eq!(left.max.y, 1.0);
        let right = clip_frag(
            &verts,
            &frag,
            Vec3A::new(0.5, 0.0, 0.0),
            Vec3A::new(1.0, 1.0, 0.0),
            Vec3A::splat(1e-7),
        )
        .unwrap();
        assert_eq!(right.min.x, 0.5);
        // The hypotenuse drops below y = 0.5 right of the cut.
        assert!((right.max.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_build_hq_duplicates_spanning_triangle() {
        // A scene of small triangles plus one long thin triangle spanning
        // everything; a good tree wants that one clipped.
        let mut verts = random_triangles(256, 2);
        verts.extend([
            vec4(-0.05, 0.5, 0.55, 0.0),
            vec4(1.15, 0.49, 0.55, 0.0),
            vec4(1.15, 0.51, 0.55, 0.0),
        ]);
        let mut bvh = Bvh::default();
        bvh.build_hq(&verts);
        assert!(bvh.idx_count > bvh.tri_count);
        assert!(bvh.fragments.iter().any(|f| f.clipped != 0));
        bvh.validate(&verts);
    }

    #[test]
    fn test_build_hq_covers_all_primitives() {
        let verts = random_triangles(512, 4);
        let mut bvh = Bvh::default();
        bvh.build_hq(&verts);
        assert!(!bvh.refittable);
        bvh.validate(&verts);
    }
}
