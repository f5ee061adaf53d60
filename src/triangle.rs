//! Ray/triangle intersection over the caller's vertex soup.

use glam::{Vec3A, Vec4};

use crate::ray::{Hit, Ray};

/// Epsilon below which the ray is considered parallel to the triangle plane.
const PARALLEL_EPSILON: f32 = 1e-7;

/// Intersect `ray` with triangle `prim` of the vertex soup (three `Vec4`
/// vertices per triangle, w ignored).
///
/// Based on Fast Minimum Storage Ray Triangle Intersection by T. Möller
/// and B. Trumbore. On a hit closer than the ray's current best, writes
/// `(t, u, v, prim)` into `ray.hit`; the hit distance only ever shrinks.
#[inline(always)]
pub fn intersect_tri(ray: &mut Ray, verts: &[Vec4], prim: u32) {
    let vert_idx = prim as usize * 3;
    let v0 = Vec3A::from(verts[vert_idx].truncate());
    let edge1 = Vec3A::from(verts[vert_idx + 1].truncate()) - v0;
    let edge2 = Vec3A::from(verts[vert_idx + 2].truncate()) - v0;
    let h = ray.direction.cross(edge2);
    let a = edge1.dot(h);
    if a.abs() < PARALLEL_EPSILON {
        return; // ray parallel to triangle
    }
    let f = 1.0 / a;
    let s = ray.origin - v0;
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return;
    }
    let q = s.cross(edge1);
    let v = f * ray.direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return;
    }
    let t = f * edge2.dot(q);
    if t > 0.0 && t < ray.hit.t {
        // register a hit: ray is shortened to t
        ray.hit = Hit { t, u, v, prim };
    }
}

/// Compute the AABB corner points of triangle `prim` of the vertex soup.
#[inline(always)]
pub fn tri_bounds(verts: &[Vec4], prim: u32) -> (Vec3A, Vec3A) {
    let vert_idx = prim as usize * 3;
    let v0 = Vec3A::from(verts[vert_idx].truncate());
    let v1 = Vec3A::from(verts[vert_idx + 1].truncate());
    let v2 = Vec3A::from(verts[vert_idx + 2].truncate());
    (v0.min(v1).min(v2), v0.max(v1).max(v2))
}
