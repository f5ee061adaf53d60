//! A ray in 3D space.

use glam::{vec3a, Vec3A};

use crate::{BVH_FAR, INVALID};

/// Computes the inverse of `x` avoiding division by values too small to
/// produce a usable reciprocal.
///
/// Magnitudes at or below `1e-12` map to the [`BVH_FAR`] sentinel so that
/// slab tests against near-axis-parallel rays stay inside min/max chains
/// instead of producing infinities.
#[inline(always)]
pub fn safe_rcp(x: f32) -> f32 {
    if x > 1e-12 || x < -1e-12 {
        1.0 / x
    } else {
        BVH_FAR
    }
}

/// Componentwise [`safe_rcp`].
#[inline(always)]
pub fn safe_rcp3(v: Vec3A) -> Vec3A {
    vec3a(safe_rcp(v.x), safe_rcp(v.y), safe_rcp(v.z))
}

/// The closest intersection found along a ray so far.
///
/// Designed to fit in four 32-bit values; together with the original
/// triangle data this is enough to reconstruct anything needed for
/// shading.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Hit {
    /// Distance along the ray.
    pub t: f32,
    /// Barycentric coordinates of the intersection.
    pub u: f32,
    pub v: f32,
    /// Index of the intersected primitive, [`INVALID`] for none.
    pub prim: u32,
}

impl Hit {
    /// A `Hit` representing no intersection, at the far sentinel distance.
    #[inline(always)]
    pub fn none() -> Self {
        Self {
            t: BVH_FAR,
            u: 0.0,
            v: 0.0,
            prim: INVALID,
        }
    }
}

/// A struct representing a ray in 3D space.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Ray {
    /// The starting point of the ray.
    pub origin: Vec3A,
    /// The direction vector of the ray, normalized on construction.
    pub direction: Vec3A,
    /// The safe reciprocal of the direction vector components.
    /// Used to avoid division in ray/aabb slab tests.
    pub inv_direction: Vec3A,
    /// Closest intersection found so far; traversal only ever tightens it.
    pub hit: Hit,
}

impl Ray {
    /// Creates a new `Ray` with the given origin and direction.
    /// The direction is normalized and its safe reciprocal precomputed.
    pub fn new(origin: Vec3A, direction: Vec3A) -> Self {
        let direction = direction.normalize_or_zero();
        Ray {
            origin,
            direction,
            inv_direction: safe_rcp3(direction),
            hit: Hit::none(),
        }
    }
}
