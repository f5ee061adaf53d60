//! # BVH Construction and Traversal Library
//!
//! - Binned SAH BVH builder over triangle soups (8 bins per axis), the
//!   reference top-down construction.
//! - A spatial-split builder ([`bvh::Bvh::build_hq`]) that additionally
//!   clips primitives across bin boundaries for higher-quality trees.
//! - Single-ray traversal over the 32-byte primary node layout, plus
//!   conversions to wider and cache/GPU-oriented layouts: Aila-Laine,
//!   SoA, verbose (parented), 4-wide, 8-wide and a quantized 4-wide GPU
//!   format.
//! - Refitting for deformed geometry and an insertion-based tree
//!   optimizer that reduces SAH cost.
//!
//! ## Example
//!
//! ```
//! use glam::{vec3a, vec4};
//! use wbvh::bvh::{Bvh, Layout};
//! use wbvh::ray::Ray;
//!
//! // A triangle soup: three Vec4 vertices per triangle, w unused.
//! let verts = vec![
//!     vec4(0.0, 0.0, 0.0, 0.0),
//!     vec4(1.0, 0.0, 0.0, 0.0),
//!     vec4(0.0, 1.0, 0.0, 0.0),
//! ];
//!
//! let mut bvh = Bvh::default();
//! bvh.build(&verts);
//!
//! let mut ray = Ray::new(vec3a(0.25, 0.25, -1.0), vec3a(0.0, 0.0, 1.0));
//! bvh.intersect(&mut ray, &verts, Layout::Wald32);
//! if ray.hit.prim != wbvh::INVALID {
//!     println!("hit triangle {} at t = {}", ray.hit.prim, ray.hit.t);
//! }
//! ```
//!
//! The caller owns the vertex array and passes it to every operation that
//! needs geometry (`build`, `refit`, `intersect`, the GPU conversion).
//! The library never copies vertices; keep the soup alive and unchanged
//! between a build/refit and the traversals that rely on it.

pub mod aabb;
pub mod bvh;
pub mod layout;
pub mod ray;
pub mod test_util;
pub mod triangle;

/// Sentinel for "no index": all bits set.
pub const INVALID: u32 = u32::MAX;

/// The far-distance sentinel used throughout builders and traversal.
///
/// Deliberately not IEEE infinity: `1e30` survives multiplication by the
/// small reciprocals produced by [`ray::safe_rcp`] without turning into a
/// NaN in downstream min/max chains.
pub const BVH_FAR: f32 = 1e30;

/// Add profile scope. Nesting the macro allows us to make the profiling crate optional.
#[doc(hidden)]
#[macro_export]
macro_rules! scope {
    [$label:expr] => {
        #[cfg(feature = "profile")]
        profiling::scope!($label);
    };
}
