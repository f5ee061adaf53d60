//! An Axis-Aligned Bounding Box (AABB) represented by its minimum and maximum points.

use bytemuck::{Pod, Zeroable};
use glam::Vec3A;

use crate::{ray::Ray, BVH_FAR};

/// Half the surface area of a box with the given extent: `x·y + y·z + z·x`.
///
/// An uninitialized box (min at `1e30`, max at `-1e30`) has a large negative
/// extent; it is treated as empty with area 0 rather than letting the
/// negative products poison SAH sums.
#[inline(always)]
pub fn half_area(extent: Vec3A) -> f32 {
    if extent.x < -BVH_FAR {
        0.0
    } else {
        extent.x * extent.y + extent.y * extent.z + extent.z * extent.x
    }
}

/// An Axis-Aligned Bounding Box (AABB) represented by its minimum and maximum points.
#[derive(Default, Clone, Copy, Debug, PartialEq, Zeroable)]
#[repr(C)]
pub struct Aabb {
    pub min: Vec3A,
    pub max: Vec3A,
}

unsafe impl Pod for Aabb {}

impl Aabb {
    /// Creates a new AABB with the given minimum and maximum points.
    #[inline(always)]
    pub fn new(min: Vec3A, max: Vec3A) -> Self {
        Self { min, max }
    }

    /// An empty AABB: min at the far sentinel, max at its negation, so that
    /// any union with a real box yields that box.
    #[inline(always)]
    pub fn empty() -> Self {
        Self {
            min: Vec3A::splat(BVH_FAR),
            max: Vec3A::splat(-BVH_FAR),
        }
    }

    /// Creates an AABB with both min and max set to the given point.
    #[inline(always)]
    pub fn from_point(point: Vec3A) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// Extends the AABB to include the given point.
    #[inline(always)]
    pub fn extend(&mut self, point: Vec3A) -> &mut Self {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
        self
    }

    /// Returns the union of this AABB and another AABB.
    #[inline(always)]
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Returns the intersection of this AABB and another AABB.
    ///
    /// If the AABBs do not overlap the result has `min` components greater
    /// than `max` and is not a valid box.
    #[inline(always)]
    pub fn intersection(&self, other: &Self) -> Self {
        Aabb {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        }
    }

    /// Returns the diagonal (extent) vector of the AABB.
    #[inline(always)]
    pub fn diagonal(&self) -> Vec3A {
        self.max - self.min
    }

    /// Returns the center point of the AABB.
    #[inline(always)]
    pub fn center(&self) -> Vec3A {
        (self.max + self.min) * 0.5
    }

    /// Returns half the surface area of the AABB; empty boxes report 0.
    #[inline(always)]
    pub fn half_area(&self) -> f32 {
        half_area(self.diagonal())
    }

    /// Checks if the AABB is valid (i.e., min <= max on all axes).
    #[inline(always)]
    pub fn valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// Checks if the AABB contains another AABB entirely.
    #[inline(always)]
    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        other.min.cmpge(self.min).all() && other.max.cmple(self.max).all()
    }

    /// Slab test: intersects this AABB with a ray and returns the entry
    /// distance, or [`BVH_FAR`] for a miss.
    ///
    /// A hit must start before the ray's current best hit distance, so a
    /// traversal that has already found a close intersection prunes boxes
    /// entirely behind it.
    #[inline(always)]
    pub fn intersect_ray(&self, ray: &Ray) -> f32 {
        let t1 = (self.min - ray.origin) * ray.inv_direction;
        let t2 = (self.max - ray.origin) * ray.inv_direction;

        let tmin = t1.min(t2).max_element();
        let tmax = t1.max(t2).min_element();

        if tmax >= tmin && tmin < ray.hit.t && tmax >= 0.0 {
            tmin
        } else {
            BVH_FAR
        }
    }
}
