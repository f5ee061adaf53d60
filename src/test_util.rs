//! Deterministic scene generators and hashing for tests & examples.

pub mod sampling {
    /// Integer hash from <https://nullprogram.com/blog/2018/07/31/>.
    #[inline(always)]
    pub fn uhash(x: u32) -> u32 {
        let mut x = x ^ (x >> 16);
        x = x.wrapping_mul(0x7feb352d);
        x = x ^ (x >> 15);
        x = x.wrapping_mul(0x846ca68b);
        x ^ (x >> 16)
    }

    #[inline(always)]
    pub fn uhash2(a: u32, b: u32) -> u32 {
        uhash(a.wrapping_mul(1597334673) ^ b.wrapping_mul(3812015801))
    }

    /// Map a hash to [0, 1).
    #[inline(always)]
    pub fn unormf(n: u32) -> f32 {
        n as f32 * (1.0 / 0xffffffffu32 as f32)
    }

    /// Deterministic noise in [0, 1) from an index and a seed.
    #[inline(always)]
    pub fn hash_noise(index: u32, seed: u32) -> f32 {
        unormf(uhash2(index, seed))
    }
}

pub mod geometry {
    use glam::{vec4, Vec4};

    use super::sampling::hash_noise;

    /// The unit right triangle in the z = 0 plane.
    pub fn unit_triangle() -> Vec<Vec4> {
        vec![
            vec4(0.0, 0.0, 0.0, 0.0),
            vec4(1.0, 0.0, 0.0, 0.0),
            vec4(0.0, 1.0, 0.0, 0.0),
        ]
    }

    /// Two disjoint unit-ish triangles, the second offset along +x.
    pub fn two_triangles() -> Vec<Vec4> {
        let mut verts = unit_triangle();
        verts.extend([
            vec4(4.0, 0.0, 0.0, 0.0),
            vec4(5.0, 0.0, 0.0, 0.0),
            vec4(4.0, 1.0, 0.0, 0.0),
        ]);
        verts
    }

    /// `count` random small triangles packed into `[0, 1.1)^3`: a random
    /// anchor in the unit cube with up to 0.1 of jitter per vertex.
    pub fn random_triangles(count: u32, seed: u32) -> Vec<Vec4> {
        let mut verts = Vec::with_capacity(count as usize * 3);
        let mut n = 0;
        let mut rnd = || {
            n += 1;
            hash_noise(n, seed)
        };
        for _ in 0..count {
            let (x, y, z) = (rnd(), rnd(), rnd());
            for _ in 0..3 {
                verts.push(vec4(
                    x + 0.1 * rnd(),
                    y + 0.1 * rnd(),
                    z + 0.1 * rnd(),
                    0.0,
                ));
            }
        }
        verts
    }
}
