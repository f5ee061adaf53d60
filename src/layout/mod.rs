//! Alternative node layouts and the conversions that populate them.
//!
//! Every layout is derived from the primary 32-byte format: Aila-Laine
//! and SoA move the child bounds into the parent for GPU/SIMD-friendly
//! fetches, the verbose layout adds the links the optimizer needs, and
//! the wide layouts collapse the binary tree for shallow traversal, with
//! a quantized 4-wide variant as the on-wire GPU format.

pub mod aila_laine;
pub mod gpu4;
pub mod soa;
pub mod verbose;
pub mod wide;
