//! Subpage pool allocator over a whole-page backing allocator.
pub mod slab;

pub use slab::{PageBackend, Pool};
