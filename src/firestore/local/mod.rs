//! Local evaluation of writes against stored document values.

pub mod transform;

pub use transform::{apply_set, apply_update, resolve_sentinel};
