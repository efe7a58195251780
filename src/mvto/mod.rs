//! # MVTO Accessor Layer
//!
//! Composes a head store and a delta store into the three-operation
//! transactional surface (`put` / `update` / `get`) that the database
//! façades build on.

mod accessor;

pub use accessor::Accessor;
