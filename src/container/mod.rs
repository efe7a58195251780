//! # Concurrent Containers
//!
//! Lock-free building blocks shared by the storage layer. Currently this is
//! just the concurrent bitmap that backs per-block slot accounting.

mod bitmap;

pub use bitmap::{BitmapBuf, ConcurrentBitmap};
