//! Block-cached random-access file source (spec.md §4.G, §4.H).

pub mod block_pool;
pub mod file_map;
pub mod source;

pub use block_pool::{BufferHandle, FileBlockPool};
pub use file_map::FileMap;
pub use source::FileSource;
