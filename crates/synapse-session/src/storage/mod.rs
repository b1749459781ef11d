//! Session cache implementations.

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "file")]
pub use file::FileCache;

#[cfg(feature = "memory")]
pub use memory::MemoryCache;
