//! Blob store adapters for the Flux gateway.

pub mod gard;
pub mod memory;

pub use gard::{GardClient, GardConfig};
pub use memory::MemoryBlobStore;
