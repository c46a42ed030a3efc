//! `SyncStore` implementations

mod memory;

pub use memory::MemoryStore;
