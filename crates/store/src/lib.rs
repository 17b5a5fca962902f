#![warn(clippy::unwrap_used)]

//! Customer and segment stores implementing the segmentation store ports.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
