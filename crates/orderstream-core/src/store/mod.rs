pub mod keys;
mod memory;
mod redis;
mod traits;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use traits::{ClaimBatch, ConsumerInfo, DedupStore, GroupInfo, LogStore};
