//! Storage layer
//!
//! [`EntityStore`] is the only boundary the mutation core talks to. `MongoStore`
//! backs production; `MemoryStore` backs dev mode and tests.

pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod store;

pub use memory::MemoryStore;
pub use mongo::{MongoClient, MongoCollection, MongoStore};
pub use store::EntityStore;
