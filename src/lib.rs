//! Chisel - authorized entity mutations with change-event publishing
//!
//! Chisel applies permission-checked mutations to users stored in MongoDB
//! and publishes a structured change record for every successful write.
//!
//! ## Pipeline
//!
//! - **Admission**: bounded in-flight mutations, process-wide and per actor
//! - **Authorization**: ordered rule evaluation over roles and editor grants
//! - **Staging**: single-use builders accumulating a field-path update
//! - **Persistence**: one conditional update-and-fetch per mutation
//! - **Events**: nested change records dispatched to NATS

pub mod auth;
pub mod config;
pub mod db;
pub mod events;
pub mod mutate;
pub mod nats;
pub mod ops;
pub mod server;
pub mod sync;
pub mod types;

pub use config::Args;
pub use ops::UserOps;
pub use types::{MutationError, Result};
