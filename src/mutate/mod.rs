//! Mutation pipeline: staging, conditional persistence and admission control

pub mod builder;
pub mod executor;
pub mod limiter;
pub mod update;

pub use builder::UserBuilder;
pub use executor::{Filter, MutationExecutor};
pub use limiter::{AdmissionGate, AdmissionPermit, GateConfig};
pub use update::UpdateDescription;
