//! NATS integration: connection wrapper used for event publishing and the
//! mutation request subject

pub mod client;

pub use client::{event_headers, NatsClient};
