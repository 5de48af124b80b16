//! Configuration for Chisel
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::time::Duration;

/// Chisel - authorized entity mutations with change-event publishing
#[derive(Parser, Debug, Clone)]
#[command(name = "chisel")]
#[command(about = "Applies authorized entity mutations and publishes change events")]
pub struct Args {
    /// Enable development mode (in-memory store when MongoDB is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "chisel")]
    pub mongodb_db: String,

    /// Subject the mutation request handler listens on
    #[arg(long, env = "REQUEST_SUBJECT", default_value = "chisel.mutate")]
    pub request_subject: String,

    /// Subject prefix for published change events (`<prefix>.<event type>`)
    #[arg(long, env = "EVENT_SUBJECT_PREFIX", default_value = "events")]
    pub event_subject_prefix: String,

    /// Maximum mutations in flight across the process
    #[arg(long, env = "MAX_CONCURRENT_MUTATIONS", default_value = "64")]
    pub max_concurrent_mutations: usize,

    /// Maximum mutations in flight for a single actor
    #[arg(long, env = "MAX_MUTATIONS_PER_ACTOR", default_value = "4")]
    pub max_mutations_per_actor: usize,

    /// Request timeout in milliseconds (cancels admission wait and store reads)
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "10000")]
    pub request_timeout_ms: u64,

    /// How long shutdown waits for in-flight requests, in milliseconds
    #[arg(long, env = "SHUTDOWN_DRAIN_MS", default_value = "30000")]
    pub shutdown_drain_ms: u64,

    /// Publish attempts per change event before giving up
    #[arg(long, env = "EVENT_DISPATCH_ATTEMPTS", default_value = "3")]
    pub event_dispatch_attempts: u32,

    /// Base URL of the external identity-sync service (optional)
    #[arg(long, env = "IDENTITY_SYNC_URL")]
    pub identity_sync_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_mutations == 0 {
            return Err("MAX_CONCURRENT_MUTATIONS must be greater than zero".to_string());
        }

        if self.max_mutations_per_actor == 0 {
            return Err("MAX_MUTATIONS_PER_ACTOR must be greater than zero".to_string());
        }

        if self.event_dispatch_attempts == 0 {
            return Err("EVENT_DISPATCH_ATTEMPTS must be greater than zero".to_string());
        }

        if self.request_subject.trim().is_empty() {
            return Err("REQUEST_SUBJECT must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let args = Args::parse_from(["chisel"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.request_subject, "chisel.mutate");
        assert_eq!(args.request_timeout(), Duration::from_secs(10));
        assert_eq!(args.shutdown_drain(), Duration::from_secs(30));
        assert!(args.identity_sync_url.is_none());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let args = Args::parse_from(["chisel", "--max-concurrent-mutations", "0"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["chisel", "--event-dispatch-attempts", "0"]);
        assert!(args.validate().is_err());
    }
}
