//! NATS client wrapper
//!
//! Connection management, plain and header-carrying publishes, and
//! subscriptions for the request handler.

use async_nats::{Client, ConnectOptions, HeaderMap, HeaderValue};
use bytes::Bytes;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::NatsArgs;
use crate::types::MutationError;

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// NATS client wrapper
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect to NATS. Fails fast if the server is unreachable; reconnection
    /// only applies after the first successful connect.
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self, MutationError> {
        info!("Connecting to NATS at {}", args.nats_url);

        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| MutationError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self { client })
    }

    /// Publish a message to a subject
    pub async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), MutationError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| MutationError::Nats(format!("Publish failed: {}", e)))
    }

    /// Publish a message with headers
    pub async fn publish_with_headers(
        &self,
        subject: &str,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<(), MutationError> {
        self.client
            .publish_with_headers(subject.to_string(), headers, payload)
            .await
            .map_err(|e| MutationError::Nats(format!("Publish failed: {}", e)))
    }

    /// Subscribe to a subject
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, MutationError> {
        self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| MutationError::Nats(format!("Subscribe failed: {}", e)))
    }

    /// Flush pending messages
    pub async fn flush(&self) -> Result<(), MutationError> {
        self.client
            .flush()
            .await
            .map_err(|e| MutationError::Nats(format!("Flush failed: {}", e)))
    }
}

/// Headers attached to every published change event. Values that are not
/// valid header text are skipped.
pub fn event_headers(event_id: &str, event_type: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(event_id) {
        headers.insert("Chisel-Event-Id", value);
    }
    if let Ok(value) = HeaderValue::from_str(event_type) {
        headers.insert("Chisel-Event-Type", value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_headers() {
        let headers = event_headers("abc", "user.update");
        assert_eq!(
            headers.get("Chisel-Event-Type").map(|v| v.as_str()),
            Some("user.update")
        );
        assert_eq!(headers.get("Chisel-Event-Id").map(|v| v.as_str()), Some("abc"));
    }
}
