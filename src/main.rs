//! Chisel - authorized entity mutations with change-event publishing

use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chisel::{
    config::Args,
    db::{EntityStore, MemoryStore, MongoClient, MongoStore},
    events::{EventDispatcher, NatsEventSink},
    mutate::{AdmissionGate, GateConfig},
    nats::NatsClient,
    ops::UserOps,
    server::Server,
    sync::{HttpIdentitySync, IdentitySync, NoopIdentitySync},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("chisel={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Chisel - entity mutation service");
    info!("======================================");
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("NATS: {}", args.nats.nats_url);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Requests: {}", args.request_subject);
    info!("Events: {}.*", args.event_subject_prefix);
    info!(
        "Admission: {} in flight, {} per actor",
        args.max_concurrent_mutations, args.max_mutations_per_actor
    );
    info!("======================================");

    // MongoDB is optional in dev mode; fall back to the in-memory store
    let store: Arc<dyn EntityStore> = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Arc::new(MongoStore::new(&client).await?)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                Arc::new(MemoryStore::new())
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    // Requests arrive over NATS, so it is required even in dev mode
    let nats = match NatsClient::new(&args.nats, "chisel").await {
        Ok(client) => {
            info!("NATS connected successfully");
            client
        }
        Err(e) => {
            error!("NATS connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let identity: Arc<dyn IdentitySync> = match &args.identity_sync_url {
        Some(url) => {
            info!("Identity sync: {}", url);
            Arc::new(HttpIdentitySync::new(url.clone(), args.request_timeout())?)
        }
        None => {
            info!("Identity sync: disabled");
            Arc::new(NoopIdentitySync)
        }
    };

    let dispatcher = EventDispatcher::new(
        Arc::new(NatsEventSink::new(nats.clone(), args.event_subject_prefix.clone())),
        args.event_dispatch_attempts,
    );
    let gate = AdmissionGate::new(GateConfig {
        capacity: args.max_concurrent_mutations,
        per_actor: args.max_mutations_per_actor,
    });
    let ops = UserOps::new(store, dispatcher, gate, identity);

    let shutdown = CancellationToken::new();
    let server = Server::new(ops, nats, args.request_subject.clone(), args.request_timeout())
        .with_drain_timeout(args.shutdown_drain());
    let mut server_handle = tokio::spawn(server.serve(shutdown.clone()));

    let exited = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        result = &mut server_handle => Some(result),
    };

    let result = match exited {
        Some(result) => {
            warn!("Request handler exited");
            shutdown.cancel();
            result
        }
        None => {
            info!("Received shutdown signal");
            shutdown.cancel();
            // The handler drains in-flight requests before it returns
            server_handle.await
        }
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Request handler error: {}", e),
        Err(e) => error!("Request handler task error: {}", e),
    }

    info!("Chisel shutting down");
    Ok(())
}
