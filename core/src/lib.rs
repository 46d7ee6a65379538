//! Sihbolt core library
//!
//! Session engine for relay-based end-to-end encrypted messaging. Device keys
//! and sessions live in a local secret store, public bundles go through a
//! directory, and the relay only ever carries opaque envelopes.

pub mod api;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod telemetry;

pub use config::CoreConfig;
pub use crypto::{DecryptOptions, Decrypted, EncryptOptions, SessionManager, SessionSettings};
pub use error::{CoreError, CoreResult};

/// Install the global `tracing` subscriber, honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sihbolt_core=info,sihbolt=info".into()),
        )
        .try_init();
}
