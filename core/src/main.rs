//! Sihbolt - loopback self-test
//!
//! Runs two local devices against an in-process directory and exchanges a
//! few messages, exercising the handshake, both ratchet directions and the
//! own-message cache. Settings are read from `SIHBOLT_*` variables.

use std::sync::Arc;

use anyhow::Context;
use sihbolt_core::api::MemoryDirectory;
use sihbolt_core::crypto::Primitives;
use sihbolt_core::db::SqliteSecretStore;
use sihbolt_core::telemetry::Telemetry;
use sihbolt_core::{
    init_tracing, CoreConfig, DecryptOptions, Decrypted, EncryptOptions, SessionManager,
    SessionSettings,
};

fn check(step: &str, shown: &Decrypted, expected: &str) -> anyhow::Result<()> {
    match shown {
        Decrypted::Plaintext(text) if text == expected => {
            tracing::info!("{}: {}", step, text);
            Ok(())
        }
        other => anyhow::bail!("{}: expected {:?}, got {:?}", step, expected, other),
    }
}

async fn device(directory: Arc<MemoryDirectory>, settings: SessionSettings) -> anyhow::Result<SessionManager> {
    let store = SqliteSecretStore::in_memory()
        .await
        .context("Failed to open secret store")?;

    Ok(SessionManager::new(
        Arc::new(Primitives::new()),
        Arc::new(store),
        directory,
        Telemetry::disabled(),
        settings,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = CoreConfig::from_env().context("Invalid configuration")?;
    let settings = SessionSettings::from(&config);
    tracing::info!("Starting loopback self-test (device label {})", settings.device_label);

    let directory = Arc::new(MemoryDirectory::new());
    let alice = device(directory.clone(), settings.clone()).await?;
    let bob = device(directory.clone(), settings).await?;

    bob.ensure_device_keys("bob").await?;

    let conversation = uuid::Uuid::new_v4().to_string();
    let to_bob = EncryptOptions::new(&conversation, "alice", "bob");
    let to_alice = EncryptOptions::new(&conversation, "bob", "alice");

    let first = alice.encrypt("Hello Bob", &to_bob).await?;
    let shown = bob
        .decrypt(&first, &DecryptOptions::incoming(&conversation, "bob", "alice"))
        .await?;
    check("Bob read", &shown, "Hello Bob")?;

    let reply = bob.encrypt("Hi Alice", &to_alice).await?;
    let shown = alice
        .decrypt(&reply, &DecryptOptions::incoming(&conversation, "alice", "bob"))
        .await?;
    check("Alice read", &shown, "Hi Alice")?;

    let echo = alice
        .decrypt(&first, &DecryptOptions::own(&conversation, "alice", "bob"))
        .await?;
    check("Alice re-read her own message", &echo, "Hello Bob")?;

    if let Some(status) = bob.key_status().await? {
        tracing::info!(
            "Bob has {} one-time prekeys left ({} consumed), fingerprint {}",
            status.one_time_prekey_count,
            status.consumed_prekey_count,
            status.fingerprint
        );
    }

    tracing::info!("Loopback self-test passed");
    Ok(())
}
