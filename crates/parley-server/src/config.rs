use anyhow::{Context, Result};

use parley_crypto::{generate_key, key_from_base64, key_to_base64};
use tracing::warn;

/// Server configuration, read once from the environment at startup.
pub struct Config {
    pub jwt_secret: String,
    pub db_path: String,
    pub host: String,
    pub port: u16,
    pub message_key: [u8; 32],
    /// Base URL of the blob storage service; local stand-in when unset.
    pub blob_url: Option<String>,
    /// Base URL of the notification service; logged locally when unset.
    pub notify_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let jwt_secret =
            std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
        let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
        let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("PARLEY_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .context("PARLEY_PORT must be a port number")?;

        // The message key must be stable across restarts or every stored
        // body becomes unreadable. A missing key only gets a throwaway
        // replacement in development.
        let message_key = match std::env::var("PARLEY_MESSAGE_KEY") {
            Ok(encoded) => key_from_base64(&encoded)
                .context("PARLEY_MESSAGE_KEY must be a base64 256-bit key")?,
            Err(_) => {
                let key = generate_key();
                warn!(
                    "PARLEY_MESSAGE_KEY not set; generated ephemeral key {} — \
                     existing messages will not decrypt after restart",
                    key_to_base64(&key)
                );
                key
            }
        };

        Ok(Self {
            jwt_secret,
            db_path,
            host,
            port,
            message_key,
            blob_url: std::env::var("PARLEY_BLOB_URL").ok(),
            notify_url: std::env::var("PARLEY_NOTIFY_URL").ok(),
        })
    }
}
