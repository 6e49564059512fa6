//! Configuration for subscriberd

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use uamesh_net::config::{
    SubscriberConfig, SecurityMode, SKS_DEFAULT_GROUP_ID, SKS_DEFAULT_TOKEN_ID,
};
use uamesh_net::crypto::SymmetricKeySet;
use uamesh_net::security::StaticKeySetStore;

/// subscriberd - uamesh PubSub subscriber daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "subscriberd")]
#[command(about = "uamesh PubSub subscriber daemon")]
pub struct Config {
    /// Path to the subscriber configuration (JSON)
    #[arg(short, long, env = "UAMESH_SUB_CONFIG")]
    pub config: PathBuf,

    /// Path to the group security keys (JSON), required for secured groups
    #[arg(long)]
    pub keys: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

/// Hex-encoded key material for one security group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySetFile {
    pub sign_key: String,
    pub encrypt_key: String,
    pub key_nonce: String,
}

impl Config {
    pub fn load_subscriber_config(&self) -> anyhow::Result<SubscriberConfig> {
        let raw = std::fs::read_to_string(&self.config)
            .with_context(|| format!("reading {}", self.config.display()))?;
        let parsed: SubscriberConfig =
            serde_json::from_str(&raw).context("parsing subscriber configuration")?;
        if parsed.connections.is_empty() {
            anyhow::bail!("configuration declares no connection");
        }
        Ok(parsed)
    }

    /// Build the key store backing secured reader groups
    pub fn load_key_sets(&self, subscriber: &SubscriberConfig) -> anyhow::Result<StaticKeySetStore> {
        let mut store = StaticKeySetStore::new();
        let secured = subscriber
            .connections
            .iter()
            .flat_map(|c| &c.reader_groups)
            .any(|g| g.security_mode != SecurityMode::None);
        if !secured {
            return Ok(store);
        }
        let path = self
            .keys
            .as_ref()
            .context("secured reader groups need --keys")?;
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let parsed: KeySetFile = serde_json::from_str(&raw).context("parsing key file")?;
        store.insert(
            SKS_DEFAULT_GROUP_ID,
            SKS_DEFAULT_TOKEN_ID,
            parse_key_set(&parsed)?,
        );
        Ok(store)
    }
}

fn parse_key_set(file: &KeySetFile) -> anyhow::Result<SymmetricKeySet> {
    Ok(SymmetricKeySet {
        sign_key: decode_key::<32>(&file.sign_key).context("sign_key")?,
        encrypt_key: decode_key::<32>(&file.encrypt_key).context("encrypt_key")?,
        init_vector: decode_key::<12>(&file.key_nonce).context("key_nonce")?,
    })
}

fn decode_key<const N: usize>(hex_key: &str) -> anyhow::Result<[u8; N]> {
    let bytes = hex::decode(hex_key.trim()).context("invalid hex")?;
    let array: [u8; N] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected {N} bytes"))?;
    Ok(array)
}
