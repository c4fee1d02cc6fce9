//! Wallet loading

use anyhow::{Context, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::path::Path;
use std::sync::Arc;

/// Payer keypair shared by the executor and the construction params
#[derive(Clone)]
pub struct WalletManager {
    keypair: Arc<Keypair>,
}

impl WalletManager {
    /// Load a keypair file.
    ///
    /// Accepts the solana CLI JSON array format, 64 raw bytes, or a base58
    /// encoded secret key.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let keypair_bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read keypair file: {}", path.display()))?;

        let secret: Vec<u8> = if keypair_bytes.len() == 64 {
            keypair_bytes
        } else if keypair_bytes.trim_ascii_start().starts_with(b"[") {
            serde_json::from_slice(&keypair_bytes).context("Failed to parse keypair JSON")?
        } else {
            let text = std::str::from_utf8(&keypair_bytes)
                .context("Keypair file is neither JSON nor base58")?;
            bs58::decode(text.trim())
                .into_vec()
                .context("Failed to decode base58 keypair")?
        };

        if secret.len() != 64 {
            anyhow::bail!(
                "Invalid keypair length: expected 64 bytes, got {}",
                secret.len()
            );
        }
        if secret.iter().all(|&b| b == 0) {
            anyhow::bail!("Invalid keypair: all-zero key rejected");
        }
        let keypair = Keypair::try_from(secret.as_slice()).context("Invalid keypair bytes")?;
        Ok(Self::from_keypair(keypair))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair_arc(&self) -> Arc<Keypair> {
        Arc::clone(&self.keypair)
    }
}
