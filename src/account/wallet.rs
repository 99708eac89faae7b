use anyhow::{Context, Result};
use ed25519_dalek::{Signer, SigningKey};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An account's wallet keypair. Only the private key is persisted;
/// the address is re-derived on load.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "WalletRecord", into = "WalletRecord")]
pub struct Wallet {
    key: SigningKey,
    address: String,
}

impl Wallet {
    /// Fresh keypair from 32 random bytes.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let bytes: [u8; 32] = rng.random();
        Self::from_bytes(bytes)
    }

    /// Restore from a hex-encoded private key (with or without `0x`).
    pub fn from_private_key(hex_key: &str) -> Result<Self> {
        let raw = hex::decode(hex_key.trim().trim_start_matches("0x"))
            .context("private key is not valid hex")?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| anyhow::anyhow!("private key must be 32 bytes"))?;
        Ok(Self::from_bytes(bytes))
    }

    fn from_bytes(bytes: [u8; 32]) -> Self {
        let key = SigningKey::from_bytes(&bytes);
        let digest = Sha256::digest(key.verifying_key().as_bytes());
        let address = format!("0x{}", hex::encode(&digest[12..]));
        Self { key, address }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// `0x`-prefixed hex private key.
    pub fn private_key(&self) -> String {
        format!("0x{}", hex::encode(self.key.to_bytes()))
    }

    /// `0x`-prefixed hex signature over the UTF-8 message.
    pub fn sign_message(&self, message: &str) -> String {
        let signature = self.key.sign(message.as_bytes());
        format!("0x{}", hex::encode(signature.to_bytes()))
    }

    /// `0x1234...abcd` for log lines.
    pub fn short_address(&self) -> String {
        let a = &self.address;
        format!("{}...{}", &a[..6], &a[a.len() - 4..])
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Wallet {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

#[derive(Serialize, Deserialize)]
struct WalletRecord {
    private_key: String,
    address: String,
}

impl TryFrom<WalletRecord> for Wallet {
    type Error = anyhow::Error;

    fn try_from(record: WalletRecord) -> Result<Self> {
        Wallet::from_private_key(&record.private_key)
    }
}

impl From<Wallet> for WalletRecord {
    fn from(wallet: Wallet) -> Self {
        WalletRecord {
            private_key: wallet.private_key(),
            address: wallet.address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier};

    #[test]
    fn generated_wallets_differ() {
        assert_ne!(Wallet::generate(), Wallet::generate());
    }

    #[test]
    fn private_key_round_trip_keeps_address() {
        let wallet = Wallet::generate();
        let restored = Wallet::from_private_key(&wallet.private_key()).unwrap();
        assert_eq!(restored.address(), wallet.address());
    }

    #[test]
    fn address_shape() {
        let wallet = Wallet::generate();
        assert!(wallet.address().starts_with("0x"));
        assert_eq!(wallet.address().len(), 42);
        assert_eq!(wallet.short_address().len(), 13);
    }

    #[test]
    fn signature_verifies() {
        let wallet = Wallet::generate();
        let sig_hex = wallet.sign_message("hello");
        let bytes: [u8; 64] = hex::decode(&sig_hex[2..]).unwrap().try_into().unwrap();
        let signature = Signature::from_bytes(&bytes);
        wallet
            .key
            .verifying_key()
            .verify(b"hello", &signature)
            .unwrap();
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(Wallet::from_private_key("zz").is_err());
        assert!(Wallet::from_private_key("0x1234").is_err());
    }
}
