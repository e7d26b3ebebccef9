//! Password-based encryption of the recovery phrase at rest.
//!
//! Storage format: a 24-character hex nonce immediately followed by the base64 AES-256-GCM
//! ciphertext (tag included). The key is derived from the password either with a single
//! SHA-256 pass (the historical on-disk format) or with Argon2id over a persisted salt.

use crate::errors::WalletError;
use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use argon2::{
    password_hash::{PasswordHasher as _, SaltString},
    Algorithm, Argon2, Params, Version,
};
use base64::Engine as _;
use eyre::Context as _;
use rand::Rng as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;
const NONCE_HEX_LEN: usize = NONCE_LEN * 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedVault {
    pub nonce_hex: String,
    pub ct_b64: String,
}

impl EncryptedVault {
    /// Split a stored vault string into its fixed-width nonce prefix and ciphertext.
    pub fn parse(stored: &str) -> Result<Self, WalletError> {
        if !stored.is_char_boundary(NONCE_HEX_LEN) || stored.len() <= NONCE_HEX_LEN {
            return Err(WalletError::Authentication);
        }
        let (nonce_hex, ct_b64) = stored.split_at(NONCE_HEX_LEN);
        Ok(Self {
            nonce_hex: nonce_hex.to_owned(),
            ct_b64: ct_b64.to_owned(),
        })
    }
}

impl fmt::Display for EncryptedVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.nonce_hex, self.ct_b64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KdfMode {
    /// SHA-256 of the UTF-8 password. Compatible with vaults written by earlier clients.
    #[default]
    Sha256,
    /// Argon2id over a random per-install salt.
    Argon2id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyDerivation {
    Sha256,
    Argon2id { salt: [u8; 16] },
}

pub fn fill_random(buf: &mut [u8]) {
    let mut rng = rand::rng();
    rng.fill_bytes(buf);
}

pub fn random_salt16() -> [u8; 16] {
    let mut s = [0_u8; 16];
    fill_random(&mut s);
    s
}

fn derive_argon2id_key(password: &SecretString, salt16: &[u8; 16]) -> eyre::Result<[u8; 32]> {
    // Frozen Argon2id parameters (argon2 0.5.x defaults).
    let params =
        Params::new(19 * 1024, 2, 1, Some(32)).map_err(|e| eyre::eyre!("argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::encode_b64(salt16).map_err(|e| eyre::eyre!("encode salt: {e}"))?;
    let hash = argon2
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map_err(|e| eyre::eyre!("argon2 hash: {e}"))?;
    let bytes = hash
        .hash
        .ok_or_else(|| eyre::eyre!("argon2 missing hash"))?;
    let Some(prefix) = bytes.as_bytes().get(..32) else {
        eyre::bail!("argon2 hash too short");
    };
    let mut out = [0_u8; 32];
    out.copy_from_slice(prefix);
    Ok(out)
}

impl KeyDerivation {
    fn derive(&self, password: &SecretString) -> eyre::Result<Zeroizing<[u8; 32]>> {
        match self {
            Self::Sha256 => {
                let digest = Sha256::digest(password.expose_secret().as_bytes());
                let mut key = Zeroizing::new([0_u8; 32]);
                key.copy_from_slice(&digest);
                Ok(key)
            }
            Self::Argon2id { salt } => Ok(Zeroizing::new(derive_argon2id_key(password, salt)?)),
        }
    }

    pub fn salt_b64(&self) -> Option<String> {
        match self {
            Self::Sha256 => None,
            Self::Argon2id { salt } => Some(base64::engine::general_purpose::STANDARD.encode(salt)),
        }
    }

    pub fn from_salt_b64(s: &str) -> eyre::Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .context("decode vault salt")?;
        let salt: [u8; 16] = bytes
            .try_into()
            .map_err(|_e: Vec<u8>| eyre::eyre!("vault salt must decode to 16 bytes"))?;
        Ok(Self::Argon2id { salt })
    }
}

/// One-way password fingerprint used to check a password before touching the vault.
///
/// Equal fingerprints imply, but do not guarantee, the same password.
pub fn fingerprint(password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(Sha256::digest(password.as_bytes()))
}

#[derive(Debug, Clone)]
pub struct SecretVault {
    kdf: KeyDerivation,
}

impl SecretVault {
    pub const fn new(kdf: KeyDerivation) -> Self {
        Self { kdf }
    }

    pub const fn kdf(&self) -> &KeyDerivation {
        &self.kdf
    }

    pub fn encrypt(&self, plaintext: &str, password: &SecretString) -> eyre::Result<EncryptedVault> {
        let key = self.kdf.derive(password)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref()).context("aes init")?;
        let mut nonce = [0_u8; NONCE_LEN];
        fill_random(&mut nonce);
        let ct = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| eyre::eyre!("aes encrypt: {e}"))?;
        Ok(EncryptedVault {
            nonce_hex: hex::encode(nonce),
            ct_b64: base64::engine::general_purpose::STANDARD.encode(ct),
        })
    }

    /// Decrypt a vault. Any failure (bad encoding, wrong password, tampered ciphertext) is
    /// reported as [`WalletError::Authentication`].
    pub fn decrypt(
        &self,
        vault: &EncryptedVault,
        password: &SecretString,
    ) -> Result<Zeroizing<String>, WalletError> {
        let nonce = hex::decode(&vault.nonce_hex).map_err(|_e| WalletError::Authentication)?;
        if nonce.len() != NONCE_LEN {
            return Err(WalletError::Authentication);
        }
        let ct = base64::engine::general_purpose::STANDARD
            .decode(&vault.ct_b64)
            .map_err(|_e| WalletError::Authentication)?;
        let key = self
            .kdf
            .derive(password)
            .map_err(|_e| WalletError::Authentication)?;
        let cipher =
            Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_e| WalletError::Authentication)?;
        let pt = cipher
            .decrypt(Nonce::from_slice(&nonce), ct.as_ref())
            .map_err(|_e| WalletError::Authentication)?;
        let pt = Zeroizing::new(pt);
        let s = std::str::from_utf8(&pt).map_err(|_e| WalletError::Authentication)?;
        Ok(Zeroizing::new(s.to_owned()))
    }
}
