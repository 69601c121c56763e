//! # Crypto Service
//!
//! All symmetric encryption and decryption of secret payloads, plus the
//! constant-time comparisons used by the token authenticator.
//!
//! Values are protected with envelope encryption: each workspace owns a
//! history of 256-bit data-encryption keys (DEKs), and every DEK is stored
//! wrapped under a master key supplied through configuration. Payloads are
//! sealed with AES-256-GCM using a fresh random 96-bit IV per version and a
//! 128-bit authentication tag kept alongside the ciphertext.
//!
//! The service holds no per-request state. Raw DEKs are zeroized on drop,
//! and no log line or error message ever carries key material, IVs, tags,
//! plaintext, or ciphertext.

use std::sync::Arc;

use base64::Engine;
use hmac::{Hmac, Mac};
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::CryptoConfig;
use crate::errors::{Result, VaultryError};

/// Size of a raw data-encryption key in bytes (AES-256)
pub const DEK_SIZE: usize = 32;

/// Size of AES-256-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of AES-256-GCM tag in bytes
pub const TAG_SIZE: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// A raw (unwrapped) data-encryption key. Zeroized on drop; lives only for
/// the duration of a single request.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RawDek([u8; DEK_SIZE]);

impl RawDek {
    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for RawDek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RawDek").field(&"[REDACTED]").finish()
    }
}

/// The key-encryption key, decoded once at initialization.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; DEK_SIZE],
    #[zeroize(skip)]
    fingerprint: String,
}

impl MasterKey {
    /// Decode the master key from configuration. A missing or short key is a
    /// configuration error and fatal at startup.
    pub fn from_config(config: &CryptoConfig) -> Result<Self> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(config.master_key_base64.trim())
            .map_err(|e| {
                VaultryError::config(format!("Invalid base64 in master key material: {}", e))
            })?;

        if decoded.len() != DEK_SIZE {
            return Err(VaultryError::config(format!(
                "Master key must be {} bytes (256 bits), got {} bytes",
                DEK_SIZE,
                decoded.len()
            )));
        }

        let mut bytes = [0u8; DEK_SIZE];
        bytes.copy_from_slice(&decoded);

        let fingerprint = hex::encode(Sha256::digest(bytes));

        Ok(Self { bytes, fingerprint })
    }

    /// Hex SHA-256 of the key material. Recorded on each workspace at
    /// creation and checked before any unwrap, so a swapped master key is
    /// caught before it can produce garbage plaintext.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Derive a labeled subkey for non-AEAD uses (e.g. the token
    /// fingerprint index).
    fn derive_subkey(&self, label: &[u8]) -> [u8; 32] {
        let mut mac =
            HmacSha256::new_from_slice(&self.bytes).expect("HMAC accepts any key length");
        mac.update(label);
        let digest = mac.finalize().into_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// Output of an AEAD seal: ciphertext with its IV and detached tag. Fields
/// are opaque bytes; the storage layer persists them base64-encoded.
#[derive(Clone)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
}

impl std::fmt::Debug for EncryptedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedPayload")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("iv", &"[REDACTED]")
            .field("tag", &"[REDACTED]")
            .finish()
    }
}

/// Stateless AEAD service shared across requests.
#[derive(Clone)]
pub struct CryptoService {
    master: Arc<MasterKey>,
    rng: Arc<SystemRandom>,
}

impl CryptoService {
    pub fn new(master: MasterKey) -> Self {
        debug!(master_key_fingerprint = %master.fingerprint(), "Crypto service initialized");
        Self { master: Arc::new(master), rng: Arc::new(SystemRandom::new()) }
    }

    pub fn from_config(config: &CryptoConfig) -> Result<Self> {
        Ok(Self::new(MasterKey::from_config(config)?))
    }

    /// Fingerprint of the master key currently in use.
    pub fn master_fingerprint(&self) -> &str {
        self.master.fingerprint()
    }

    /// Keyed subkey for the token fingerprint index.
    pub(crate) fn token_index_key(&self) -> [u8; 32] {
        self.master.derive_subkey(b"vaultry/token-fingerprint/v1")
    }

    /// Generate a fresh 256-bit DEK.
    pub fn generate_dek(&self) -> Result<RawDek> {
        let mut bytes = [0u8; DEK_SIZE];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| VaultryError::crypto("Failed to generate key material"))?;
        Ok(RawDek(bytes))
    }

    /// Wrap a raw DEK under the master key. The wrapped form is opaque:
    /// `nonce(12) || ciphertext || tag(16)`.
    pub fn wrap_dek(&self, dek: &RawDek) -> Result<Vec<u8>> {
        let sealed = self.seal(dek.as_bytes(), &self.master.bytes)?;
        let mut wrapped = Vec::with_capacity(NONCE_SIZE + sealed.ciphertext.len() + TAG_SIZE);
        wrapped.extend_from_slice(&sealed.iv);
        wrapped.extend_from_slice(&sealed.ciphertext);
        wrapped.extend_from_slice(&sealed.tag);
        Ok(wrapped)
    }

    /// Unwrap a DEK previously produced by [`wrap_dek`](Self::wrap_dek).
    /// Any truncation or tag mismatch is an authenticity failure; callers
    /// must treat it as fatal for the affected keyring entry.
    pub fn unwrap_dek(&self, wrapped: &[u8]) -> Result<RawDek> {
        if wrapped.len() != NONCE_SIZE + DEK_SIZE + TAG_SIZE {
            return Err(VaultryError::crypto("Wrapped key has unexpected length"));
        }

        let mut iv = [0u8; NONCE_SIZE];
        iv.copy_from_slice(&wrapped[..NONCE_SIZE]);

        let payload = EncryptedPayload {
            ciphertext: wrapped[NONCE_SIZE..NONCE_SIZE + DEK_SIZE].to_vec(),
            iv: iv.to_vec(),
            tag: wrapped[NONCE_SIZE + DEK_SIZE..].to_vec(),
        };

        let mut plaintext = self.open(&payload, &self.master.bytes)?;
        let mut bytes = [0u8; DEK_SIZE];
        bytes.copy_from_slice(&plaintext);
        plaintext.zeroize();

        Ok(RawDek(bytes))
    }

    /// Encrypt a secret payload under a workspace DEK.
    ///
    /// The IV is 96 random bits per call; with the keyring's rotation
    /// cadence the per-DEK encryption count stays far below the 2^48
    /// birthday bound for random IVs.
    pub fn encrypt(&self, plaintext: &[u8], dek: &RawDek) -> Result<EncryptedPayload> {
        self.seal(plaintext, &dek.0)
    }

    /// Authenticated decrypt of a secret payload.
    pub fn decrypt(&self, payload: &EncryptedPayload, dek: &RawDek) -> Result<Vec<u8>> {
        self.open(payload, &dek.0)
    }

    fn seal(&self, plaintext: &[u8], key: &[u8; DEK_SIZE]) -> Result<EncryptedPayload> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| VaultryError::crypto("Failed to generate random nonce"))?;

        let unbound_key = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| VaultryError::crypto("Failed to create encryption key"))?;

        let nonce_sequence = SingleNonce::new(nonce_bytes);
        let mut sealing_key = aead::SealingKey::new(unbound_key, nonce_sequence);

        let mut buffer = plaintext.to_vec();
        buffer.reserve(TAG_SIZE);

        sealing_key
            .seal_in_place_append_tag(Aad::empty(), &mut buffer)
            .map_err(|_| VaultryError::crypto("Encryption failed"))?;

        // Detach the tag so it can be stored (and audited for presence)
        // separately from the ciphertext.
        let tag = buffer.split_off(buffer.len() - TAG_SIZE);

        Ok(EncryptedPayload { ciphertext: buffer, iv: nonce_bytes.to_vec(), tag })
    }

    fn open(&self, payload: &EncryptedPayload, key: &[u8; DEK_SIZE]) -> Result<Vec<u8>> {
        if payload.iv.len() != NONCE_SIZE {
            return Err(VaultryError::crypto("Initialization vector has unexpected length"));
        }
        if payload.tag.len() != TAG_SIZE {
            return Err(VaultryError::crypto("Authentication tag has unexpected length"));
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(&payload.iv);

        let unbound_key = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| VaultryError::crypto("Failed to create decryption key"))?;

        let nonce_sequence = SingleNonce::new(nonce_bytes);
        let mut opening_key = aead::OpeningKey::new(unbound_key, nonce_sequence);

        let mut buffer = Vec::with_capacity(payload.ciphertext.len() + TAG_SIZE);
        buffer.extend_from_slice(&payload.ciphertext);
        buffer.extend_from_slice(&payload.tag);

        let plaintext_len = opening_key
            .open_in_place(Aad::empty(), &mut buffer)
            .map_err(|_| VaultryError::crypto("Decryption failed: authentication tag mismatch"))?
            .len();

        buffer.truncate(plaintext_len);
        Ok(buffer)
    }
}

impl std::fmt::Debug for CryptoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoService")
            .field("master_key_fingerprint", &self.master.fingerprint())
            .finish()
    }
}

/// Byte comparison whose running time does not depend on where the operands
/// differ, nor on their lengths.
pub fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff = (a.len() ^ b.len()) as u8;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}
