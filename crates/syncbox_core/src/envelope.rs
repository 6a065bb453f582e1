//! Encryption envelope: context-bound AES-256-GCM.
//!
//! Each envelope carries its own random salt and nonce, so encrypting
//! identical plaintext twice yields different ciphertext. The caller's
//! context string participates in key derivation (HKDF-SHA256 info),
//! which makes context binding structural: opening an envelope under
//! the wrong context fails authentication instead of returning garbage.

use crate::error::{CoreError, CoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the root and derived keys in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the per-envelope HKDF salt in bytes.
pub const SALT_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Prefix marking the text form of an envelope, so enveloped payloads
/// are self-describing when carried inside JSON strings.
pub const ENVELOPE_PREFIX: &str = "enc:v1:";

/// Root key material for the envelope sealer.
///
/// The key is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    bytes: [u8; KEY_SIZE],
}

impl RootKey {
    /// Generates a new random root key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a root key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::InvalidKeySize {
                got: bytes.len(),
                expected: KEY_SIZE,
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Supplies opaque root key material to the envelope sealer.
///
/// Provisioning and rotation of the root secret live outside this
/// crate; the sealer only consumes whatever the provider hands it.
pub trait SecretProvider: Send + Sync {
    /// Returns the current root key.
    fn root_key(&self) -> CoreResult<RootKey>;
}

/// A secret provider backed by a fixed key, for callers that source
/// key material themselves (key file, OS keychain, test fixture).
#[derive(Debug, Clone)]
pub struct StaticSecretProvider {
    key: RootKey,
}

impl StaticSecretProvider {
    /// Wraps an existing root key.
    pub fn new(key: RootKey) -> Self {
        Self { key }
    }

    /// Creates a provider from raw key bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        Ok(Self {
            key: RootKey::from_bytes(bytes)?,
        })
    }
}

impl SecretProvider for StaticSecretProvider {
    fn root_key(&self) -> CoreResult<RootKey> {
        Ok(self.key.clone())
    }
}

/// An opaque, self-contained encrypted payload.
///
/// Binary layout: `salt (32) || nonce (12) || ciphertext+tag`.
/// Text form: `enc:v1:<base64 of the binary layout>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    bytes: Vec<u8>,
}

impl Envelope {
    /// Wraps raw envelope bytes.
    ///
    /// # Errors
    ///
    /// Returns a decryption error if the bytes are too short to contain
    /// a salt, nonce and authentication tag.
    pub fn from_bytes(bytes: Vec<u8>) -> CoreResult<Self> {
        if bytes.len() < SALT_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::Decryption("envelope too short".into()));
        }
        Ok(Self { bytes })
    }

    /// Returns the raw envelope bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns true if a string looks like the text form of an envelope.
    #[must_use]
    pub fn is_envelope_str(s: &str) -> bool {
        s.starts_with(ENVELOPE_PREFIX)
    }

    fn salt(&self) -> &[u8] {
        &self.bytes[..SALT_SIZE]
    }

    fn nonce(&self) -> &[u8] {
        &self.bytes[SALT_SIZE..SALT_SIZE + NONCE_SIZE]
    }

    fn ciphertext(&self) -> &[u8] {
        &self.bytes[SALT_SIZE + NONCE_SIZE..]
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", ENVELOPE_PREFIX, BASE64.encode(&self.bytes))
    }
}

impl std::str::FromStr for Envelope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| CoreError::Decryption("missing envelope prefix".into()))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| CoreError::Decryption(format!("invalid base64: {e}")))?;
        Self::from_bytes(bytes)
    }
}

/// Seals and opens envelopes under a caller-supplied context.
pub struct EnvelopeSealer {
    root: RootKey,
}

impl EnvelopeSealer {
    /// Creates a sealer from an injected secret provider.
    pub fn new(provider: &dyn SecretProvider) -> CoreResult<Self> {
        Ok(Self {
            root: provider.root_key()?,
        })
    }

    /// Derives the per-envelope key from the root key, a fresh salt and
    /// the caller's context string.
    fn derive_key(&self, salt: &[u8], context: &str) -> CoreResult<Zeroizing<[u8; KEY_SIZE]>> {
        let hk = Hkdf::<Sha256>::new(Some(salt), self.root.as_bytes());
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        hk.expand(context.as_bytes(), key.as_mut())
            .map_err(|_| CoreError::KeyDerivation("HKDF expand failed".into()))?;
        Ok(key)
    }

    /// Encrypts plaintext into a self-contained envelope.
    ///
    /// Non-deterministic: every call draws a fresh salt and nonce, so
    /// identical inputs never produce identical envelopes.
    pub fn seal(&self, plaintext: &[u8], context: &str) -> CoreResult<Envelope> {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(&salt, context)?;
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_ref()));

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CoreError::Encryption("AEAD encryption failed".into()))?;

        let mut bytes = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
        bytes.extend_from_slice(&salt);
        bytes.extend_from_slice(&nonce_bytes);
        bytes.extend(ciphertext);

        Envelope::from_bytes(bytes)
    }

    /// Decrypts an envelope produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::Decryption`] when the envelope is
    /// malformed or tampered with, or when `context` differs from the
    /// one used at seal time.
    pub fn open(&self, envelope: &Envelope, context: &str) -> CoreResult<Vec<u8>> {
        let key = self.derive_key(envelope.salt(), context)?;
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_ref()));

        cipher
            .decrypt(Nonce::from_slice(envelope.nonce()), envelope.ciphertext())
            .map_err(|_| CoreError::Decryption("authentication failed".into()))
    }
}

impl std::fmt::Debug for EnvelopeSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeSealer")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}
