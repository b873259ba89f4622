//! Cryptographic operations for the vault.
//!
//! Two independent domains live here:
//! - password envelopes (Argon2id + AES-256-GCM) protecting the identity store
//!   and the password cache;
//! - recipient envelopes (age, X25519) protecting item secrets.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::{password_hash::rand_core::RngCore, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::io::{Read, Write};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// A private X25519 identity able to open recipient envelopes.
pub type Identity = age::x25519::Identity;

/// Errors that can occur during cryptographic operations.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Invalid base64 encoding")]
    InvalidBase64,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
    #[error("No recipients to encrypt to")]
    NoRecipients,
    #[error("Invalid recipient public key: {0}")]
    InvalidRecipient(String),
    #[error("Invalid private identity")]
    InvalidIdentity,
}

/// Magic prefix of a password envelope.
const ENVELOPE_MAGIC: &[u8; 4] = b"CVP1";
/// Upper bound on the Argon2 memory cost accepted from an envelope header (1 GiB).
const MAX_MEMORY_COST: u32 = 1024 * 1024;
/// Upper bound on the Argon2 time cost accepted from an envelope header.
const MAX_TIME_COST: u32 = 64;
/// Upper bound on the Argon2 lane count accepted from an envelope header.
const MAX_PARALLELISM: u32 = 64;

/// Password-based encryption: Argon2id key derivation and AES-256-GCM.
///
/// Every envelope carries its own salt and Argon2 parameters, so any
/// `VaultCrypto` can open envelopes produced by any other profile.
#[derive(Debug, Clone)]
pub struct VaultCrypto {
    // Argon2id parameters (tuned for desktop use)
    argon2_time_cost: u32,
    argon2_memory_cost: u32,
    argon2_parallelism: u32,
    argon2_hash_len: usize,
    argon2_salt_len: usize,
    // AES-GCM parameters
    aes_nonce_size: usize,
}

impl Default for VaultCrypto {
    fn default() -> Self {
        Self {
            argon2_time_cost: 2,
            argon2_memory_cost: 65536, // 64 MB
            argon2_parallelism: 1,
            argon2_hash_len: 32, // 256 bits for AES-256
            argon2_salt_len: 16, // 128 bits
            aes_nonce_size: 12,  // 96 bits (GCM standard)
        }
    }
}

impl VaultCrypto {
    /// Create a new VaultCrypto instance with the default profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile for high-entropy keys such as the password cache pad.
    pub fn light() -> Self {
        Self::with_params(1, 8192, 1)
    }

    /// Create an instance with explicit Argon2 time cost, memory cost (KiB) and parallelism.
    pub fn with_params(time_cost: u32, memory_cost: u32, parallelism: u32) -> Self {
        Self {
            argon2_time_cost: time_cost,
            argon2_memory_cost: memory_cost,
            argon2_parallelism: parallelism,
            ..Self::default()
        }
    }

    /// Generate a new random salt.
    pub fn generate_salt(&self) -> Vec<u8> {
        let mut salt = vec![0u8; self.argon2_salt_len];
        OsRng.fill_bytes(&mut salt);
        salt
    }

    fn header_len(&self) -> usize {
        ENVELOPE_MAGIC.len() + 12 + self.argon2_salt_len + self.aes_nonce_size
    }

    /// Derive encryption key from password using Argon2id.
    /// Returns a key that will be automatically zeroed on drop.
    pub fn derive_key(&self, password: &str, salt: &[u8]) -> Result<DerivedKey, CryptoError> {
        derive_with(
            password,
            salt,
            self.argon2_time_cost,
            self.argon2_memory_cost,
            self.argon2_parallelism,
            self.argon2_hash_len,
        )
    }

    /// Encrypt `plaintext` under `password`.
    ///
    /// Layout: `magic | m_cost | t_cost | p_cost | salt | nonce | ciphertext+tag`,
    /// integers little-endian.
    pub fn encrypt_with_password(
        &self,
        plaintext: &[u8],
        password: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        let salt = self.generate_salt();
        let key = self.derive_key(password, &salt)?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut envelope = Vec::with_capacity(self.header_len() + ciphertext.len());
        envelope.extend_from_slice(ENVELOPE_MAGIC);
        envelope.extend_from_slice(&self.argon2_memory_cost.to_le_bytes());
        envelope.extend_from_slice(&self.argon2_time_cost.to_le_bytes());
        envelope.extend_from_slice(&self.argon2_parallelism.to_le_bytes());
        envelope.extend_from_slice(&salt);
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    /// Decrypt an envelope produced by [`VaultCrypto::encrypt_with_password`].
    ///
    /// Wrong password, truncated input and tampering all yield the same
    /// [`CryptoError::DecryptionFailed`].
    pub fn decrypt_with_password(
        &self,
        envelope: &[u8],
        password: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if envelope.len() < self.header_len() || &envelope[..4] != ENVELOPE_MAGIC {
            return Err(CryptoError::DecryptionFailed);
        }

        let (m_cost, rest) = split_u32(&envelope[4..]);
        let (t_cost, rest) = split_u32(rest);
        let (p_cost, rest) = split_u32(rest);
        if m_cost > MAX_MEMORY_COST || t_cost > MAX_TIME_COST || p_cost > MAX_PARALLELISM {
            return Err(CryptoError::DecryptionFailed);
        }
        let (salt, rest) = rest.split_at(self.argon2_salt_len);
        let (nonce_bytes, ciphertext) = rest.split_at(self.aes_nonce_size);

        let key = derive_with(password, salt, t_cost, m_cost, p_cost, self.argon2_hash_len)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Encrypt a UTF-8 string and return the envelope as base64.
    pub fn encrypt_string(&self, plaintext: &str, password: &str) -> Result<String, CryptoError> {
        self.encrypt_with_password(plaintext.as_bytes(), password)
            .map(|envelope| encode_b64(&envelope))
    }

    /// Decrypt a base64 envelope back into a UTF-8 string.
    pub fn decrypt_string(
        &self,
        envelope_b64: &str,
        password: &str,
    ) -> Result<Zeroizing<String>, CryptoError> {
        let envelope = decode_b64(envelope_b64)?;
        let plaintext = self.decrypt_with_password(&envelope, password)?;
        std::str::from_utf8(&plaintext)
            .map(|s| Zeroizing::new(s.to_string()))
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

fn split_u32(bytes: &[u8]) -> (u32, &[u8]) {
    let (head, rest) = bytes.split_at(4);
    (u32::from_le_bytes([head[0], head[1], head[2], head[3]]), rest)
}

fn derive_with(
    password: &str,
    salt: &[u8],
    time_cost: u32,
    memory_cost: u32,
    parallelism: u32,
    hash_len: usize,
) -> Result<DerivedKey, CryptoError> {
    let params = Params::new(memory_cost, time_cost, parallelism, Some(hash_len))
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut output = vec![0u8; hash_len];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut output)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    Ok(DerivedKey(output))
}

/// A derived key that automatically zeroes itself on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey(Vec<u8>);

impl DerivedKey {
    /// Get a reference to the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encode bytes as standard base64.
pub fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64.
pub fn decode_b64(text: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(text.trim())
        .map_err(|_| CryptoError::InvalidBase64)
}

/// Generate a fresh X25519 identity.
pub fn generate_identity() -> Identity {
    Identity::generate()
}

/// Public recipient string (`age1...`) for an identity.
pub fn recipient_of(identity: &Identity) -> String {
    identity.to_public().to_string()
}

/// Parse an `AGE-SECRET-KEY-1...` identity string.
pub fn parse_identity(text: &str) -> Result<Identity, CryptoError> {
    text.trim()
        .parse::<Identity>()
        .map_err(|_| CryptoError::InvalidIdentity)
}

/// Parse an `age1...` recipient string.
pub fn parse_recipient(text: &str) -> Result<age::x25519::Recipient, CryptoError> {
    text.trim()
        .parse::<age::x25519::Recipient>()
        .map_err(|_| CryptoError::InvalidRecipient(text.to_string()))
}

/// Encrypt `plaintext` so that any one of `recipients` can open it.
///
/// Fresh ephemeral key material is used on every call.
pub fn encrypt_field(plaintext: &[u8], recipients: &[String]) -> Result<Vec<u8>, CryptoError> {
    if recipients.is_empty() {
        return Err(CryptoError::NoRecipients);
    }

    let parsed = recipients
        .iter()
        .map(|key| {
            parse_recipient(key).map(|r| Box::new(r) as Box<dyn age::Recipient + Send>)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let encryptor = age::Encryptor::with_recipients(parsed).ok_or(CryptoError::NoRecipients)?;

    let mut encrypted = Vec::new();
    let mut writer = encryptor
        .wrap_output(&mut encrypted)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    writer
        .write_all(plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    writer.finish().map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(encrypted)
}

/// Open an envelope produced by [`encrypt_field`] with any matching identity.
pub fn decrypt_field(
    ciphertext: &[u8],
    identities: &[Identity],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if identities.is_empty() {
        return Err(CryptoError::DecryptionFailed);
    }

    let decryptor =
        age::Decryptor::new(ciphertext).map_err(|_| CryptoError::DecryptionFailed)?;
    let decryptor = match decryptor {
        age::Decryptor::Recipients(d) => d,
        _ => return Err(CryptoError::DecryptionFailed),
    };

    let mut reader = decryptor
        .decrypt(identities.iter().map(|i| i as &dyn age::Identity))
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let mut decrypted = Zeroizing::new(Vec::new());
    if reader.read_to_end(&mut decrypted).is_err() {
        // Drop anything read before the authentication failure.
        decrypted.zeroize();
        return Err(CryptoError::DecryptionFailed);
    }
    Ok(decrypted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> VaultCrypto {
        VaultCrypto::with_params(1, 1024, 1)
    }

    #[test]
    fn test_salt_generation() {
        let crypto = VaultCrypto::new();
        let salt1 = crypto.generate_salt();
        let salt2 = crypto.generate_salt();

        assert_eq!(salt1.len(), 16); // 128 bits
        assert_eq!(salt2.len(), 16);
        assert_ne!(salt1, salt2); // Should be random
    }

    #[test]
    fn test_password_roundtrip() {
        let crypto = fast();
        let envelope = crypto
            .encrypt_with_password(b"This is a secret message!", "test_password_123")
            .unwrap();
        let decrypted = crypto
            .decrypt_with_password(&envelope, "test_password_123")
            .unwrap();
        assert_eq!(decrypted.as_slice(), b"This is a secret message!");
    }

    #[test]
    fn test_decrypt_wrong_password() {
        let crypto = fast();
        let envelope = crypto
            .encrypt_with_password(b"Secret data", "correct_password")
            .unwrap();

        let result = crypto.decrypt_with_password(&envelope, "wrong_password");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let crypto = fast();
        let mut envelope = crypto.encrypt_with_password(b"Secret data", "pw").unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;

        let result = crypto.decrypt_with_password(&envelope, "pw");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));

        let result = crypto.decrypt_with_password(&envelope[..10], "pw");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_parameters_travel_with_envelope() {
        let envelope = fast().encrypt_with_password(b"data", "pw").unwrap();
        // A default-profile instance must still honour the light parameters.
        let decrypted = VaultCrypto::new()
            .decrypt_with_password(&envelope, "pw")
            .unwrap();
        assert_eq!(decrypted.as_slice(), b"data");
    }

    #[test]
    fn test_hostile_memory_cost_is_rejected() {
        let mut envelope = fast().encrypt_with_password(b"data", "pw").unwrap();
        envelope[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(fast().decrypt_with_password(&envelope, "pw").is_err());
    }

    #[test]
    fn test_hostile_time_and_lane_costs_are_rejected() {
        let envelope = fast().encrypt_with_password(b"data", "pw").unwrap();

        let mut slow = envelope.clone();
        slow[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            fast().decrypt_with_password(&slow, "pw"),
            Err(CryptoError::DecryptionFailed)
        ));

        let mut wide = envelope;
        wide[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            fast().decrypt_with_password(&wide, "pw"),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_key_derivation_consistency() {
        let crypto = fast();
        let salt = crypto.generate_salt();

        let key1 = crypto.derive_key("consistent_password", &salt).unwrap();
        let key2 = crypto.derive_key("consistent_password", &salt).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_string_helpers() {
        let crypto = fast();
        let encoded = crypto.encrypt_string("hunter2", "pw").unwrap();
        assert_eq!(crypto.decrypt_string(&encoded, "pw").unwrap().as_str(), "hunter2");
        assert!(crypto.decrypt_string("not base64!", "pw").is_err());
    }

    #[test]
    fn test_field_roundtrip_with_any_recipient() {
        let alice = generate_identity();
        let bob = generate_identity();
        let recipients = vec![recipient_of(&alice), recipient_of(&bob)];

        let ciphertext = encrypt_field(b"s3cret", &recipients).unwrap();

        assert_eq!(
            decrypt_field(&ciphertext, &[alice]).unwrap().as_slice(),
            b"s3cret"
        );
        assert_eq!(
            decrypt_field(&ciphertext, &[bob]).unwrap().as_slice(),
            b"s3cret"
        );
    }

    #[test]
    fn test_field_encryption_is_probabilistic() {
        let alice = generate_identity();
        let recipients = vec![recipient_of(&alice)];

        let first = encrypt_field(b"same", &recipients).unwrap();
        let second = encrypt_field(b"same", &recipients).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_field_with_foreign_identity_fails() {
        let alice = generate_identity();
        let mallory = generate_identity();
        let ciphertext = encrypt_field(b"s3cret", &[recipient_of(&alice)]).unwrap();

        let result = decrypt_field(&ciphertext, &[mallory]);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_field_tampering_fails_closed() {
        let alice = generate_identity();
        let mut ciphertext = encrypt_field(b"s3cret", &[recipient_of(&alice)]).unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;

        assert!(decrypt_field(&ciphertext, &[alice]).is_err());
    }

    #[test]
    fn test_field_requires_recipients() {
        assert!(matches!(
            encrypt_field(b"x", &[]),
            Err(CryptoError::NoRecipients)
        ));
        assert!(matches!(
            encrypt_field(b"x", &["not-a-key".to_string()]),
            Err(CryptoError::InvalidRecipient(_))
        ));
    }

    #[test]
    fn test_identity_string_roundtrip() {
        use age::secrecy::ExposeSecret;

        let identity = generate_identity();
        let text = identity.to_string();
        let parsed = parse_identity(text.expose_secret()).unwrap();
        assert_eq!(recipient_of(&parsed), recipient_of(&identity));
        assert!(parse_identity("garbage").is_err());
    }
}
