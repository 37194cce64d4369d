//! Optional envelope-at-rest encryption, gated behind the
//! `envelope-encryption` feature (§7: `DecryptionFailed`/
//! `InvalidEnvelope`/`KeyNotFound`/`InvalidKeyLength` "only for
//! envelope at rest when enabled").
//!
//! Out of scope per §1 Non-goals: any KDF. A caller supplies raw
//! 32-byte key material directly; this module only wraps it in
//! AES-256-GCM, the way §1 describes AES-GCM as "consumed as library
//! calls" rather than implemented from primitives.
//!
//! Envelope layout: magic `MENV` (4 B) + key id length (1 B) + key id
//! (UTF-8) + nonce (12 B) + AES-GCM ciphertext (tag appended by the
//! `aes-gcm` crate).

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{MascError, MascResult};

const MAGIC: &[u8; 4] = b"MENV";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// 32 bytes of AES-256-GCM key material, zeroized on drop.
pub struct EnvelopeKey {
    id: String,
    bytes: [u8; KEY_LEN],
}

impl Drop for EnvelopeKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl EnvelopeKey {
    /// Construct a key from raw bytes, identified by `id` for lookup
    /// out of a [`Keyring`]. `InvalidKeyLength` if `bytes` is not
    /// exactly 32 bytes.
    pub fn new(id: impl Into<String>, bytes: &[u8]) -> MascResult<Self> {
        if bytes.len() != KEY_LEN {
            return Err(MascError::InvalidKeyLength { got: bytes.len() });
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self { id: id.into(), bytes: key })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new_from_slice(&self.bytes).expect("key length checked at construction")
    }
}

/// A set of keys addressable by id, so a stored envelope can name
/// which key decrypts it without the caller threading one key through
/// every call site.
#[derive(Default)]
pub struct Keyring {
    keys: HashMap<String, EnvelopeKey>,
}

impl Keyring {
    /// An empty keyring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a key, indexed by its own id.
    pub fn insert(&mut self, key: EnvelopeKey) {
        self.keys.insert(key.id.clone(), key);
    }

    fn get(&self, id: &str) -> MascResult<&EnvelopeKey> {
        self.keys.get(id).ok_or(MascError::KeyNotFound)
    }
}

/// Seal `plaintext` under `key`, producing a self-describing envelope
/// that [`open`] can later decrypt given the same key loaded into a
/// [`Keyring`].
pub fn seal(key: &EnvelopeKey, plaintext: &[u8]) -> MascResult<Vec<u8>> {
    let cipher = key.cipher();
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| MascError::InvalidEnvelope("encryption failed".to_string()))?;

    let id_bytes = key.id.as_bytes();
    if id_bytes.len() > u8::MAX as usize {
        return Err(MascError::InvalidEnvelope("key id too long".to_string()));
    }

    let mut out = Vec::with_capacity(MAGIC.len() + 1 + id_bytes.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.push(id_bytes.len() as u8);
    out.extend_from_slice(id_bytes);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open an envelope produced by [`seal`], looking its key id up in
/// `keyring`. `InvalidEnvelope` for a structurally malformed buffer,
/// `KeyNotFound` if the named key isn't loaded, `DecryptionFailed` if
/// AES-GCM authentication fails (wrong key, or tampered ciphertext).
pub fn open(keyring: &Keyring, envelope: &[u8]) -> MascResult<Vec<u8>> {
    if envelope.len() < MAGIC.len() + 1 || !envelope.starts_with(MAGIC) {
        return Err(MascError::InvalidEnvelope("missing magic".to_string()));
    }
    let id_len = envelope[MAGIC.len()] as usize;
    let id_start = MAGIC.len() + 1;
    let id_end = id_start + id_len;
    let nonce_end = id_end + NONCE_LEN;
    if envelope.len() < nonce_end {
        return Err(MascError::InvalidEnvelope("truncated header".to_string()));
    }

    let key_id = std::str::from_utf8(&envelope[id_start..id_end])
        .map_err(|_| MascError::InvalidEnvelope("key id is not valid UTF-8".to_string()))?;
    let key = keyring.get(key_id)?;

    let nonce = aes_gcm::Nonce::from_slice(&envelope[id_end..nonce_end]);
    let ciphertext = &envelope[nonce_end..];

    key.cipher()
        .decrypt(nonce, ciphertext)
        .map_err(|_| MascError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(id: &str) -> EnvelopeKey {
        EnvelopeKey::new(id, &[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn seal_then_open_round_trips() {
        let key = test_key("k1");
        let mut keyring = Keyring::new();
        keyring.insert(test_key("k1"));

        let plain = b"audit payload";
        let sealed = seal(&key, plain).unwrap();
        assert!(sealed.starts_with(MAGIC));
        let opened = open(&keyring, &sealed).unwrap();
        assert_eq!(opened, plain);
    }

    #[test]
    fn open_with_unknown_key_id_is_key_not_found() {
        let key = test_key("k1");
        let sealed = seal(&key, b"x").unwrap();
        let empty_keyring = Keyring::new();
        assert!(matches!(open(&empty_keyring, &sealed), Err(MascError::KeyNotFound)));
    }

    #[test]
    fn tampered_ciphertext_fails_decryption() {
        let key = test_key("k1");
        let mut keyring = Keyring::new();
        keyring.insert(test_key("k1"));

        let mut sealed = seal(&key, b"hello world").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(matches!(open(&keyring, &sealed), Err(MascError::DecryptionFailed)));
    }

    #[test]
    fn key_construction_rejects_wrong_length() {
        let err = EnvelopeKey::new("k", &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, MascError::InvalidKeyLength { got: 3 }));
    }

    #[test]
    fn malformed_envelope_without_magic_is_invalid() {
        let empty_keyring = Keyring::new();
        assert!(matches!(
            open(&empty_keyring, b"not an envelope"),
            Err(MascError::InvalidEnvelope(_))
        ));
    }
}
