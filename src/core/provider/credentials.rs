//! Provider credential decryption
//!
//! Tenant credentials are stored as AES-256-GCM blobs: base64 over a
//! 12-byte nonce followed by ciphertext+tag. Decryption is a pure function
//! returning a result; the fallback-to-mock decision lives in the registry,
//! not here. Decrypted secrets are zeroized on drop and redacted from
//! `Debug` output - they must never reach logs or broadcast payloads.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const NONCE_LEN: usize = 12;

/// Errors from credential decryption.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("encryption key must be 64 hex characters (32 bytes)")]
    InvalidKey,
    #[error("credential blob is malformed: {0}")]
    MalformedBlob(String),
    #[error("credential blob failed to decrypt")]
    DecryptFailed,
    #[error("decrypted credentials are not valid JSON: {0}")]
    MalformedJson(String),
}

/// Decrypted vendor credentials.
///
/// Field meaning is vendor-specific: `account_id` is a Twilio Account SID
/// or a Plivo Auth ID; `auth_token` is the matching secret; `api_key`
/// covers key-only vendors (Ringg, Sarvam).
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("account_id", &self.account_id)
            .field("auth_token", &"<redacted>")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("phone_number", &self.phone_number)
            .finish()
    }
}

fn parse_key(key_hex: &str) -> Result<[u8; 32], CredentialError> {
    let bytes = hex::decode(key_hex).map_err(|_| CredentialError::InvalidKey)?;
    bytes.try_into().map_err(|_| CredentialError::InvalidKey)
}

/// Decrypt an encrypted credential blob.
pub fn decrypt_credentials(
    blob: &str,
    key_hex: &str,
) -> Result<ProviderCredentials, CredentialError> {
    let key_bytes = parse_key(key_hex)?;
    let raw = BASE64
        .decode(blob.trim())
        .map_err(|e| CredentialError::MalformedBlob(e.to_string()))?;
    if raw.len() <= NONCE_LEN {
        return Err(CredentialError::MalformedBlob(
            "shorter than nonce + tag".to_string(),
        ));
    }

    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| CredentialError::MalformedBlob("bad nonce".to_string()))?;
    let key = LessSafeKey::new(
        UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| CredentialError::InvalidKey)?,
    );

    let mut buffer = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut buffer)
        .map_err(|_| CredentialError::DecryptFailed)?;

    let credentials = serde_json::from_slice(plaintext)
        .map_err(|e| CredentialError::MalformedJson(e.to_string()))?;
    buffer.zeroize();
    Ok(credentials)
}

/// Encrypt credentials into the blob format accepted by
/// [`decrypt_credentials`]. Used by the admin API when a config is created
/// with plaintext credentials, and by tests.
pub fn encrypt_credentials(
    credentials: &ProviderCredentials,
    key_hex: &str,
) -> Result<String, CredentialError> {
    let key_bytes = parse_key(key_hex)?;
    let key = LessSafeKey::new(
        UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| CredentialError::InvalidKey)?,
    );

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| CredentialError::DecryptFailed)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut buffer = serde_json::to_vec(credentials)
        .map_err(|e| CredentialError::MalformedJson(e.to_string()))?;
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut buffer)
        .map_err(|_| CredentialError::DecryptFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + buffer.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&buffer);
    Ok(BASE64.encode(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "6368616e676520746869732070617373776f726420746f206120736563726574";

    fn sample() -> ProviderCredentials {
        ProviderCredentials {
            account_id: "AC0123456789".to_string(),
            auth_token: "super-secret-token".to_string(),
            api_key: None,
            phone_number: Some("+14155550100".to_string()),
        }
    }

    #[test]
    fn test_round_trip() {
        let blob = encrypt_credentials(&sample(), KEY).unwrap();
        let decrypted = decrypt_credentials(&blob, KEY).unwrap();
        assert_eq!(decrypted.account_id, "AC0123456789");
        assert_eq!(decrypted.auth_token, "super-secret-token");
        assert_eq!(decrypted.phone_number.as_deref(), Some("+14155550100"));
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let blob = encrypt_credentials(&sample(), KEY).unwrap();
        let other_key = "aa".repeat(32);
        let err = decrypt_credentials(&blob, &other_key).unwrap_err();
        assert!(matches!(err, CredentialError::DecryptFailed));
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(matches!(
            decrypt_credentials("ignored", "abcd").unwrap_err(),
            CredentialError::InvalidKey
        ));
        assert!(matches!(
            decrypt_credentials("ignored", "zz").unwrap_err(),
            CredentialError::InvalidKey
        ));
    }

    #[test]
    fn test_garbage_blob_rejected() {
        assert!(matches!(
            decrypt_credentials("!!not-base64!!", KEY).unwrap_err(),
            CredentialError::MalformedBlob(_)
        ));
        // Valid base64 but too short to hold nonce + tag
        assert!(matches!(
            decrypt_credentials("AAAA", KEY).unwrap_err(),
            CredentialError::MalformedBlob(_)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let blob = encrypt_credentials(&sample(), KEY).unwrap();
        let mut raw = BASE64.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = BASE64.encode(raw);
        assert!(matches!(
            decrypt_credentials(&tampered, KEY).unwrap_err(),
            CredentialError::DecryptFailed
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", sample());
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("<redacted>"));
    }
}
