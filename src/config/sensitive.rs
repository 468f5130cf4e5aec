// src/config/sensitive.rs

//! Prefix-tagged sensitive configuration values.
//!
//! A value may be stored as plaintext (`pl:` or no prefix), locally
//! obfuscated (`obf:`, reversible with the instance secret), or encrypted
//! against the server's RSA keypair (`pkc:`). Decoding is transparent to
//! config consumers; encoding is exposed so operators can seal secrets from
//! the dashboard.

use crate::core::errors::FeedgateError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 8;

/// Desired protection level when encoding a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    Plain,
    Obfuscated,
    Encrypted,
}

/// Encodes and decodes prefix-tagged sensitive values.
pub struct SensitiveValueCodec {
    secret: [u8; 32],
    keypair: Option<RsaPrivateKey>,
}

impl SensitiveValueCodec {
    pub fn new(secret: [u8; 32], keypair: Option<RsaPrivateKey>) -> Self {
        Self { secret, keypair }
    }

    /// A codec with a freshly generated instance secret. Values obfuscated
    /// with it cannot be recovered by a different instance.
    pub fn ephemeral() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(secret, None)
    }

    /// Decodes a stored value to its plaintext.
    pub fn decode(&self, stored: &str) -> Result<String, FeedgateError> {
        if let Some(rest) = stored.strip_prefix("pl:") {
            Ok(rest.to_string())
        } else if let Some(rest) = stored.strip_prefix("obf:") {
            self.deobfuscate(rest)
        } else if let Some(rest) = stored.strip_prefix("pkc:") {
            self.decrypt(rest)
        } else {
            Ok(stored.to_string())
        }
    }

    /// Encodes a plaintext at the requested level, producing the tagged
    /// stored form.
    pub fn encode(&self, plaintext: &str, level: SecurityLevel) -> Result<String, FeedgateError> {
        match level {
            SecurityLevel::Plain => Ok(format!("pl:{plaintext}")),
            SecurityLevel::Obfuscated => Ok(format!("obf:{}", self.obfuscate(plaintext))),
            SecurityLevel::Encrypted => Ok(format!("pkc:{}", self.encrypt(plaintext)?)),
        }
    }

    fn keystream_block(&self, nonce: &[u8], counter: u32) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key size");
        mac.update(nonce);
        mac.update(&counter.to_be_bytes());
        mac.finalize().into_bytes().into()
    }

    fn xor_keystream(&self, nonce: &[u8], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for (i, chunk) in data.chunks(32).enumerate() {
            let block = self.keystream_block(nonce, i as u32);
            out.extend(chunk.iter().zip(block.iter()).map(|(d, k)| d ^ k));
        }
        out
    }

    fn obfuscate(&self, plaintext: &str) -> String {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self.xor_keystream(&nonce, plaintext.as_bytes());
        let mut payload = nonce.to_vec();
        payload.extend(ciphertext);
        BASE64.encode(payload)
    }

    fn deobfuscate(&self, encoded: &str) -> Result<String, FeedgateError> {
        let payload = BASE64.decode(encoded).map_err(|e| {
            FeedgateError::InvalidConfiguration(format!("invalid obfuscated value: {e}"))
        })?;
        if payload.len() < NONCE_LEN {
            return Err(FeedgateError::InvalidConfiguration(
                "obfuscated value is too short".to_string(),
            ));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self.xor_keystream(nonce, ciphertext);
        String::from_utf8(plaintext).map_err(|e| {
            FeedgateError::InvalidConfiguration(format!("obfuscated value is not UTF-8: {e}"))
        })
    }

    fn encrypt(&self, plaintext: &str) -> Result<String, FeedgateError> {
        let keypair = self.keypair.as_ref().ok_or_else(|| {
            FeedgateError::InvalidConfiguration(
                "pkc: values require a server keypair".to_string(),
            )
        })?;
        let public = RsaPublicKey::from(keypair);
        let ciphertext = public
            .encrypt(
                &mut rand::thread_rng(),
                Oaep::new::<Sha256>(),
                plaintext.as_bytes(),
            )
            .map_err(|e| FeedgateError::Internal(format!("RSA encryption failed: {e}")))?;
        Ok(BASE64.encode(ciphertext))
    }

    fn decrypt(&self, encoded: &str) -> Result<String, FeedgateError> {
        let keypair = self.keypair.as_ref().ok_or_else(|| {
            FeedgateError::InvalidConfiguration(
                "pkc: values require a server keypair".to_string(),
            )
        })?;
        let ciphertext = BASE64.decode(encoded).map_err(|e| {
            FeedgateError::InvalidConfiguration(format!("invalid encrypted value: {e}"))
        })?;
        let plaintext = keypair
            .decrypt(Oaep::new::<Sha256>(), &ciphertext)
            .map_err(|e| {
                FeedgateError::InvalidConfiguration(format!("RSA decryption failed: {e}"))
            })?;
        String::from_utf8(plaintext).map_err(|e| {
            FeedgateError::InvalidConfiguration(format!("decrypted value is not UTF-8: {e}"))
        })
    }
}
