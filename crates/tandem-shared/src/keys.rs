//! RSA-OAEP keypair primitives.
//!
//! Keys are RSA-2048 with OAEP padding over SHA-256. Public keys travel as
//! SPKI PEM (published on the profile), private keys as PKCS#8 PEM (kept in
//! local storage only). Ciphertext is base64.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::constants::{OAEP_DIGEST_SIZE, RSA_KEY_BITS};
use crate::error::KeyError;

/// Operation a key handle is presented for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    Encrypt,
    Decrypt,
}

/// One half of a keypair, tagged with what it may be used for.
#[derive(Debug, Clone)]
pub enum KeyHandle {
    Public(RsaPublicKey),
    Private(RsaPrivateKey),
}

impl KeyHandle {
    pub fn usage(&self) -> KeyUsage {
        match self {
            KeyHandle::Public(_) => KeyUsage::Encrypt,
            KeyHandle::Private(_) => KeyUsage::Decrypt,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    public: RsaPublicKey,
    private: RsaPrivateKey,
}

impl KeyPair {
    pub fn generate() -> Result<Self, KeyError> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        Ok(Self::from_private(private))
    }

    pub fn from_private(private: RsaPrivateKey) -> Self {
        Self {
            public: private.to_public_key(),
            private,
        }
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    pub fn public_handle(&self) -> KeyHandle {
        KeyHandle::Public(self.public.clone())
    }

    pub fn private_handle(&self) -> KeyHandle {
        KeyHandle::Private(self.private.clone())
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public)
    }
}

pub fn export_public_key(key: &RsaPublicKey) -> Result<String, KeyError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| KeyError::Export(e.to_string()))
}

pub fn export_private_key(key: &RsaPrivateKey) -> Result<String, KeyError> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map(|pem| pem.as_str().to_owned())
        .map_err(|e| KeyError::Export(e.to_string()))
}

/// Parse a PKCS#8 PEM private key and check it is a usable RSA-2048 key.
pub fn import_private_key(pem: &str) -> Result<RsaPrivateKey, KeyError> {
    let key = RsaPrivateKey::from_pkcs8_pem(pem.trim()).map_err(|e| KeyError::Import(e.to_string()))?;
    key.validate().map_err(|e| KeyError::Import(e.to_string()))?;
    if key.size() * 8 != RSA_KEY_BITS {
        return Err(KeyError::Import(format!(
            "expected {RSA_KEY_BITS}-bit key, got {} bits",
            key.size() * 8
        )));
    }
    Ok(key)
}

pub fn import_public_key(pem: &str) -> Result<RsaPublicKey, KeyError> {
    RsaPublicKey::from_public_key_pem(pem.trim()).map_err(|e| KeyError::Import(e.to_string()))
}

/// Whether `key` may be used for `operation`. Never fails: absent,
/// mismatched or malformed handles all yield `false`.
pub fn validate_key(key: Option<&KeyHandle>, operation: KeyUsage) -> bool {
    let Some(key) = key else {
        return false;
    };
    if key.usage() != operation {
        return false;
    }
    match key {
        KeyHandle::Public(public) => public.size() * 8 == RSA_KEY_BITS,
        KeyHandle::Private(private) => {
            private.size() * 8 == RSA_KEY_BITS && private.validate().is_ok()
        }
    }
}

/// Largest plaintext a single OAEP block can carry for our key size.
pub const fn max_plaintext_len() -> usize {
    RSA_KEY_BITS / 8 - 2 * OAEP_DIGEST_SIZE - 2
}

pub fn encrypt(plaintext: &str, key: &RsaPublicKey) -> Result<String, KeyError> {
    let max = max_plaintext_len();
    if plaintext.len() > max {
        return Err(KeyError::PlaintextTooLong {
            len: plaintext.len(),
            max,
        });
    }
    let ciphertext = key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext.as_bytes())
        .map_err(|e| KeyError::Encryption(e.to_string()))?;
    Ok(STANDARD.encode(ciphertext))
}

pub fn decrypt(ciphertext: &str, key: &RsaPrivateKey) -> Result<String, KeyError> {
    let bytes = STANDARD
        .decode(ciphertext.trim())
        .map_err(|e| KeyError::Decryption {
            cause: format!("invalid base64: {e}"),
        })?;
    let plaintext = key
        .decrypt(Oaep::new::<Sha256>(), &bytes)
        .map_err(|e| KeyError::Decryption {
            cause: e.to_string(),
        })?;
    String::from_utf8(plaintext).map_err(|e| KeyError::Decryption {
        cause: format!("plaintext is not UTF-8: {e}"),
    })
}

/// Short BLAKE3 fingerprint of a public key, for logs.
pub fn fingerprint(key: &RsaPublicKey) -> String {
    let der = key
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .unwrap_or_else(|_| key.n().to_bytes_be());
    let hash = blake3::hash(&der);
    hex::encode(&hash.as_bytes()[..8])
}
