use crate::{Error, Result};
use aes_gcm::Aes256Gcm;
use base64::{Engine, engine::general_purpose::STANDARD};
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of the per-call initialization vector for both supported ciphers (96 bits).
pub const IV_LEN: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    #[default]
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

impl CipherAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
            Self::Aes256Gcm => "aes-256-gcm",
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chacha20-poly1305" | "chacha20poly1305" => Ok(Self::ChaCha20Poly1305),
            "aes-256-gcm" | "aes256gcm" => Ok(Self::Aes256Gcm),
            other => Err(Error::Config(format!("Unknown cipher algorithm: {}", other))),
        }
    }
}

/// Ciphertext plus the IV it was sealed with. The IV is not secret but must be
/// stored next to the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

impl Envelope {
    pub fn ciphertext_base64(&self) -> String {
        STANDARD.encode(&self.ciphertext)
    }

    pub fn iv_base64(&self) -> String {
        STANDARD.encode(&self.iv)
    }

    pub fn from_base64(ciphertext: &str, iv: &str) -> Result<Self> {
        let ciphertext = STANDARD
            .decode(ciphertext)
            .map_err(|e| Error::Decryption(format!("Invalid ciphertext encoding: {}", e)))?;
        let iv = STANDARD
            .decode(iv)
            .map_err(|e| Error::Decryption(format!("Invalid IV encoding: {}", e)))?;
        Ok(Self { ciphertext, iv })
    }
}

enum Cipher {
    ChaCha(ChaCha20Poly1305),
    Aes(Aes256Gcm),
}

/// Symmetric AEAD envelope keyed by the SHA-256 digest of a passphrase, so
/// passphrases of any length are accepted.
pub struct CipherEnvelope {
    algorithm: CipherAlgorithm,
    cipher: Cipher,
}

impl CipherEnvelope {
    pub fn new(passphrase: &str, algorithm: CipherAlgorithm) -> Self {
        let key = Sha256::digest(passphrase.as_bytes());
        let cipher = match algorithm {
            CipherAlgorithm::ChaCha20Poly1305 => {
                Cipher::ChaCha(ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key)))
            }
            CipherAlgorithm::Aes256Gcm => {
                Cipher::Aes(Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key)))
            }
        };
        Self { algorithm, cipher }
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Envelope> {
        let (iv, ciphertext) = match &self.cipher {
            Cipher::ChaCha(cipher) => {
                let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
                let sealed = cipher.encrypt(&nonce, plaintext);
                (nonce.to_vec(), sealed)
            }
            Cipher::Aes(cipher) => {
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                let sealed = cipher.encrypt(&nonce, plaintext);
                (nonce.to_vec(), sealed)
            }
        };
        let ciphertext = ciphertext.map_err(|e| Error::Encryption(e.to_string()))?;
        Ok(Envelope { ciphertext, iv })
    }

    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        if iv.len() != IV_LEN {
            return Err(Error::Decryption(format!(
                "Invalid IV length: expected {}, got {}",
                IV_LEN,
                iv.len()
            )));
        }

        let nonce = Nonce::from_slice(iv);
        let plaintext = match &self.cipher {
            Cipher::ChaCha(cipher) => cipher.decrypt(nonce, ciphertext),
            Cipher::Aes(cipher) => cipher.decrypt(aes_gcm::Nonce::from_slice(iv), ciphertext),
        };
        plaintext.map_err(|_| Error::Decryption("invalid key or corrupted data".to_string()))
    }

    pub fn open(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        self.decrypt(&envelope.ciphertext, &envelope.iv)
    }
}

impl fmt::Debug for CipherEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherEnvelope")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Lowercase hex SHA-256 of `data`; the digest behind every version hash.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
