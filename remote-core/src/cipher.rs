//! AES-128-CFB8 cipher wrapper. Treated as a black box by the rest of the
//! core: callers only rely on its length-preserving behavior and its
//! failure signal, never on anything cipher-specific.
//!
//! The key and IV are both derived once from the shared password at process
//! start and reused for every connection's whole lifetime. That is a known
//! weakness (IV reuse under CFB leaks the XOR of plaintexts at matching
//! offsets across connections) inherited from the source protocol and
//! called out in the design notes; it is kept here for wire compatibility
//! with the existing client rather than fixed unilaterally.

use aes::Aes128;
use cfb8::cipher::{AsyncStreamCipher, KeyIvInit};
use cfb8::{Decryptor, Encryptor};

pub const KEY_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 8;

type Aes128CfbEnc = Encryptor<Aes128>;
type Aes128CfbDec = Decryptor<Aes128>;

/// Password-derived key/IV pair, fixed for the process lifetime.
#[derive(Clone)]
pub struct Key {
    key: [u8; KEY_SIZE],
    iv: [u8; KEY_SIZE],
}

impl Key {
    /// Derives a key and IV from the shared password. Both are the first 16
    /// bytes of the UTF-8 password, zero-padded if the password is shorter.
    /// This mirrors the source's raw-password-as-key-material scheme; it is
    /// not a proper KDF and the password should be chosen accordingly.
    pub fn from_password(password: &str) -> Key {
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; KEY_SIZE];

        let bytes = password.as_bytes();
        let len = bytes.len().min(KEY_SIZE);
        key[..len].copy_from_slice(&bytes[..len]);
        iv[..len].copy_from_slice(&bytes[..len]);

        Key { key, iv }
    }

    #[cfg(test)]
    pub fn from_raw(key: [u8; KEY_SIZE], iv: [u8; KEY_SIZE]) -> Key {
        Key { key, iv }
    }
}

/// Encrypts `plaintext` in place into a freshly allocated ciphertext buffer.
/// CFB-8 is a byte-granular stream cipher, so the ciphertext is always
/// exactly as long as the plaintext.
pub fn encrypt(plaintext: &[u8], key: &Key) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    Aes128CfbEnc::new(&key.key.into(), &key.iv.into()).encrypt(&mut buf);
    buf
}

/// Decrypts `ciphertext` into a freshly allocated plaintext buffer. CFB-8
/// has no failure mode of its own on well-formed input of any length,
/// including zero — the frame codec is what signals `Fatal` on malformed
/// input upstream of this call.
pub fn decrypt(ciphertext: &[u8], key: &Key) -> Option<Vec<u8>> {
    let mut buf = ciphertext.to_vec();
    Aes128CfbDec::new(&key.key.into(), &key.iv.into()).decrypt(&mut buf);
    Some(buf)
}
