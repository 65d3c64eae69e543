/**
 * CHIFFREMENT DES CHAMPS SENSIBLES
 *
 * RÔLE : Chiffrer/déchiffrer une valeur de configuration avec une passphrase opérateur.
 *
 * FORMAT : base64( IV aléatoire 16 octets || AES-256-CBC(texte, PKCS#7) ),
 * clé = SHA-256 de la passphrase. Compatible avec les fichiers de ferme existants.
 */

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const BLOCK: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid ciphertext length {0}")]
    Length(usize),
    #[error("bad padding (wrong passphrase?)")]
    Padding,
    #[error("decrypted value is not UTF-8 (wrong passphrase?)")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Chiffreur de champs, clé dérivée une seule fois
#[derive(Clone)]
pub struct FieldCipher {
    key: [u8; 32],
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldCipher(***)")
    }
}

impl FieldCipher {
    pub fn new(passphrase: &str) -> Self {
        Self {
            key: Sha256::digest(passphrase.as_bytes()).into(),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut iv = [0u8; BLOCK];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext =
            Aes256CbcEnc::new(&self.key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut raw = Vec::with_capacity(BLOCK + ciphertext.len());
        raw.extend_from_slice(&iv);
        raw.extend_from_slice(&ciphertext);
        STANDARD.encode(raw)
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let raw = STANDARD.decode(encoded.trim())?;
        if raw.len() < 2 * BLOCK || raw.len() % BLOCK != 0 {
            return Err(CryptoError::Length(raw.len()));
        }

        let (iv, ciphertext) = raw.split_at(BLOCK);
        let plaintext = Aes256CbcDec::new_from_slices(&self.key, iv)
            .map_err(|_| CryptoError::Length(raw.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Padding)?;

        Ok(String::from_utf8(plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_around_block_size() {
        let cipher = FieldCipher::new("correct horse");
        for len in [0, 15, 16, 17] {
            let plaintext = "x".repeat(len);
            let encrypted = cipher.encrypt(&plaintext);
            assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext, "length {}", len);
        }
    }

    #[test]
    fn test_random_iv() {
        let cipher = FieldCipher::new("pw");
        assert_ne!(cipher.encrypt("same"), cipher.encrypt("same"));
    }

    #[test]
    fn test_decrypts_existing_farm_values() {
        let cipher = FieldCipher::new("farm-passphrase");
        let value = cipher.decrypt("AAECAwQFBgcICQoLDA0OD6N4rjOjyoPWb/Pi/07EJaU=").unwrap();
        assert_eq!(value, "miner-secret");
    }

    #[test]
    fn test_wrong_passphrase_never_yields_plaintext() {
        let encrypted = FieldCipher::new("right").encrypt("miner-secret");
        match FieldCipher::new("wrong").decrypt(&encrypted) {
            Ok(value) => assert_ne!(value, "miner-secret"),
            Err(e) => assert!(matches!(e, CryptoError::Padding | CryptoError::Utf8(_))),
        }
    }

    #[test]
    fn test_malformed_input() {
        let cipher = FieldCipher::new("pw");
        assert!(matches!(cipher.decrypt("not base64 !!"), Err(CryptoError::Base64(_))));
        assert!(matches!(cipher.decrypt(&STANDARD.encode([0u8; 20])), Err(CryptoError::Length(20))));
    }

    #[test]
    fn test_debug_hides_key() {
        assert_eq!(format!("{:?}", FieldCipher::new("pw")), "FieldCipher(***)");
    }
}
