//! Chaincode state encryption.
use zeroize::Zeroizing;

use crate::{
    crypto::{aes, hash, Error as CryptoError},
    error::Error,
};

const STATE_ENCRYPTION_KEY_CONTEXT: &[u8] = b"ledger-security/state: encryption key";
const STATE_MAC_KEY_CONTEXT: &[u8] = b"ledger-security/state: mac key";

/// Encrypts chaincode state under a key bound to a (deploy, execute)
/// transaction pair.
///
/// Ciphertexts are `AES-CBC(iv || body) || HMAC(ciphertext)` and are
/// authenticated before anything is decrypted.
pub struct StateEncryptor {
    encryption_key: Zeroizing<Vec<u8>>,
    mac_key: Zeroizing<Vec<u8>>,
}

impl StateEncryptor {
    /// Create an encryptor from the pair key.
    pub fn new(pair_key: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            encryption_key: Zeroizing::new(hash::hmac_aes_truncated(
                pair_key,
                STATE_ENCRYPTION_KEY_CONTEXT,
            )?),
            mac_key: Zeroizing::new(hash::hmac(pair_key, STATE_MAC_KEY_CONTEXT)?),
        })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut ciphertext = aes::cbc_pkcs7_encrypt(&self.encryption_key, plaintext)?;
        let tag = hash::hmac(&self.mac_key, &ciphertext)?;
        ciphertext.extend_from_slice(&tag);
        Ok(ciphertext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let tag_size = hash::hash_algorithm().output_size();
        if ciphertext.len() < aes::BLOCK_SIZE + tag_size {
            return Err(CryptoError::DecryptionError.into());
        }

        let (body, tag) = ciphertext.split_at(ciphertext.len() - tag_size);
        hash::hmac_verify(&self.mac_key, body, tag)?;
        aes::cbc_pkcs7_decrypt(&self.encryption_key, body)
            .map_err(|_| CryptoError::DecryptionError.into())
    }
}
