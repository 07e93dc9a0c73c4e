//! Deoxys-II-256-128 stream cipher family.
use deoxysii::{DeoxysII, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{SecretKey, StreamCipher, StreamCipherSpi};
use crate::Error;

/// A Deoxys-II secret key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DeoxysIISecretKey([u8; KEY_SIZE]);

impl DeoxysIISecretKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl SecretKey for DeoxysIISecretKey {}

/// Deoxys-II stream cipher.
///
/// Every sealed message is `nonce || ciphertext || tag` with a fresh random
/// nonce.
#[derive(Default)]
pub struct DeoxysIIStreamCipher {
    state: Option<(bool, DeoxysII)>,
    additional_data: Vec<u8>,
}

impl DeoxysIIStreamCipher {
    /// Bind every processed message to the given additional data.
    pub fn with_additional_data(mut self, additional_data: &[u8]) -> Self {
        self.additional_data = additional_data.to_vec();
        self
    }
}

impl StreamCipher for DeoxysIIStreamCipher {
    type SecretKey = DeoxysIISecretKey;

    fn init(&mut self, for_encryption: bool, key: &DeoxysIISecretKey) -> Result<(), Error> {
        self.state = Some((for_encryption, DeoxysII::new(&key.0)));
        Ok(())
    }

    fn process(&self, msg: &[u8]) -> Result<Vec<u8>, Error> {
        match &self.state {
            None => Err(Error::InvalidNilKeyParameter),
            Some((true, d2)) => {
                let mut nonce = [0u8; NONCE_SIZE];
                OsRng.fill_bytes(&mut nonce);

                let sealed = d2.seal(&nonce, msg.to_vec(), self.additional_data.clone());

                let mut ciphertext = Vec::with_capacity(NONCE_SIZE + sealed.len());
                ciphertext.extend_from_slice(&nonce);
                ciphertext.extend_from_slice(&sealed);
                Ok(ciphertext)
            }
            Some((false, d2)) => {
                if msg.len() < NONCE_SIZE + TAG_SIZE {
                    return Err(Error::DecryptionError);
                }
                let (nonce, sealed) = msg.split_at(NONCE_SIZE);
                let nonce: [u8; NONCE_SIZE] =
                    nonce.try_into().map_err(|_| Error::DecryptionError)?;

                d2.open(&nonce, sealed.to_vec(), self.additional_data.clone())
                    .map_err(|_| Error::DecryptionError)
            }
        }
    }
}

/// Deoxys-II-256-128 service provider.
#[derive(Clone, Copy, Default)]
pub struct DeoxysIISpi;

impl DeoxysIISpi {
    pub fn new() -> Self {
        Self
    }
}

impl StreamCipherSpi for DeoxysIISpi {
    type SecretKey = DeoxysIISecretKey;
    type Cipher = DeoxysIIStreamCipher;

    fn generate_key(&self) -> Result<DeoxysIISecretKey, Error> {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Ok(DeoxysIISecretKey(key))
    }

    fn new_secret_key(&self, raw: &[u8]) -> Result<DeoxysIISecretKey, Error> {
        let key: [u8; KEY_SIZE] = raw.try_into().map_err(|_| Error::InvalidKeyParameter)?;
        Ok(DeoxysIISecretKey(key))
    }

    fn new_stream_cipher_for_encryption(
        &self,
        key: &DeoxysIISecretKey,
    ) -> Result<DeoxysIIStreamCipher, Error> {
        let mut cipher = DeoxysIIStreamCipher::default();
        cipher.init(true, key)?;
        Ok(cipher)
    }

    fn new_stream_cipher_for_decryption(
        &self,
        key: &DeoxysIISecretKey,
    ) -> Result<DeoxysIIStreamCipher, Error> {
        let mut cipher = DeoxysIIStreamCipher::default();
        cipher.init(false, key)?;
        Ok(cipher)
    }

    fn serialize_secret_key(&self, key: &DeoxysIISecretKey) -> Result<Vec<u8>, Error> {
        Ok(key.0.to_vec())
    }

    fn deserialize_secret_key(&self, bytes: &[u8]) -> Result<DeoxysIISecretKey, Error> {
        self.new_secret_key(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_round_trip() {
        let spi = DeoxysIISpi::new();
        let (key, serialized) = spi.generate_key_and_serialize().unwrap();
        assert_eq!(serialized.len(), KEY_SIZE);

        let enc = spi.new_stream_cipher_for_encryption(&key).unwrap();
        let dec = spi
            .new_stream_cipher_for_decryption_from_serialized_key(&serialized)
            .unwrap();

        let ct = enc.process(b"stream message").unwrap();
        assert_eq!(ct.len(), NONCE_SIZE + b"stream message".len() + TAG_SIZE);
        assert_eq!(dec.process(&ct).unwrap(), b"stream message");
        assert_ne!(ct, enc.process(b"stream message").unwrap());
    }

    #[test]
    fn test_stream_failures() {
        let spi = DeoxysIISpi::new();
        let key = spi.generate_key().unwrap();
        let other = spi.generate_key().unwrap();

        let enc = spi.new_stream_cipher_for_encryption(&key).unwrap();
        let ct = enc.process(b"payload").unwrap();

        let wrong = spi.new_stream_cipher_for_decryption(&other).unwrap();
        assert_eq!(wrong.process(&ct), Err(Error::DecryptionError));

        let dec = spi.new_stream_cipher_for_decryption(&key).unwrap();
        assert_eq!(dec.process(&ct[..10]), Err(Error::DecryptionError));

        // Additional data must match.
        let bound = spi
            .new_stream_cipher_for_decryption(&key)
            .unwrap()
            .with_additional_data(b"context");
        assert_eq!(bound.process(&ct), Err(Error::DecryptionError));

        assert_eq!(
            DeoxysIIStreamCipher::default().process(b"x"),
            Err(Error::InvalidNilKeyParameter)
        );
        assert!(matches!(
            spi.deserialize_secret_key(&[0u8; 31]),
            Err(Error::InvalidKeyParameter)
        ));
    }
}
