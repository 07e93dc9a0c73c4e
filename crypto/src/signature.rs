//! Signature types.

use ed25519_dalek::{Signer as _, Verifier as _};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::{hash::Hash, Error};

impl_bytes!(PublicKey, 32, "An Ed25519 public key.");

impl PublicKey {
    /// Check whether the bytes form a valid curve point.
    pub fn is_valid(&self) -> bool {
        ed25519_dalek::VerifyingKey::from_bytes(&self.0).is_ok()
    }
}

/// An Ed25519 private key.
pub struct PrivateKey(pub ed25519_dalek::SigningKey);

impl PrivateKey {
    /// Generates a new private key pair.
    pub fn generate() -> Self {
        PrivateKey(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }

    /// Construct a private key from a 32-byte seed.
    pub fn from_bytes(seed: &[u8]) -> Result<Self, Error> {
        let seed: [u8; 32] = seed.try_into().map_err(|_| Error::InvalidKeyParameter)?;
        Ok(PrivateKey(ed25519_dalek::SigningKey::from_bytes(&seed)))
    }

    /// Generate a new private key from a test key seed.
    pub fn from_test_seed(seed: String) -> Self {
        let seed = Hash::digest_bytes(seed.as_bytes());
        PrivateKey(ed25519_dalek::SigningKey::from_bytes(&seed.0))
    }

    /// Returns the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }

    /// Returns the seed the key was constructed from.
    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.0.to_bytes())
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        PrivateKey(self.0.clone())
    }
}

impl Signer for PrivateKey {
    fn sign(&self, context: &[u8], message: &[u8]) -> Result<Signature, Error> {
        let digest = Hash::digest_bytes_list(&[context, message]);
        Ok(Signature(self.0.sign(digest.as_ref()).to_bytes()))
    }
}

impl_bytes!(Signature, 64, "An Ed25519 signature.");

impl Signature {
    /// Verify signature.
    pub fn verify(&self, pk: &PublicKey, context: &[u8], message: &[u8]) -> Result<(), Error> {
        let digest = Hash::digest_bytes_list(&[context, message]);

        let pk =
            ed25519_dalek::VerifyingKey::from_bytes(&pk.0).map_err(|_| Error::InvalidSignature)?;
        let sig = ed25519_dalek::Signature::from_bytes(&self.0);

        pk.verify(digest.as_ref(), &sig)
            .map_err(|_| Error::InvalidSignature)
    }
}

impl TryFrom<Vec<u8>> for Signature {
    type Error = Error;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Signature::try_from(&value[..])
    }
}

/// Signs messages under a context.
pub trait Signer: Send + Sync {
    /// Generates a signature over the context and message.
    fn sign(&self, context: &[u8], message: &[u8]) -> Result<Signature, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let sk = PrivateKey::generate();
        let pk = sk.public_key();
        assert!(pk.is_valid());

        let sig = sk.sign(b"context", b"message").unwrap();
        assert!(sig.verify(&pk, b"context", b"message").is_ok());
        assert_eq!(
            sig.verify(&pk, b"other context", b"message"),
            Err(Error::InvalidSignature)
        );
        assert_eq!(
            sig.verify(&pk, b"context", b"other message"),
            Err(Error::InvalidSignature)
        );
        assert_eq!(
            sig.verify(&PrivateKey::generate().public_key(), b"context", b"message"),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn test_seed_round_trip() {
        let sk = PrivateKey::from_test_seed("test signer".to_owned());
        let restored = PrivateKey::from_bytes(&sk.to_bytes()[..]).unwrap();
        assert_eq!(sk.public_key(), restored.public_key());

        assert!(PrivateKey::from_bytes(&[0u8; 31]).is_err());
    }
}
