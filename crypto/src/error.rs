//! Errors raised by the primitive and SPI layers.
use thiserror::Error;

/// Cryptographic error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("invalid padding")]
    InvalidPadding,
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("ciphertext too short")]
    CiphertextTooShort,
    #[error("invalid key parameter")]
    InvalidKeyParameter,
    #[error("invalid nil key parameter")]
    InvalidNilKeyParameter,
    #[error("invalid secret key type")]
    InvalidSecretKeyType,
    #[error("invalid public key type")]
    InvalidPublicKeyType,
    #[error("invalid key generator parameter")]
    InvalidKeyGeneratorParameter,
    #[error("error during encryption")]
    EncryptionError,
    #[error("error during decryption")]
    DecryptionError,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("hash algorithm already configured as {0}")]
    HashAlgorithmAlreadyConfigured(&'static str),
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(String),
}
