//! Cipher service-provider interfaces.
//!
//! Callers talk to an algorithm family only through these traits so that a
//! family can be swapped without touching them. Two families ship with the
//! crate: [`ecies::EciesSpi`] (asymmetric) and [`deoxysii::DeoxysIISpi`]
//! (stream).
use rand::{rngs::OsRng, CryptoRng, RngCore};

use crate::Error;

pub mod deoxysii;
pub mod ecies;

/// A cryptographically secure random source.
pub trait SecureRandom: RngCore + CryptoRng + Send {}

impl<T: RngCore + CryptoRng + Send> SecureRandom for T {}

/// Asymmetric public key.
pub trait PublicKey: Clone + Send + Sync {}

/// Asymmetric private key.
pub trait PrivateKey: Clone + Send + Sync {
    type Public: PublicKey;

    /// Return the public key corresponding to this private key.
    fn public_key(&self) -> Self::Public;
}

/// Parameters a cipher is initialised with.
///
/// The variant selects the direction of the cipher.
pub enum CipherParameters<Sk, Pk> {
    /// Encrypt to the holder of the public key.
    Encrypt(Pk),
    /// Decrypt with the private key.
    Decrypt(Sk),
}

/// Parameters a key generator is initialised with.
pub struct KeyGeneratorParameters {
    pub rng: Box<dyn SecureRandom>,
}

impl Default for KeyGeneratorParameters {
    fn default() -> Self {
        Self {
            rng: Box::new(OsRng),
        }
    }
}

/// Asymmetric key pair generator.
pub trait KeyGenerator {
    type PrivateKey: PrivateKey;

    /// Initialise the generator.
    fn init(&mut self, params: KeyGeneratorParameters) -> Result<(), Error>;

    /// Generate a new private key. Fails unless the generator was initialised.
    fn generate_key(&mut self) -> Result<Self::PrivateKey, Error>;
}

/// Asymmetric cipher.
pub trait AsymmetricCipher: Send {
    type PrivateKey: PrivateKey<Public = Self::PublicKey>;
    type PublicKey: PublicKey;

    /// Initialise the cipher for encryption or decryption.
    fn init(
        &mut self,
        params: CipherParameters<Self::PrivateKey, Self::PublicKey>,
    ) -> Result<(), Error>;

    /// Encrypt or decrypt the message depending on how the cipher was
    /// initialised.
    fn process(&self, msg: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Key (de)serializer of a single key type.
pub trait KeySerializer<K> {
    fn to_bytes(&self, key: &K) -> Result<Vec<u8>, Error>;
    fn from_bytes(&self, bytes: &[u8]) -> Result<K, Error>;
}

/// Factory surface of an asymmetric algorithm family.
pub trait AsymmetricCipherSpi: Send + Sync + 'static {
    type PrivateKey: PrivateKey<Public = Self::PublicKey>;
    type PublicKey: PublicKey;
    type Cipher: AsymmetricCipher<PrivateKey = Self::PrivateKey, PublicKey = Self::PublicKey>;

    /// Name of the algorithm family.
    fn name(&self) -> &'static str;

    /// Construct a cipher in decryption mode.
    fn new_asymmetric_cipher_from_private_key(
        &self,
        private_key: &Self::PrivateKey,
    ) -> Result<Self::Cipher, Error>;

    /// Construct a cipher in encryption mode.
    fn new_asymmetric_cipher_from_public_key(
        &self,
        public_key: &Self::PublicKey,
    ) -> Result<Self::Cipher, Error>;

    /// Construct a cipher in encryption mode from a serialized public key.
    fn new_asymmetric_cipher_from_serialized_public_key(
        &self,
        public_key: &[u8],
    ) -> Result<Self::Cipher, Error> {
        let public_key = self.deserialize_public_key(public_key)?;
        self.new_asymmetric_cipher_from_public_key(&public_key)
    }

    /// Construct a cipher in decryption mode from a serialized private key.
    fn new_asymmetric_cipher_from_serialized_private_key(
        &self,
        private_key: &[u8],
    ) -> Result<Self::Cipher, Error> {
        let private_key = self.deserialize_private_key(private_key)?;
        self.new_asymmetric_cipher_from_private_key(&private_key)
    }

    /// Generate a private key using the operating system RNG.
    fn new_default_private_key(&self) -> Result<Self::PrivateKey, Error> {
        self.new_private_key(KeyGeneratorParameters::default())
    }

    /// Generate a private key using the given parameters.
    fn new_private_key(&self, params: KeyGeneratorParameters) -> Result<Self::PrivateKey, Error>;

    fn serialize_private_key(&self, private_key: &Self::PrivateKey) -> Result<Vec<u8>, Error>;
    fn deserialize_private_key(&self, bytes: &[u8]) -> Result<Self::PrivateKey, Error>;
    fn serialize_public_key(&self, public_key: &Self::PublicKey) -> Result<Vec<u8>, Error>;
    fn deserialize_public_key(&self, bytes: &[u8]) -> Result<Self::PublicKey, Error>;
}

/// Symmetric secret key.
pub trait SecretKey: Clone + Send + Sync {}

/// Stream cipher.
pub trait StreamCipher: Send {
    type SecretKey: SecretKey;

    /// Initialise the cipher for encryption or decryption.
    fn init(&mut self, for_encryption: bool, key: &Self::SecretKey) -> Result<(), Error>;

    /// Encrypt or decrypt the message depending on how the cipher was
    /// initialised.
    fn process(&self, msg: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Factory surface of a stream cipher family.
pub trait StreamCipherSpi: Send + Sync + 'static {
    type SecretKey: SecretKey;
    type Cipher: StreamCipher<SecretKey = Self::SecretKey>;

    /// Generate a fresh random secret key.
    fn generate_key(&self) -> Result<Self::SecretKey, Error>;

    /// Generate a fresh random secret key together with its serialization.
    fn generate_key_and_serialize(&self) -> Result<(Self::SecretKey, Vec<u8>), Error> {
        let key = self.generate_key()?;
        let serialized = self.serialize_secret_key(&key)?;
        Ok((key, serialized))
    }

    /// Wrap raw key material.
    fn new_secret_key(&self, raw: &[u8]) -> Result<Self::SecretKey, Error>;

    fn new_stream_cipher_for_encryption(
        &self,
        key: &Self::SecretKey,
    ) -> Result<Self::Cipher, Error>;

    fn new_stream_cipher_for_decryption(
        &self,
        key: &Self::SecretKey,
    ) -> Result<Self::Cipher, Error>;

    fn new_stream_cipher_for_encryption_from_serialized_key(
        &self,
        key: &[u8],
    ) -> Result<Self::Cipher, Error> {
        let key = self.deserialize_secret_key(key)?;
        self.new_stream_cipher_for_encryption(&key)
    }

    fn new_stream_cipher_for_decryption_from_serialized_key(
        &self,
        key: &[u8],
    ) -> Result<Self::Cipher, Error> {
        let key = self.deserialize_secret_key(key)?;
        self.new_stream_cipher_for_decryption(&key)
    }

    fn serialize_secret_key(&self, key: &Self::SecretKey) -> Result<Vec<u8>, Error>;
    fn deserialize_secret_key(&self, bytes: &[u8]) -> Result<Self::SecretKey, Error>;
}
