//! X25519 + Deoxys-II-256-128 asymmetric cipher family.
//!
//! Encryption is ephemeral-static Diffie-Hellman. A fresh X25519 key pair is
//! generated for every message, the symmetric key is derived from the shared
//! secret with HMAC-SHA512/256 and the message is sealed with Deoxys-II. The
//! ciphertext layout is `ephemeral public key || nonce || sealed box`.
use deoxysii::{DeoxysII, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha512_256;
use zeroize::Zeroize;

use super::{
    AsymmetricCipher, AsymmetricCipherSpi, CipherParameters, KeyGenerator,
    KeyGeneratorParameters, KeySerializer, PrivateKey, PublicKey, SecureRandom,
};
use crate::Error;

type Kdf = Hmac<Sha512_256>;

/// Domain separation context of the key derivation.
const KDF_CONTEXT: &[u8] = b"ledger-crypto/ecies: X25519-Deoxys-II-256-128";

/// Length of a raw X25519 key, in bytes.
pub const KEY_LENGTH: usize = 32;

/// Type tag of a serialized private key.
const PRIVATE_KEY_TAG: u8 = 0x01;
/// Type tag of a serialized public key.
const PUBLIC_KEY_TAG: u8 = 0x02;

/// Ciphertext overhead over the plaintext length.
pub const OVERHEAD: usize = KEY_LENGTH + NONCE_SIZE + TAG_SIZE;

/// An X25519 private key.
#[derive(Clone)]
pub struct EciesPrivateKey(x25519_dalek::StaticSecret);

impl EciesPrivateKey {
    /// Raw key bytes.
    pub fn to_bytes(&self) -> [u8; KEY_LENGTH] {
        self.0.to_bytes()
    }
}

impl From<[u8; KEY_LENGTH]> for EciesPrivateKey {
    fn from(bytes: [u8; KEY_LENGTH]) -> Self {
        EciesPrivateKey(x25519_dalek::StaticSecret::from(bytes))
    }
}

impl PrivateKey for EciesPrivateKey {
    type Public = EciesPublicKey;

    fn public_key(&self) -> EciesPublicKey {
        EciesPublicKey(x25519_dalek::PublicKey::from(&self.0))
    }
}

/// An X25519 public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EciesPublicKey(x25519_dalek::PublicKey);

impl EciesPublicKey {
    /// Raw key bytes.
    pub fn to_bytes(&self) -> [u8; KEY_LENGTH] {
        self.0.to_bytes()
    }
}

impl From<[u8; KEY_LENGTH]> for EciesPublicKey {
    fn from(bytes: [u8; KEY_LENGTH]) -> Self {
        EciesPublicKey(x25519_dalek::PublicKey::from(bytes))
    }
}

impl PublicKey for EciesPublicKey {}

/// Derives the Deoxys-II key shared by the sender and the recipient.
fn derive_symmetric_key(
    secret: &x25519_dalek::StaticSecret,
    peer: &x25519_dalek::PublicKey,
    ephemeral: &[u8; KEY_LENGTH],
    recipient: &[u8; KEY_LENGTH],
) -> Result<[u8; KEY_SIZE], Error> {
    let shared = secret.diffie_hellman(peer);

    let mut kdf = Kdf::new_from_slice(KDF_CONTEXT).map_err(|_| Error::InvalidKeyParameter)?;
    kdf.update(shared.as_bytes());
    kdf.update(ephemeral);
    kdf.update(recipient);
    drop(shared);

    let mut derived_key = [0u8; KEY_SIZE];
    let digest = kdf.finalize();
    derived_key.copy_from_slice(&digest.into_bytes()[..KEY_SIZE]);

    Ok(derived_key)
}

fn encrypt(recipient: &EciesPublicKey, msg: &[u8]) -> Result<Vec<u8>, Error> {
    let ephemeral = x25519_dalek::StaticSecret::random_from_rng(OsRng);
    let ephemeral_pk = x25519_dalek::PublicKey::from(&ephemeral).to_bytes();

    let mut key = derive_symmetric_key(
        &ephemeral,
        &recipient.0,
        &ephemeral_pk,
        &recipient.to_bytes(),
    )?;
    let d2 = DeoxysII::new(&key);
    key.zeroize();

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    let sealed = d2.seal(&nonce, msg.to_vec(), ephemeral_pk.to_vec());

    let mut ciphertext = Vec::with_capacity(KEY_LENGTH + NONCE_SIZE + sealed.len());
    ciphertext.extend_from_slice(&ephemeral_pk);
    ciphertext.extend_from_slice(&nonce);
    ciphertext.extend_from_slice(&sealed);
    Ok(ciphertext)
}

fn decrypt(private_key: &EciesPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    if ciphertext.len() < OVERHEAD {
        return Err(Error::DecryptionError);
    }
    let (ephemeral_pk, rest) = ciphertext.split_at(KEY_LENGTH);
    let (nonce, sealed) = rest.split_at(NONCE_SIZE);

    let ephemeral_pk: [u8; KEY_LENGTH] = ephemeral_pk
        .try_into()
        .map_err(|_| Error::DecryptionError)?;
    let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| Error::DecryptionError)?;

    let mut key = derive_symmetric_key(
        &private_key.0,
        &x25519_dalek::PublicKey::from(ephemeral_pk),
        &ephemeral_pk,
        &private_key.public_key().to_bytes(),
    )?;
    let d2 = DeoxysII::new(&key);
    key.zeroize();

    d2.open(&nonce, sealed.to_vec(), ephemeral_pk.to_vec())
        .map_err(|_| Error::DecryptionError)
}

/// X25519 key pair generator.
#[derive(Default)]
pub struct EciesKeyGenerator {
    rng: Option<Box<dyn SecureRandom>>,
}

impl KeyGenerator for EciesKeyGenerator {
    type PrivateKey = EciesPrivateKey;

    fn init(&mut self, params: KeyGeneratorParameters) -> Result<(), Error> {
        self.rng = Some(params.rng);
        Ok(())
    }

    fn generate_key(&mut self) -> Result<EciesPrivateKey, Error> {
        let rng = self
            .rng
            .as_mut()
            .ok_or(Error::InvalidKeyGeneratorParameter)?;

        Ok(EciesPrivateKey(
            x25519_dalek::StaticSecret::random_from_rng(&mut **rng),
        ))
    }
}

/// Asymmetric cipher of the family.
#[derive(Default)]
pub struct EciesCipher {
    params: Option<CipherParameters<EciesPrivateKey, EciesPublicKey>>,
}

impl AsymmetricCipher for EciesCipher {
    type PrivateKey = EciesPrivateKey;
    type PublicKey = EciesPublicKey;

    fn init(
        &mut self,
        params: CipherParameters<EciesPrivateKey, EciesPublicKey>,
    ) -> Result<(), Error> {
        self.params = Some(params);
        Ok(())
    }

    fn process(&self, msg: &[u8]) -> Result<Vec<u8>, Error> {
        match &self.params {
            None => Err(Error::InvalidNilKeyParameter),
            Some(CipherParameters::Encrypt(pk)) => encrypt(pk, msg),
            Some(CipherParameters::Decrypt(sk)) => decrypt(sk, msg),
        }
    }
}

/// Serializes keys as `type tag || raw key`.
#[derive(Clone, Copy, Default)]
pub struct EciesKeySerializer;

fn tagged(tag: u8, raw: [u8; KEY_LENGTH]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + KEY_LENGTH);
    out.push(tag);
    out.extend_from_slice(&raw);
    out
}

fn untag(bytes: &[u8], tag: u8, wrong_type: Error) -> Result<[u8; KEY_LENGTH], Error> {
    match bytes.first() {
        None => Err(Error::InvalidKeyParameter),
        Some(t) if *t != tag => Err(wrong_type),
        Some(_) => bytes[1..]
            .try_into()
            .map_err(|_| Error::InvalidKeyParameter),
    }
}

impl KeySerializer<EciesPrivateKey> for EciesKeySerializer {
    fn to_bytes(&self, key: &EciesPrivateKey) -> Result<Vec<u8>, Error> {
        let mut raw = key.to_bytes();
        let out = tagged(PRIVATE_KEY_TAG, raw);
        raw.zeroize();
        Ok(out)
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<EciesPrivateKey, Error> {
        let mut raw = untag(bytes, PRIVATE_KEY_TAG, Error::InvalidSecretKeyType)?;
        let key = EciesPrivateKey::from(raw);
        raw.zeroize();
        Ok(key)
    }
}

impl KeySerializer<EciesPublicKey> for EciesKeySerializer {
    fn to_bytes(&self, key: &EciesPublicKey) -> Result<Vec<u8>, Error> {
        Ok(tagged(PUBLIC_KEY_TAG, key.to_bytes()))
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<EciesPublicKey, Error> {
        untag(bytes, PUBLIC_KEY_TAG, Error::InvalidPublicKeyType).map(EciesPublicKey::from)
    }
}

/// X25519 + Deoxys-II-256-128 service provider.
#[derive(Clone, Copy, Default)]
pub struct EciesSpi {
    serializer: EciesKeySerializer,
}

impl EciesSpi {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AsymmetricCipherSpi for EciesSpi {
    type PrivateKey = EciesPrivateKey;
    type PublicKey = EciesPublicKey;
    type Cipher = EciesCipher;

    fn name(&self) -> &'static str {
        "ECIES-X25519-DEOXYSII"
    }

    fn new_asymmetric_cipher_from_private_key(
        &self,
        private_key: &EciesPrivateKey,
    ) -> Result<EciesCipher, Error> {
        let mut cipher = EciesCipher::default();
        cipher.init(CipherParameters::Decrypt(private_key.clone()))?;
        Ok(cipher)
    }

    fn new_asymmetric_cipher_from_public_key(
        &self,
        public_key: &EciesPublicKey,
    ) -> Result<EciesCipher, Error> {
        let mut cipher = EciesCipher::default();
        cipher.init(CipherParameters::Encrypt(*public_key))?;
        Ok(cipher)
    }

    fn new_private_key(&self, params: KeyGeneratorParameters) -> Result<EciesPrivateKey, Error> {
        let mut generator = EciesKeyGenerator::default();
        generator.init(params)?;
        generator.generate_key()
    }

    fn serialize_private_key(&self, private_key: &EciesPrivateKey) -> Result<Vec<u8>, Error> {
        self.serializer.to_bytes(private_key)
    }

    fn deserialize_private_key(&self, bytes: &[u8]) -> Result<EciesPrivateKey, Error> {
        self.serializer.from_bytes(bytes)
    }

    fn serialize_public_key(&self, public_key: &EciesPublicKey) -> Result<Vec<u8>, Error> {
        self.serializer.to_bytes(public_key)
    }

    fn deserialize_public_key(&self, bytes: &[u8]) -> Result<EciesPublicKey, Error> {
        self.serializer.from_bytes(bytes)
    }
}
